//! 投资组合与交易流水服务

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use crate::db::{decimal_col, enum_col, Database};
use crate::error::{AppError, AppResult};
use crate::models::{
    local_today, Currency, Dashboard, NewPortfolio, NewTransaction, Portfolio, PortfolioDetail,
    PortfolioSnapshot, PricePoint, PriceSnapshot, Transaction, TxType,
};
use crate::services::common::{check_amount, truncate_chars};
use crate::services::{asset_service, price_service, reco_engine, simulator_service};

/// 默认组合名称
pub const DEFAULT_PORTFOLIO_NAME: &str = "Mi Portafolio";

pub(crate) fn portfolio_from_row(row: &SqliteRow) -> Result<Portfolio, sqlx::Error> {
    Ok(Portfolio {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        base_currency: enum_col(row, "base_currency")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<Transaction, sqlx::Error> {
    Ok(Transaction {
        id: row.try_get("id")?,
        portfolio_id: row.try_get("portfolio_id")?,
        asset_id: row.try_get("asset_id")?,
        symbol: row.try_get("symbol")?,
        tx_type: enum_col(row, "tx_type")?,
        quantity: decimal_col(row, "quantity")?,
        price: decimal_col(row, "price")?,
        fee: decimal_col(row, "fee")?,
        tx_date: row.try_get("tx_date")?,
        note: row.try_get("note")?,
        created_at: row.try_get("created_at")?,
    })
}

/// 列出用户的组合（最新创建在前）
pub async fn list_portfolios(db: &Database, owner_id: i64, limit: Option<i64>) -> AppResult<Vec<Portfolio>> {
    let rows = sqlx::query(
        "SELECT * FROM portfolios WHERE owner_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
    )
    .bind(owner_id)
    .bind(limit.unwrap_or(-1))
    .fetch_all(db.pool())
    .await?;
    Ok(rows.iter().map(portfolio_from_row).collect::<Result<_, _>>()?)
}

/// 新建组合
pub async fn create_portfolio(db: &Database, owner_id: i64, req: &NewPortfolio) -> AppResult<Portfolio> {
    let mut conn = db.pool().acquire().await?;
    create_portfolio_in(&mut *conn, owner_id, req).await
}

pub(crate) async fn create_portfolio_in(
    conn: &mut SqliteConnection,
    owner_id: i64,
    req: &NewPortfolio,
) -> AppResult<Portfolio> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("组合名称不能为空"));
    }
    insert_portfolio(conn, owner_id, &truncate_chars(name, 120), req.base_currency.unwrap_or_default()).await
}

async fn insert_portfolio(
    conn: &mut SqliteConnection,
    owner_id: i64,
    name: &str,
    currency: Currency,
) -> AppResult<Portfolio> {
    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO portfolios (owner_id, name, base_currency, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(owner_id)
    .bind(name)
    .bind(currency.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    get_portfolio_in(conn, owner_id, id).await
}

/// 获取组合；不属于该用户时与不存在一样返回 NotFound
pub async fn get_portfolio(db: &Database, owner_id: i64, id: i64) -> AppResult<Portfolio> {
    let mut conn = db.pool().acquire().await?;
    get_portfolio_in(&mut *conn, owner_id, id).await
}

async fn get_portfolio_in(conn: &mut SqliteConnection, owner_id: i64, id: i64) -> AppResult<Portfolio> {
    let row = sqlx::query("SELECT * FROM portfolios WHERE id = ? AND owner_id = ?")
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref()
        .map(portfolio_from_row)
        .transpose()?
        .ok_or_else(|| AppError::not_found(format!("组合 {} 不存在", id)))
}

/// 用户的默认组合：id 最小的组合，没有则新建 "Mi Portafolio"
pub async fn default_portfolio(db: &Database, owner_id: i64) -> AppResult<Portfolio> {
    let row = sqlx::query("SELECT * FROM portfolios WHERE owner_id = ? ORDER BY id LIMIT 1")
        .bind(owner_id)
        .fetch_optional(db.pool())
        .await?;
    match row {
        Some(row) => Ok(portfolio_from_row(&row)?),
        None => {
            let mut conn = db.pool().acquire().await?;
            insert_portfolio(&mut *conn, owner_id, DEFAULT_PORTFOLIO_NAME, Currency::Ars).await
        }
    }
}

/// 组合流水（交易日期倒序，同日按 id 倒序）
pub async fn list_transactions(db: &Database, portfolio_id: i64, limit: Option<i64>) -> AppResult<Vec<Transaction>> {
    let rows = sqlx::query(
        r#"
        SELECT t.*, a.symbol AS symbol
        FROM transactions t JOIN assets a ON a.id = t.asset_id
        WHERE t.portfolio_id = ?
        ORDER BY t.tx_date DESC, t.id DESC
        LIMIT ?
        "#,
    )
    .bind(portfolio_id)
    .bind(limit.unwrap_or(-1))
    .fetch_all(db.pool())
    .await?;
    Ok(rows.iter().map(transaction_from_row).collect::<Result<_, _>>()?)
}

/// 新增流水
pub async fn add_transaction(
    db: &Database,
    owner_id: i64,
    portfolio_id: i64,
    req: &NewTransaction,
) -> AppResult<Transaction> {
    let mut conn = db.pool().acquire().await?;
    add_transaction_in(&mut *conn, owner_id, portfolio_id, req).await
}

pub(crate) async fn add_transaction_in(
    conn: &mut SqliteConnection,
    owner_id: i64,
    portfolio_id: i64,
    req: &NewTransaction,
) -> AppResult<Transaction> {
    let portfolio = get_portfolio_in(conn, owner_id, portfolio_id).await?;
    let asset = asset_service::get_asset_in(conn, req.asset_id).await?;

    let quantity = check_amount(req.quantity.unwrap_or(Decimal::ZERO), 6, "quantity")?;
    let price = check_amount(req.price.unwrap_or(Decimal::ZERO), 6, "price")?;
    let fee = check_amount(req.fee.unwrap_or(Decimal::ZERO), 6, "fee")?;
    if quantity.is_sign_negative() || price.is_sign_negative() || fee.is_sign_negative() {
        return Err(AppError::bad_request("数量、价格与费用不能为负数"));
    }

    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO transactions
            (portfolio_id, asset_id, tx_type, quantity, price, fee, tx_date, note, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(portfolio.id)
    .bind(asset.id)
    .bind(req.tx_type.as_str())
    .bind(quantity.to_string())
    .bind(price.to_string())
    .bind(fee.to_string())
    .bind(req.tx_date.unwrap_or_else(local_today))
    .bind(truncate_chars(req.note.as_deref().unwrap_or("").trim(), 240))
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    let row = sqlx::query(
        "SELECT t.*, a.symbol AS symbol FROM transactions t JOIN assets a ON a.id = t.asset_id WHERE t.id = ?",
    )
    .bind(id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(transaction_from_row(&row)?)
}

/// 组合详情：流水 + 最近 50 条机会
pub async fn portfolio_detail(db: &Database, owner_id: i64, id: i64) -> AppResult<PortfolioDetail> {
    let portfolio = get_portfolio(db, owner_id, id).await?;
    let transactions = list_transactions(db, portfolio.id, None).await?;
    let recommendations = reco_engine::list_for_portfolio(db, portfolio.id, 50).await?;
    Ok(PortfolioDetail {
        portfolio,
        transactions,
        recommendations,
    })
}

/// 首页：最近 5 个组合与 5 个模拟
pub async fn dashboard(db: &Database, owner_id: i64) -> AppResult<Dashboard> {
    Ok(Dashboard {
        portfolios: list_portfolios(db, owner_id, Some(5)).await?,
        simulations: simulator_service::list_simulations(db, owner_id, Some(5)).await?,
    })
}

/// 由最近 200 条流水推算持仓与现金
pub async fn portfolio_snapshot(db: &Database, portfolio: &Portfolio) -> AppResult<PortfolioSnapshot> {
    let txs = list_transactions(db, portfolio.id, Some(200)).await?;
    let mut snapshot = PortfolioSnapshot {
        id: portfolio.id,
        name: portfolio.name.clone(),
        base_currency: portfolio.base_currency.to_string(),
        last_tx_count: txs.len(),
        ..Default::default()
    };

    for tx in &txs {
        let qty = tx.quantity.to_f64().unwrap_or(0.0);
        let price = tx.price.to_f64().unwrap_or(0.0);
        match tx.tx_type {
            TxType::Buy => *snapshot.holdings.entry(tx.symbol.clone()).or_insert(0.0) += qty,
            TxType::Sell => *snapshot.holdings.entry(tx.symbol.clone()).or_insert(0.0) -= qty,
            TxType::Deposit => *snapshot.cash.entry(tx.symbol.clone()).or_insert(0.0) += price,
            TxType::Withdraw => *snapshot.cash.entry(tx.symbol.clone()).or_insert(0.0) -= price,
            TxType::Dividend | TxType::Fee => {}
        }
    }

    Ok(snapshot)
}

/// 组合内各代码的最新收盘价；`limit` 限制代码个数（按代码排序）
pub async fn price_snapshot(db: &Database, portfolio_id: i64, limit: Option<i64>) -> AppResult<PriceSnapshot> {
    let symbols: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT a.symbol FROM transactions t JOIN assets a ON a.id = t.asset_id
        WHERE t.portfolio_id = ? ORDER BY a.symbol LIMIT ?
        "#,
    )
    .bind(portfolio_id)
    .bind(limit.unwrap_or(-1))
    .fetch_all(db.pool())
    .await?;

    let mut snapshot = PriceSnapshot::new();
    for symbol in symbols {
        if let Some(p) = price_service::latest_price(db, &symbol).await? {
            snapshot.insert(
                symbol,
                PricePoint {
                    date: p.date,
                    close: p.close.to_f64().unwrap_or(0.0),
                },
            );
        }
    }
    Ok(snapshot)
}
