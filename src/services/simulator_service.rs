//! 模拟交易沙盒（仅用于训练，不涉及真实资金）

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use crate::db::{decimal_col, enum_col, Database};
use crate::error::{AppError, AppResult};
use crate::models::{
    NewSimulation, PositionRow, SimPosition, SimTrade, Side, Simulation, SimulationDetail,
    TradeRequest,
};
use crate::services::common::{check_amount, fits_digits, normalize_symbol, truncate_chars};
use crate::services::{asset_service, price_engine, price_service};

/// 新建模拟的默认虚拟资金
const DEFAULT_CASH: i64 = 1_000_000;
/// 默认随机种子
const DEFAULT_SEED: i64 = 12345;
/// 没有历史价格时的基准价
const DEFAULT_BASE: i64 = 100;
/// 单次最多推进天数
const MAX_ADVANCE_DAYS: i64 = 365;

fn min_unit() -> Decimal {
    Decimal::new(1, 6)
}

fn simulation_from_row(row: &SqliteRow) -> Result<Simulation, sqlx::Error> {
    Ok(Simulation {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        preset: enum_col(row, "preset")?,
        virtual_cash: decimal_col(row, "virtual_cash")?,
        current_day: row.try_get("current_day")?,
        seed: row.try_get("seed")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn position_from_row(row: &SqliteRow) -> Result<SimPosition, sqlx::Error> {
    Ok(SimPosition {
        symbol: row.try_get("symbol")?,
        quantity: decimal_col(row, "quantity")?,
        avg_price: decimal_col(row, "avg_price")?,
    })
}

fn trade_from_row(row: &SqliteRow) -> Result<SimTrade, sqlx::Error> {
    Ok(SimTrade {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        side: enum_col(row, "side")?,
        quantity: decimal_col(row, "quantity")?,
        price: decimal_col(row, "price")?,
        day: row.try_get("day")?,
        created_at: row.try_get("created_at")?,
    })
}

/// 列出用户的模拟（最新在前）
pub async fn list_simulations(db: &Database, owner_id: i64, limit: Option<i64>) -> AppResult<Vec<Simulation>> {
    let rows = sqlx::query(
        "SELECT * FROM simulations WHERE owner_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
    )
    .bind(owner_id)
    .bind(limit.unwrap_or(-1))
    .fetch_all(db.pool())
    .await?;
    Ok(rows.iter().map(simulation_from_row).collect::<Result<_, _>>()?)
}

pub async fn create_simulation(db: &Database, owner_id: i64, req: &NewSimulation) -> AppResult<Simulation> {
    let mut conn = db.pool().acquire().await?;
    create_simulation_in(&mut *conn, owner_id, req).await
}

pub(crate) async fn create_simulation_in(
    conn: &mut SqliteConnection,
    owner_id: i64,
    req: &NewSimulation,
) -> AppResult<Simulation> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("模拟名称不能为空"));
    }
    let cash = check_amount(req.virtual_cash.unwrap_or_else(|| Decimal::from(DEFAULT_CASH)), 2, "virtual_cash")?;
    if cash.is_sign_negative() {
        return Err(AppError::bad_request("虚拟资金不能为负数"));
    }

    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO simulations (owner_id, name, preset, virtual_cash, current_day, seed, created_at, updated_at)
        VALUES (?, ?, ?, ?, 0, ?, ?, ?)
        "#,
    )
    .bind(owner_id)
    .bind(truncate_chars(name, 120))
    .bind(req.preset.unwrap_or_default().as_str())
    .bind(cash.to_string())
    .bind(req.seed.unwrap_or(DEFAULT_SEED))
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    log::info!("用户 {} 新建模拟 {}", owner_id, id);
    get_simulation_in(conn, owner_id, id).await
}

/// 获取模拟；不属于该用户时返回 NotFound
pub async fn get_simulation(db: &Database, owner_id: i64, id: i64) -> AppResult<Simulation> {
    let mut conn = db.pool().acquire().await?;
    get_simulation_in(&mut *conn, owner_id, id).await
}

async fn get_simulation_in(conn: &mut SqliteConnection, owner_id: i64, id: i64) -> AppResult<Simulation> {
    let row = sqlx::query("SELECT * FROM simulations WHERE id = ? AND owner_id = ?")
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref()
        .map(simulation_from_row)
        .transpose()?
        .ok_or_else(|| AppError::not_found(format!("模拟 {} 不存在", id)))
}

pub async fn list_positions(db: &Database, sim_id: i64) -> AppResult<Vec<SimPosition>> {
    let rows = sqlx::query("SELECT * FROM sim_positions WHERE simulation_id = ? ORDER BY symbol")
        .bind(sim_id)
        .fetch_all(db.pool())
        .await?;
    Ok(rows.iter().map(position_from_row).collect::<Result<_, _>>()?)
}

/// 成交记录（最新在前）
pub async fn list_trades(db: &Database, sim_id: i64, limit: Option<i64>) -> AppResult<Vec<SimTrade>> {
    let rows = sqlx::query("SELECT * FROM sim_trades WHERE simulation_id = ? ORDER BY id DESC LIMIT ?")
        .bind(sim_id)
        .bind(limit.unwrap_or(-1))
        .fetch_all(db.pool())
        .await?;
    Ok(rows.iter().map(trade_from_row).collect::<Result<_, _>>()?)
}

fn engine_price(sim: &Simulation, symbol: &str, base: Decimal) -> Decimal {
    let seed = if sim.seed == 0 { 1 } else { sim.seed };
    price_engine::price_for(symbol, sim.current_day, seed, base)
}

/// 当前模拟日的价格：以最新上传收盘价（没有则 100）为基准
pub async fn current_price(db: &Database, sim: &Simulation, symbol: &str) -> AppResult<Decimal> {
    let symbol = normalize_symbol(symbol);
    let base = price_service::latest_price(db, &symbol)
        .await?
        .map(|p| p.close)
        .unwrap_or_else(|| Decimal::from(DEFAULT_BASE));
    Ok(engine_price(sim, &symbol, base))
}

/// 模拟详情：按当前价估值
pub async fn simulation_detail(db: &Database, owner_id: i64, id: i64) -> AppResult<SimulationDetail> {
    let simulation = get_simulation(db, owner_id, id).await?;

    let mut rows = Vec::new();
    let mut positions_value = Decimal::ZERO;
    for pos in list_positions(db, simulation.id).await? {
        let price = current_price(db, &simulation, &pos.symbol).await?;
        let value = pos
            .quantity
            .checked_mul(price)
            .and_then(|v| positions_value.checked_add(v).map(|total| (v, total)))
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("模拟 {} 估值溢出", simulation.id)))?;
        positions_value = value.1;
        let value = value.0;
        rows.push(PositionRow {
            symbol: pos.symbol,
            quantity: pos.quantity,
            avg_price: pos.avg_price,
            price,
            value,
        });
    }

    let trades = list_trades(db, simulation.id, Some(200)).await?;
    let cash = simulation.virtual_cash;
    let total_value = cash
        .checked_add(positions_value)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("模拟 {} 估值溢出", simulation.id)))?;
    Ok(SimulationDetail {
        total_value,
        cash,
        rows,
        trades,
        simulation,
    })
}

fn out_of_range() -> AppError {
    AppError::bad_request("金额超出范围（最多 18 位数字）")
}

/// 下单
///
/// 事务的第一条语句就是对模拟的写入，先取得写锁再读取持仓与资金，
/// 并发下单按顺序执行，不会基于过期的余额判断。
pub async fn trade(db: &Database, owner_id: i64, sim_id: i64, req: &TradeRequest) -> AppResult<SimTrade> {
    let symbol = normalize_symbol(&req.symbol);
    if !asset_service::is_valid_symbol(&symbol) {
        return Err(AppError::bad_request(format!("无效的代码: {}", req.symbol)));
    }
    let qty = check_amount(req.quantity, 6, "quantity")?;
    if qty < min_unit() {
        return Err(AppError::bad_request("数量至少为 0.000001"));
    }
    let explicit_price = match req.price {
        Some(p) if p < min_unit() => return Err(AppError::bad_request("价格至少为 0.000001")),
        Some(p) => Some(check_amount(p, 6, "price")?),
        None => None,
    };

    let now = Utc::now();
    let mut tx = db.pool().begin().await?;

    let locked = sqlx::query("UPDATE simulations SET updated_at = ? WHERE id = ? AND owner_id = ?")
        .bind(now)
        .bind(sim_id)
        .bind(owner_id)
        .execute(&mut *tx)
        .await?;
    if locked.rows_affected() == 0 {
        return Err(AppError::not_found(format!("模拟 {} 不存在", sim_id)));
    }

    let sim = get_simulation_in(&mut *tx, owner_id, sim_id).await?;
    let px = match explicit_price {
        Some(p) => p,
        None => {
            let base = price_service::latest_price_in(&mut *tx, &symbol)
                .await?
                .map(|p| p.close)
                .unwrap_or_else(|| Decimal::from(DEFAULT_BASE));
            engine_price(&sim, &symbol, base)
        }
    };

    let existing = sqlx::query("SELECT * FROM sim_positions WHERE simulation_id = ? AND symbol = ?")
        .bind(sim.id)
        .bind(&symbol)
        .fetch_optional(&mut *tx)
        .await?;
    let pos = match existing {
        Some(row) => position_from_row(&row)?,
        None => SimPosition {
            symbol: symbol.clone(),
            quantity: Decimal::ZERO,
            avg_price: Decimal::ZERO,
        },
    };

    let notional = qty.checked_mul(px).ok_or_else(out_of_range)?;
    let (new_qty, new_avg, new_cash) = match req.side {
        Side::Buy => {
            if sim.virtual_cash < notional {
                return Err(AppError::bad_request("模拟资金不足"));
            }
            let new_qty = pos.quantity.checked_add(qty).ok_or_else(out_of_range)?;
            // 加权平均成本
            let avg = if pos.quantity > Decimal::ZERO && pos.avg_price > Decimal::ZERO {
                pos.quantity
                    .checked_mul(pos.avg_price)
                    .and_then(|cost| cost.checked_add(notional))
                    .and_then(|cost| cost.checked_div(new_qty))
                    .ok_or_else(out_of_range)?
                    .round_dp_with_strategy(6, RoundingStrategy::MidpointAwayFromZero)
            } else {
                px
            };
            (new_qty, avg, sim.virtual_cash - notional)
        }
        Side::Sell => {
            if pos.quantity < qty {
                return Err(AppError::bad_request("卖出数量超过持仓"));
            }
            let remaining = pos.quantity - qty;
            let cash = sim.virtual_cash.checked_add(notional).ok_or_else(out_of_range)?;
            if remaining <= Decimal::ZERO {
                (Decimal::ZERO, Decimal::ZERO, cash)
            } else {
                (remaining, pos.avg_price, cash)
            }
        }
    };
    let new_cash = new_cash.round_dp(2);
    if !fits_digits(new_qty, 6) || !fits_digits(new_cash, 2) {
        return Err(out_of_range());
    }

    sqlx::query(
        r#"
        INSERT INTO sim_positions (simulation_id, symbol, quantity, avg_price, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (simulation_id, symbol)
        DO UPDATE SET quantity = excluded.quantity, avg_price = excluded.avg_price, updated_at = excluded.updated_at
        "#,
    )
    .bind(sim.id)
    .bind(&symbol)
    .bind(new_qty.to_string())
    .bind(new_avg.to_string())
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE simulations SET virtual_cash = ?, updated_at = ? WHERE id = ?")
        .bind(new_cash.to_string())
        .bind(now)
        .bind(sim.id)
        .execute(&mut *tx)
        .await?;

    let trade_id = sqlx::query(
        r#"
        INSERT INTO sim_trades (simulation_id, symbol, side, quantity, price, day, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(sim.id)
    .bind(&symbol)
    .bind(req.side.as_str())
    .bind(qty.to_string())
    .bind(px.to_string())
    .bind(sim.current_day)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    tx.commit().await?;

    log::info!("模拟 {} {} {} x {} @ {}", sim.id, req.side, symbol, qty, px);
    Ok(SimTrade {
        id: trade_id,
        symbol,
        side: req.side,
        quantity: qty,
        price: px,
        day: sim.current_day,
        created_at: now,
    })
}

/// 推进模拟日（1..=365）
pub async fn advance(db: &Database, owner_id: i64, sim_id: i64, days: i64) -> AppResult<Simulation> {
    if !(1..=MAX_ADVANCE_DAYS).contains(&days) {
        return Err(AppError::bad_request("推进天数必须在 1 到 365 之间"));
    }
    let sim = get_simulation(db, owner_id, sim_id).await?;
    sqlx::query("UPDATE simulations SET current_day = current_day + ?, updated_at = ? WHERE id = ?")
        .bind(days)
        .bind(Utc::now())
        .bind(sim.id)
        .execute(db.pool())
        .await?;
    get_simulation(db, owner_id, sim.id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Preset;
    use crate::services::portfolio_service::tests::{dec, setup};

    async fn new_sim(db: &Database, uid: i64, cash: &str) -> Simulation {
        create_simulation(
            db,
            uid,
            &NewSimulation {
                name: "Entrenamiento".into(),
                preset: None,
                virtual_cash: Some(dec(cash)),
                seed: None,
            },
        )
        .await
        .unwrap()
    }

    fn order(symbol: &str, side: Side, qty: &str, price: Option<&str>) -> TradeRequest {
        TradeRequest {
            symbol: symbol.into(),
            side,
            quantity: dec(qty),
            price: price.map(dec),
        }
    }

    #[tokio::test]
    async fn test_create_defaults() {
        let (db, uid) = setup().await;
        let sim = create_simulation(
            &db,
            uid,
            &NewSimulation { name: "S".into(), preset: None, virtual_cash: None, seed: None },
        )
        .await
        .unwrap();
        assert_eq!(sim.preset, Preset::Bal);
        assert_eq!(sim.virtual_cash, Decimal::from(1_000_000));
        assert_eq!(sim.seed, 12345);
        assert_eq!(sim.current_day, 0);
    }

    #[tokio::test]
    async fn test_buy_weighted_average_and_sell() {
        let (db, uid) = setup().await;
        let sim = new_sim(&db, uid, "1000").await;

        trade(&db, uid, sim.id, &order("aapl", Side::Buy, "2", Some("100"))).await.unwrap();
        trade(&db, uid, sim.id, &order("AAPL", Side::Buy, "2", Some("200"))).await.unwrap();

        let pos = list_positions(&db, sim.id).await.unwrap();
        assert_eq!(pos.len(), 1);
        assert_eq!(pos[0].quantity, Decimal::from(4));
        assert_eq!(pos[0].avg_price, Decimal::from(150));
        assert_eq!(get_simulation(&db, uid, sim.id).await.unwrap().virtual_cash, Decimal::from(400));

        // 卖出超过持仓
        let err = trade(&db, uid, sim.id, &order("AAPL", Side::Sell, "5", Some("100")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        // 全部卖出后数量与均价归零
        trade(&db, uid, sim.id, &order("AAPL", Side::Sell, "4", Some("110"))).await.unwrap();
        let pos = list_positions(&db, sim.id).await.unwrap();
        assert_eq!(pos[0].quantity, Decimal::ZERO);
        assert_eq!(pos[0].avg_price, Decimal::ZERO);
        assert_eq!(get_simulation(&db, uid, sim.id).await.unwrap().virtual_cash, Decimal::from(840));

        let trades = list_trades(&db, sim.id, None).await.unwrap();
        assert_eq!(trades.len(), 3);
        assert_eq!(trades[0].side, Side::Sell);
    }

    #[tokio::test]
    async fn test_buy_insufficient_cash() {
        let (db, uid) = setup().await;
        let sim = new_sim(&db, uid, "100").await;
        let err = trade(&db, uid, sim.id, &order("X", Side::Buy, "2", Some("60")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(list_trades(&db, sim.id, None).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_buys_cannot_overspend() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("sim.db").display());
        let db = Database::new(&url, 5).await.unwrap();
        let auth = crate::services::auth_service::AuthService::new(
            db.clone(),
            crate::config::SecurityConfig::default(),
        );
        let uid = auth.create_user("ana", "", "pw", false).await.unwrap().id;
        let sim_id = new_sim(&db, uid, "100").await.id;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                tokio::spawn(async move { trade(&db, uid, sim_id, &order("SPY", Side::Buy, "1", Some("60"))).await })
            })
            .collect();
        let mut ok = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert!(matches!(e, AppError::BadRequest(_)), "{:?}", e),
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(get_simulation(&db, uid, sim_id).await.unwrap().virtual_cash, Decimal::from(40));
        assert_eq!(list_positions(&db, sim_id).await.unwrap()[0].quantity, Decimal::ONE);
        assert_eq!(list_trades(&db, sim_id, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_order_is_rejected() {
        let (db, uid) = setup().await;
        let sim = new_sim(&db, uid, "1000").await;
        for (qty, price) in [("1000000000000000", "1000000000000000"), ("1", "0.0000001")] {
            let err = trade(&db, uid, sim.id, &order("SPY", Side::Buy, qty, Some(price)))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)));
        }
        let err = create_simulation(
            &db,
            uid,
            &NewSimulation {
                name: "S".into(),
                preset: None,
                virtual_cash: Some(dec("100000000000000000")),
                seed: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(list_trades(&db, sim.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_quantity_and_price() {
        let (db, uid) = setup().await;
        let sim = new_sim(&db, uid, "100").await;
        assert!(trade(&db, uid, sim.id, &order("X", Side::Buy, "0", None)).await.is_err());
        assert!(trade(&db, uid, sim.id, &order("X", Side::Buy, "1", Some("0"))).await.is_err());
    }

    #[tokio::test]
    async fn test_trade_uses_engine_price() {
        let (db, uid) = setup().await;
        let sim = new_sim(&db, uid, "100000").await;
        let t = trade(&db, uid, sim.id, &order("SPY", Side::Buy, "1", None)).await.unwrap();
        let expected = price_engine::price_for("SPY", 0, 12345, Decimal::from(100));
        assert_eq!(t.price, expected);
        assert_eq!(t.day, 0);
    }

    #[tokio::test]
    async fn test_advance_and_detail() {
        let (db, uid) = setup().await;
        let sim = new_sim(&db, uid, "1000").await;
        trade(&db, uid, sim.id, &order("SPY", Side::Buy, "1", Some("100"))).await.unwrap();

        assert!(advance(&db, uid, sim.id, 0).await.is_err());
        assert!(advance(&db, uid, sim.id, 366).await.is_err());
        let sim = advance(&db, uid, sim.id, 3).await.unwrap();
        assert_eq!(sim.current_day, 3);

        let detail = simulation_detail(&db, uid, sim.id).await.unwrap();
        let px = price_engine::price_for("SPY", 3, 12345, Decimal::from(100));
        assert_eq!(detail.rows[0].price, px);
        assert_eq!(detail.cash, Decimal::from(900));
        assert_eq!(detail.total_value, Decimal::from(900) + px);
    }

    #[tokio::test]
    async fn test_other_owner_not_found() {
        let (db, uid) = setup().await;
        let sim = new_sim(&db, uid, "1000").await;
        let err = simulation_detail(&db, uid + 1, sim.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
