//! JSON 备份导出与恢复

use chrono::Utc;
use sqlx::sqlite::SqliteConnection;

use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::models::{
    Backup, BackupAsset, BackupPortfolio, BackupPosition, BackupPrice, BackupRecommendation,
    BackupSimulation, BackupTrade, BackupTransaction, NewAsset, NewPortfolio, NewRecommendation,
    NewSimulation, NewTransaction, RestoreSummary, BACKUP_VERSION,
};
use crate::services::common::{check_amount, normalize_symbol};
use crate::services::{
    asset_service, portfolio_service, price_service, reco_engine, simulator_service,
};

/// 导出当前用户的数据（资产与价格为全局数据，一并导出）
pub async fn export(db: &Database, owner_id: i64) -> AppResult<Backup> {
    let assets = asset_service::list_assets(db)
        .await?
        .into_iter()
        .map(|a| BackupAsset {
            symbol: a.symbol,
            name: a.name,
            asset_type: a.asset_type,
            currency: a.currency,
        })
        .collect();

    let prices = price_service::all_prices(db)
        .await?
        .into_iter()
        .map(|p| BackupPrice {
            symbol: p.symbol,
            date: p.date,
            close: p.close,
        })
        .collect();

    let mut portfolios = Vec::new();
    for p in portfolio_service::list_portfolios(db, owner_id, None).await? {
        let transactions = portfolio_service::list_transactions(db, p.id, None)
            .await?
            .into_iter()
            .map(|t| BackupTransaction {
                symbol: t.symbol,
                tx_type: t.tx_type,
                quantity: t.quantity,
                price: t.price,
                fee: t.fee,
                tx_date: t.tx_date,
                note: t.note,
            })
            .collect();
        let recommendations = reco_engine::list_for_portfolio(db, p.id, -1)
            .await?
            .into_iter()
            .map(|r| BackupRecommendation {
                code: r.code,
                severity: r.severity,
                title: r.title,
                rationale: r.rationale,
                evidence: r.evidence,
                status: r.status,
                decision_note: r.decision_note,
                ai_score: r.ai_score.unwrap_or(0),
                ai_confidence: r.ai_confidence.unwrap_or(0),
                ai_action: Some(r.ai_action),
                ai_summary: r.ai_summary,
                ai_reasons: r.ai_reasons,
                ai_evaluated_at: r.ai_evaluated_at,
                created_at: Some(r.created_at),
            })
            .collect();
        portfolios.push(BackupPortfolio {
            name: p.name,
            base_currency: p.base_currency,
            transactions,
            recommendations,
        });
    }

    let mut simulations = Vec::new();
    for s in simulator_service::list_simulations(db, owner_id, None).await? {
        let positions = simulator_service::list_positions(db, s.id)
            .await?
            .into_iter()
            .map(|p| BackupPosition {
                symbol: p.symbol,
                quantity: p.quantity,
                avg_price: p.avg_price,
            })
            .collect();
        let trades = simulator_service::list_trades(db, s.id, None)
            .await?
            .into_iter()
            .map(|t| BackupTrade {
                symbol: t.symbol,
                side: t.side,
                quantity: t.quantity,
                price: t.price,
                day: t.day,
            })
            .collect();
        simulations.push(BackupSimulation {
            name: s.name,
            preset: s.preset,
            virtual_cash: s.virtual_cash,
            current_day: s.current_day,
            seed: s.seed,
            positions,
            trades,
        });
    }

    Ok(Backup {
        version: BACKUP_VERSION,
        generated_at: Utc::now(),
        assets,
        prices,
        portfolios,
        simulations,
    })
}

/// 按代码取资产，不存在则创建
async fn asset_id_for(conn: &mut SqliteConnection, symbol: &str) -> AppResult<i64> {
    Ok(asset_service::get_or_create_in(conn, symbol, None).await?.0.id)
}

fn checked_symbol(symbol: &str) -> AppResult<String> {
    let symbol = normalize_symbol(symbol);
    if !asset_service::is_valid_symbol(&symbol) {
        return Err(AppError::bad_request(format!("无效的代码: {}", symbol)));
    }
    Ok(symbol)
}

/// 恢复备份：资产按代码合并，价格覆盖写入，组合与模拟为当前用户新建
///
/// 整个文档在一个事务内写入，任何一步失败都不会留下部分数据。
pub async fn restore(db: &Database, owner_id: i64, backup: &Backup) -> AppResult<RestoreSummary> {
    if backup.version != BACKUP_VERSION {
        return Err(AppError::bad_request(format!("不支持的备份版本: {}", backup.version)));
    }

    let mut tx = db.pool().begin().await?;
    let summary = restore_in(&mut *tx, owner_id, backup).await?;
    tx.commit().await?;

    log::info!(
        "用户 {} 恢复备份: {} 资产, {} 价格, {} 组合, {} 流水, {} 机会, {} 模拟",
        owner_id,
        summary.assets,
        summary.prices,
        summary.portfolios,
        summary.transactions,
        summary.recommendations,
        summary.simulations
    );
    Ok(summary)
}

async fn restore_in(conn: &mut SqliteConnection, owner_id: i64, backup: &Backup) -> AppResult<RestoreSummary> {
    let mut summary = RestoreSummary::default();

    for a in &backup.assets {
        if asset_service::find_by_symbol_in(conn, &a.symbol).await?.is_none() {
            asset_service::create_asset_in(
                conn,
                &NewAsset {
                    symbol: a.symbol.clone(),
                    name: Some(a.name.clone()),
                    asset_type: Some(a.asset_type),
                    currency: Some(a.currency.clone()),
                },
            )
            .await?;
            summary.assets += 1;
        }
    }

    for p in &backup.prices {
        let close = check_amount(p.close, 6, "close")?;
        let asset_id = asset_id_for(conn, &p.symbol).await?;
        price_service::upsert_price_in(conn, asset_id, p.date, close).await?;
        summary.prices += 1;
    }

    for bp in &backup.portfolios {
        let portfolio = portfolio_service::create_portfolio_in(
            conn,
            owner_id,
            &NewPortfolio {
                name: bp.name.clone(),
                base_currency: Some(bp.base_currency),
            },
        )
        .await?;
        summary.portfolios += 1;

        // 按时间正序写回
        for t in bp.transactions.iter().rev() {
            let asset_id = asset_id_for(conn, &t.symbol).await?;
            portfolio_service::add_transaction_in(
                conn,
                owner_id,
                portfolio.id,
                &NewTransaction {
                    asset_id,
                    tx_type: t.tx_type,
                    quantity: Some(t.quantity),
                    price: Some(t.price),
                    fee: Some(t.fee),
                    tx_date: Some(t.tx_date),
                    note: Some(t.note.clone()),
                },
            )
            .await?;
            summary.transactions += 1;
        }

        for r in bp.recommendations.iter().rev() {
            let reco = NewRecommendation {
                portfolio_id: portfolio.id,
                code: r.code.clone(),
                severity: r.severity,
                title: r.title.clone(),
                rationale: r.rationale.clone(),
                evidence: r.evidence.clone(),
                status: r.status,
                ai_action: r.ai_action.clone(),
                ai_summary: Some(r.ai_summary.clone()),
                ai_score: Some(r.ai_score),
                ai_confidence: Some(r.ai_confidence),
                ai_reasons: Some(r.ai_reasons.clone()),
                ai_evaluated_at: r.ai_evaluated_at,
                decision_note: r.decision_note.clone(),
                created_at: r.created_at,
            };
            reco_engine::insert_in(conn, &reco).await?;
            summary.recommendations += 1;
        }
    }

    for bs in &backup.simulations {
        let sim = simulator_service::create_simulation_in(
            conn,
            owner_id,
            &NewSimulation {
                name: bs.name.clone(),
                preset: Some(bs.preset),
                virtual_cash: Some(bs.virtual_cash),
                seed: Some(bs.seed),
            },
        )
        .await?;
        let now = Utc::now();

        sqlx::query("UPDATE simulations SET current_day = ? WHERE id = ?")
            .bind(bs.current_day.max(0))
            .bind(sim.id)
            .execute(&mut *conn)
            .await?;

        for pos in &bs.positions {
            let symbol = checked_symbol(&pos.symbol)?;
            sqlx::query(
                r#"
                INSERT INTO sim_positions (simulation_id, symbol, quantity, avg_price, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (simulation_id, symbol)
                DO UPDATE SET quantity = excluded.quantity, avg_price = excluded.avg_price
                "#,
            )
            .bind(sim.id)
            .bind(symbol)
            .bind(check_amount(pos.quantity, 6, "quantity")?.to_string())
            .bind(check_amount(pos.avg_price, 6, "avg_price")?.to_string())
            .bind(now)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }

        for t in bs.trades.iter().rev() {
            let symbol = checked_symbol(&t.symbol)?;
            sqlx::query(
                r#"
                INSERT INTO sim_trades (simulation_id, symbol, side, quantity, price, day, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(sim.id)
            .bind(symbol)
            .bind(t.side.as_str())
            .bind(check_amount(t.quantity, 6, "quantity")?.to_string())
            .bind(check_amount(t.price, 6, "price")?.to_string())
            .bind(t.day)
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }
        summary.simulations += 1;
    }

    Ok(summary)
}
