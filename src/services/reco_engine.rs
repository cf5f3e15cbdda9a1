//! 投资机会引擎
//!
//! 基于持仓快照与最新价格的可审计规则生成机会，并处理接受/忽略/重开与 AI 评估。

use chrono::{Duration, Utc};
use chrono_tz::America::Argentina::Buenos_Aires;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::db::{enum_col, json_col, Database};
use crate::error::{AppError, AppResult};
use crate::models::{
    local_today, AiBatchResult, AiEval, Badges, Decision, DecisionRequest, Diagnostics,
    GenerateResult, NewRecommendation, OpportunityInbox, OpportunityQuery, Portfolio,
    Recommendation, RecoStatus, Severity,
};
use crate::services::ai_engine::AiEngine;
use crate::services::common::{parse_iso_date, truncate_chars};
use crate::services::portfolio_service;

/// 单一持仓占比上限
const CONCENTRATION_LIMIT: f64 = 0.40;
/// 非基准货币敞口上限
const FX_EXPOSURE_LIMIT: f64 = 0.70;
/// 小额持仓阈值
const SMALL_POSITION_WEIGHT: f64 = 0.02;
/// 触发小额持仓提示的最少数量
const SMALL_POSITION_COUNT: usize = 5;
/// 价格过期天数
const STALE_DAYS: i64 = 7;
/// 历史库查询上限
const DB_QUERY_LIMIT: i64 = 500;
/// 发给 AI 的价格快照最多包含的代码数
const AI_PRICE_SYMBOLS: i64 = 50;

const CODE_MAX: usize = 64;
const TITLE_MAX: usize = 140;
const NOTE_MAX: usize = 240;

fn reco_from_row(row: &SqliteRow) -> Result<Recommendation, sqlx::Error> {
    Ok(Recommendation {
        id: row.try_get("id")?,
        portfolio_id: row.try_get("portfolio_id")?,
        code: row.try_get("code")?,
        severity: enum_col(row, "severity")?,
        title: row.try_get("title")?,
        rationale: row.try_get("rationale")?,
        evidence: json_col(row, "evidence")?,
        status: enum_col(row, "status")?,
        decision_note: row.try_get("decision_note")?,
        ai_score: row.try_get("ai_score")?,
        ai_confidence: row.try_get("ai_confidence")?,
        ai_action: row.try_get("ai_action")?,
        ai_summary: row.try_get("ai_summary")?,
        ai_reasons: json_col(row, "ai_reasons")?,
        ai_evaluated_at: row.try_get("ai_evaluated_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn collect(rows: &[SqliteRow]) -> AppResult<Vec<Recommendation>> {
    Ok(rows.iter().map(reco_from_row).collect::<Result<_, _>>()?)
}

/// 写入一条机会，AI 字段缺省时补齐
pub(crate) async fn insert_in(conn: &mut SqliteConnection, reco: &NewRecommendation) -> Result<i64, sqlx::Error> {
    let now = Utc::now();
    let as_object = |v: &Value| if v.is_object() { v.to_string() } else { "{}".to_string() };

    let result = sqlx::query(
        r#"
        INSERT INTO recommendations
            (portfolio_id, code, severity, title, rationale, evidence, status, decision_note,
             ai_score, ai_confidence, ai_action, ai_summary, ai_reasons, ai_evaluated_at,
             created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(reco.portfolio_id)
    .bind(truncate_chars(&reco.code, CODE_MAX))
    .bind(reco.severity.as_str())
    .bind(truncate_chars(&reco.title, TITLE_MAX))
    .bind(&reco.rationale)
    .bind(as_object(&reco.evidence))
    .bind(reco.status.as_str())
    .bind(truncate_chars(reco.decision_note.trim(), NOTE_MAX))
    .bind(reco.ai_score.unwrap_or(0))
    .bind(reco.ai_confidence.unwrap_or(0))
    .bind(reco.ai_action.clone().unwrap_or_else(|| "HOLD".to_string()))
    .bind(reco.ai_summary.clone().unwrap_or_default())
    .bind(reco.ai_reasons.as_ref().map_or_else(|| "{}".to_string(), as_object))
    .bind(reco.ai_evaluated_at)
    .bind(reco.created_at.unwrap_or(now))
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// 创建机会，缺省 AI 字段自动补齐；写入失败只记录日志并返回 (None, false)
pub async fn create_safe(db: &Database, reco: &NewRecommendation) -> (Option<i64>, bool) {
    let inserted = match db.pool().acquire().await {
        Ok(mut conn) => insert_in(&mut *conn, reco).await,
        Err(e) => Err(e),
    };
    match inserted {
        Ok(id) => (Some(id), true),
        Err(e) => {
            log::error!(
                "Reco create failed | portfolio_id={} code={} error={}",
                reco.portfolio_id,
                reco.code,
                e
            );
            (None, false)
        }
    }
}

/// 组合最近的机会
pub async fn list_for_portfolio(db: &Database, portfolio_id: i64, limit: i64) -> AppResult<Vec<Recommendation>> {
    let rows = sqlx::query(
        "SELECT * FROM recommendations WHERE portfolio_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
    )
    .bind(portfolio_id)
    .bind(limit)
    .fetch_all(db.pool())
    .await?;
    collect(&rows)
}

async fn open_codes(db: &Database, portfolio_id: i64) -> AppResult<HashSet<String>> {
    let codes: Vec<String> =
        sqlx::query_scalar("SELECT code FROM recommendations WHERE portfolio_id = ? AND status = 'OPEN'")
            .bind(portfolio_id)
            .fetch_all(db.pool())
            .await?;
    Ok(codes.into_iter().collect())
}

async fn count_open(db: &Database, portfolio_id: i64) -> AppResult<i64> {
    let n = sqlx::query_scalar("SELECT COUNT(*) FROM recommendations WHERE portfolio_id = ? AND status = 'OPEN'")
        .bind(portfolio_id)
        .fetch_one(db.pool())
        .await?;
    Ok(n)
}

/// 生成前的诊断
pub async fn diagnose(db: &Database, portfolio: &Portfolio) -> AppResult<Diagnostics> {
    let tx_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE portfolio_id = ?")
        .bind(portfolio.id)
        .fetch_one(db.pool())
        .await?;
    let snapshot = portfolio_service::portfolio_snapshot(db, portfolio).await?;
    let prices = portfolio_service::price_snapshot(db, portfolio.id, None).await?;

    let held: Vec<&String> = snapshot
        .holdings
        .iter()
        .filter(|(_, qty)| **qty > 0.0)
        .map(|(sym, _)| sym)
        .collect();
    let prices_available = held.iter().filter(|s| prices.contains_key(s.as_str())).count();

    Ok(Diagnostics {
        portfolio_id: portfolio.id,
        tx_count,
        holdings_count: held.len(),
        prices_available,
        prices_missing: held.len() - prices_available,
        open_opportunities: count_open(db, portfolio.id).await?,
    })
}

/// 规则产生的候选机会
struct Candidate {
    code: String,
    severity: Severity,
    title: String,
    rationale: String,
    evidence: Value,
}

/// 按规则计算候选机会
///
/// `holdings`: 代码 -> 数量（>0），`prices`: 代码 -> (日期, 收盘价)，
/// `currencies`: 代码 -> 资产币种
fn evaluate_rules(
    base_currency: &str,
    holdings: &BTreeMap<String, f64>,
    prices: &BTreeMap<String, (chrono::NaiveDate, f64)>,
    currencies: &HashMap<String, String>,
    today: chrono::NaiveDate,
) -> Vec<Candidate> {
    let mut out = Vec::new();

    let missing: Vec<&String> = holdings.keys().filter(|s| !prices.contains_key(*s)).collect();
    if !missing.is_empty() {
        out.push(Candidate {
            code: "MISSING-PRICES".into(),
            severity: Severity::Med,
            title: "Faltan precios históricos".into(),
            rationale: format!(
                "{} posición(es) sin precios cargados; no es posible valuar ni medir riesgo.",
                missing.len()
            ),
            evidence: json!({ "symbols": missing }),
        });
    }

    let stale_cut = today - Duration::days(STALE_DAYS);
    let stale: Vec<Value> = holdings
        .keys()
        .filter_map(|s| prices.get(s).map(|(d, _)| (s, d)))
        .filter(|(_, d)| **d < stale_cut)
        .map(|(s, d)| json!({ "symbol": s, "last_date": d.to_string() }))
        .collect();
    if !stale.is_empty() {
        out.push(Candidate {
            code: "STALE-PRICES".into(),
            severity: Severity::Low,
            title: "Precios desactualizados".into(),
            rationale: format!(
                "{} posición(es) con último precio de hace más de {} días.",
                stale.len(),
                STALE_DAYS
            ),
            evidence: json!({ "items": stale }),
        });
    }

    let values: BTreeMap<&String, f64> = holdings
        .iter()
        .filter_map(|(s, qty)| prices.get(s).map(|(_, close)| (s, qty * close)))
        .filter(|(_, v)| *v > 0.0)
        .collect();
    let total: f64 = values.values().sum();
    if total <= 0.0 {
        return out;
    }

    for (symbol, value) in &values {
        let weight = value / total;
        if weight > CONCENTRATION_LIMIT {
            out.push(Candidate {
                code: format!("CONCENTRATION-{}", symbol),
                severity: Severity::High,
                title: format!("Concentración alta en {}", symbol),
                rationale: format!(
                    "{} representa el {:.1}% del valor valuado (límite {:.0}%).",
                    symbol,
                    weight * 100.0,
                    CONCENTRATION_LIMIT * 100.0
                ),
                evidence: json!({ "symbol": symbol, "weight": weight, "value": value, "total": total }),
            });
        }
    }

    let mut by_currency: BTreeMap<String, f64> = BTreeMap::new();
    for (symbol, value) in &values {
        let ccy = currencies
            .get(*symbol)
            .cloned()
            .unwrap_or_else(|| base_currency.to_string());
        *by_currency.entry(ccy).or_insert(0.0) += value;
    }
    for (ccy, value) in &by_currency {
        let share = value / total;
        if ccy != base_currency && share > FX_EXPOSURE_LIMIT {
            out.push(Candidate {
                code: format!("FX-EXPOSURE-{}", ccy),
                severity: Severity::Med,
                title: format!("Exposición cambiaria en {}", ccy),
                rationale: format!(
                    "El {:.1}% del valor está en {} (moneda base {}).",
                    share * 100.0,
                    ccy,
                    base_currency
                ),
                evidence: json!({ "currency": ccy, "share": share, "base_currency": base_currency }),
            });
        }
    }

    let small: Vec<&String> = values
        .iter()
        .filter(|(_, v)| **v / total < SMALL_POSITION_WEIGHT)
        .map(|(s, _)| *s)
        .collect();
    if small.len() >= SMALL_POSITION_COUNT {
        out.push(Candidate {
            code: "SMALL-POSITIONS".into(),
            severity: Severity::Low,
            title: "Muchas posiciones chicas".into(),
            rationale: format!(
                "{} posiciones pesan menos del {:.0}% cada una; considerá consolidar.",
                small.len(),
                SMALL_POSITION_WEIGHT * 100.0
            ),
            evidence: json!({ "symbols": small }),
        });
    }

    out
}

/// 生成机会；已存在 OPEN 的同代码机会不会重复创建
pub async fn generate(db: &Database, portfolio: &Portfolio) -> AppResult<GenerateResult> {
    let diag = diagnose(db, portfolio).await?;
    log::info!(
        "Reco generate requested | portfolio_id={} tx={} holdings={} prices={} missing={} open={}",
        diag.portfolio_id,
        diag.tx_count,
        diag.holdings_count,
        diag.prices_available,
        diag.prices_missing,
        diag.open_opportunities
    );

    if diag.tx_count == 0 {
        return Ok(GenerateResult {
            created: 0,
            reason: "EMPTY-PORTFOLIO: el portafolio no tiene movimientos. Cargá transacciones primero.".into(),
            diag,
        });
    }

    let snapshot = portfolio_service::portfolio_snapshot(db, portfolio).await?;
    let holdings: BTreeMap<String, f64> = snapshot.holdings.into_iter().filter(|(_, q)| *q > 0.0).collect();
    if holdings.is_empty() {
        return Ok(GenerateResult {
            created: 0,
            reason: "No hay posiciones abiertas para analizar.".into(),
            diag,
        });
    }

    let prices: BTreeMap<String, (chrono::NaiveDate, f64)> = portfolio_service::price_snapshot(db, portfolio.id, None)
        .await?
        .into_iter()
        .map(|(s, p)| (s, (p.date, p.close)))
        .collect();

    let rows = sqlx::query("SELECT symbol, currency FROM assets")
        .fetch_all(db.pool())
        .await?;
    let mut currencies = HashMap::new();
    for row in &rows {
        let symbol: String = row.try_get("symbol")?;
        let currency: String = row.try_get("currency")?;
        currencies.insert(symbol, currency);
    }

    let candidates = evaluate_rules(
        portfolio.base_currency.as_str(),
        &holdings,
        &prices,
        &currencies,
        local_today(),
    );
    let existing = open_codes(db, portfolio.id).await?;

    let total_candidates = candidates.len();
    let mut created = 0;
    for c in candidates.into_iter().filter(|c| !existing.contains(&c.code)) {
        let reco = NewRecommendation {
            portfolio_id: portfolio.id,
            code: c.code,
            severity: c.severity,
            title: c.title,
            rationale: c.rationale,
            evidence: c.evidence,
            ..Default::default()
        };
        if create_safe(db, &reco).await.1 {
            created += 1;
        }
    }

    let reason = if created > 0 {
        String::new()
    } else if total_candidates == 0 {
        "Sin hallazgos: las reglas actuales no detectaron oportunidades.".to_string()
    } else {
        format!(
            "Ya tenés {} oportunidad(es) OPEN con los mismos códigos.",
            diag.open_opportunities
        )
    };

    Ok(GenerateResult { created, reason, diag })
}

/// 没有 OPEN 机会时生成三条演示数据
pub async fn seed_demo(db: &Database, portfolio: &Portfolio) -> AppResult<usize> {
    if count_open(db, portfolio.id).await? > 0 {
        return Ok(0);
    }

    let demos = [
        (
            "FND-ALPHA",
            Severity::High,
            "Rotación defensiva (demo)",
            "Sugerencia DEMO: reforzar instrumentos defensivos para reducir volatilidad.",
            "Ejemplo para probar badges y estados",
        ),
        (
            "FND-BETA",
            Severity::Med,
            "Oportunidad táctica (demo)",
            "Sugerencia DEMO: diversificar sectores y ajustar exposición de riesgo en forma gradual.",
            "Ejemplo para probar Aceptar/Ignorar",
        ),
        (
            "FND-GAMMA",
            Severity::Low,
            "Rebalanceo sugerido (demo)",
            "Sugerencia DEMO: rebalanceo de posiciones para alinear con el perfil de riesgo.",
            "Ejemplo para probar pantalla Base de datos",
        ),
    ];

    let mut created = 0;
    for (code, severity, title, rationale, note) in demos {
        let reco = NewRecommendation {
            portfolio_id: portfolio.id,
            code: format!("{}-{}", code, portfolio.id),
            severity,
            title: title.into(),
            rationale: rationale.into(),
            evidence: json!({ "fuente": "demo", "nota": note }),
            ..Default::default()
        };
        if create_safe(db, &reco).await.1 {
            created += 1;
        }
    }
    Ok(created)
}

/// 获取属于该用户的机会
pub async fn get_for_owner(db: &Database, owner_id: i64, id: i64) -> AppResult<Recommendation> {
    let row = sqlx::query(
        r#"
        SELECT r.* FROM recommendations r JOIN portfolios p ON p.id = r.portfolio_id
        WHERE r.id = ? AND p.owner_id = ?
        "#,
    )
    .bind(id)
    .bind(owner_id)
    .fetch_optional(db.pool())
    .await?;
    row.as_ref()
        .map(reco_from_row)
        .transpose()?
        .ok_or_else(|| AppError::not_found(format!("机会 {} 不存在", id)))
}

/// 处理机会：接受需通过 AI 门槛（开启治理且已配置密钥时）
pub async fn decide(
    db: &Database,
    ai: &AiEngine,
    owner_id: i64,
    id: i64,
    req: &DecisionRequest,
) -> AppResult<Recommendation> {
    let decision: Decision = req.action.parse().map_err(AppError::BadRequest)?;
    let rec = get_for_owner(db, owner_id, id).await?;

    if decision == Decision::Accept && ai.governance_active() {
        let cfg = ai.config();
        let action_ok = rec.ai_action.eq_ignore_ascii_case("ENTER");
        let score_ok = rec.ai_score.map_or(false, |s| s >= cfg.min_score);
        if (!action_ok || !score_ok) && !cfg.allow_manual_override {
            return Err(AppError::Forbidden(format!(
                "Bloqueado por IA: se requiere acción ENTER y score ≥ {}.",
                cfg.min_score
            )));
        }
    }

    let status = match decision {
        Decision::Accept => RecoStatus::Accepted,
        Decision::Ignore => RecoStatus::Ignored,
        Decision::Reopen => RecoStatus::Open,
    };
    let note = req
        .note
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(|n| truncate_chars(n, NOTE_MAX))
        .unwrap_or(rec.decision_note);

    sqlx::query("UPDATE recommendations SET status = ?, decision_note = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(&note)
        .bind(Utc::now())
        .bind(rec.id)
        .execute(db.pool())
        .await?;

    log::info!("机会 {} -> {}", rec.id, status);
    get_for_owner(db, owner_id, rec.id).await
}

/// 待处理列表（仅 OPEN）
pub async fn inbox(db: &Database, ai: &AiEngine, owner_id: i64) -> AppResult<OpportunityInbox> {
    let rows = sqlx::query(
        r#"
        SELECT r.* FROM recommendations r JOIN portfolios p ON p.id = r.portfolio_id
        WHERE p.owner_id = ? AND r.status = 'OPEN'
        ORDER BY r.created_at DESC, r.id DESC
        "#,
    )
    .bind(owner_id)
    .fetch_all(db.pool())
    .await?;
    let items = collect(&rows)?;

    Ok(OpportunityInbox {
        open_count: items.len(),
        items,
        openai_configured: ai.is_configured(),
        ai_governance: ai.config().governance_required,
        ai_min_score: ai.config().min_score,
    })
}

/// 历史库：全部状态，支持关键字、状态与创建日期过滤，最多 500 条
pub async fn query_db(db: &Database, owner_id: i64, query: &OpportunityQuery) -> AppResult<Vec<Recommendation>> {
    let q = query
        .q
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);
    let status = query
        .status
        .as_deref()
        .and_then(|s| s.parse::<RecoStatus>().ok())
        .map(|s| s.as_str());

    let rows = sqlx::query(
        r#"
        SELECT r.* FROM recommendations r JOIN portfolios p ON p.id = r.portfolio_id
        WHERE p.owner_id = ?
          AND (? IS NULL OR r.status = ?)
        ORDER BY r.created_at DESC, r.id DESC
        "#,
    )
    .bind(owner_id)
    .bind(status)
    .bind(status)
    .fetch_all(db.pool())
    .await?;

    // 关键字按 Unicode 小写做子串匹配，创建日期按本地时区比较
    let from = parse_iso_date(query.from.as_deref());
    let to = parse_iso_date(query.to.as_deref());
    let matches_text = |rec: &Recommendation| {
        q.as_deref().map_or(true, |q| {
            rec.title.to_lowercase().contains(q) || rec.code.to_lowercase().contains(q)
        })
    };

    let mut items = Vec::new();
    for rec in collect(&rows)? {
        let day = rec.created_at.with_timezone(&Buenos_Aires).date_naive();
        if from.map_or(true, |f| day >= f) && to.map_or(true, |t| day <= t) && matches_text(&rec) {
            items.push(rec);
            if items.len() as i64 >= DB_QUERY_LIMIT {
                break;
            }
        }
    }
    Ok(items)
}

/// 导航角标；出错时计为 0
pub async fn badges(db: &Database, owner_id: i64) -> Badges {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM recommendations r JOIN portfolios p ON p.id = r.portfolio_id
        WHERE p.owner_id = ? AND r.status = 'OPEN'
        "#,
    )
    .bind(owner_id)
    .fetch_one(db.pool())
    .await
    .unwrap_or_else(|e| {
        log::warn!("角标计数失败: {}", e);
        0
    });

    Badges {
        ok: true,
        opps_open: count,
        app_badge: count,
    }
}

async fn apply_eval(db: &Database, id: i64, ev: &AiEval) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE recommendations
        SET ai_score = ?, ai_confidence = ?, ai_action = ?, ai_summary = ?, ai_reasons = ?,
            ai_evaluated_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(ev.score)
    .bind(ev.confidence)
    .bind(ev.action.as_str())
    .bind(&ev.summary)
    .bind(ev.reasons.to_string())
    .bind(Utc::now())
    .bind(Utc::now())
    .bind(id)
    .execute(db.pool())
    .await?;
    Ok(())
}

/// 评估单条机会
pub async fn evaluate_one(db: &Database, ai: &AiEngine, owner_id: i64, id: i64) -> AppResult<Recommendation> {
    let rec = get_for_owner(db, owner_id, id).await?;
    let portfolio = portfolio_service::get_portfolio(db, owner_id, rec.portfolio_id).await?;
    let snapshot = portfolio_service::portfolio_snapshot(db, &portfolio).await?;
    let prices = portfolio_service::price_snapshot(db, portfolio.id, Some(AI_PRICE_SYMBOLS)).await?;

    let ev = ai.evaluate(&rec, &snapshot, &prices).await;
    apply_eval(db, rec.id, &ev).await?;
    get_for_owner(db, owner_id, rec.id).await
}

/// 批量评估默认组合中最新的 OPEN 机会
pub async fn evaluate_batch(db: &Database, ai: &AiEngine, owner_id: i64) -> AppResult<AiBatchResult> {
    let portfolio = portfolio_service::default_portfolio(db, owner_id).await?;
    let limit = ai.batch_limit();

    let rows = sqlx::query(
        r#"
        SELECT * FROM recommendations WHERE portfolio_id = ? AND status = 'OPEN'
        ORDER BY created_at DESC, id DESC LIMIT ?
        "#,
    )
    .bind(portfolio.id)
    .bind(limit)
    .fetch_all(db.pool())
    .await?;
    let recs = collect(&rows)?;

    let snapshot = portfolio_service::portfolio_snapshot(db, &portfolio).await?;
    let prices = portfolio_service::price_snapshot(db, portfolio.id, Some(AI_PRICE_SYMBOLS)).await?;

    let mut evaluated = 0;
    for rec in &recs {
        let ev = ai.evaluate(rec, &snapshot, &prices).await;
        apply_eval(db, rec.id, &ev).await?;
        evaluated += 1;
    }

    log::info!("AI 批量评估 portfolio={} evaluated={}", portfolio.id, evaluated);
    Ok(AiBatchResult { evaluated, limit })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AiConfig;
    use crate::models::{AiAction, TxType};
    use crate::services::portfolio_service::tests::{asset, setup, tx};
    use crate::services::{portfolio_service, price_service};
    use chrono::NaiveDate;

    fn engine(api_key: &str, allow_override: bool) -> AiEngine {
        AiEngine::new(AiConfig {
            api_key: api_key.into(),
            allow_manual_override: allow_override,
            ..AiConfig::default()
        })
        .unwrap()
    }

    fn decision(action: &str) -> DecisionRequest {
        DecisionRequest {
            action: action.into(),
            note: Some("  revisado  ".into()),
        }
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_rules_concentration_fx_and_small() {
        let mut holdings = BTreeMap::new();
        let mut prices = BTreeMap::new();
        let mut currencies = HashMap::new();
        let today = day("2024-06-10");

        holdings.insert("BIG".to_string(), 100.0);
        prices.insert("BIG".to_string(), (today, 100.0));
        currencies.insert("BIG".to_string(), "USD".to_string());
        for s in ["S1", "S2", "S3", "S4", "S5"] {
            holdings.insert(s.to_string(), 1.0);
            prices.insert(s.to_string(), (day("2024-05-01"), 10.0));
        }
        holdings.insert("NOPX".to_string(), 3.0);

        let out = evaluate_rules("ARS", &holdings, &prices, &currencies, today);
        let codes: Vec<&str> = out.iter().map(|c| c.code.as_str()).collect();
        assert!(codes.contains(&"MISSING-PRICES"));
        assert!(codes.contains(&"STALE-PRICES"));
        assert!(codes.contains(&"CONCENTRATION-BIG"));
        assert!(codes.contains(&"FX-EXPOSURE-USD"));
        assert!(codes.contains(&"SMALL-POSITIONS"));

        let conc = out.iter().find(|c| c.code == "CONCENTRATION-BIG").unwrap();
        assert_eq!(conc.severity, Severity::High);
    }

    #[test]
    fn test_rules_balanced_portfolio_is_quiet() {
        let today = day("2024-06-10");
        let mut holdings = BTreeMap::new();
        let mut prices = BTreeMap::new();
        for s in ["A", "B", "C"] {
            holdings.insert(s.to_string(), 10.0);
            prices.insert(s.to_string(), (today, 10.0));
        }
        let out = evaluate_rules("ARS", &holdings, &prices, &HashMap::new(), today);
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_create_safe_fills_ai_defaults() {
        let (db, uid) = setup().await;
        let p = portfolio_service::default_portfolio(&db, uid).await.unwrap();
        let (id, ok) = create_safe(
            &db,
            &NewRecommendation {
                portfolio_id: p.id,
                code: "X".repeat(100),
                title: "T".into(),
                ..Default::default()
            },
        )
        .await;
        assert!(ok);
        let rec = get_for_owner(&db, uid, id.unwrap()).await.unwrap();
        assert_eq!(rec.ai_action, "HOLD");
        assert_eq!(rec.ai_summary, "");
        assert_eq!(rec.ai_score, Some(0));
        assert_eq!(rec.ai_reasons, json!({}));
        assert_eq!(rec.code.len(), 64);
        assert_eq!(rec.status, RecoStatus::Open);
    }

    #[tokio::test]
    async fn test_create_safe_reports_failure() {
        let (db, _) = setup().await;
        // 组合不存在，外键约束失败
        let (id, ok) = create_safe(
            &db,
            &NewRecommendation {
                portfolio_id: 999,
                code: "X".into(),
                ..Default::default()
            },
        )
        .await;
        assert!(id.is_none());
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_generate_empty_portfolio() {
        let (db, uid) = setup().await;
        let p = portfolio_service::default_portfolio(&db, uid).await.unwrap();
        let res = generate(&db, &p).await.unwrap();
        assert_eq!(res.created, 0);
        assert!(res.reason.starts_with("EMPTY-PORTFOLIO"));
        assert_eq!(res.diag.tx_count, 0);
    }

    #[tokio::test]
    async fn test_diagnose_counts_prices_for_all_holdings() {
        let (db, uid) = setup().await;
        let p = portfolio_service::default_portfolio(&db, uid).await.unwrap();

        let today = local_today();
        let mut csv = String::from("date,symbol,close\n");
        for i in 0..60 {
            csv.push_str(&format!("{},S{:02},10\n", today, i));
        }
        price_service::import_csv(&db, csv.as_bytes(), None).await.unwrap();
        for i in 0..60 {
            let id = crate::services::asset_service::find_by_symbol(&db, &format!("S{:02}", i))
                .await
                .unwrap()
                .unwrap()
                .id;
            portfolio_service::add_transaction(&db, uid, p.id, &tx(id, TxType::Buy, "1", "10"))
                .await
                .unwrap();
        }

        let diag = diagnose(&db, &p).await.unwrap();
        assert_eq!(diag.holdings_count, 60);
        assert_eq!(diag.prices_available, 60);
        assert_eq!(diag.prices_missing, 0);
    }

    #[tokio::test]
    async fn test_generate_does_not_duplicate_open() {
        let (db, uid) = setup().await;
        let p = portfolio_service::default_portfolio(&db, uid).await.unwrap();
        let ggal = asset(&db, "GGAL").await;
        portfolio_service::add_transaction(&db, uid, p.id, &tx(ggal, TxType::Buy, "10", "100"))
            .await
            .unwrap();

        let first = generate(&db, &p).await.unwrap();
        assert_eq!(first.created, 1);
        assert_eq!(first.diag.holdings_count, 1);
        assert_eq!(first.diag.prices_missing, 1);

        let second = generate(&db, &p).await.unwrap();
        assert_eq!(second.created, 0);
        assert!(!second.reason.is_empty());
        assert_eq!(second.diag.open_opportunities, 1);
    }

    #[tokio::test]
    async fn test_generate_with_prices_flags_concentration() {
        let (db, uid) = setup().await;
        let p = portfolio_service::default_portfolio(&db, uid).await.unwrap();
        let a = asset(&db, "AAA").await;
        let b = asset(&db, "BBB").await;
        portfolio_service::add_transaction(&db, uid, p.id, &tx(a, TxType::Buy, "90", "1")).await.unwrap();
        portfolio_service::add_transaction(&db, uid, p.id, &tx(b, TxType::Buy, "10", "1")).await.unwrap();

        let today = local_today().format("%Y-%m-%d").to_string();
        let csv = format!("date,symbol,close\n{t},AAA,10\n{t},BBB,10\n", t = today);
        price_service::import_csv(&db, csv.as_bytes(), None).await.unwrap();

        let res = generate(&db, &p).await.unwrap();
        assert_eq!(res.diag.prices_available, 2);
        let items = list_for_portfolio(&db, p.id, 50).await.unwrap();
        let codes: Vec<&str> = items.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["CONCENTRATION-AAA"]);
        assert_eq!(res.created, 1);
    }

    #[tokio::test]
    async fn test_seed_demo_only_once() {
        let (db, uid) = setup().await;
        let p = portfolio_service::default_portfolio(&db, uid).await.unwrap();
        assert_eq!(seed_demo(&db, &p).await.unwrap(), 3);
        assert_eq!(seed_demo(&db, &p).await.unwrap(), 0);

        let inbox = inbox(&db, &engine("", false), uid).await.unwrap();
        assert_eq!(inbox.open_count, 3);
        assert!(inbox.items.iter().any(|r| r.code == format!("FND-ALPHA-{}", p.id)));
        assert!(!inbox.openai_configured);
        assert_eq!(badges(&db, uid).await.opps_open, 3);
    }

    #[tokio::test]
    async fn test_decisions_without_governance() {
        let (db, uid) = setup().await;
        let p = portfolio_service::default_portfolio(&db, uid).await.unwrap();
        seed_demo(&db, &p).await.unwrap();
        let id = list_for_portfolio(&db, p.id, 1).await.unwrap()[0].id;
        let ai = engine("", false);

        let rec = decide(&db, &ai, uid, id, &decision("send")).await.unwrap();
        assert_eq!(rec.status, RecoStatus::Accepted);
        assert_eq!(rec.decision_note, "revisado");

        let rec = decide(&db, &ai, uid, id, &decision("dismiss")).await.unwrap();
        assert_eq!(rec.status, RecoStatus::Ignored);
        let rec = decide(&db, &ai, uid, id, &decision("reopen")).await.unwrap();
        assert_eq!(rec.status, RecoStatus::Open);

        assert!(matches!(
            decide(&db, &ai, uid, id, &decision("delete")).await.unwrap_err(),
            AppError::BadRequest(_)
        ));
        assert!(matches!(
            decide(&db, &ai, uid + 1, id, &decision("accept")).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_governance_blocks_accept() {
        let (db, uid) = setup().await;
        let p = portfolio_service::default_portfolio(&db, uid).await.unwrap();
        seed_demo(&db, &p).await.unwrap();
        let id = list_for_portfolio(&db, p.id, 1).await.unwrap()[0].id;

        let ai = engine("sk-test", false);
        let err = decide(&db, &ai, uid, id, &decision("accept")).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        // 评估达到门槛后允许
        let ev = AiEval {
            score: 80,
            confidence: 50,
            action: AiAction::Enter,
            summary: "ok".into(),
            reasons: json!({}),
        };
        apply_eval(&db, id, &ev).await.unwrap();
        let rec = decide(&db, &ai, uid, id, &decision("accept")).await.unwrap();
        assert_eq!(rec.status, RecoStatus::Accepted);
        assert!(rec.ai_evaluated_at.is_some());

        // 手动覆盖
        let id2 = list_for_portfolio(&db, p.id, 3).await.unwrap()[1].id;
        let rec = decide(&db, &engine("sk-test", true), uid, id2, &decision("accept")).await.unwrap();
        assert_eq!(rec.status, RecoStatus::Accepted);
    }

    #[tokio::test]
    async fn test_query_db_filters() {
        let (db, uid) = setup().await;
        let p = portfolio_service::default_portfolio(&db, uid).await.unwrap();
        seed_demo(&db, &p).await.unwrap();
        let ai = engine("", false);
        let beta = format!("FND-BETA-{}", p.id);
        let items = query_db(&db, uid, &OpportunityQuery { q: Some("beta".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].code, beta);

        decide(&db, &ai, uid, items[0].id, &decision("ignore")).await.unwrap();
        let ignored = query_db(&db, uid, &OpportunityQuery { status: Some("ignored".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(ignored.len(), 1);

        // 无效状态不过滤
        let all = query_db(&db, uid, &OpportunityQuery { status: Some("zzz".into()), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let future = query_db(&db, uid, &OpportunityQuery { from: Some("2999-01-01".into()), ..Default::default() })
            .await
            .unwrap();
        assert!(future.is_empty());
    }

    #[tokio::test]
    async fn test_query_db_text_is_literal_and_unicode() {
        let (db, uid) = setup().await;
        let p = portfolio_service::default_portfolio(&db, uid).await.unwrap();
        for (code, title) in [
            ("ROT-1", "ROTACIÓN de cartera"),
            ("PCT-1", "Cobertura 100% dólar"),
            ("UND-1", "Plazo_fijo vencido"),
        ] {
            let reco = NewRecommendation {
                portfolio_id: p.id,
                code: code.into(),
                title: title.into(),
                ..Default::default()
            };
            assert!(create_safe(&db, &reco).await.1);
        }
        let search = |q: &str| OpportunityQuery { q: Some(q.into()), ..Default::default() };

        let items = query_db(&db, uid, &search("rotación")).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].code, "ROT-1");

        let items = query_db(&db, uid, &search("%")).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].code, "PCT-1");

        let items = query_db(&db, uid, &search("_")).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].code, "UND-1");
    }

    #[tokio::test]
    async fn test_ai_batch_without_key() {
        let (db, uid) = setup().await;
        let p = portfolio_service::default_portfolio(&db, uid).await.unwrap();
        seed_demo(&db, &p).await.unwrap();
        let ai = AiEngine::new(AiConfig { max_eval_per_click: 2, ..AiConfig::default() }).unwrap();

        let res = evaluate_batch(&db, &ai, uid).await.unwrap();
        assert_eq!(res.evaluated, 2);
        assert_eq!(res.limit, 2);

        let id = list_for_portfolio(&db, p.id, 1).await.unwrap()[0].id;
        let rec = evaluate_one(&db, &ai, uid, id).await.unwrap();
        assert_eq!(rec.ai_action, "NEEDS_DATA");
        assert_eq!(rec.ai_reasons, json!({"error": "missing_openai_api_key"}));
    }
}
