//! 投资机会：收件箱、生成、演示数据、AI 评估与历史库

use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::error::AppResult;
use crate::handlers::AppState;
use crate::middleware::audit_context;
use crate::models::{ApiResponse, CurrentUser, DecisionRequest, OpportunityQuery, RecoStatus};
use crate::services::{audit, portfolio_service, reco_engine};

pub async fn inbox(state: web::Data<AppState>, user: CurrentUser) -> AppResult<HttpResponse> {
    let inbox = reco_engine::inbox(&state.db, &state.ai, user.id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(inbox)))
}

/// 按规则为默认组合生成机会
pub async fn generate(
    state: web::Data<AppState>,
    req: HttpRequest,
    user: CurrentUser,
) -> AppResult<HttpResponse> {
    let portfolio = portfolio_service::default_portfolio(&state.db, user.id).await?;
    let result = reco_engine::generate(&state.db, &portfolio).await?;
    audit::record(
        &state.db,
        &audit_context(&req, Some(user.id)),
        "reco_generate",
        json!({
            "portfolio_id": portfolio.id,
            "created": result.created,
            "reason": result.reason,
            "diag": result.diag,
        }),
    )
    .await;

    let message = if result.created > 0 {
        format!("Oportunidades generadas: {}.", result.created)
    } else {
        result.reason.clone()
    };
    Ok(HttpResponse::Ok().json(ApiResponse::with_message(result, message)))
}

pub async fn seed_demo(
    state: web::Data<AppState>,
    req: HttpRequest,
    user: CurrentUser,
) -> AppResult<HttpResponse> {
    let portfolio = portfolio_service::default_portfolio(&state.db, user.id).await?;
    let created = reco_engine::seed_demo(&state.db, &portfolio).await?;
    audit::record(
        &state.db,
        &audit_context(&req, Some(user.id)),
        "reco_demo_seed",
        json!({"portfolio_id": portfolio.id, "created": created}),
    )
    .await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(json!({"created": created}))))
}

pub async fn diagnostics(state: web::Data<AppState>, user: CurrentUser) -> AppResult<HttpResponse> {
    let portfolio = portfolio_service::default_portfolio(&state.db, user.id).await?;
    let diag = reco_engine::diagnose(&state.db, &portfolio).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(diag)))
}

/// 批量 AI 评估
pub async fn ai_evaluate_batch(
    state: web::Data<AppState>,
    req: HttpRequest,
    user: CurrentUser,
) -> AppResult<HttpResponse> {
    let result = reco_engine::evaluate_batch(&state.db, &state.ai, user.id).await?;
    let portfolio = portfolio_service::default_portfolio(&state.db, user.id).await?;
    audit::record(
        &state.db,
        &audit_context(&req, Some(user.id)),
        "ai_eval_batch",
        json!({"portfolio_id": portfolio.id, "evaluated": result.evaluated}),
    )
    .await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(result)))
}

pub async fn ai_evaluate_one(
    state: web::Data<AppState>,
    req: HttpRequest,
    user: CurrentUser,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let rec = reco_engine::evaluate_one(&state.db, &state.ai, user.id, path.into_inner()).await?;
    audit::record(
        &state.db,
        &audit_context(&req, Some(user.id)),
        "ai_eval",
        json!({"rec_id": rec.id, "ai_action": rec.ai_action, "ai_score": rec.ai_score}),
    )
    .await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(rec)))
}

/// 接受 / 忽略 / 重新打开
pub async fn decide(
    state: web::Data<AppState>,
    req: HttpRequest,
    user: CurrentUser,
    path: web::Path<i64>,
    body: web::Json<DecisionRequest>,
) -> AppResult<HttpResponse> {
    let rec = reco_engine::decide(&state.db, &state.ai, user.id, path.into_inner(), &body).await?;
    let event = match rec.status {
        RecoStatus::Accepted => "reco_accept",
        RecoStatus::Ignored => "reco_ignore",
        RecoStatus::Open => "reco_reopen",
    };
    audit::record(&state.db, &audit_context(&req, Some(user.id)), event, json!({"rec_id": rec.id})).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(rec)))
}

/// 历史库查询
pub async fn database(
    state: web::Data<AppState>,
    user: CurrentUser,
    query: web::Query<OpportunityQuery>,
) -> AppResult<HttpResponse> {
    let items = reco_engine::query_db(&state.db, user.id, &query).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(items)))
}

/// 导航角标（不使用统一响应格式）
pub async fn badges(state: web::Data<AppState>, user: CurrentUser) -> HttpResponse {
    HttpResponse::Ok().json(reco_engine::badges(&state.db, user.id).await)
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/opportunities")
            .route("", web::get().to(inbox))
            .route("/generate", web::post().to(generate))
            .route("/demo", web::post().to(seed_demo))
            .route("/ai-evaluate", web::post().to(ai_evaluate_batch))
            .route("/diagnostics", web::get().to(diagnostics))
            .route("/db", web::get().to(database))
            .route("/{id}/decision", web::post().to(decide))
            .route("/{id}/ai-evaluate", web::post().to(ai_evaluate_one)),
    )
    .route("/badges", web::get().to(badges));
}
