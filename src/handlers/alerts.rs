//! 每日提醒触发入口

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::handlers::AppState;
use crate::middleware::audit_context;
use crate::models::{ApiResponse, CurrentUser};
use crate::services::{alert_service, audit, common::constant_time_eq};

#[derive(Debug, Default, Deserialize)]
pub struct RunQuery {
    #[serde(default)]
    pub dry_run: Option<String>,
}

/// 未配置 base_url 时用请求地址推断
fn base_url(state: &AppState, req: &HttpRequest) -> String {
    let configured = state.config.alerts.base_url.trim();
    if !configured.is_empty() {
        return configured.to_string();
    }
    let info = req.connection_info();
    format!("{}://{}", info.scheme(), info.host())
}

async fn run(state: &AppState, req: &HttpRequest, dry_run: bool) -> AppResult<HttpResponse> {
    let (ok, message) =
        alert_service::send_daily_alert(&state.db, &state.config, &base_url(state, req), dry_run).await?;
    let body = ApiResponse::with_message(json!({"ok": ok, "dry_run": dry_run}), message);
    if ok {
        Ok(HttpResponse::Ok().json(body))
    } else {
        Ok(HttpResponse::ServiceUnavailable().json(body))
    }
}

fn require_staff(user: &CurrentUser) -> AppResult<()> {
    if user.is_staff {
        Ok(())
    } else {
        Err(AppError::Forbidden("Solo staff".to_string()))
    }
}

/// 定时任务入口：令牌不匹配一律 404
pub async fn run_by_token(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
    query: web::Query<RunQuery>,
) -> AppResult<HttpResponse> {
    let expected = state.config.alerts.token.trim();
    if expected.is_empty() || !constant_time_eq(path.as_str(), expected) {
        return Err(AppError::not_found("Not found"));
    }
    let dry_run = query.dry_run.as_deref().map_or(false, crate::config::is_truthy);
    run(&state, &req, dry_run).await
}

pub async fn test_alerts(
    state: web::Data<AppState>,
    req: HttpRequest,
    user: CurrentUser,
) -> AppResult<HttpResponse> {
    require_staff(&user)?;
    run(&state, &req, true).await
}

pub async fn run_alerts(
    state: web::Data<AppState>,
    req: HttpRequest,
    user: CurrentUser,
) -> AppResult<HttpResponse> {
    require_staff(&user)?;
    let response = run(&state, &req, false).await?;
    audit::record(
        &state.db,
        &audit_context(&req, Some(user.id)),
        "alerts_run",
        json!({"status": response.status().as_u16()}),
    )
    .await;
    Ok(response)
}

/// 无需登录的入口
pub fn public_config(cfg: &mut web::ServiceConfig) {
    cfg.route("/alerts/run/{token}/", web::get().to(run_by_token));
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/alerts")
            .route("/test", web::post().to(test_alerts))
            .route("/run", web::post().to(run_alerts)),
    );
}
