use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::error::AppResult;
use crate::handlers::AppState;
use crate::models::{ApiResponse, CurrentUser, SubscribeRequest, UnsubscribeRequest};
use crate::services::push_service;

/// 注册订阅；请求体无法解析时同样返回 400
pub async fn subscribe(
    state: web::Data<AppState>,
    user: CurrentUser,
    body: web::Json<SubscribeRequest>,
) -> AppResult<HttpResponse> {
    push_service::subscribe(&state.db, user.id, &body).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(json!({"ok": true}))))
}

pub async fn unsubscribe(
    state: web::Data<AppState>,
    user: CurrentUser,
    body: web::Json<UnsubscribeRequest>,
) -> AppResult<HttpResponse> {
    let removed = push_service::unsubscribe(&state.db, user.id, &body.endpoint).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(json!({"ok": true, "removed": removed}))))
}

pub async fn status(state: web::Data<AppState>, user: CurrentUser) -> AppResult<HttpResponse> {
    let status = push_service::status(&state.db, &state.config.push, user.id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(status)))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/push")
            .route("/subscribe", web::post().to(subscribe))
            .route("/unsubscribe", web::post().to(unsubscribe))
            .route("/status", web::get().to(status)),
    );
}
