use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::error::AppResult;
use crate::handlers::AppState;
use crate::middleware::audit_context;
use crate::models::{AdvanceRequest, ApiResponse, CurrentUser, NewSimulation, TradeRequest};
use crate::services::{audit, simulator_service};

pub async fn list_simulations(state: web::Data<AppState>, user: CurrentUser) -> AppResult<HttpResponse> {
    let sims = simulator_service::list_simulations(&state.db, user.id, None).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(sims)))
}

pub async fn create_simulation(
    state: web::Data<AppState>,
    req: HttpRequest,
    user: CurrentUser,
    body: web::Json<NewSimulation>,
) -> AppResult<HttpResponse> {
    let sim = simulator_service::create_simulation(&state.db, user.id, &body).await?;
    audit::record(
        &state.db,
        &audit_context(&req, Some(user.id)),
        "sim_create",
        json!({"sim_id": sim.id, "name": sim.name, "preset": sim.preset}),
    )
    .await;
    Ok(HttpResponse::Created().json(ApiResponse::with_message(sim, "Simulación creada")))
}

pub async fn simulation_detail(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let detail = simulator_service::simulation_detail(&state.db, user.id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(detail)))
}

/// 下单
pub async fn trade(
    state: web::Data<AppState>,
    req: HttpRequest,
    user: CurrentUser,
    path: web::Path<i64>,
    body: web::Json<TradeRequest>,
) -> AppResult<HttpResponse> {
    let sim_id = path.into_inner();
    let trade = simulator_service::trade(&state.db, user.id, sim_id, &body).await?;
    audit::record(
        &state.db,
        &audit_context(&req, Some(user.id)),
        "sim_trade",
        json!({
            "sim_id": sim_id,
            "symbol": trade.symbol,
            "side": trade.side,
            "quantity": trade.quantity,
            "price": trade.price,
            "day": trade.day,
        }),
    )
    .await;
    Ok(HttpResponse::Ok().json(ApiResponse::with_message(trade, "Operación registrada")))
}

/// 推进模拟日
pub async fn advance(
    state: web::Data<AppState>,
    req: HttpRequest,
    user: CurrentUser,
    path: web::Path<i64>,
    body: web::Json<AdvanceRequest>,
) -> AppResult<HttpResponse> {
    let sim = simulator_service::advance(&state.db, user.id, path.into_inner(), body.days).await?;
    audit::record(
        &state.db,
        &audit_context(&req, Some(user.id)),
        "sim_advance",
        json!({"sim_id": sim.id, "days": body.days, "current_day": sim.current_day}),
    )
    .await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(sim)))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/simulations")
            .service(
                web::resource("")
                    .route(web::get().to(list_simulations))
                    .route(web::post().to(create_simulation)),
            )
            .route("/{id}", web::get().to(simulation_detail))
            .route("/{id}/trade", web::post().to(trade))
            .route("/{id}/advance", web::post().to(advance)),
    );
}
