use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::error::AppResult;
use crate::handlers::AppState;
use crate::middleware::audit_context;
use crate::models::{ApiResponse, CurrentUser, NewPortfolio, NewTransaction};
use crate::services::{audit, portfolio_service};

pub async fn dashboard(state: web::Data<AppState>, user: CurrentUser) -> AppResult<HttpResponse> {
    let dashboard = portfolio_service::dashboard(&state.db, user.id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(dashboard)))
}

pub async fn list_portfolios(state: web::Data<AppState>, user: CurrentUser) -> AppResult<HttpResponse> {
    let portfolios = portfolio_service::list_portfolios(&state.db, user.id, None).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(portfolios)))
}

pub async fn create_portfolio(
    state: web::Data<AppState>,
    req: HttpRequest,
    user: CurrentUser,
    body: web::Json<NewPortfolio>,
) -> AppResult<HttpResponse> {
    let portfolio = portfolio_service::create_portfolio(&state.db, user.id, &body).await?;
    audit::record(
        &state.db,
        &audit_context(&req, Some(user.id)),
        "portfolio_create",
        json!({"portfolio_id": portfolio.id, "name": portfolio.name}),
    )
    .await;
    Ok(HttpResponse::Created().json(ApiResponse::with_message(portfolio, "Portafolio creado")))
}

pub async fn portfolio_detail(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let detail = portfolio_service::portfolio_detail(&state.db, user.id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(detail)))
}

pub async fn add_transaction(
    state: web::Data<AppState>,
    req: HttpRequest,
    user: CurrentUser,
    path: web::Path<i64>,
    body: web::Json<NewTransaction>,
) -> AppResult<HttpResponse> {
    let portfolio_id = path.into_inner();
    let tx = portfolio_service::add_transaction(&state.db, user.id, portfolio_id, &body).await?;
    audit::record(
        &state.db,
        &audit_context(&req, Some(user.id)),
        "tx_create",
        json!({
            "portfolio_id": portfolio_id,
            "tx_id": tx.id,
            "symbol": tx.symbol,
            "tx_type": tx.tx_type,
        }),
    )
    .await;
    Ok(HttpResponse::Created().json(ApiResponse::with_message(tx, "Movimiento registrado")))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route("/dashboard", web::get().to(dashboard)).service(
        web::scope("/portfolios")
            .service(
                web::resource("")
                    .route(web::get().to(list_portfolios))
                    .route(web::post().to(create_portfolio)),
            )
            .route("/{id}", web::get().to(portfolio_detail))
            .route("/{id}/transactions", web::post().to(add_transaction)),
    );
}
