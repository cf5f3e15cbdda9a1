use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::error::AppResult;
use crate::handlers::AppState;
use crate::middleware::audit_context;
use crate::models::{ApiResponse, CurrentUser, NewAsset};
use crate::services::{asset_service, audit};

pub async fn list_assets(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let assets = asset_service::list_assets(&state.db).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(assets)))
}

pub async fn create_asset(
    state: web::Data<AppState>,
    req: HttpRequest,
    user: CurrentUser,
    body: web::Json<NewAsset>,
) -> AppResult<HttpResponse> {
    let asset = asset_service::create_asset(&state.db, &body).await?;
    audit::record(
        &state.db,
        &audit_context(&req, Some(user.id)),
        "asset_create",
        json!({"asset_id": asset.id, "symbol": asset.symbol}),
    )
    .await;
    Ok(HttpResponse::Created().json(ApiResponse::with_message(asset, "Activo creado")))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/assets")
            .route(web::get().to(list_assets))
            .route(web::post().to(create_asset)),
    );
}

#[cfg(test)]
mod tests {
    use crate::handlers::tests::{login_as, test_state};
    use actix_web::{http::StatusCode, test};
    use serde_json::{json, Value};

    #[actix_web::test]
    async fn test_duplicate_symbol_conflicts() {
        let state = test_state().await;
        let auth = login_as(&state, "ana", false).await;
        let app = init_test_app!(state);

        for expected in [StatusCode::CREATED, StatusCode::CONFLICT] {
            let req = test::TestRequest::post()
                .uri("/api/v1/assets")
                .insert_header(("Authorization", auth.clone()))
                .set_json(json!({"symbol": " al30 "}))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), expected);
        }

        let req = test::TestRequest::get()
            .uri("/api/v1/assets")
            .insert_header(("Authorization", auth))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["symbol"], "AL30");
    }
}
