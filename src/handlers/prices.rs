//! 历史价格上传、查询与统计分析

use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::error::AppResult;
use crate::handlers::AppState;
use crate::middleware::audit_context;
use crate::models::{AnalyticsQuery, ApiResponse, CurrentUser, PriceHistoryQuery, PriceUploadQuery};
use crate::services::{audit, price_service, stats_engine};

/// 上传 CSV（请求体为文件内容）
pub async fn upload_prices(
    state: web::Data<AppState>,
    req: HttpRequest,
    user: CurrentUser,
    query: web::Query<PriceUploadQuery>,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    let summary = price_service::import_csv(&state.db, &body, query.asset.as_deref()).await?;
    audit::record(
        &state.db,
        &audit_context(&req, Some(user.id)),
        "prices_upload",
        json!({
            "asset": query.asset,
            "inserted": summary.inserted,
            "updated": summary.updated,
            "skipped": summary.skipped,
        }),
    )
    .await;
    let message = format!(
        "CSV procesado: {} nuevos, {} actualizados, {} omitidos",
        summary.inserted, summary.updated, summary.skipped
    );
    Ok(HttpResponse::Ok().json(ApiResponse::with_message(summary, message)))
}

pub async fn price_history(
    state: web::Data<AppState>,
    query: web::Query<PriceHistoryQuery>,
) -> AppResult<HttpResponse> {
    let prices = price_service::history(&state.db, &query).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(prices)))
}

pub async fn analytics(
    state: web::Data<AppState>,
    query: web::Query<AnalyticsQuery>,
) -> AppResult<HttpResponse> {
    let report = stats_engine::analytics(&state.db, query.window.as_deref()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(report)))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/prices")
            .route("/upload", web::post().to(upload_prices))
            .route("/history", web::get().to(price_history)),
    )
    .route("/analytics", web::get().to(analytics));
}

#[cfg(test)]
mod tests {
    use crate::handlers::tests::{login_as, test_state};
    use crate::models::NewAsset;
    use crate::services::asset_service;
    use actix_web::{http::StatusCode, test};
    use serde_json::Value;

    #[actix_web::test]
    async fn test_upload_for_selected_asset() {
        let state = test_state().await;
        let auth = login_as(&state, "ana", false).await;
        asset_service::create_asset(
            &state.db,
            &NewAsset {
                symbol: "FCI1".into(),
                name: None,
                asset_type: None,
                currency: None,
            },
        )
        .await
        .unwrap();
        let app = init_test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/v1/prices/upload?asset=fci1")
            .insert_header(("Authorization", auth.clone()))
            .set_payload("fecha;precio\n01/03/2024;1,25\n02/03/2024;1,30\nbasura;x\n")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["inserted"], 2);
        assert_eq!(body["data"]["skipped"], 1);

        let req = test::TestRequest::get()
            .uri("/api/v1/prices/history?symbol=FCI1")
            .insert_header(("Authorization", auth))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"][0]["date"], "2024-03-02");
        assert_eq!(body["data"][0]["close"], "1.30");
    }

    #[actix_web::test]
    async fn test_upload_accepts_date_close_headers() {
        let state = test_state().await;
        let auth = login_as(&state, "ana", false).await;
        asset_service::create_asset(
            &state.db,
            &NewAsset {
                symbol: "AL30".into(),
                name: None,
                asset_type: None,
                currency: None,
            },
        )
        .await
        .unwrap();
        let app = init_test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/v1/prices/upload?asset=AL30")
            .insert_header(("Authorization", auth))
            .set_payload("date,close\n2024-01-02,70.5\n2024-01-03,71\n")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["inserted"], 2);
        assert_eq!(body["data"]["skipped"], 0);
    }

    #[actix_web::test]
    async fn test_upload_unknown_asset_404() {
        let state = test_state().await;
        let auth = login_as(&state, "ana", false).await;
        let app = init_test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/v1/prices/upload?asset=NOPE")
            .insert_header(("Authorization", auth))
            .set_payload("date,close\n2024-01-01,10\n")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_analytics_window_clamped() {
        let state = test_state().await;
        let auth = login_as(&state, "ana", false).await;
        let app = init_test_app!(state);

        let req = test::TestRequest::get()
            .uri("/api/v1/analytics?window=99999")
            .insert_header(("Authorization", auth))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["window"], 3650);
        assert_eq!(body["data"]["ranked"], serde_json::json!([]));
    }
}
