use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::error::AppResult;
use crate::handlers::AppState;
use crate::middleware::audit_context;
use crate::models::{ApiResponse, Backup, CurrentUser};
use crate::services::{audit, backup_service};

/// 导出当前用户数据（附件下载）
pub async fn export(state: web::Data<AppState>, user: CurrentUser) -> AppResult<HttpResponse> {
    let backup = backup_service::export(&state.db, user.id).await?;
    let filename = format!("invpanel-backup-{}.json", backup.generated_at.format("%Y%m%d-%H%M%S"));
    Ok(HttpResponse::Ok()
        .insert_header(("Content-Disposition", format!("attachment; filename=\"{}\"", filename)))
        .json(backup))
}

pub async fn restore(
    state: web::Data<AppState>,
    req: HttpRequest,
    user: CurrentUser,
    body: web::Json<Backup>,
) -> AppResult<HttpResponse> {
    let summary = backup_service::restore(&state.db, user.id, &body).await?;
    audit::record(
        &state.db,
        &audit_context(&req, Some(user.id)),
        "backup_restore",
        json!(summary),
    )
    .await;
    Ok(HttpResponse::Ok().json(ApiResponse::with_message(summary, "Backup restaurado")))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/backup")
            .route("", web::get().to(export))
            .route("/restore", web::post().to(restore)),
    );
}

#[cfg(test)]
mod tests {
    use crate::handlers::tests::{login_as, test_state};
    use crate::services::audit::count_events;
    use actix_web::{http::StatusCode, test, web};
    use serde_json::{json, Value};

    #[actix_web::test]
    async fn test_export_then_restore() {
        let state = test_state().await;
        let ana = login_as(&state, "ana", false).await;
        let beto = login_as(&state, "beto", false).await;
        let app = init_test_app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/api/v1/portfolios")
            .insert_header(("Authorization", ana.clone()))
            .set_json(json!({"name": "Ahorro"}))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::get()
            .uri("/api/v1/backup")
            .insert_header(("Authorization", ana))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.headers().get("Content-Disposition").is_some());
        let doc: web::Bytes = test::read_body(resp).await;
        let parsed: Value = serde_json::from_slice(&doc).unwrap();
        assert_eq!(parsed["version"], 1);

        let req = test::TestRequest::post()
            .uri("/api/v1/backup/restore")
            .insert_header(("Authorization", beto))
            .insert_header(("Content-Type", "application/json"))
            .set_payload(doc)
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["portfolios"], 1);
        assert_eq!(count_events(&state.db, "backup_restore").await, 1);
    }

    #[actix_web::test]
    async fn test_restore_bad_version() {
        let state = test_state().await;
        let auth = login_as(&state, "ana", false).await;
        let app = init_test_app!(state);

        let req = test::TestRequest::post()
            .uri("/api/v1/backup/restore")
            .insert_header(("Authorization", auth))
            .set_json(json!({"version": 9, "generated_at": "2024-01-01T00:00:00Z"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}
