use actix_web::{web, HttpResponse, Result};
use serde_json::json;

use crate::models::local_now;

/// 健康检查（不使用统一响应格式，供负载均衡探测）
pub async fn health_check() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "ok": true,
        "ts": local_now().to_rfc3339(),
    })))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route("/healthz/", web::get().to(health_check));
}

#[cfg(test)]
mod tests {
    use crate::handlers::tests::test_state;
    use actix_web::test;

    #[actix_web::test]
    async fn test_healthz_is_public() {
        let app = init_test_app!(test_state().await);
        let req = test::TestRequest::get().uri("/healthz/").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["ok"], true);
        assert!(body["ts"].is_string());
    }

    #[actix_web::test]
    async fn test_unlisted_host_is_rejected() {
        let app = init_test_app!(test_state().await);
        let req = test::TestRequest::get()
            .uri("/healthz/")
            .insert_header(("Host", "evil.test"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);

        let req = test::TestRequest::get()
            .uri("/healthz/")
            .insert_header(("Host", "127.0.0.1:8000"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }
}
