//! PWA 文件：service worker 与 manifest 需从站点根路径提供

use actix_web::{http::header, web, HttpResponse};
use std::path::Path;

use crate::handlers::AppState;

async fn serve(dir: &str, name: &str, content_type: &str) -> HttpResponse {
    match tokio::fs::read(Path::new(dir).join(name)).await {
        Ok(bytes) => HttpResponse::Ok()
            .insert_header((header::CONTENT_TYPE, content_type))
            .insert_header((header::CACHE_CONTROL, "no-cache"))
            .body(bytes),
        Err(e) => {
            log::warn!("读取 {} 失败: {}", name, e);
            HttpResponse::NotFound()
                .content_type("text/plain; charset=utf-8")
                .body("Not found")
        }
    }
}

pub async fn service_worker(state: web::Data<AppState>) -> HttpResponse {
    serve(&state.config.pwa.static_dir, "sw.js", "application/javascript").await
}

pub async fn manifest(state: web::Data<AppState>) -> HttpResponse {
    serve(&state.config.pwa.static_dir, "manifest.webmanifest", "application/manifest+json").await
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.route("/sw.js", web::get().to(service_worker))
        .route("/manifest.webmanifest", web::get().to(manifest));
}

#[cfg(test)]
mod tests {
    use crate::config::AppConfig;
    use crate::handlers::tests::state_with;
    use actix_web::{http::StatusCode, test, web};

    #[actix_web::test]
    async fn test_serves_files_without_cache() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sw.js"), "self.addEventListener('fetch', () => {});").unwrap();

        let mut config = AppConfig::default();
        config.pwa.static_dir = dir.path().to_string_lossy().into_owned();
        let app = init_test_app!(state_with(config).await);

        let resp = test::call_service(&app, test::TestRequest::get().uri("/sw.js").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get("Cache-Control").unwrap(), "no-cache");
        assert_eq!(resp.headers().get("Content-Type").unwrap(), "application/javascript");

        let req = test::TestRequest::get().uri("/manifest.webmanifest").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(test::read_body(resp).await, web::Bytes::from_static(b"Not found"));
    }

    /// sw.js 中 STATIC_ASSETS 数组里的路径
    fn precached_paths(script: &str) -> Vec<String> {
        let line = script
            .lines()
            .find(|l| l.trim_start().starts_with("const STATIC_ASSETS"))
            .unwrap();
        let list = &line[line.find('[').unwrap() + 1..line.rfind(']').unwrap()];
        list.split(',')
            .map(|p| p.trim().trim_matches('"').to_string())
            .filter(|p| !p.is_empty())
            .collect()
    }

    #[actix_web::test]
    async fn test_precached_assets_are_public() {
        let static_dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("static/pwa");
        let script = std::fs::read_to_string(static_dir.join("sw.js")).unwrap();
        let paths = precached_paths(&script);
        assert!(!paths.is_empty());
        assert!(!paths.iter().any(|p| p == "/"));

        let mut config = AppConfig::default();
        config.pwa.static_dir = static_dir.to_string_lossy().into_owned();
        let app = init_test_app!(state_with(config).await);

        // cache.addAll 遇到任何非 2xx 都会让安装失败
        for path in paths {
            let resp = test::call_service(&app, test::TestRequest::get().uri(&path).to_request()).await;
            assert_eq!(resp.status(), StatusCode::OK, "{}", path);
        }
    }
}
