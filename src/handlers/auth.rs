use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::handlers::AppState;
use crate::middleware::{audit_context, bearer_token};
use crate::models::{ApiResponse, CurrentUser, LoginRequest, LoginResponse, LogoutResponse};
use crate::services::audit;

/// 登录；失败次数按 (IP, 用户名) 统计
pub async fn login(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<LoginRequest>,
) -> AppResult<HttpResponse> {
    let ctx = audit_context(&req, None);
    let ip = ctx.ip_address.clone().unwrap_or_default();

    match state.auth.login(&body.username, &body.password, &ip).await {
        Ok((user, token)) => {
            audit::record(&state.db, &ctx.for_user(user.id), "login", json!({"username": user.username})).await;
            Ok(HttpResponse::Ok().json(ApiResponse::success(LoginResponse {
                token,
                token_type: "Bearer".to_string(),
                expires_in: state.auth.session_ttl_secs(),
                username: user.username,
            })))
        }
        Err(e) => {
            if matches!(e, AppError::Unauthorized(_) | AppError::Locked(_)) {
                audit::record(
                    &state.db,
                    &ctx,
                    "login_failed",
                    json!({"username": body.username.trim(), "reason": e.to_string()}),
                )
                .await;
            }
            Err(e)
        }
    }
}

/// 注销（仅 POST）
pub async fn logout(
    state: web::Data<AppState>,
    req: HttpRequest,
    user: CurrentUser,
) -> AppResult<HttpResponse> {
    if let Some(token) = bearer_token(req.headers()) {
        state.auth.logout(&token).await?;
    }
    audit::record(&state.db, &audit_context(&req, Some(user.id)), "logout", json!({})).await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(LogoutResponse {
        redirect: "/login/".to_string(),
    })))
}

pub async fn me(user: CurrentUser) -> AppResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(ApiResponse::success(user)))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .route("/login", web::post().to(login))
            .service(web::resource("/logout").route(web::post().to(logout)))
            .route("/me", web::get().to(me)),
    );
}

#[cfg(test)]
mod tests {
    use crate::config::AppConfig;
    use crate::handlers::tests::{login_as, state_with, test_state};
    use crate::services::audit::count_events;
    use actix_web::{http::StatusCode, test};
    use serde_json::{json, Value};

    #[actix_web::test]
    async fn test_login_and_me() {
        let state = test_state().await;
        state.auth.create_user("ana", "ana@example.com", "s3creto!", false).await.unwrap();
        let app = init_test_app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/api/v1/auth/login")
            .set_json(json!({"username": "ana", "password": "s3creto!"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["token_type"], "Bearer");
        let token = body["data"]["token"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri("/api/v1/auth/me")
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["username"], "ana");
        assert_eq!(count_events(&state.db, "login").await, 1);
    }

    #[actix_web::test]
    async fn test_requires_session() {
        let app = init_test_app!(test_state().await);
        let req = test::TestRequest::get().uri("/api/v1/auth/me").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_lockout_after_failures() {
        let mut config = AppConfig::default();
        config.security.login_failure_limit = 2;
        let state = state_with(config).await;
        state.auth.create_user("ana", "ana@example.com", "s3creto!", false).await.unwrap();
        let app = init_test_app!(state.clone());

        for _ in 0..2 {
            let req = test::TestRequest::post()
                .uri("/api/v1/auth/login")
                .peer_addr("10.1.1.1:5000".parse().unwrap())
                .set_json(json!({"username": "ana", "password": "mal"}))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
        }

        let req = test::TestRequest::post()
            .uri("/api/v1/auth/login")
            .peer_addr("10.1.1.1:5000".parse().unwrap())
            .set_json(json!({"username": "ana", "password": "s3creto!"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::LOCKED);
        assert_eq!(count_events(&state.db, "login_failed").await, 3);
    }

    #[actix_web::test]
    async fn test_logout_is_post_only() {
        let state = test_state().await;
        let auth = login_as(&state, "ana", false).await;
        let app = init_test_app!(state.clone());

        let req = test::TestRequest::get()
            .uri("/api/v1/auth/logout")
            .insert_header(("Authorization", auth.clone()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::METHOD_NOT_ALLOWED);

        let req = test::TestRequest::post()
            .uri("/api/v1/auth/logout")
            .insert_header(("Authorization", auth.clone()))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["redirect"], "/login/");

        // 会话已失效
        let req = test::TestRequest::get()
            .uri("/api/v1/auth/me")
            .insert_header(("Authorization", auth))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }
}
