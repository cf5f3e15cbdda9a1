/// 测试用：带会话中间件的完整应用
#[cfg(test)]
macro_rules! init_test_app {
    ($state:expr) => {{
        let state: crate::handlers::AppState = $state;
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new(state.clone()))
                .wrap(crate::middleware::SessionAuth::new(state.auth.clone()))
                .wrap(crate::middleware::HostGuard::new(state.config.security.allowed_hosts.clone()))
                .configure(crate::handlers::config),
        )
        .await
    }};
}

pub mod alerts;
pub mod assets;
pub mod auth;
pub mod backup;
pub mod health;
pub mod opportunities;
pub mod portfolios;
pub mod prices;
pub mod push;
pub mod pwa;
pub mod simulations;

use actix_web::web;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::Database;
use crate::services::ai_engine::AiEngine;
use crate::services::auth_service::AuthService;

/// 处理器共享状态
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<AppConfig>,
    pub auth: AuthService,
    pub ai: AiEngine,
}

impl AppState {
    pub fn new(db: Database, config: AppConfig) -> anyhow::Result<Self> {
        let auth = AuthService::new(db.clone(), config.security.clone());
        let ai = AiEngine::new(config.ai.clone())?;
        Ok(Self {
            db,
            config: Arc::new(config),
            auth,
            ai,
        })
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.configure(health::config)
        .configure(pwa::config)
        .configure(alerts::public_config)
        .service(
            web::scope("/api/v1")
                .configure(auth::config)
                .configure(portfolios::config)
                .configure(assets::config)
                .configure(prices::config)
                .configure(simulations::config)
                .configure(opportunities::config)
                .configure(alerts::config)
                .configure(backup::config)
                .configure(push::config),
        );
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn state_with(config: AppConfig) -> AppState {
        let db = Database::in_memory().await;
        AppState::new(db, config).unwrap()
    }

    pub(crate) async fn test_state() -> AppState {
        state_with(AppConfig::default()).await
    }

    /// 创建用户并签发会话，返回 Authorization 头的值
    pub(crate) async fn login_as(state: &AppState, username: &str, is_staff: bool) -> String {
        let user = state
            .auth
            .create_user(username, "u@example.com", "pass-1234", is_staff)
            .await
            .unwrap();
        let token = state.auth.issue_session(user.id).await.unwrap();
        format!("Bearer {}", token)
    }
}
