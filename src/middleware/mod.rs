//! 中间件与请求上下文提取

mod host;
mod session;

pub use host::HostGuard;
pub use session::{bearer_token, SessionAuth};

use actix_web::{dev::Payload, FromRequest, HttpMessage, HttpRequest};
use futures::future::{ready, Ready};

use crate::error::AppError;
use crate::models::CurrentUser;
use crate::services::audit::AuditContext;

/// 客户端 IP：优先取 X-Forwarded-For 的第一个地址，否则取对端地址
pub fn client_ip(req: &HttpRequest) -> Option<String> {
    let forwarded = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    forwarded.or_else(|| req.peer_addr().map(|addr| addr.ip().to_string()))
}

/// 构造审计上下文
pub fn audit_context(req: &HttpRequest, user_id: Option<i64>) -> AuditContext {
    let user_agent = req
        .headers()
        .get("User-Agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    AuditContext::new(user_id, client_ip(req), user_agent)
}

/// 从请求扩展中取出会话中间件写入的当前用户
impl FromRequest for CurrentUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<CurrentUser>()
                .cloned()
                .ok_or_else(|| AppError::Unauthorized("未登录".to_string())),
        )
    }
}
