//! 会话认证中间件
//!
//! 通过 Header 中的 Authorization: Bearer <token> 解析登录用户，
//! 公开路径直接放行

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::HeaderMap,
    Error, HttpMessage, HttpResponse,
};
use futures::future::{ok, LocalBoxFuture, Ready};
use std::rc::Rc;

use crate::models::ApiResponse;
use crate::services::auth_service::AuthService;

/// 无需登录即可访问的路径
const PUBLIC_PATHS: [&str; 4] = ["/healthz/", "/api/v1/auth/login", "/sw.js", "/manifest.webmanifest"];
const PUBLIC_PREFIXES: [&str; 1] = ["/alerts/run/"];

fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path) || PUBLIC_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// 提取 Bearer 令牌
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// 会话中间件
pub struct SessionAuth {
    auth: Rc<AuthService>,
}

impl SessionAuth {
    pub fn new(auth: AuthService) -> Self {
        Self { auth: Rc::new(auth) }
    }
}

impl<S, B> Transform<S, ServiceRequest> for SessionAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = SessionAuthService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(SessionAuthService {
            service: Rc::new(service),
            auth: self.auth.clone(),
        })
    }
}

pub struct SessionAuthService<S> {
    service: Rc<S>,
    auth: Rc<AuthService>,
}

impl<S, B> Service<ServiceRequest> for SessionAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let auth = self.auth.clone();

        Box::pin(async move {
            if is_public(req.path()) {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            }

            let user = match bearer_token(req.headers()) {
                Some(token) => match auth.resolve_session(&token).await {
                    Ok(user) => user,
                    Err(e) => {
                        log::error!("会话解析失败: {}", e);
                        None
                    }
                },
                None => None,
            };

            match user {
                Some(user) => {
                    req.extensions_mut().insert(user);
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
                None => {
                    let response = HttpResponse::Unauthorized()
                        .json(ApiResponse::<()>::error("未登录或会话已过期".to_string()));
                    Ok(req.into_response(response).map_into_right_body())
                }
            }
        })
    }
}
