//! Host 头校验中间件
//!
//! 只接受 `security.allowed_hosts` 中列出的主机名，其余请求返回 400

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpResponse,
};
use futures::future::{ok, LocalBoxFuture, Ready};
use std::rc::Rc;

use crate::models::ApiResponse;

/// 去掉端口；IPv6 保留方括号
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    host.rsplit_once(':').map_or(host, |(h, _)| h)
}

/// 主机名是否在允许列表中
///
/// 支持 `*`（全部放行）与 `.example.com`（域名及其子域名）。列表为空时不做限制。
pub fn host_allowed(host: &str, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let host = strip_port(host.trim()).trim_end_matches('.').to_lowercase();
    if host.is_empty() {
        return false;
    }
    allowed.iter().any(|pattern| {
        let pattern = pattern.trim().to_lowercase();
        if pattern == "*" {
            return true;
        }
        match pattern.strip_prefix('.') {
            Some(domain) => host == domain || host.ends_with(&pattern),
            None => host == pattern,
        }
    })
}

/// Host 校验中间件
pub struct HostGuard {
    allowed: Rc<Vec<String>>,
}

impl HostGuard {
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed: Rc::new(allowed) }
    }
}

impl<S, B> Transform<S, ServiceRequest> for HostGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = HostGuardService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(HostGuardService {
            service: Rc::new(service),
            allowed: self.allowed.clone(),
        })
    }
}

pub struct HostGuardService<S> {
    service: Rc<S>,
    allowed: Rc<Vec<String>>,
}

impl<S, B> Service<ServiceRequest> for HostGuardService<S>
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
        let host = req.connection_info().host().to_string();

        if !host_allowed(&host, &self.allowed) {
            log::warn!("拒绝不在允许列表中的 Host: {}", host);
            let response = HttpResponse::BadRequest()
                .json(ApiResponse::<()>::error(format!("Host no permitido: {}", host)));
            return Box::pin(async move { Ok(req.into_response(response).map_into_right_body()) });
        }

        Box::pin(async move {
            let res = service.call(req).await?;
            Ok(res.map_into_left_body())
        })
    }
}
