//! 用户与会话模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 系统用户
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// argon2 PHC 字符串，不对外输出
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// 当前请求的登录用户（由会话中间件写入请求扩展）
#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub id: i64,
    pub username: String,
    pub is_staff: bool,
}

/// 登录请求
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// 登录响应
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
    /// 有效期（秒）
    pub expires_in: i64,
    pub username: String,
}

/// 注销响应：客户端应跳转到登录页
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub redirect: String,
}

/// 初始管理员创建结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// 缺少用户名或密码
    MissingCredentials,
    /// 已存在超级用户，不做任何修改
    SuperuserExists,
    Created(String),
    Promoted { username: String, password_reset: bool },
}
