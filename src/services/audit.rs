//! 审计日志
//!
//! 记录登录、创建、决策等事件；写入失败只记日志，绝不影响业务请求

use chrono::Utc;
use serde_json::Value;

use crate::db::Database;
use crate::services::common::truncate_chars;

/// 请求来源信息
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub user_id: Option<i64>,
    pub ip_address: Option<String>,
    pub user_agent: String,
}

impl AuditContext {
    pub fn new(user_id: Option<i64>, ip_address: Option<String>, user_agent: &str) -> Self {
        Self {
            user_id,
            ip_address,
            user_agent: truncate_chars(user_agent, 400),
        }
    }

    pub fn for_user(&self, user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            ..self.clone()
        }
    }
}

/// 写入一条审计事件
pub async fn record(db: &Database, ctx: &AuditContext, event_type: &str, details: Value) {
    let details = if details.is_null() { serde_json::json!({}) } else { details };

    let result = sqlx::query(
        r#"
        INSERT INTO audit_events (user_id, event_type, ip_address, user_agent, details, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(ctx.user_id)
    .bind(event_type)
    .bind(&ctx.ip_address)
    .bind(&ctx.user_agent)
    .bind(details.to_string())
    .bind(Utc::now())
    .execute(db.pool())
    .await;

    if let Err(e) = result {
        log::warn!("审计事件 {} 写入失败: {}", event_type, e);
    }
}

/// 查询某类事件数量
pub async fn count_events(db: &Database, event_type: &str) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM audit_events WHERE event_type = ?")
        .bind(event_type)
        .fetch_one(db.pool())
        .await
        .unwrap_or(0)
}
