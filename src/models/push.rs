//! Web Push 订阅模型

use serde::{Deserialize, Serialize};

/// 浏览器 PushSubscription.toJSON() 的结构
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeRequest {
    pub endpoint: String,
    pub keys: PushKeys,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}

/// 推送配置状态
#[derive(Debug, Serialize)]
pub struct PushStatus {
    pub subs_count: i64,
    pub public_key: String,
    pub private_key_ok: bool,
    pub claims_sub: String,
}
