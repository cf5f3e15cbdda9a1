//! 投资机会（推荐）模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

string_enum! {
    /// 严重程度
    Severity { Low => "LOW", Med => "MED", High => "HIGH" } default Low
}

string_enum! {
    /// 处理状态
    RecoStatus { Open => "OPEN", Accepted => "ACCEPTED", Ignored => "IGNORED" } default Open
}

string_enum! {
    /// AI 建议动作
    AiAction {
        Enter => "ENTER",
        Exit => "EXIT",
        Hold => "HOLD",
        Ignore => "IGNORE",
        NeedsData => "NEEDS_DATA",
    } default Hold
}

/// 投资机会
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: i64,
    pub portfolio_id: i64,
    pub code: String,
    pub severity: Severity,
    pub title: String,
    pub rationale: String,
    pub evidence: Value,
    pub status: RecoStatus,
    pub decision_note: String,
    pub ai_score: Option<i64>,
    pub ai_confidence: Option<i64>,
    pub ai_action: String,
    pub ai_summary: String,
    pub ai_reasons: Value,
    pub ai_evaluated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新建机会；AI 字段缺省时由存储层补齐
#[derive(Debug, Clone, Default)]
pub struct NewRecommendation {
    pub portfolio_id: i64,
    pub code: String,
    pub severity: Severity,
    pub title: String,
    pub rationale: String,
    pub evidence: Value,
    pub status: RecoStatus,
    pub ai_action: Option<String>,
    pub ai_summary: Option<String>,
    pub ai_score: Option<i64>,
    pub ai_confidence: Option<i64>,
    pub ai_reasons: Option<Value>,
    pub ai_evaluated_at: Option<DateTime<Utc>>,
    pub decision_note: String,
    /// 缺省为当前时间（恢复备份时沿用原值）
    pub created_at: Option<DateTime<Utc>>,
}

/// 生成前的诊断数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub portfolio_id: i64,
    pub tx_count: i64,
    pub holdings_count: usize,
    pub prices_available: usize,
    pub prices_missing: usize,
    pub open_opportunities: i64,
}

/// 生成结果
#[derive(Debug, Clone, Serialize)]
pub struct GenerateResult {
    pub created: usize,
    pub reason: String,
    pub diag: Diagnostics,
}

/// AI 评估结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiEval {
    pub score: i64,
    pub confidence: i64,
    pub action: AiAction,
    pub summary: String,
    pub reasons: Value,
}

/// 对单个机会的处理请求
#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    /// accept/send, ignore/dismiss, reopen
    pub action: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// 处理动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Ignore,
    Reopen,
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "accept" | "send" => Ok(Decision::Accept),
            "ignore" | "dismiss" => Ok(Decision::Ignore),
            "reopen" => Ok(Decision::Reopen),
            other => Err(format!("未知操作: {}", other)),
        }
    }
}

/// 历史库查询参数
#[derive(Debug, Default, Deserialize)]
pub struct OpportunityQuery {
    pub q: Option<String>,
    pub status: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

/// 待处理机会列表
#[derive(Debug, Serialize)]
pub struct OpportunityInbox {
    pub items: Vec<Recommendation>,
    pub open_count: usize,
    pub openai_configured: bool,
    pub ai_governance: bool,
    pub ai_min_score: i64,
}

/// 批量 AI 评估结果
#[derive(Debug, Serialize)]
pub struct AiBatchResult {
    pub evaluated: usize,
    pub limit: i64,
}

/// 导航角标计数
#[derive(Debug, Serialize, Deserialize)]
pub struct Badges {
    pub ok: bool,
    pub opps_open: i64,
    pub app_badge: i64,
}
