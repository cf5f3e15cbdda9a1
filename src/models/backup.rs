//! JSON 备份文档模型

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AssetType, Currency, Preset, RecoStatus, Severity, Side, TxType};

pub const BACKUP_VERSION: u32 = 1;

/// 备份文档
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub assets: Vec<BackupAsset>,
    #[serde(default)]
    pub prices: Vec<BackupPrice>,
    #[serde(default)]
    pub portfolios: Vec<BackupPortfolio>,
    #[serde(default)]
    pub simulations: Vec<BackupSimulation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupAsset {
    pub symbol: String,
    pub name: String,
    pub asset_type: AssetType,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPrice {
    pub symbol: String,
    pub date: NaiveDate,
    pub close: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPortfolio {
    pub name: String,
    pub base_currency: Currency,
    #[serde(default)]
    pub transactions: Vec<BackupTransaction>,
    #[serde(default)]
    pub recommendations: Vec<BackupRecommendation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupTransaction {
    pub symbol: String,
    pub tx_type: TxType,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub tx_date: NaiveDate,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecommendation {
    pub code: String,
    pub severity: Severity,
    pub title: String,
    pub rationale: String,
    #[serde(default)]
    pub evidence: Value,
    pub status: RecoStatus,
    #[serde(default)]
    pub decision_note: String,
    #[serde(default)]
    pub ai_score: i64,
    #[serde(default)]
    pub ai_confidence: i64,
    #[serde(default)]
    pub ai_action: Option<String>,
    #[serde(default)]
    pub ai_summary: String,
    #[serde(default)]
    pub ai_reasons: Value,
    #[serde(default)]
    pub ai_evaluated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSimulation {
    pub name: String,
    pub preset: Preset,
    pub virtual_cash: Decimal,
    pub current_day: i64,
    pub seed: i64,
    #[serde(default)]
    pub positions: Vec<BackupPosition>,
    #[serde(default)]
    pub trades: Vec<BackupTrade>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPosition {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupTrade {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub day: i64,
}

/// 恢复结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub assets: usize,
    pub prices: usize,
    pub portfolios: usize,
    pub transactions: usize,
    pub recommendations: usize,
    pub simulations: usize,
}
