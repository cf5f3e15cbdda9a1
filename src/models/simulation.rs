//! 模拟交易（训练沙盒）模型

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

string_enum! {
    /// 风险预设
    Preset { Cons => "CONS", Bal => "BAL", Agr => "AGR" } default Bal
}

string_enum! {
    /// 买卖方向
    Side { Buy => "BUY", Sell => "SELL" } default Buy
}

/// 模拟账户
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulation {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub preset: Preset,
    pub virtual_cash: Decimal,
    pub current_day: i64,
    pub seed: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新建模拟请求
#[derive(Debug, Clone, Deserialize)]
pub struct NewSimulation {
    pub name: String,
    #[serde(default)]
    pub preset: Option<Preset>,
    #[serde(default)]
    pub virtual_cash: Option<Decimal>,
    #[serde(default)]
    pub seed: Option<i64>,
}

/// 模拟持仓
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimPosition {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_price: Decimal,
}

/// 模拟成交记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimTrade {
    pub id: i64,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub day: i64,
    pub created_at: DateTime<Utc>,
}

/// 下单请求，price 为空时使用当前模拟价格
#[derive(Debug, Clone, Deserialize)]
pub struct TradeRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    #[serde(default)]
    pub price: Option<Decimal>,
}

/// 推进天数请求
#[derive(Debug, Clone, Deserialize)]
pub struct AdvanceRequest {
    pub days: i64,
}

/// 按当前价估值的持仓行
#[derive(Debug, Clone, Serialize)]
pub struct PositionRow {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_price: Decimal,
    pub price: Decimal,
    pub value: Decimal,
}

/// 模拟详情
#[derive(Debug, Serialize)]
pub struct SimulationDetail {
    pub simulation: Simulation,
    pub rows: Vec<PositionRow>,
    pub trades: Vec<SimTrade>,
    pub cash: Decimal,
    pub total_value: Decimal,
}
