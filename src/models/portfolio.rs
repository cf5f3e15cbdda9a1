//! 投资组合、资产与交易流水模型

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Recommendation, Simulation};

string_enum! {
    /// 组合基准货币
    Currency { Ars => "ARS", Usd => "USD", Eur => "EUR" } default Ars
}

string_enum! {
    /// 资产类型
    AssetType {
        Fci => "FCI",
        Bond => "BOND",
        Stock => "STOCK",
        Fx => "FX",
        Cash => "CASH",
        Crypto => "CRYPTO",
        Other => "OTHER",
    } default Fci
}

string_enum! {
    /// 流水类型
    TxType {
        Buy => "BUY",
        Sell => "SELL",
        Deposit => "DEPOSIT",
        Withdraw => "WITHDRAW",
        Dividend => "DIVIDEND",
        Fee => "FEE",
    } default Buy
}

/// 投资组合
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub base_currency: Currency,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新建组合请求
#[derive(Debug, Clone, Deserialize)]
pub struct NewPortfolio {
    pub name: String,
    #[serde(default)]
    pub base_currency: Option<Currency>,
}

/// 资产目录条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: i64,
    pub symbol: String,
    pub name: String,
    pub asset_type: AssetType,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新建资产请求
#[derive(Debug, Clone, Deserialize)]
pub struct NewAsset {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub asset_type: Option<AssetType>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// 交易流水
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub portfolio_id: i64,
    pub asset_id: i64,
    /// 关联资产代码
    pub symbol: String,
    pub tx_type: TxType,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub tx_date: NaiveDate,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

/// 新增流水请求，未填写的数值默认为 0，日期默认为今天
#[derive(Debug, Clone, Deserialize)]
pub struct NewTransaction {
    pub asset_id: i64,
    pub tx_type: TxType,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub fee: Option<Decimal>,
    #[serde(default)]
    pub tx_date: Option<NaiveDate>,
    #[serde(default)]
    pub note: Option<String>,
}

/// 组合详情
#[derive(Debug, Serialize)]
pub struct PortfolioDetail {
    pub portfolio: Portfolio,
    pub transactions: Vec<Transaction>,
    pub recommendations: Vec<Recommendation>,
}

/// 首页概览
#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub portfolios: Vec<Portfolio>,
    pub simulations: Vec<Simulation>,
}

/// 组合快照：由最近的流水近似推算持仓与现金
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub id: i64,
    pub name: String,
    pub base_currency: String,
    pub holdings: BTreeMap<String, f64>,
    pub cash: BTreeMap<String, f64>,
    pub last_tx_count: usize,
}

/// 单个代码的最新价格
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

/// 代码 -> 最新价格
pub type PriceSnapshot = BTreeMap<String, PricePoint>;
