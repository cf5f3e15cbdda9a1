//! 历史价格与统计分析模型

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 历史收盘价
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetPrice {
    pub symbol: String,
    pub date: NaiveDate,
    pub close: Decimal,
}

/// 价格上传参数
#[derive(Debug, Default, Deserialize)]
pub struct PriceUploadQuery {
    /// 指定资产代码时 CSV 只需 date,close 两列
    pub asset: Option<String>,
}

/// 上传结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSummary {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// 历史价格查询参数
#[derive(Debug, Default, Deserialize)]
pub struct PriceHistoryQuery {
    pub symbol: Option<String>,
    /// 起始日期（YYYY-MM-DD）
    pub from: Option<String>,
    /// 结束日期（YYYY-MM-DD）
    pub to: Option<String>,
}

/// 单个资产的统计指标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetMetrics {
    pub symbol: String,
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// 参与计算的价格点数
    pub n: usize,
    pub period_return: f64,
    /// 年化波动率
    pub vol_ann: f64,
    /// 简单夏普比率（无风险利率为 0）
    pub sharpe: f64,
    /// 最大回撤（<= 0）
    pub max_drawdown: f64,
}

/// 统计分析查询参数
#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
    pub window: Option<String>,
}

/// 排名结果
#[derive(Debug, Serialize)]
pub struct AnalyticsReport {
    pub window: i64,
    pub ranked: Vec<AssetMetrics>,
}
