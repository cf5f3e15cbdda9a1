//! 简单统计分析：区间收益、年化波动率、夏普比率（无风险利率 0）、最大回撤
//!
//! 只使用用户上传的历史价格，不访问外部行情。

use chrono::{Duration, NaiveDate};
use rust_decimal::prelude::ToPrimitive;

use crate::db::Database;
use crate::error::AppResult;
use crate::models::{AnalyticsReport, AssetMetrics};
use crate::services::{asset_service, price_service};

/// 年化交易日数
const TRADING_DAYS: f64 = 252.0;
/// 默认窗口（天）
pub const DEFAULT_WINDOW: i64 = 90;
/// 默认排名条数
pub const DEFAULT_LIMIT: usize = 20;

/// 解析窗口参数：缺失或非法时为 90，限制在 [7, 3650]
pub fn parse_window(raw: Option<&str>) -> i64 {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(DEFAULT_WINDOW)
        .clamp(7, 3650)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// 总体标准差
fn pstdev(values: &[f64]) -> f64 {
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// 相对历史高点的最大回撤（<= 0）
pub fn max_drawdown(prices: &[f64]) -> f64 {
    let Some(&first) = prices.first() else {
        return 0.0;
    };
    let mut peak = first;
    let mut max_dd = 0.0;
    for &p in &prices[1..] {
        if p > peak {
            peak = p;
        }
        if peak > 0.0 {
            let dd = p / peak - 1.0;
            if dd < max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

/// 计算单个序列的指标
///
/// 序列需按日期升序；只保留最后日期往前 `window_days` 天内的点。
/// 点数少于 2 或有效日收益少于 2 时返回 None。
pub fn compute_metrics(
    symbol: &str,
    name: &str,
    series: &[(NaiveDate, f64)],
    window_days: i64,
) -> Option<AssetMetrics> {
    let (last, _) = *series.last()?;
    let cut = last - Duration::days(window_days);
    let window: Vec<(NaiveDate, f64)> = series.iter().copied().filter(|(d, _)| *d >= cut).collect();
    if window.len() < 2 {
        return None;
    }

    let prices: Vec<f64> = window.iter().map(|(_, p)| *p).collect();
    let returns: Vec<f64> = prices
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();
    if returns.len() < 2 {
        return None;
    }

    let period_return = prices[prices.len() - 1] / prices[0] - 1.0;
    let vol_ann = pstdev(&returns) * TRADING_DAYS.sqrt();
    let sharpe = if vol_ann > 1e-12 {
        mean(&returns) * TRADING_DAYS / vol_ann
    } else {
        0.0
    };

    Some(AssetMetrics {
        symbol: symbol.to_string(),
        name: name.to_string(),
        start: window[0].0,
        end: window[window.len() - 1].0,
        n: prices.len(),
        period_return,
        vol_ann,
        sharpe,
        max_drawdown: max_drawdown(&prices),
    })
}

/// 按 (sharpe, 区间收益) 降序排序，相等时保持原顺序
pub fn sort_ranked(items: &mut [AssetMetrics]) {
    items.sort_by(|a, b| {
        b.sharpe
            .total_cmp(&a.sharpe)
            .then_with(|| b.period_return.total_cmp(&a.period_return))
    });
}

/// 对全部资产计算指标并排名
pub async fn rank_assets(db: &Database, window_days: i64, limit: usize) -> AppResult<Vec<AssetMetrics>> {
    let mut ranked = Vec::new();
    for asset in asset_service::list_assets(db).await? {
        let series: Vec<(NaiveDate, f64)> = price_service::series_for_asset(db, asset.id)
            .await?
            .into_iter()
            .map(|(d, c)| (d, c.to_f64().unwrap_or(0.0)))
            .collect();
        if let Some(m) = compute_metrics(&asset.symbol, &asset.name, &series, window_days) {
            ranked.push(m);
        }
    }

    sort_ranked(&mut ranked);
    ranked.truncate(limit);
    Ok(ranked)
}

/// 分析页数据
pub async fn analytics(db: &Database, window: Option<&str>) -> AppResult<AnalyticsReport> {
    let window = parse_window(window);
    let ranked = rank_assets(db, window, DEFAULT_LIMIT).await?;
    Ok(AnalyticsReport { window, ranked })
}
