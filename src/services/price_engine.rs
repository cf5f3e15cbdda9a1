//! 模拟行情引擎
//!
//! 由 (seed, 代码, 天数) 的 SHA-256 摘要得到确定性的伪随机冲击，
//! 同一输入永远得到同一价格，便于复现训练场景。

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sha2::{Digest, Sha256};
use std::str::FromStr;

/// 日漂移
const DRIFT: f64 = 0.0003;
/// 日波动
const VOL: f64 = 0.015;
/// 价格下限 0.000001
fn min_price() -> Decimal {
    Decimal::new(1, 6)
}

/// [0, 1) 区间的确定性随机数
fn unit_random(seed: i64, symbol: &str, day: i64) -> f64 {
    let digest = Sha256::digest(format!("{}:{}:{}", seed, symbol.to_uppercase(), day).as_bytes());
    let head = hex::encode(&digest[..4]);
    let n = u64::from_str_radix(&head, 16).unwrap_or(0);
    (n % 1_000_000) as f64 / 1_000_000.0
}

/// 第 `day` 天的价格倍数
pub fn price_factor(symbol: &str, day: i64, seed: i64) -> f64 {
    let shock = (unit_random(seed, symbol, day) - 0.5) * 2.0;
    let t = day.max(1) as f64;
    (DRIFT * day as f64 + VOL * shock * t.sqrt()).exp()
}

/// 以 `base` 为基准价计算第 `day` 天的模拟价格，保留 6 位小数（四舍五入）
pub fn price_for(symbol: &str, day: i64, seed: i64, base: Decimal) -> Decimal {
    let factor = price_factor(symbol, day, seed);
    let factor = Decimal::from_str(&factor.to_string())
        .ok()
        .or_else(|| Decimal::from_f64(factor))
        .unwrap_or(Decimal::ONE);

    let price = base
        .checked_mul(factor)
        .unwrap_or(base)
        .round_dp_with_strategy(6, RoundingStrategy::MidpointAwayFromZero);

    price.max(min_price())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let base = Decimal::from(100);
        let a = price_for("GGAL", 10, 12345, base);
        let b = price_for("ggal", 10, 12345, base);
        assert_eq!(a, b);
    }

    #[test]
    fn test_reference_prices() {
        let cases = [
            ("GGAL", 10, 12345, "100", "99.115011"),
            ("SPY", 3, 12345, "100", "98.954594"),
            ("AAPL", 250, 7, "1234.5678", "1433.918326"),
            ("X", 365, 1, "0.37", "0.442342"),
        ];
        for (symbol, day, seed, base, expected) in cases {
            let base = Decimal::from_str(base).unwrap();
            let expected = Decimal::from_str(expected).unwrap();
            assert_eq!(price_for(symbol, day, seed, base), expected, "{} day {} seed {}", symbol, day, seed);
        }
    }

    #[test]
    fn test_seed_and_day_change_price() {
        let base = Decimal::from(100);
        let prices: Vec<Decimal> = (0..20).map(|d| price_for("AAPL", d, 1, base)).collect();
        let distinct = prices.iter().collect::<std::collections::HashSet<_>>().len();
        assert!(distinct > 1);

        let other_seed: Vec<Decimal> = (0..20).map(|d| price_for("AAPL", d, 2, base)).collect();
        assert_ne!(prices, other_seed);
    }

    #[test]
    fn test_factor_bounds() {
        // day=0 时 factor = exp(0.015 * shock)，shock ∈ [-1, 1)
        for sym in ["A", "B", "C", "SPY", "BTC"] {
            let f = price_factor(sym, 0, 12345);
            assert!(f >= (-VOL).exp() - 1e-12 && f <= VOL.exp() + 1e-12, "{} -> {}", sym, f);
        }
    }

    #[test]
    fn test_rounding_and_floor() {
        let p = price_for("SPY", 5, 7, Decimal::from(100));
        assert!(p.scale() <= 6);

        let tiny = price_for("SPY", 5, 7, Decimal::ZERO);
        assert_eq!(tiny, min_price());
    }
}
