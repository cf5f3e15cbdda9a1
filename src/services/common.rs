//! 公共辅助函数

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::{AppError, AppResult};

/// 数值字段最多 18 位数字
const MAX_DIGITS: u32 = 18;

/// 按字符截断（不会切断多字节字符）
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// 解析 YYYY-MM-DD，无效或为空时返回 None
pub fn parse_iso_date(s: Option<&str>) -> Option<NaiveDate> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

/// 统一代码格式：去空白并转大写
pub fn normalize_symbol(s: &str) -> String {
    s.trim().to_uppercase()
}

/// 能否放进最多 18 位数字、`scale` 位小数的字段
pub fn fits_digits(value: Decimal, scale: u32) -> bool {
    value.normalize().scale() <= scale && value.abs() < Decimal::from(10i64.pow(MAX_DIGITS - scale))
}

/// 校验金额/数量输入，小数位过多或超出范围时返回 BadRequest
pub fn check_amount(value: Decimal, scale: u32, field: &str) -> AppResult<Decimal> {
    if value.normalize().scale() > scale {
        return Err(AppError::bad_request(format!("{} 最多 {} 位小数", field, scale)));
    }
    if !fits_digits(value, scale) {
        return Err(AppError::bad_request(format!("{} 超出范围（最多 {} 位数字）", field, MAX_DIGITS)));
    }
    Ok(value)
}

/// 常量时间字符串比较
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
