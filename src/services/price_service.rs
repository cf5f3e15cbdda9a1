//! 历史价格服务：CSV 导入与查询

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;

use crate::db::{decimal_col, Database};
use crate::error::{AppError, AppResult};
use crate::models::{Asset, AssetPrice, PriceHistoryQuery, UploadSummary};
use crate::services::asset_service;
use crate::services::common::{fits_digits, normalize_symbol, parse_iso_date};

/// 历史查询最多返回的行数
const HISTORY_LIMIT: i64 = 1000;

/// 解码上传内容：优先 UTF-8，失败时按 Windows-1252 解码，去掉 BOM
pub fn decode_csv(bytes: &[u8]) -> String {
    let text = match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    };
    text.trim_start_matches('\u{feff}').to_string()
}

/// 根据前 2048 字节的表头行判断分隔符
pub fn sniff_delimiter(text: &str) -> u8 {
    let mut end = text.len().min(2048);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let header = text[..end].lines().next().unwrap_or("");
    if header.matches(';').count() > header.matches(',').count() {
        b';'
    } else {
        b','
    }
}

/// 支持 YYYY-MM-DD 与 DD/MM/YYYY
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    ["%Y-%m-%d", "%d/%m/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// 解析收盘价；只有逗号没有点时逗号视为小数点
pub fn parse_close(raw: &str) -> Option<Decimal> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let s = if s.contains(',') && !s.contains('.') {
        s.replace(',', ".")
    } else {
        s.to_string()
    };
    Decimal::from_str(&s)
        .or_else(|_| Decimal::from_scientific(&s))
        .ok()
        .map(|d| d.round_dp(6))
        .filter(|d| fits_digits(*d, 6))
}

/// 一行 CSV 按表头取值
struct CsvRow<'a> {
    columns: &'a HashMap<String, usize>,
    record: &'a csv::StringRecord,
}

impl<'a> CsvRow<'a> {
    /// 依次尝试多个列名，返回第一个非空值
    fn get(&self, names: &[&str]) -> Option<&'a str> {
        names.iter().find_map(|name| {
            self.columns
                .get(*name)
                .and_then(|&i| self.record.get(i))
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
    }
}

/// 写入或更新某资产某日的收盘价，返回是否为新增
pub async fn upsert_price(db: &Database, asset_id: i64, date: NaiveDate, close: Decimal) -> AppResult<bool> {
    let mut conn = db.pool().acquire().await?;
    upsert_price_in(&mut *conn, asset_id, date, close).await
}

pub(crate) async fn upsert_price_in(
    conn: &mut SqliteConnection,
    asset_id: i64,
    date: NaiveDate,
    close: Decimal,
) -> AppResult<bool> {
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM asset_prices WHERE asset_id = ? AND date = ?")
        .bind(asset_id)
        .bind(date)
        .fetch_optional(&mut *conn)
        .await?;

    match existing {
        Some(id) => {
            sqlx::query("UPDATE asset_prices SET close = ? WHERE id = ?")
                .bind(close.to_string())
                .bind(id)
                .execute(&mut *conn)
                .await?;
            Ok(false)
        }
        None => {
            sqlx::query("INSERT INTO asset_prices (asset_id, date, close) VALUES (?, ?, ?)")
                .bind(asset_id)
                .bind(date)
                .bind(close.to_string())
                .execute(&mut *conn)
                .await?;
            Ok(true)
        }
    }
}

/// 导入 CSV
///
/// - 指定 `asset` 时：`date,close`（或 `fecha,precio`）
/// - 未指定时：`date,symbol,close`，可选 `name`，未知代码自动建档
///
/// 无效行计入 skipped，不会中断导入；整个文件在一个事务内写入。
pub async fn import_csv(db: &Database, bytes: &[u8], asset: Option<&str>) -> AppResult<UploadSummary> {
    let mut tx = db.pool().begin().await?;
    let selected: Option<Asset> = match asset.map(str::trim).filter(|s| !s.is_empty()) {
        Some(symbol) => Some(
            asset_service::find_by_symbol_in(&mut *tx, symbol)
                .await?
                .ok_or_else(|| AppError::not_found(format!("资产 {} 不存在", normalize_symbol(symbol))))?,
        ),
        None => None,
    };

    let text = decode_csv(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(&text))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let columns: HashMap<String, usize> = reader
        .headers()
        .map_err(|e| AppError::bad_request(format!("CSV 表头无效: {}", e)))?
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim().to_lowercase(), i))
        .collect();

    let mut summary = UploadSummary::default();
    let mut cache: HashMap<String, i64> = HashMap::new();

    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                log::debug!("跳过无法解析的 CSV 行: {}", e);
                summary.skipped += 1;
                continue;
            }
        };
        let row = CsvRow {
            columns: &columns,
            record: &record,
        };

        let Some(date) = row.get(&["date", "fecha"]).and_then(parse_date) else {
            summary.skipped += 1;
            continue;
        };
        let Some(close) = row.get(&["close", "precio", "price"]).and_then(parse_close) else {
            summary.skipped += 1;
            continue;
        };

        let asset_id = match &selected {
            Some(a) => a.id,
            None => {
                let Some(symbol) = row.get(&["symbol", "ticker"]).map(normalize_symbol) else {
                    summary.skipped += 1;
                    continue;
                };
                if let Some(&id) = cache.get(&symbol) {
                    id
                } else {
                    match asset_service::get_or_create_in(&mut *tx, &symbol, row.get(&["name"])).await {
                        Ok((a, _)) => {
                            cache.insert(symbol, a.id);
                            a.id
                        }
                        Err(AppError::BadRequest(msg)) => {
                            log::debug!("跳过: {}", msg);
                            summary.skipped += 1;
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        };

        if upsert_price_in(&mut *tx, asset_id, date, close).await? {
            summary.inserted += 1;
        } else {
            summary.updated += 1;
        }
    }

    tx.commit().await?;
    log::info!(
        "价格导入完成: 新增 {} 更新 {} 跳过 {}",
        summary.inserted,
        summary.updated,
        summary.skipped
    );
    Ok(summary)
}

fn price_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AssetPrice, sqlx::Error> {
    Ok(AssetPrice {
        symbol: row.try_get("symbol")?,
        date: row.try_get("date")?,
        close: decimal_col(row, "close")?,
    })
}

/// 历史价格（日期倒序，最多 1000 行）
pub async fn history(db: &Database, query: &PriceHistoryQuery) -> AppResult<Vec<AssetPrice>> {
    let symbol = query
        .symbol
        .as_deref()
        .map(normalize_symbol)
        .filter(|s| !s.is_empty());
    let from = parse_iso_date(query.from.as_deref());
    let to = parse_iso_date(query.to.as_deref());

    let rows = sqlx::query(
        r#"
        SELECT a.symbol AS symbol, p.date AS date, p.close AS close
        FROM asset_prices p JOIN assets a ON a.id = p.asset_id
        WHERE (? IS NULL OR a.symbol = ?)
          AND (? IS NULL OR p.date >= ?)
          AND (? IS NULL OR p.date <= ?)
        ORDER BY p.date DESC, a.symbol
        LIMIT ?
        "#,
    )
    .bind(symbol.as_deref())
    .bind(symbol.as_deref())
    .bind(from)
    .bind(from)
    .bind(to)
    .bind(to)
    .bind(HISTORY_LIMIT)
    .fetch_all(db.pool())
    .await?;

    Ok(rows.iter().map(price_from_row).collect::<Result<_, _>>()?)
}

/// 某代码的最新收盘价
pub async fn latest_price(db: &Database, symbol: &str) -> AppResult<Option<AssetPrice>> {
    let mut conn = db.pool().acquire().await?;
    latest_price_in(&mut *conn, symbol).await
}

pub(crate) async fn latest_price_in(conn: &mut SqliteConnection, symbol: &str) -> AppResult<Option<AssetPrice>> {
    let row = sqlx::query(
        r#"
        SELECT a.symbol AS symbol, p.date AS date, p.close AS close
        FROM asset_prices p JOIN assets a ON a.id = p.asset_id
        WHERE a.symbol = ?
        ORDER BY p.date DESC LIMIT 1
        "#,
    )
    .bind(normalize_symbol(symbol))
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(price_from_row).transpose()?)
}

/// 某资产按日期升序的完整序列
pub async fn series_for_asset(db: &Database, asset_id: i64) -> AppResult<Vec<(NaiveDate, Decimal)>> {
    let rows = sqlx::query("SELECT date, close FROM asset_prices WHERE asset_id = ? ORDER BY date")
        .bind(asset_id)
        .fetch_all(db.pool())
        .await?;
    rows.iter()
        .map(|row| -> Result<(NaiveDate, Decimal), sqlx::Error> {
            Ok((row.try_get("date")?, decimal_col(row, "close")?))
        })
        .collect::<Result<Vec<_>, sqlx::Error>>()
        .map_err(AppError::from)
}

/// 全部历史价格（备份用）
pub async fn all_prices(db: &Database) -> AppResult<Vec<AssetPrice>> {
    let rows = sqlx::query(
        r#"
        SELECT a.symbol AS symbol, p.date AS date, p.close AS close
        FROM asset_prices p JOIN assets a ON a.id = p.asset_id
        ORDER BY a.symbol, p.date
        "#,
    )
    .fetch_all(db.pool())
    .await?;
    Ok(rows.iter().map(price_from_row).collect::<Result<_, _>>()?)
}
