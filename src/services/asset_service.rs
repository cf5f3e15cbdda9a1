//! 资产目录服务

use chrono::Utc;
use regex::Regex;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use std::sync::OnceLock;

use crate::db::{enum_col, Database};
use crate::error::{AppError, AppResult};
use crate::models::{Asset, AssetType, NewAsset};
use crate::services::common::{normalize_symbol, truncate_chars};

/// 资产代码：字母数字及 . _ - /，最长 32
fn symbol_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9][A-Z0-9._/\-]{0,31}$").expect("valid regex"))
}

pub fn is_valid_symbol(symbol: &str) -> bool {
    symbol_pattern().is_match(symbol)
}

pub(crate) fn asset_from_row(row: &SqliteRow) -> Result<Asset, sqlx::Error> {
    Ok(Asset {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        name: row.try_get("name")?,
        asset_type: enum_col(row, "asset_type")?,
        currency: row.try_get("currency")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// 按代码排序列出全部资产
pub async fn list_assets(db: &Database) -> AppResult<Vec<Asset>> {
    let rows = sqlx::query("SELECT * FROM assets ORDER BY symbol")
        .fetch_all(db.pool())
        .await?;
    Ok(rows.iter().map(asset_from_row).collect::<Result<_, _>>()?)
}

pub async fn find_by_symbol(db: &Database, symbol: &str) -> AppResult<Option<Asset>> {
    let mut conn = db.pool().acquire().await?;
    find_by_symbol_in(&mut *conn, symbol).await
}

pub(crate) async fn find_by_symbol_in(conn: &mut SqliteConnection, symbol: &str) -> AppResult<Option<Asset>> {
    let row = sqlx::query("SELECT * FROM assets WHERE symbol = ?")
        .bind(normalize_symbol(symbol))
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.as_ref().map(asset_from_row).transpose()?)
}

pub async fn get_asset(db: &Database, id: i64) -> AppResult<Asset> {
    let mut conn = db.pool().acquire().await?;
    get_asset_in(&mut *conn, id).await
}

pub(crate) async fn get_asset_in(conn: &mut SqliteConnection, id: i64) -> AppResult<Asset> {
    let row = sqlx::query("SELECT * FROM assets WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref()
        .map(asset_from_row)
        .transpose()?
        .ok_or_else(|| AppError::not_found(format!("资产 {} 不存在", id)))
}

/// 新建资产；代码统一为大写，重复代码返回 Conflict
pub async fn create_asset(db: &Database, req: &NewAsset) -> AppResult<Asset> {
    let mut conn = db.pool().acquire().await?;
    create_asset_in(&mut *conn, req).await
}

pub(crate) async fn create_asset_in(conn: &mut SqliteConnection, req: &NewAsset) -> AppResult<Asset> {
    let symbol = normalize_symbol(&req.symbol);
    if !is_valid_symbol(&symbol) {
        return Err(AppError::bad_request(format!("无效的资产代码: {}", req.symbol)));
    }
    if find_by_symbol_in(conn, &symbol).await?.is_some() {
        return Err(AppError::Conflict(format!("资产 {} 已存在", symbol)));
    }

    let name = req
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(|n| truncate_chars(n, 120))
        .unwrap_or_else(|| symbol.clone());
    let currency = req
        .currency
        .as_deref()
        .map(|c| truncate_chars(&c.trim().to_uppercase(), 3))
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "ARS".to_string());

    insert_asset(conn, &symbol, &name, req.asset_type.unwrap_or_default(), &currency).await
}

async fn insert_asset(
    conn: &mut SqliteConnection,
    symbol: &str,
    name: &str,
    asset_type: AssetType,
    currency: &str,
) -> AppResult<Asset> {
    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO assets (symbol, name, asset_type, currency, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(symbol)
    .bind(name)
    .bind(asset_type.as_str())
    .bind(currency)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    log::info!("新建资产 {} ({})", symbol, name);
    get_asset_in(conn, id).await
}

/// 按代码获取资产，不存在时以给定名称（或代码本身）创建
pub async fn get_or_create(db: &Database, symbol: &str, name: Option<&str>) -> AppResult<(Asset, bool)> {
    let mut conn = db.pool().acquire().await?;
    get_or_create_in(&mut *conn, symbol, name).await
}

pub(crate) async fn get_or_create_in(
    conn: &mut SqliteConnection,
    symbol: &str,
    name: Option<&str>,
) -> AppResult<(Asset, bool)> {
    let symbol = normalize_symbol(symbol);
    if let Some(asset) = find_by_symbol_in(conn, &symbol).await? {
        return Ok((asset, false));
    }
    if !is_valid_symbol(&symbol) {
        return Err(AppError::bad_request(format!("无效的资产代码: {}", symbol)));
    }
    let name = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(|n| truncate_chars(n, 120))
        .unwrap_or_else(|| symbol.clone());
    let asset = insert_asset(conn, &symbol, &name, AssetType::default(), "ARS").await?;
    Ok((asset, true))
}
