//! 数据库连接与通用行解析

use anyhow::Result;
use rust_decimal::Decimal;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;

/// 内嵌的版本化迁移（migrations/ 目录，按编号顺序执行）
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite 连接池封装
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// 创建连接池并执行未应用的迁移
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let db = Self::connect(database_url, max_connections).await?;
        db.migrate().await?;
        Ok(db)
    }

    /// 只建立连接池，不做迁移
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // 内存库每个连接都是独立的库，只能保留一个常驻连接
        let in_memory = database_url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new();
        if in_memory {
            pool_options = pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            pool_options = pool_options.max_connections(max_connections.max(1));
        }

        let pool = pool_options.connect_with(options).await?;
        Ok(Self { pool })
    }

    /// 测试用内存数据库
    #[cfg(test)]
    pub async fn in_memory() -> Self {
        Self::new("sqlite::memory:", 1).await.unwrap()
    }

    /// 执行未应用的迁移，返回已应用的迁移总数
    pub async fn migrate(&self) -> Result<i64> {
        MIGRATOR.run(&self.pool).await?;
        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(&self.pool)
            .await?;
        log::debug!("数据库迁移完成，共 {} 个", applied);
        Ok(applied)
    }

    /// 获取连接池
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode_error(column: &str, message: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: message.into(),
    }
}

/// 读取以 TEXT 存储的 Decimal 列
pub fn decimal_col(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(raw.trim()).map_err(|e| decode_error(column, e.to_string()))
}

/// 读取以 TEXT 存储的枚举列
pub fn enum_col<T>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|e| decode_error(column, e))
}

/// 读取 JSON 列，解析失败时返回空对象
pub fn json_col(row: &SqliteRow, column: &str) -> Result<serde_json::Value, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Ok(serde_json::from_str(&raw).unwrap_or_else(|_| serde_json::json!({})))
}
