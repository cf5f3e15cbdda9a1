//! 认证服务
//!
//! - 密码使用 argon2 哈希
//! - 会话令牌为随机 32 字节，库中只保存其 SHA-256
//! - 按 (IP, 用户名) 统计失败次数，超过阈值在冷却期内锁定

use anyhow::anyhow;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::config::{AdminConfig, SecurityConfig};
use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::models::{BootstrapOutcome, CurrentUser, User};

/// 生成 argon2 密码哈希
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| anyhow!("密码哈希失败: {}", e))
}

/// 校验密码，哈希格式无效时视为不匹配
pub fn verify_password(hash: &str, candidate: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(candidate.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            log::warn!("无效的密码哈希: {}", e);
            false
        }
    }
}

/// 生成随机会话令牌（64 位十六进制）
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn user_from_row(row: &SqliteRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        is_staff: row.try_get("is_staff")?,
        is_superuser: row.try_get("is_superuser")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

/// 认证服务
#[derive(Clone)]
pub struct AuthService {
    db: Database,
    security: SecurityConfig,
}

impl AuthService {
    pub fn new(db: Database, security: SecurityConfig) -> Self {
        Self { db, security }
    }

    /// 会话有效期（秒）
    pub fn session_ttl_secs(&self) -> i64 {
        self.security.session_ttl_hours * 3600
    }

    pub async fn find_user(&self, username: &str) -> AppResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    /// 创建用户
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
        is_staff: bool,
    ) -> AppResult<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::bad_request("用户名不能为空"));
        }
        if self.find_user(username).await?.is_some() {
            return Err(AppError::Conflict(format!("用户 {} 已存在", username)));
        }

        let hash = hash_password(password)?;
        sqlx::query(
            r#"
            INSERT INTO users (username, email, password_hash, is_staff, is_superuser, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(&hash)
        .bind(is_staff)
        .bind(is_staff)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;

        self.find_user(username)
            .await?
            .ok_or_else(|| AppError::Internal(anyhow!("用户创建后无法读取")))
    }

    /// 登录：校验锁定状态与密码，成功后签发会话
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        ip: &str,
    ) -> AppResult<(User, String)> {
        let username = username.trim();
        self.ensure_not_locked(ip, username).await?;

        let user = match self.find_user(username).await? {
            Some(u) if u.is_active && verify_password(&u.password_hash, password) => u,
            _ => {
                self.register_failure(ip, username).await?;
                return Err(AppError::Unauthorized("用户名或密码错误".to_string()));
            }
        };

        self.reset_failures(ip, username).await?;
        let token = self.issue_session(user.id).await?;
        log::info!("用户 {} 登录成功", user.username);
        Ok((user, token))
    }

    async fn ensure_not_locked(&self, ip: &str, username: &str) -> AppResult<()> {
        let row = sqlx::query(
            "SELECT failures, last_failure_at FROM login_attempts WHERE ip_address = ? AND username = ?",
        )
        .bind(ip)
        .bind(username)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(());
        };
        let failures: i64 = row.try_get("failures")?;
        let last: DateTime<Utc> = row.try_get("last_failure_at")?;

        if last + Duration::hours(self.security.login_cooloff_hours) <= Utc::now() {
            self.reset_failures(ip, username).await?;
            return Ok(());
        }
        if failures >= self.security.login_failure_limit {
            log::warn!("登录已锁定: ip={} username={}", ip, username);
            return Err(AppError::Locked(format!(
                "登录失败次数过多，请 {} 小时后再试",
                self.security.login_cooloff_hours
            )));
        }
        Ok(())
    }

    async fn register_failure(&self, ip: &str, username: &str) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO login_attempts (ip_address, username, failures, last_failure_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT(ip_address, username) DO UPDATE SET
                failures = failures + 1,
                last_failure_at = excluded.last_failure_at
            "#,
        )
        .bind(ip)
        .bind(username)
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn reset_failures(&self, ip: &str, username: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM login_attempts WHERE ip_address = ? AND username = ?")
            .bind(ip)
            .bind(username)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// 签发会话令牌，返回明文令牌
    pub async fn issue_session(&self, user_id: i64) -> AppResult<String> {
        let token = generate_token();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(token_digest(&token))
        .bind(user_id)
        .bind(now)
        .bind(now + Duration::hours(self.security.session_ttl_hours))
        .execute(self.db.pool())
        .await?;
        Ok(token)
    }

    /// 根据令牌解析当前用户，过期会话会被清除
    pub async fn resolve_session(&self, token: &str) -> AppResult<Option<CurrentUser>> {
        let digest = token_digest(token);
        let row = sqlx::query(
            r#"
            SELECT s.expires_at, u.id, u.username, u.is_staff, u.is_active
            FROM sessions s JOIN users u ON u.id = s.user_id
            WHERE s.token_hash = ?
            "#,
        )
        .bind(&digest)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let expires_at: DateTime<Utc> = row.try_get("expires_at")?;
        let is_active: bool = row.try_get("is_active")?;
        if expires_at <= Utc::now() || !is_active {
            self.revoke_digest(&digest).await?;
            return Ok(None);
        }

        Ok(Some(CurrentUser {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            is_staff: row.try_get("is_staff")?,
        }))
    }

    /// 注销会话
    pub async fn logout(&self, token: &str) -> AppResult<()> {
        self.revoke_digest(&token_digest(token)).await
    }

    async fn revoke_digest(&self, digest: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(digest)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// 创建初始管理员
    ///
    /// 只在系统中还没有任何超级用户时生效；已有同名用户则提升权限，
    /// 密码仅在新建或 force_reset 时设置
    pub async fn bootstrap_admin(&self, admin: &AdminConfig) -> AppResult<BootstrapOutcome> {
        let (Some(username), Some(password)) = (admin.username.as_deref(), admin.password.as_deref())
        else {
            log::warn!("bootstrap_admin: 缺少 ADMIN_USERNAME 或 ADMIN_PASSWORD，未创建任何用户");
            return Ok(BootstrapOutcome::MissingCredentials);
        };

        let superusers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_superuser = 1")
            .fetch_one(self.db.pool())
            .await?;
        if superusers > 0 {
            log::info!("bootstrap_admin: 已存在超级用户，不做修改");
            return Ok(BootstrapOutcome::SuperuserExists);
        }

        match self.find_user(username).await? {
            None => {
                self.create_user(username, &admin.email, password, true).await?;
                log::info!("bootstrap_admin: 已创建初始管理员 '{}'", username);
                Ok(BootstrapOutcome::Created(username.to_string()))
            }
            Some(user) => {
                let hash = if admin.force_reset {
                    hash_password(password)?
                } else {
                    user.password_hash.clone()
                };
                sqlx::query(
                    r#"
                    UPDATE users
                    SET email = ?, is_staff = 1, is_superuser = 1, is_active = 1, password_hash = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&admin.email)
                .bind(&hash)
                .bind(user.id)
                .execute(self.db.pool())
                .await?;
                log::info!(
                    "bootstrap_admin: '{}' 已存在，已提升为管理员（重置密码: {}）",
                    username,
                    admin.force_reset
                );
                Ok(BootstrapOutcome::Promoted {
                    username: username.to_string(),
                    password_reset: admin.force_reset,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> AuthService {
        let db = Database::in_memory().await;
        AuthService::new(db, SecurityConfig::default())
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("s3cret").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, "s3cret"));
        assert!(!verify_password(&hash, "wrong"));
        assert!(!verify_password("not-a-hash", "s3cret"));
    }

    #[tokio::test]
    async fn test_login_and_session() {
        let auth = service().await;
        auth.create_user("ana", "ana@example.com", "pw", false).await.unwrap();

        let (user, token) = auth.login("ana", "pw", "1.2.3.4").await.unwrap();
        assert_eq!(user.username, "ana");
        assert_eq!(token.len(), 64);

        let current = auth.resolve_session(&token).await.unwrap().unwrap();
        assert_eq!(current.id, user.id);
        assert!(!current.is_staff);

        auth.logout(&token).await.unwrap();
        assert!(auth.resolve_session(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let auth = service().await;
        auth.create_user("ana", "", "pw", false).await.unwrap();
        let err = auth.login("ana", "nope", "1.2.3.4").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
        let err = auth.login("ghost", "pw", "1.2.3.4").await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_lockout_after_failures() {
        let auth = service().await;
        auth.create_user("ana", "", "pw", false).await.unwrap();

        for _ in 0..5 {
            assert!(auth.login("ana", "bad", "1.2.3.4").await.is_err());
        }
        // 正确密码也被锁定
        let err = auth.login("ana", "pw", "1.2.3.4").await.unwrap_err();
        assert!(matches!(err, AppError::Locked(_)));

        // 其它 IP 不受影响
        assert!(auth.login("ana", "pw", "5.6.7.8").await.is_ok());
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let auth = service().await;
        auth.create_user("ana", "", "pw", false).await.unwrap();
        for _ in 0..4 {
            let _ = auth.login("ana", "bad", "1.2.3.4").await;
        }
        auth.login("ana", "pw", "1.2.3.4").await.unwrap();
        for _ in 0..4 {
            let _ = auth.login("ana", "bad", "1.2.3.4").await;
        }
        assert!(auth.login("ana", "pw", "1.2.3.4").await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_user_conflict() {
        let auth = service().await;
        auth.create_user("ana", "", "pw", false).await.unwrap();
        let err = auth.create_user("ana", "", "pw", false).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_bootstrap_admin_flow() {
        let auth = service().await;

        let missing = AdminConfig::default();
        assert_eq!(
            auth.bootstrap_admin(&missing).await.unwrap(),
            BootstrapOutcome::MissingCredentials
        );

        let admin = AdminConfig {
            username: Some("root".into()),
            password: Some("pw".into()),
            email: "root@example.com".into(),
            force_reset: false,
        };
        assert_eq!(
            auth.bootstrap_admin(&admin).await.unwrap(),
            BootstrapOutcome::Created("root".into())
        );
        let user = auth.find_user("root").await.unwrap().unwrap();
        assert!(user.is_superuser && user.is_staff);

        // 再次执行不做修改
        assert_eq!(
            auth.bootstrap_admin(&admin).await.unwrap(),
            BootstrapOutcome::SuperuserExists
        );
    }

    #[tokio::test]
    async fn test_bootstrap_promotes_existing_user() {
        let auth = service().await;
        auth.create_user("boss", "old@example.com", "old", false).await.unwrap();

        let admin = AdminConfig {
            username: Some("boss".into()),
            password: Some("new".into()),
            email: "boss@example.com".into(),
            force_reset: false,
        };
        let outcome = auth.bootstrap_admin(&admin).await.unwrap();
        assert_eq!(
            outcome,
            BootstrapOutcome::Promoted { username: "boss".into(), password_reset: false }
        );

        let user = auth.find_user("boss").await.unwrap().unwrap();
        assert!(user.is_superuser);
        assert_eq!(user.email, "boss@example.com");
        // 未设置 force_reset，旧密码仍然有效
        assert!(verify_password(&user.password_hash, "old"));
    }
}
