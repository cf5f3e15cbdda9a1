//! 配置模块
//!
//! 先从 JSON 文件加载系统配置，再用环境变量覆盖（托管平台通过环境变量注入密钥）

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,
    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// 工作线程数（0 表示使用 CPU 核心数）
    #[serde(default)]
    pub workers: usize,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite 连接串，如 sqlite://invpanel.db
    #[serde(default = "default_database_url")]
    pub url: String,
    /// 连接池大小
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// 安全与会话配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// 允许的 Host，由 HostGuard 校验；`*` 放行全部，`.example.com` 匹配子域名
    #[serde(default = "default_allowed_hosts")]
    pub allowed_hosts: Vec<String>,
    /// 会话有效期（小时）
    #[serde(default = "default_session_ttl")]
    pub session_ttl_hours: i64,
    /// 连续登录失败多少次后锁定
    #[serde(default = "default_failure_limit")]
    pub login_failure_limit: i64,
    /// 锁定时长（小时）
    #[serde(default = "default_cooloff")]
    pub login_cooloff_hours: i64,
}

/// 初始管理员配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_admin_email")]
    pub email: String,
    /// 已存在用户时是否重置密码
    #[serde(default)]
    pub force_reset: bool,
}

/// SMTP 邮件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_true")]
    pub use_tls: bool,
    #[serde(default)]
    pub default_from: String,
    #[serde(default)]
    pub alert_from: Option<String>,
    #[serde(default)]
    pub alert_to: Option<String>,
}

/// 提醒邮件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// /alerts/run/{token}/ 的访问令牌，为空则关闭该入口
    #[serde(default)]
    pub token: String,
    /// 排名统计窗口（天）
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    /// 对外访问的 Base URL
    #[serde(default)]
    pub base_url: String,
}

/// AI 评估配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    #[serde(default = "default_ai_endpoint")]
    pub endpoint: String,
    /// 接受机会前是否必须通过 AI 评估
    #[serde(default = "default_true")]
    pub governance_required: bool,
    #[serde(default = "default_ai_min_score")]
    pub min_score: i64,
    #[serde(default)]
    pub allow_manual_override: bool,
    /// 单次批量评估上限
    #[serde(default = "default_ai_max_eval")]
    pub max_eval_per_click: i64,
    /// 请求超时时间（秒）
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Web Push (VAPID) 配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushConfig {
    #[serde(default)]
    pub vapid_public_key: String,
    /// base64 编码的 PEM 私钥
    #[serde(default)]
    pub vapid_private_key_pem_b64: String,
    #[serde(default)]
    pub vapid_claims_sub: String,
}

/// PWA 静态文件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PwaConfig {
    #[serde(default = "default_pwa_dir")]
    pub static_dir: String,
}

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub pwa: PwaConfig,
}

// 默认值函数
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_timeout() -> u64 { 30 }
fn default_log_level() -> String { "info".to_string() }
fn default_database_url() -> String { "sqlite://invpanel.db".to_string() }
fn default_max_connections() -> u32 { 5 }
fn default_allowed_hosts() -> Vec<String> {
    vec!["localhost".to_string(), "127.0.0.1".to_string(), "[::1]".to_string()]
}
fn default_session_ttl() -> i64 { 24 * 14 }
fn default_failure_limit() -> i64 { 5 }
fn default_cooloff() -> i64 { 1 }
fn default_admin_email() -> String { "admin@example.com".to_string() }
fn default_smtp_port() -> u16 { 587 }
fn default_true() -> bool { true }
fn default_window_days() -> i64 { 90 }
fn default_ai_model() -> String { "gpt-4o-mini".to_string() }
fn default_ai_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_ai_min_score() -> i64 { 70 }
fn default_ai_max_eval() -> i64 { 5 }
fn default_pwa_dir() -> String { "static/pwa".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: 0,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: default_allowed_hosts(),
            session_ttl_hours: default_session_ttl(),
            login_failure_limit: default_failure_limit(),
            login_cooloff_hours: default_cooloff(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            use_tls: true,
            default_from: String::new(),
            alert_from: None,
            alert_to: None,
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            window_days: default_window_days(),
            base_url: String::new(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_ai_model(),
            endpoint: default_ai_endpoint(),
            governance_required: true,
            min_score: default_ai_min_score(),
            allow_manual_override: false,
            max_eval_per_click: default_ai_max_eval(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for PwaConfig {
    fn default() -> Self {
        Self {
            static_dir: default_pwa_dir(),
        }
    }
}

/// 解析布尔型环境变量（1/true/yes/y）
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y"
    )
}

/// 读取非空环境变量
fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// 依次尝试多个变量名
fn env_first(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| env_value(k))
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_value(key).and_then(|v| v.parse().ok())
}

impl AppConfig {
    /// 从 JSON 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 加载配置，优先从文件，失败则使用默认值，最后叠加环境变量
    pub fn load() -> Self {
        let config_paths = ["config.json", "config/config.json"];

        let mut config = None;
        for path in config_paths {
            if Path::new(path).exists() {
                match Self::from_file(path) {
                    Ok(c) => {
                        log::info!("从 {} 加载配置成功", path);
                        config = Some(c);
                        break;
                    }
                    Err(e) => {
                        log::warn!("加载配置文件 {} 失败: {}", path, e);
                    }
                }
            }
        }

        let mut config = config.unwrap_or_else(|| {
            log::info!("使用默认配置");
            Self::default()
        });
        config.apply_env();
        config
    }

    /// 用环境变量覆盖配置项
    pub fn apply_env(&mut self) {
        if let Some(port) = env_parsed("PORT") {
            self.server.port = port;
        }
        if let Some(workers) = env_parsed("WEB_CONCURRENCY") {
            self.server.workers = workers;
        }
        if let Some(url) = env_value("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(level) = env_value("RUST_LOG") {
            self.log.level = level;
        }

        if let Some(host) = env_value("RENDER_EXTERNAL_HOSTNAME") {
            self.security.allowed_hosts.push(host);
        }
        if let Some(hosts) = env_value("ALLOWED_HOSTS") {
            self.security.allowed_hosts.extend(
                hosts
                    .split(',')
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty()),
            );
        }
        if let Some(limit) = env_parsed("AXES_FAILURE_LIMIT") {
            self.security.login_failure_limit = limit;
        }

        if let Some(u) = env_first(&["ADMIN_USERNAME", "ADMIN_USER", "DJANGO_SUPERUSER_USERNAME"]) {
            self.admin.username = Some(u);
        }
        if let Some(p) = env_first(&["ADMIN_PASSWORD", "DJANGO_SUPERUSER_PASSWORD"]) {
            self.admin.password = Some(p);
        }
        if let Some(e) = env_first(&["ADMIN_EMAIL", "DJANGO_SUPERUSER_EMAIL"]) {
            self.admin.email = e;
        }
        if let Some(v) = env_value("ADMIN_FORCE_RESET") {
            self.admin.force_reset = is_truthy(&v);
        }

        if let Some(v) = env_value("EMAIL_HOST") {
            self.mail.host = v;
        }
        if let Some(v) = env_parsed("EMAIL_PORT") {
            self.mail.port = v;
        }
        if let Some(v) = env_value("EMAIL_HOST_USER") {
            self.mail.username = v;
        }
        if let Some(v) = env_value("EMAIL_HOST_PASSWORD") {
            self.mail.password = v;
        }
        if let Some(v) = env_value("EMAIL_USE_TLS") {
            self.mail.use_tls = is_truthy(&v);
        }
        if let Some(v) = env_value("DEFAULT_FROM_EMAIL") {
            self.mail.default_from = v;
        }
        if let Some(v) = env_value("ALERT_FROM_EMAIL") {
            self.mail.alert_from = Some(v);
        }
        if let Some(v) = env_value("ALERT_EMAIL_TO") {
            self.mail.alert_to = Some(v);
        }

        if let Some(v) = env_value("ALERTS_TOKEN") {
            self.alerts.token = v;
        }
        if let Some(v) = env_parsed("ALERT_WINDOW_DAYS") {
            self.alerts.window_days = v;
        }
        if let Some(v) = env_value("INV_BASE_URL") {
            self.alerts.base_url = v;
        }

        if let Some(v) = env_value("OPENAI_API_KEY") {
            self.ai.api_key = v;
        }
        if let Some(v) = env_value("OPENAI_MODEL") {
            self.ai.model = v;
        }
        if let Some(v) = env_value("AI_GOVERNANCE_REQUIRED") {
            self.ai.governance_required = !matches!(v.to_lowercase().as_str(), "0" | "false" | "no");
        }
        if let Some(v) = env_parsed("AI_MIN_SCORE") {
            self.ai.min_score = v;
        }
        if let Some(v) = env_value("AI_ALLOW_MANUAL_OVERRIDE") {
            self.ai.allow_manual_override = is_truthy(&v);
        }
        if let Some(v) = env_parsed("AI_MAX_EVAL_PER_CLICK") {
            self.ai.max_eval_per_click = v;
        }

        if let Some(v) = env_value("VAPID_PUBLIC_KEY") {
            self.push.vapid_public_key = v;
        }
        if let Some(v) = env_value("VAPID_PRIVATE_KEY_PEM_B64") {
            self.push.vapid_private_key_pem_b64 = v;
        }
        if let Some(v) = env_value("VAPID_CLAIMS_SUB") {
            self.push.vapid_claims_sub = v;
        }
    }

    /// 获取服务器绑定地址
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 告警发件人：ALERT_FROM_EMAIL > DEFAULT_FROM_EMAIL > EMAIL_HOST_USER
    pub fn alert_from(&self) -> String {
        self.mail
            .alert_from
            .clone()
            .filter(|v| !v.is_empty())
            .or_else(|| Some(self.mail.default_from.clone()).filter(|v| !v.is_empty()))
            .unwrap_or_else(|| {
                if self.mail.username.is_empty() {
                    "no-reply@invpanel-pro".to_string()
                } else {
                    self.mail.username.clone()
                }
            })
    }

    /// 告警收件人：ALERT_EMAIL_TO，否则回退到管理员邮箱
    pub fn alert_to(&self) -> Option<String> {
        self.mail
            .alert_to
            .clone()
            .filter(|v| !v.is_empty())
            .or_else(|| env_value("ADMIN_EMAIL"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
        assert_eq!(config.security.login_failure_limit, 5);
        assert_eq!(config.ai.min_score, 70);
        assert_eq!(config.alerts.window_days, 90);
        assert!(config.ai.governance_required);
        assert!(config.ai.api_key.is_empty());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"server": {"port": 9000}, "ai": {"min_score": 80}}"#).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.ai.min_score, 80);
        assert_eq!(config.ai.model, "gpt-4o-mini");
    }

    #[test]
    fn test_is_truthy() {
        for v in ["1", "true", "YES", " y "] {
            assert!(is_truthy(v), "{} 应为真", v);
        }
        for v in ["0", "false", "", "nope"] {
            assert!(!is_truthy(v), "{} 应为假", v);
        }
    }

    #[test]
    fn test_alert_from_fallbacks() {
        let mut config = AppConfig::default();
        assert_eq!(config.alert_from(), "no-reply@invpanel-pro");
        config.mail.username = "smtp@example.com".to_string();
        assert_eq!(config.alert_from(), "smtp@example.com");
        config.mail.default_from = "panel@example.com".to_string();
        assert_eq!(config.alert_from(), "panel@example.com");
        config.mail.alert_from = Some("alerts@example.com".to_string());
        assert_eq!(config.alert_from(), "alerts@example.com");
    }
}
