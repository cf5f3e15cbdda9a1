//! InvPanel PRO 后端服务
//!
//! 个人投资组合面板：组合流水、CSV 历史价格、统计排名、模拟交易、
//! 投资机会与 AI 评估、每日提醒邮件、JSON 备份

mod config;     // 配置加载
mod db;         // SQLite 连接池
mod error;      // 统一错误类型
mod handlers;   // HTTP 请求处理器
mod middleware; // 中间件
mod models;     // 数据模型定义
mod services;   // 业务逻辑服务

use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{anyhow, Context};
use env_logger::Env;

use crate::config::AppConfig;
use crate::db::Database;
use crate::handlers::AppState;
use crate::middleware::{HostGuard, SessionAuth};
use crate::models::BootstrapOutcome;
use crate::services::alert_service;

/// 命令行子命令
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Serve,
    Migrate,
    BootstrapAdmin,
    SendAlerts { base_url: Option<String>, dry_run: bool },
}

fn parse_command(args: &[String]) -> anyhow::Result<Command> {
    let Some(name) = args.first() else {
        return Ok(Command::Serve);
    };
    match name.as_str() {
        "serve" => Ok(Command::Serve),
        "migrate" => Ok(Command::Migrate),
        "bootstrap-admin" => Ok(Command::BootstrapAdmin),
        "send-alerts" => {
            let mut base_url = None;
            let mut dry_run = false;
            let mut rest = args[1..].iter();
            while let Some(arg) = rest.next() {
                match arg.as_str() {
                    "--dry-run" => dry_run = true,
                    "--base-url" => {
                        base_url = Some(rest.next().cloned().ok_or_else(|| anyhow!("--base-url 缺少参数"))?);
                    }
                    other => match other.strip_prefix("--base-url=") {
                        Some(v) => base_url = Some(v.to_string()),
                        None => return Err(anyhow!("未知参数: {}", other)),
                    },
                }
            }
            Ok(Command::SendAlerts { base_url, dry_run })
        }
        other => Err(anyhow!(
            "未知命令: {}（可用: serve, migrate, bootstrap-admin, send-alerts）",
            other
        )),
    }
}

/// 应用程序入口
#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // 先读 .env，再加载配置
    dotenvy::dotenv().ok();
    let config = AppConfig::load();

    env_logger::init_from_env(Env::default().default_filter_or(config.log.level.as_str()));

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_command(&args)?;

    let db = Database::connect(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("无法连接数据库 {}", config.database.url))?;
    let applied = db.migrate().await.context("数据库迁移失败")?;

    match command {
        Command::Migrate => {
            println!("migrate: {} migraciones aplicadas en {}", applied, config.database.url);
            Ok(())
        }
        Command::BootstrapAdmin => bootstrap_admin(db, config).await,
        Command::SendAlerts { base_url, dry_run } => send_alerts(db, config, base_url, dry_run).await,
        Command::Serve => serve(db, config).await,
    }
}

async fn bootstrap_admin(db: Database, config: AppConfig) -> anyhow::Result<()> {
    let state = AppState::new(db, config)?;
    match state.auth.bootstrap_admin(&state.config.admin).await? {
        BootstrapOutcome::MissingCredentials => println!("bootstrap_admin: faltan ADMIN_USERNAME/ADMIN_PASSWORD"),
        BootstrapOutcome::SuperuserExists => println!("bootstrap_admin: ya existe un superusuario"),
        BootstrapOutcome::Created(name) => println!("bootstrap_admin: creado '{}'", name),
        BootstrapOutcome::Promoted { username, password_reset } => {
            println!("bootstrap_admin: '{}' promovido (password reset: {})", username, password_reset)
        }
    }
    Ok(())
}

async fn send_alerts(
    db: Database,
    config: AppConfig,
    base_url: Option<String>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let base_url = base_url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| config.alerts.base_url.trim().to_string());
    if base_url.is_empty() {
        return Err(anyhow!("Falta base URL. Pasá --base-url o setea INV_BASE_URL"));
    }

    let (ok, message) = alert_service::send_daily_alert(&db, &config, &base_url, dry_run).await?;
    if ok {
        println!("{}", message);
        Ok(())
    } else {
        Err(anyhow!(message))
    }
}

async fn serve(db: Database, config: AppConfig) -> anyhow::Result<()> {
    let bind_addr = config.bind_addr();
    let workers = config.server.workers;
    let state = AppState::new(db, config)?;

    if !state.ai.is_configured() {
        log::warn!("未设置 OPENAI_API_KEY，AI 评估将返回 NEEDS_DATA");
    }
    log::info!("启动 InvPanel PRO 服务，监听 {}", bind_addr);

    // 创建并启动 HTTP 服务器
    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(SessionAuth::new(state.auth.clone())) // 会话认证
            .wrap(HostGuard::new(state.config.security.allowed_hosts.clone())) // Host 校验
            .wrap(Logger::default()) // 请求日志
            .configure(handlers::config)
    });
    if workers > 0 {
        server = server.workers(workers);
    }

    server.bind(&bind_addr)?.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command(&[]).unwrap(), Command::Serve);
        assert_eq!(parse_command(&args(&["migrate"])).unwrap(), Command::Migrate);
        assert_eq!(
            parse_command(&args(&["send-alerts", "--base-url", "https://x.test", "--dry-run"])).unwrap(),
            Command::SendAlerts {
                base_url: Some("https://x.test".into()),
                dry_run: true
            }
        );
        assert_eq!(
            parse_command(&args(&["send-alerts", "--base-url=https://y.test"])).unwrap(),
            Command::SendAlerts {
                base_url: Some("https://y.test".into()),
                dry_run: false
            }
        );
        assert!(parse_command(&args(&["send-alerts", "--base-url"])).is_err());
        assert!(parse_command(&args(&["rm-rf"])).is_err());
    }
}
