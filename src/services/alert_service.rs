//! 每日提醒邮件：资产排名 + 操作指引（仅供学习参考，不构成投资建议）

use chrono::Timelike;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use url::Url;

use crate::config::{AppConfig, MailConfig};
use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::models::{local_now, AssetMetrics};
use crate::services::stats_engine;

/// 邮件排名条数
const TOP_N: usize = 10;

const DISCLAIMER: &str = "Este mensaje es educativo e informativo. No constituye asesoramiento financiero. \
Cualquier decisión real debe ser verificada por vos y, si corresponde, por un asesor matriculado.";

const DRY_RUN_PREFIX: &str = "DRY RUN OK (no se envió email).\n\n";

/// 统一以 / 结尾的 base URL 及登录页地址
pub fn build_urls(base_url: &str) -> (String, String) {
    let base = format!("{}/", base_url.trim().trim_end_matches('/'));
    let login = Url::parse(&base)
        .and_then(|u| u.join("login/"))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("{}login/", base));
    (base, login)
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn pct(x: f64) -> String {
    format!("{:.2}%", x * 100.0)
}

struct AlertContent {
    subject: String,
    text: String,
    html: String,
}

fn render(base_url: &str, window_days: i64, top: &[AssetMetrics]) -> AlertContent {
    let now = local_now();
    let (base, login) = build_urls(base_url);
    let stamp = format!("{} {:02}:{:02}", now.date_naive(), now.hour(), now.minute());
    let subject = format!("[invpanel-pro] Alerta diaria ({})", stamp);

    let mut text = String::new();
    text.push_str("InvPanel PRO - Alerta diaria\n");
    text.push_str(&format!("Generado: {}\n", now.to_rfc3339()));
    text.push_str(&format!("Panel: {}\nIngreso: {}\n\n", base, login));
    text.push_str(&format!("Ranking (ventana {} días, Sharpe simple rf=0):\n", window_days));
    if top.is_empty() {
        text.push_str("  Sin datos suficientes. Cargá precios históricos (CSV) en Análisis.\n");
    }
    for (i, m) in top.iter().enumerate() {
        text.push_str(&format!(
            "  {}. {} ({}) ret={} vol={} sharpe={:.2} maxDD={}\n",
            i + 1,
            m.symbol,
            m.name,
            pct(m.period_return),
            pct(m.vol_ann),
            m.sharpe,
            pct(m.max_drawdown)
        ));
    }
    text.push_str("\nProcedimiento:\n");
    text.push_str("  1) Ingresá al panel y revisá Oportunidades.\n");
    text.push_str("  2) Verificá precios y concentración antes de decidir.\n");
    text.push_str("  3) Registrá tu decisión (Aceptar/Ignorar) con una nota.\n\n");
    text.push_str(DISCLAIMER);
    text.push('\n');

    let rows: String = top
        .iter()
        .enumerate()
        .map(|(i, m)| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.2}</td><td>{}</td></tr>",
                i + 1,
                html_escape(&m.symbol),
                html_escape(&m.name),
                pct(m.period_return),
                pct(m.vol_ann),
                m.sharpe,
                pct(m.max_drawdown)
            )
        })
        .collect();
    let html = format!(
        "<h2>InvPanel PRO - Alerta diaria</h2>\
<p>Generado: {generated}</p>\
<p><a href=\"{base}\">Panel</a> | <a href=\"{login}\">Ingresar</a></p>\
<h3>Ranking (ventana {window} días)</h3>\
<table border=\"1\" cellpadding=\"4\"><tr><th>#</th><th>Símbolo</th><th>Nombre</th><th>Retorno</th><th>Vol.</th><th>Sharpe</th><th>Max DD</th></tr>{rows}</table>\
<ol><li>Ingresá al panel y revisá Oportunidades.</li><li>Verificá precios y concentración antes de decidir.</li>\
<li>Registrá tu decisión (Aceptar/Ignorar) con una nota.</li></ol>\
<p><small>{disclaimer}</small></p>",
        generated = now.to_rfc3339(),
        base = html_escape(&base),
        login = html_escape(&login),
        window = window_days,
        rows = rows,
        disclaimer = DISCLAIMER,
    );

    AlertContent { subject, text, html }
}

fn smtp_configured(mail: &MailConfig) -> bool {
    !mail.host.is_empty() && !mail.username.is_empty() && !mail.password.is_empty()
}

async fn deliver(mail: &MailConfig, from: &str, to: &str, content: AlertContent) -> AppResult<()> {
    let from: Mailbox = from
        .parse()
        .map_err(|e| AppError::Config(format!("发件人地址无效: {}", e)))?;
    let to: Mailbox = to
        .parse()
        .map_err(|e| AppError::Config(format!("收件人地址无效: {}", e)))?;

    let email = Message::builder()
        .from(from)
        .to(to)
        .subject(content.subject)
        .multipart(MultiPart::alternative_plain_html(content.text, content.html))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("构建邮件失败: {}", e)))?;

    let builder = if mail.use_tls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&mail.host)
            .map_err(|e| AppError::Config(format!("SMTP 配置错误: {}", e)))?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&mail.host)
    };
    let transport = builder
        .port(mail.port)
        .credentials(Credentials::new(mail.username.clone(), mail.password.clone()))
        .build();

    transport
        .send(email)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("发送邮件失败: {}", e)))?;
    Ok(())
}

/// 发送每日提醒，返回 (是否成功, 说明)
///
/// 配置缺失时返回 (false, 原因)；`dry_run` 只生成内容不发送。
pub async fn send_daily_alert(
    db: &Database,
    config: &AppConfig,
    base_url: &str,
    dry_run: bool,
) -> AppResult<(bool, String)> {
    let Some(to) = config.alert_to() else {
        return Ok((false, "ALERT_EMAIL_TO/ADMIN_EMAIL no configurado".to_string()));
    };
    if !smtp_configured(&config.mail) {
        return Ok((false, "Config SMTP incompleta (EMAIL_HOST/USER/PASSWORD)".to_string()));
    }

    let window = config.alerts.window_days;
    let top = stats_engine::rank_assets(db, window, TOP_N).await?;
    let content = render(base_url, window, &top);

    if dry_run {
        return Ok((true, format!("{}{}", DRY_RUN_PREFIX, content.text)));
    }

    deliver(&config.mail, &config.alert_from(), &to, content).await?;
    log::info!("每日提醒已发送至 {}", to);
    Ok((true, format!("Enviado a {}", to)))
}
