//! AI 评估引擎
//!
//! 通过 OpenAI Chat Completions 接口对机会打分，要求模型按固定 JSON Schema 输出。
//! 未配置密钥、请求失败或输出无法解析时都返回 NEEDS_DATA，不会向上抛错。

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::AiConfig;
use crate::models::{AiAction, AiEval, PortfolioSnapshot, PriceSnapshot, Recommendation};
use crate::services::common::truncate_chars;

const SYSTEM_PROMPT: &str = "Sos un analista cuantitativo y de riesgo. \
Evaluás una oportunidad de inversión para un usuario minorista. \
No prometas ganancias. Priorizá protección de capital. \
Si faltan datos (precio, histórico, posición), devolvé NEEDS_DATA.";

/// 摘要最大长度
const SUMMARY_MAX: usize = 800;

/// 模型输出约束
fn eval_schema() -> Value {
    json!({
        "name": "invpanel_ai_eval",
        "strict": true,
        "schema": {
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "score": {"type": "integer", "minimum": 0, "maximum": 100},
                "confidence": {"type": "integer", "minimum": 0, "maximum": 100},
                "action": {"type": "string", "enum": ["ENTER", "EXIT", "HOLD", "IGNORE", "NEEDS_DATA"]},
                "summary": {"type": "string"},
                "reasons": {"type": "object"}
            },
            "required": ["score", "confidence", "action", "summary", "reasons"]
        }
    })
}

fn needs_data(summary: &str, reasons: Value) -> AiEval {
    AiEval {
        score: 0,
        confidence: 0,
        action: AiAction::NeedsData,
        summary: summary.to_string(),
        reasons,
    }
}

/// 解析模型返回的 JSON 文本
pub fn parse_eval(raw: &str) -> AiEval {
    let data: Value = serde_json::from_str(raw).unwrap_or_else(|_| json!({}));

    let int_field = |key: &str| -> i64 {
        match data.get(key) {
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    };

    let action = data
        .get("action")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<AiAction>().ok())
        .unwrap_or(AiAction::NeedsData);

    let summary = match data.get("summary") {
        Some(Value::String(s)) => truncate_chars(s, SUMMARY_MAX),
        Some(Value::Null) | None => String::new(),
        Some(other) => truncate_chars(&other.to_string(), SUMMARY_MAX),
    };

    let reasons = match data.get("reasons") {
        None => json!({}),
        Some(v @ Value::Object(_)) => v.clone(),
        Some(other) => json!({ "raw": other }),
    };

    AiEval {
        score: int_field("score"),
        confidence: int_field("confidence"),
        action,
        summary,
        reasons,
    }
}

/// AI 评估客户端
#[derive(Clone)]
pub struct AiEngine {
    client: Client,
    config: AiConfig,
}

impl AiEngine {
    pub fn new(config: AiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &AiConfig {
        &self.config
    }

    pub fn is_configured(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    /// 接受机会是否需要通过 AI 门槛（要求开启治理且已配置密钥）
    pub fn governance_active(&self) -> bool {
        self.config.governance_required && self.is_configured()
    }

    /// 单次批量评估的上限（至少 1）
    pub fn batch_limit(&self) -> i64 {
        self.config.max_eval_per_click.max(1)
    }

    /// 评估一条机会
    pub async fn evaluate(
        &self,
        rec: &Recommendation,
        portfolio: &PortfolioSnapshot,
        prices: &PriceSnapshot,
    ) -> AiEval {
        if !self.is_configured() {
            return needs_data(
                "IA no configurada (falta OPENAI_API_KEY).",
                json!({"error": "missing_openai_api_key"}),
            );
        }

        match self.request(rec, portfolio, prices).await {
            Ok(content) => parse_eval(&content),
            Err(e) => {
                log::warn!("AI 评估失败 (reco {}): {}", rec.id, e);
                needs_data(
                    "IA no disponible en este momento.",
                    json!({"error": "request_failed", "detail": truncate_chars(&e.to_string(), 300)}),
                )
            }
        }
    }

    async fn request(
        &self,
        rec: &Recommendation,
        portfolio: &PortfolioSnapshot,
        prices: &PriceSnapshot,
    ) -> Result<String> {
        let user = json!({
            "recommendation": {
                "code": rec.code,
                "severity": rec.severity,
                "title": rec.title,
                "rationale": rec.rationale,
                "evidence": rec.evidence,
                "status": rec.status,
            },
            "portfolio": portfolio,
            "prices": prices,
            "constraints": {
                "currency": portfolio.base_currency,
                "horizon": "short_to_mid",
                "risk_policy": "conservative_by_default",
            },
        });

        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": user.to_string()},
            ],
            "response_format": {"type": "json_schema", "json_schema": eval_schema()},
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("OpenAI 返回状态 {}", response.status()));
        }

        let payload: Value = response.json().await?;
        let content = payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or("{}");
        Ok(content.to_string())
    }
}
