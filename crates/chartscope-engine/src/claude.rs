use std::env;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};

use crate::{AnalysisProvider, AnalysisRequest};

pub const DEFAULT_CLAUDE_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const MISSING_API_KEY_MESSAGE: &str = "Claude API Key 未配置，请设置环境变量 CLAUDE_API_KEY";

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u64 = 2048;
const DEFAULT_TIMEOUT_SECONDS: u64 = 120;
const ERROR_BODY_MAX_CHARS: usize = 512;

#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub max_tokens: u64,
    pub timeout: Duration,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_CLAUDE_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        }
    }
}

impl ClaudeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: first_non_empty_env(&["CLAUDE_API_KEY", "ANTHROPIC_API_KEY"]),
            api_base: first_non_empty_env(&["CLAUDE_API_BASE", "ANTHROPIC_BASE_URL"])
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.api_base),
            model: first_non_empty_env(&["CLAUDE_MODEL"]).unwrap_or(defaults.model),
            max_tokens: first_non_empty_env(&["CLAUDE_MAX_TOKENS"])
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(defaults.max_tokens),
            timeout: first_non_empty_env(&["CLAUDE_TIMEOUT_SECONDS"])
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|value| *value > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Live provider: one Anthropic Messages API call per style.
pub struct ClaudeProvider {
    config: ClaudeConfig,
}

impl ClaudeProvider {
    pub fn new(config: ClaudeConfig) -> Self {
        Self { config }
    }

    fn api_key(&self) -> Result<&str> {
        match self.config.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => bail!(MISSING_API_KEY_MESSAGE),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.config.api_base)
    }

    fn request_payload(&self, request: &AnalysisRequest) -> Value {
        let mut content = request
            .images
            .iter()
            .map(|image| image.content_block())
            .collect::<Vec<Value>>();
        content.push(json!({
            "type": "text",
            "text": request.prompt,
        }));
        json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [{
                "role": "user",
                "content": content,
            }],
        })
    }
}

impl AnalysisProvider for ClaudeProvider {
    fn name(&self) -> &str {
        "claude"
    }

    fn check_ready(&self) -> Result<()> {
        self.api_key().map(|_| ())
    }

    fn analyze(&self, request: &AnalysisRequest) -> Result<String> {
        let api_key = self.api_key()?;
        let endpoint = self.endpoint();
        let payload = self.request_payload(request);

        let started = Instant::now();
        let http = HttpClient::builder()
            .timeout(self.config.timeout)
            .build()
            .context("failed building Claude HTTP client")?;
        let response = http
            .post(&endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .with_context(|| format!("Claude request to {endpoint} failed"))?;
        let parsed = response_json_or_error(response)?;
        tracing::info!(
            model = %self.config.model,
            style = %request.style.key,
            images = request.images.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Claude analysis completed"
        );

        extract_first_text(&parsed).context("Claude response contained no text content")
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .context("Claude response body read failed")?;
    if !status.is_success() {
        let detail = api_error_message(&body).unwrap_or_else(|| truncate_body(&body));
        bail!("Claude request failed ({code}): {detail}");
    }
    let parsed: Value =
        serde_json::from_str(&body).context("Claude returned invalid JSON payload")?;
    Ok(parsed)
}

/// `error.message` from an Anthropic error envelope.
fn api_error_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed
        .get("error")
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}

fn extract_first_text(response: &Value) -> Option<String> {
    response
        .get("content")
        .and_then(Value::as_array)?
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .find_map(|block| block.get("text").and_then(Value::as_str))
        .map(str::to_string)
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= ERROR_BODY_MAX_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().take(ERROR_BODY_MAX_CHARS).collect::<String>() + "…"
}

fn first_non_empty_env(keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Ok(value) = env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}
