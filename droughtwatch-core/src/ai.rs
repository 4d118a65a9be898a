//! Parameterization providers
//!
//! A provider receives a prompt plus a JSON schema and returns untrusted JSON.
//! Nothing returned here is used before the orchestrator validates it.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on a single provider call
pub const DEFAULT_AI_TIMEOUT_MS: u64 = 8_000;

/// Default completion budget
pub const DEFAULT_MAX_TOKENS: u32 = 512;

pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
pub const DEFAULT_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Provenance of an action's parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Ai,
    Fallback,
    Demo,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Ai => "ai",
            Method::Fallback => "fallback",
            Method::Demo => "demo",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Prompt for parameterizing one candidate action
#[derive(Debug, Clone, PartialEq)]
pub struct AiPrompt {
    pub action_code: String,
    pub system: String,
    pub user: String,
}

/// External model that proposes parameters and a justification
pub trait AiProvider: Send + Sync {
    /// Method recorded when this provider's output passes validation
    fn method(&self) -> Method;

    /// Single bounded attempt; errors are recovered by the caller
    fn call_ai(&self, prompt: &AiPrompt, schema: &Value) -> Result<Value>;
}

/// Which provider the engine uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiMode {
    Live,
    Demo,
    Disabled,
}

/// Resolved provider settings
#[derive(Debug, Clone, PartialEq)]
pub struct AiSettings {
    pub mode: AiMode,
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout: Duration,
    pub max_tokens: u32,
}

impl Default for AiSettings {
    fn default() -> Self {
        AiSettings {
            mode: AiMode::Disabled,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            timeout: Duration::from_millis(DEFAULT_AI_TIMEOUT_MS),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Build the provider selected by the settings
pub fn provider_from_settings(settings: &AiSettings) -> Arc<dyn AiProvider> {
    match settings.mode {
        AiMode::Live => {
            let api_key = std::env::var(&settings.api_key_env).ok().filter(|k| !k.is_empty());
            if api_key.is_none() {
                tracing::warn!(
                    env = %settings.api_key_env,
                    "no API key in environment; every recommendation will use fallback parameters"
                );
            }
            Arc::new(HttpAiProvider {
                endpoint: settings.endpoint.clone(),
                model: settings.model.clone(),
                api_key,
                timeout: settings.timeout,
                max_tokens: settings.max_tokens,
            })
        }
        AiMode::Demo => Arc::new(DemoProvider::new()),
        AiMode::Disabled => Arc::new(DisabledProvider),
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<RequestMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

/// Messages-API provider over blocking HTTP
pub struct HttpAiProvider {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    max_tokens: u32,
}

impl HttpAiProvider {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        max_tokens: u32,
    ) -> Self {
        HttpAiProvider {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            timeout,
            max_tokens,
        }
    }
}

impl AiProvider for HttpAiProvider {
    fn method(&self) -> Method {
        Method::Ai
    }

    fn call_ai(&self, prompt: &AiPrompt, schema: &Value) -> Result<Value> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CoreError::AiProvider("no API key configured".to_string()))?;

        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            temperature: 0.0,
            system: &prompt.system,
            messages: vec![RequestMessage {
                role: "user",
                content: format!(
                    "{}\n\nRespond with a single JSON object matching this schema:\n{}",
                    prompt.user, schema
                ),
            }],
        };

        let response = ureq::post(&self.endpoint)
            .set("x-api-key", api_key)
            .set("anthropic-version", ANTHROPIC_VERSION)
            .set("content-type", "application/json")
            .timeout(self.timeout)
            .send_json(&request);

        let body: MessagesResponse = match response {
            Ok(resp) => resp
                .into_json()
                .map_err(|e| CoreError::AiProvider(format!("invalid response body: {}", e)))?,
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                return Err(CoreError::AiProvider(format!("HTTP {}: {}", code, body)));
            }
            Err(ureq::Error::Transport(e)) => {
                return Err(CoreError::AiProvider(format!("transport error: {}", e)));
            }
        };

        let text: String = body
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();

        extract_json_object(&text)
            .ok_or_else(|| CoreError::AiProvider("reply contained no JSON object".to_string()))
    }
}

/// Canned, schema-conformant presets for demonstrations
pub struct DemoProvider {
    presets: BTreeMap<&'static str, (Value, &'static str)>,
}

impl DemoProvider {
    pub fn new() -> Self {
        let presets = BTreeMap::from([
            ("A01", (json!({"duration_days": 45, "channel": "radio"}), "Local radio reaches rural households first while dryness is still moderate.")),
            ("A02", (json!({"duration_days": 120, "reporting_interval_days": 3}), "Twice-weekly reporting catches a turn in the trend before restrictions are needed.")),
            ("A03", (json!({"duration_days": 60, "reduction_pct": 15}), "A 15% voluntary target is ambitious but historically achievable for two months.")),
            ("A04", (json!({"duration_days": 120, "coverage_pct": 60}), "Surveying the older 60% of the network addresses most of the estimated losses.")),
            ("A05", (json!({"duration_days": 90, "facilities": 60}), "The sixty largest consumers account for the bulk of industrial demand.")),
            ("A06", (json!({"duration_days": 90, "extraction_rate_pct": 20}), "Aquifer levels allow a moderate temporary draw without long-term depletion.")),
            ("A07", (json!({"duration_days": 60, "volume_hm3": 15}), "The neighbouring basin holds surplus storage for a bounded transfer.")),
            ("A08", (json!({"duration_days": 120, "reuse_share_pct": 20}), "Treatment capacity supports a fifth of irrigation demand this season.")),
            ("A09", (json!({"duration_days": 30, "enforcement": "fines"}), "Fines keep compliance high during the month before the critical threshold.")),
            ("A10", (json!({"duration_days": 45, "sectors": "all_non_essential"}), "A broad restriction is simpler to communicate and enforce.")),
            ("A11", (json!({"duration_days": 60, "surcharge_pct": 30}), "A 30% surcharge targets discretionary use while leaving basic supply affordable.")),
            ("A12", (json!({"duration_days": 21, "rationing_cut_pct": 25}), "Three weeks of rotating cuts buys time for supply measures to take effect.")),
            ("A13", (json!({"duration_days": 30, "daily_volume_m3": 800}), "Trucked volume covers hospitals and care homes in the affected sectors.")),
            ("A14", (json!({"duration_days": 30, "meeting_frequency": "daily"}), "Daily coordination matches the speed at which conditions are deteriorating.")),
            ("A15", (json!({"duration_days": 60, "allocation_cut_pct": 30}), "Agricultural allocations are the largest lever available this season.")),
        ]);
        DemoProvider { presets }
    }
}

impl Default for DemoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AiProvider for DemoProvider {
    fn method(&self) -> Method {
        Method::Demo
    }

    fn call_ai(&self, prompt: &AiPrompt, _schema: &Value) -> Result<Value> {
        let (parameters, justification) = self
            .presets
            .get(prompt.action_code.as_str())
            .ok_or_else(|| {
                CoreError::AiProvider(format!("no demo preset for {}", prompt.action_code))
            })?;
        Ok(json!({
            "parameters": parameters,
            "justification": justification,
        }))
    }
}

/// Provider that always fails, so every action takes the fallback branch
pub struct DisabledProvider;

impl AiProvider for DisabledProvider {
    fn method(&self) -> Method {
        Method::Fallback
    }

    fn call_ai(&self, _prompt: &AiPrompt, _schema: &Value) -> Result<Value> {
        Err(CoreError::AiProvider("AI provider disabled".to_string()))
    }
}

/// First JSON object in a model reply, fenced or bare
pub fn extract_json_object(text: &str) -> Option<Value> {
    let body = match text.find("```") {
        Some(start) => {
            let after = &text[start + 3..];
            let content_start = after.find('\n').map(|n| n + 1).unwrap_or(0);
            let content = &after[content_start..];
            content.find("```").map(|end| &content[..end]).unwrap_or(content)
        }
        None => text,
    };

    let start = body.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in body[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &body[start..start + offset + 1];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}
