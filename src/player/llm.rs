//! LLM player back-end over OpenAI-compatible chat completions.
//!
//! Every supported provider exposes a chat-completions endpoint; the
//! back-end differs only in base URL and credential environment variable.
//! Credentials never appear in configuration files.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PlayerError;
use crate::interp::TokenUsage;

use super::ratelimit::TokenBucket;
use super::{backend::Completion, ChatMessage, PlayerBackend, PlayerSpec};

/// Per-request timeout for player back-end calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Default refill rate when the spec does not set one.
const DEFAULT_REQUESTS_PER_MINUTE: f64 = 60.0;

/// (provider, base URL, credential environment variable).
const PROVIDERS: &[(&str, &str, &str)] = &[
    ("openai", "https://api.openai.com/v1", "OPENAI_API_KEY"),
    ("anthropic", "https://api.anthropic.com/v1", "ANTHROPIC_API_KEY"),
    (
        "gemini",
        "https://generativelanguage.googleapis.com/v1beta/openai",
        "GEMINI_API_KEY",
    ),
    ("grok", "https://api.x.ai/v1", "XAI_API_KEY"),
    ("deepseek", "https://api.deepseek.com/v1", "DEEPSEEK_API_KEY"),
    ("moonshot", "https://api.moonshot.ai/v1", "MOONSHOT_API_KEY"),
];

/// Guesses the provider from a model name. A heuristic; specs can always
/// set `provider` explicitly.
pub fn guess_provider(model: &str) -> &'static str {
    let lower = model.to_lowercase();
    if lower.contains("gpt") || lower.starts_with("o3") || lower.starts_with("o4") {
        "openai"
    } else if lower.contains("claude") {
        "anthropic"
    } else if lower.contains("gemini") {
        "gemini"
    } else if lower.contains("grok") {
        "grok"
    } else if lower.contains("deepseek") {
        "deepseek"
    } else if lower.contains("moonshot") || lower.contains("kimi") {
        "moonshot"
    } else {
        "openai"
    }
}

fn provider_entry(provider: &str) -> Result<(&'static str, &'static str), PlayerError> {
    PROVIDERS
        .iter()
        .find(|(name, _, _)| *name == provider)
        .map(|(_, base, env_var)| (*base, *env_var))
        .ok_or_else(|| PlayerError::InvalidConfig(format!("unknown provider '{}'", provider)))
}

/// Chat-completions client for one (provider, model, credential) tuple.
pub struct LlmBackend {
    id: String,
    model: String,
    provider: String,
    api_base: String,
    api_key: String,
    temperature: Option<f64>,
    top_p: Option<f64>,
    http_client: Client,
    bucket: Arc<TokenBucket>,
}

impl LlmBackend {
    /// Builds a back-end from a player spec, reading the credential from
    /// the provider's environment variable.
    pub fn from_spec(spec: &PlayerSpec) -> Result<Self, PlayerError> {
        let model = spec
            .options
            .model
            .clone()
            .ok_or_else(|| PlayerError::InvalidConfig("LLM player needs a model".into()))?;
        let provider = spec
            .options
            .provider
            .clone()
            .unwrap_or_else(|| guess_provider(&model).to_string());
        let (api_base, env_var) = provider_entry(&provider)?;
        let api_key =
            env::var(env_var).map_err(|_| PlayerError::MissingCredential(env_var.to_string()))?;
        let rpm = spec
            .options
            .requests_per_minute
            .unwrap_or(DEFAULT_REQUESTS_PER_MINUTE);

        Ok(Self {
            id: spec.id.clone(),
            model,
            provider,
            api_base: api_base.to_string(),
            api_key,
            temperature: spec.options.temperature,
            top_p: spec.options.top_p,
            http_client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .map_err(|e| PlayerError::InvalidConfig(e.to_string()))?,
            bucket: Arc::new(TokenBucket::per_minute(rpm)),
        })
    }

    /// Connection-sharing key: same provider + model + credential source
    /// reuse one client and one rate limiter.
    pub fn pool_key(&self) -> String {
        format!("{}:{}", self.provider, self.model)
    }
}

/// Request body for the chat-completions endpoint.
#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[async_trait]
impl PlayerBackend for LlmBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(
        &self,
        transcript: &[ChatMessage],
        max_tokens: usize,
    ) -> Result<Completion, PlayerError> {
        self.bucket.acquire().await;

        let request = ApiRequest {
            model: &self.model,
            messages: transcript,
            // Room for reasoning and tags around the move itself.
            max_tokens: (max_tokens * 8).max(256),
            temperature: self.temperature,
            top_p: self.top_p,
        };
        debug!(provider = %self.provider, model = %self.model, turns = transcript.len(), "requesting completion");

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PlayerError::Backend(format!("request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(PlayerError::Backend(format!(
                "{} returned {}",
                self.provider, status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PlayerError::Rejected(format!(
                "{} returned {}: {}",
                self.provider, status, body
            )));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| PlayerError::Backend(format!("malformed response: {}", e)))?;
        let text = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();
        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        Ok(Completion { text, usage })
    }
}
