//! Provider clients: uniform interface over remote text-generation APIs.
//!
//! Two wire dialects are supported: OpenAI chat completions and Anthropic
//! messages. Both map HTTP outcomes onto the same `ProviderError` kinds so
//! the retry controller never has to look at status codes.

pub mod anthropic;
pub mod openai;

use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::{ProviderConfig, ProviderKind};
use crate::errors::{ConfigError, ProviderError};

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

/// Longest error body kept in an error message.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Token counts reported by the API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

/// A successful completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// One remote model endpoint.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Configured provider name (key under `apis`).
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Send one prompt as a single user message. Makes exactly one attempt.
    async fn send(&self, prompt: &str) -> Result<ProviderResponse, ProviderError>;
}

/// Build the client for a provider's configured dialect.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn ProviderClient>, ConfigError> {
    let client: Arc<dyn ProviderClient> = match config.kind {
        ProviderKind::Openai => Arc::new(OpenAiClient::new(config)?),
        ProviderKind::Anthropic => Arc::new(AnthropicClient::new(config)?),
    };
    Ok(client)
}

pub(crate) fn http_client(config: &ProviderConfig) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| {
            ConfigError::Invalid(format!(
                "failed to create HTTP client for '{}': {e}",
                config.name
            ))
        })
}

/// `base` with exactly one trailing `/v1` segment.
pub(crate) fn versioned_base(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with("/v1") {
        base.to_string()
    } else {
        format!("{base}/v1")
    }
}

pub(crate) fn missing_key(provider: &str) -> ProviderError {
    ProviderError::Auth {
        provider: provider.to_string(),
        message: "API key is empty".into(),
    }
}

/// Map a failed send (connect, TLS, timeout) to an error kind.
pub(crate) fn classify_send_error(provider: &str, err: reqwest::Error) -> ProviderError {
    let message = if err.is_timeout() {
        format!("request timed out: {err}")
    } else {
        err.to_string()
    };
    ProviderError::Transient {
        provider: provider.to_string(),
        message,
    }
}

/// Map a non-2xx response to an error kind.
pub(crate) fn classify_status(
    provider: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> ProviderError {
    let provider = provider.to_string();
    let message = format!("HTTP {}: {}", status.as_u16(), truncate(body));
    match status.as_u16() {
        401 | 403 => ProviderError::Auth { provider, message },
        429 => ProviderError::RateLimited {
            provider,
            retry_after: parse_retry_after(headers),
            message,
        },
        408 | 500..=599 => ProviderError::Transient { provider, message },
        code => ProviderError::Rejected {
            provider,
            status: code,
            message,
        },
    }
}

/// `Retry-After` in whole seconds. HTTP dates are ignored.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

pub(crate) fn malformed(provider: &str, message: impl Into<String>) -> ProviderError {
    ProviderError::MalformedResponse {
        provider: provider.to_string(),
        message: message.into(),
    }
}

/// Send a prepared request and hand back the parsed JSON body of a 2xx.
pub(crate) async fn execute(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<serde_json::Value, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| classify_send_error(provider, e))?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .text()
        .await
        .map_err(|e| classify_send_error(provider, e))?;

    if !status.is_success() {
        return Err(classify_status(provider, status, &headers, &body));
    }

    serde_json::from_str(&body)
        .map_err(|e| malformed(provider, format!("body is not JSON: {e}")))
}

fn truncate(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{cut}...")
    }
}
