//! OpenAI chat-completions dialect (also spoken by most local servers).

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{execute, http_client, malformed, missing_key, versioned_base};
use super::{ProviderClient, ProviderResponse, TokenUsage};
use crate::config::ProviderConfig;
use crate::errors::{ConfigError, ProviderError};

pub struct OpenAiClient {
    name: String,
    model: String,
    api_key: String,
    endpoint: String,
    temperature: f64,
    max_tokens: u32,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            name: config.name.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            endpoint: Self::endpoint(&config.base_url),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            http: http_client(config)?,
        })
    }

    /// `{base}/v1/chat/completions` with exactly one `/v1`.
    pub fn endpoint(base_url: &str) -> String {
        format!("{}/chat/completions", versioned_base(base_url))
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        })
    }
}

/// Pull text and usage out of a chat-completions body.
pub fn parse_response(provider: &str, body: &Value) -> Result<ProviderResponse, ProviderError> {
    let text = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| malformed(provider, "missing choices[0].message.content"))?;

    let usage = body.get("usage").and_then(|u| {
        Some(TokenUsage {
            input_tokens: u.get("prompt_tokens")?.as_u64()?,
            output_tokens: u.get("completion_tokens")?.as_u64()?,
        })
    });

    Ok(ProviderResponse {
        text: text.to_string(),
        usage,
    })
}

#[async_trait]
impl ProviderClient for OpenAiClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, prompt: &str) -> Result<ProviderResponse, ProviderError> {
        if self.api_key.trim().is_empty() {
            return Err(missing_key(&self.name));
        }
        debug!(provider = %self.name, model = %self.model, chars = prompt.len(), "Sending chat completion");

        let request = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt));
        let body = execute(&self.name, request).await?;
        parse_response(&self.name, &body)
    }
}
