//! Connection check: one short probe per configured provider.
//!
//! Probes make a single attempt each. A provider whose key is empty or
//! still the scaffolded placeholder is skipped without a network call and
//! counts as a failure.

use std::fmt;
use std::time::{Duration, Instant};

use coordination::RetryPolicy;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::ErrorKind;
use crate::providers::{build_provider, ProviderClient};
use crate::retry::RetryController;

pub const PROBE_PROMPT: &str = "Respond with exactly: 'Connection successful'";

/// Longest reply excerpt kept in a probe result.
const REPLY_PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeStatus {
    Connected { reply: String, elapsed: Duration },
    Skipped { reason: String },
    Failed { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub provider: String,
    pub model: String,
    pub status: ProbeStatus,
}

impl ProbeResult {
    pub fn passed(&self) -> bool {
        matches!(self.status, ProbeStatus::Connected { .. })
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            ProbeStatus::Connected { reply, elapsed } => write!(
                f,
                "OK    {} ({}) in {:.1}s: {}",
                self.provider,
                self.model,
                elapsed.as_secs_f64(),
                reply
            ),
            ProbeStatus::Skipped { reason } => {
                write!(f, "SKIP  {} ({}): {}", self.provider, self.model, reason)
            }
            ProbeStatus::Failed { kind, message } => write!(
                f,
                "FAIL  {} ({}) [{}]: {}",
                self.provider, self.model, kind, message
            ),
        }
    }
}

/// Send the probe prompt once.
pub async fn probe(
    client: &dyn ProviderClient,
    timeout: Duration,
    cancel: CancellationToken,
) -> ProbeResult {
    let controller = RetryController::new(RetryPolicy::single_attempt(), timeout, cancel);
    let start = Instant::now();
    let status = match controller.call(client, PROBE_PROMPT).await {
        Ok(response) => ProbeStatus::Connected {
            reply: response.text.trim().chars().take(REPLY_PREVIEW_CHARS).collect(),
            elapsed: start.elapsed(),
        },
        Err(e) => ProbeStatus::Failed {
            kind: e.kind(),
            message: e.to_string(),
        },
    };
    ProbeResult {
        provider: client.name().to_string(),
        model: client.model().to_string(),
        status,
    }
}

/// Probe every configured provider, in name order.
pub async fn test_connections(config: &Config, cancel: CancellationToken) -> Vec<ProbeResult> {
    let mut results = Vec::with_capacity(config.providers.len());

    for provider in config.providers.values() {
        if provider.has_placeholder_key() {
            warn!(provider = %provider.name, "API key not configured, skipping");
            results.push(ProbeResult {
                provider: provider.name.clone(),
                model: provider.model.clone(),
                status: ProbeStatus::Skipped {
                    reason: "API key not configured".into(),
                },
            });
            continue;
        }

        let result = match build_provider(provider) {
            Ok(client) => probe(client.as_ref(), provider.timeout, cancel.clone()).await,
            Err(e) => ProbeResult {
                provider: provider.name.clone(),
                model: provider.model.clone(),
                status: ProbeStatus::Failed {
                    kind: ErrorKind::Rejected,
                    message: e.to_string(),
                },
            },
        };
        if result.passed() {
            info!(provider = %result.provider, "Connection successful");
        } else {
            warn!(provider = %result.provider, "Connection failed");
        }
        results.push(result);
    }
    results
}
