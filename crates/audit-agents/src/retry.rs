//! Retry/backoff controller wrapping every provider call.
//!
//! Each attempt is bounded by a wall-clock timeout. Retryable failures sleep
//! according to the provider's `RetryPolicy` (raised to any `retry-after`
//! hint) before the next attempt. Cancellation interrupts both the in-flight
//! call and the sleep.

use std::time::Duration;

use coordination::resilience::MAX_BACKOFF;
use coordination::RetryPolicy;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{ProviderError, RetryExhausted, TaskError};
use crate::providers::{ProviderClient, ProviderResponse};

#[derive(Debug, Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    timeout: Duration,
    cancel: CancellationToken,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            policy,
            timeout,
            cancel,
        }
    }

    /// Call the provider until it succeeds, fails terminally, or runs out
    /// of attempts.
    pub async fn call(
        &self,
        client: &dyn ProviderClient,
        prompt: &str,
    ) -> Result<ProviderResponse, TaskError> {
        let max_attempts = self.policy.attempts.max(1);
        let provider = client.name();
        let mut attempt = 1;

        loop {
            let error = match self.attempt_once(client, prompt).await {
                Ok(response) => {
                    debug!(provider, attempt, "Provider call succeeded");
                    return Ok(response);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                warn!(provider, attempt, error = %error, "Provider call failed, not retrying");
                return Err(error.into());
            }
            if attempt >= max_attempts {
                warn!(provider, attempts = attempt, error = %error, "Retries exhausted");
                return Err(RetryExhausted {
                    attempts: attempt,
                    last: error,
                }
                .into());
            }

            let mut backoff = self.policy.delay_before_retry(attempt);
            if let Some(hint) = error.retry_after() {
                backoff = backoff.max(hint.min(MAX_BACKOFF));
            }
            warn!(
                provider,
                attempt,
                max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %error,
                "Retryable provider error, backing off"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(cancelled(provider).into());
                }
                _ = tokio::time::sleep(backoff) => {}
            }
            attempt += 1;
        }
    }

    async fn attempt_once(
        &self,
        client: &dyn ProviderClient,
        prompt: &str,
    ) -> Result<ProviderResponse, ProviderError> {
        let provider = client.name();
        if self.cancel.is_cancelled() {
            return Err(cancelled(provider));
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(cancelled(provider)),
            result = tokio::time::timeout(self.timeout, client.send(prompt)) => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(ProviderError::Transient {
                    provider: provider.to_string(),
                    message: format!("no response within {}s", self.timeout.as_secs()),
                }),
            },
        }
    }
}

fn cancelled(provider: &str) -> ProviderError {
    ProviderError::Cancelled {
        provider: provider.to_string(),
    }
}
