//! Error taxonomy for the audit pipeline, with retry classification.
//!
//! Callers ask `kind()` / `is_retryable()` instead of matching on messages.
//!
//! | Kind                | Retryable | Raised by |
//! |---------------------|-----------|-----------|
//! | `Auth`              | no        | empty key, HTTP 401/403 |
//! | `RateLimited`       | yes       | HTTP 429 |
//! | `Transient`         | yes       | network, HTTP 408/5xx, per-call timeout |
//! | `MalformedResponse` | no        | 2xx body without the expected text |
//! | `Rejected`          | no        | any other 4xx |
//! | `Cancelled`         | no        | run cancelled |
//! | `ContextBudget`     | no        | fixed inputs leave no room for code |
//! | `Template`          | no        | prompt rendering failed |
//! | `Aborted`           | no        | task panicked before returning |

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use coordination::ArtifactKind;

use crate::runner::AgentRole;
use crate::state_machine::{IllegalTransition, WorkflowState};

/// Copyable classification of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    RateLimited,
    Transient,
    MalformedResponse,
    Rejected,
    Cancelled,
    ContextBudget,
    Template,
    Aborted,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth => write!(f, "auth"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Transient => write!(f, "transient"),
            Self::MalformedResponse => write!(f, "malformed_response"),
            Self::Rejected => write!(f, "rejected"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::ContextBudget => write!(f, "context_budget"),
            Self::Template => write!(f, "template"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Failure of a single provider call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("{provider}: authentication failed: {message}")]
    Auth { provider: String, message: String },

    #[error("{provider}: rate limited{}: {message}", fmt_retry_after(.retry_after))]
    RateLimited {
        provider: String,
        /// Minimum wait requested by the server.
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("{provider}: transient failure: {message}")]
    Transient { provider: String, message: String },

    #[error("{provider}: malformed response: {message}")]
    MalformedResponse { provider: String, message: String },

    #[error("{provider}: request rejected (HTTP {status}): {message}")]
    Rejected {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider}: call cancelled")]
    Cancelled { provider: String },
}

fn fmt_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth { .. } => ErrorKind::Auth,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            Self::Rejected { .. } => ErrorKind::Rejected,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Server-requested minimum delay, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn provider(&self) -> &str {
        match self {
            Self::Auth { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::Transient { provider, .. }
            | Self::MalformedResponse { provider, .. }
            | Self::Rejected { provider, .. }
            | Self::Cancelled { provider } => provider,
        }
    }
}

/// All attempts of a retried call failed.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("gave up after {attempts} attempt(s): {last}")]
pub struct RetryExhausted {
    pub attempts: u32,
    #[source]
    pub last: ProviderError,
}

impl RetryExhausted {
    /// Kind of the final underlying error.
    pub fn kind(&self) -> ErrorKind {
        self.last.kind()
    }
}

/// Why an agent task failed. Recorded on the task's result, never thrown.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    RetryExhausted(#[from] RetryExhausted),

    #[error(
        "{provider}: fixed prompt inputs use {fixed_tokens} tokens, \
         leaving no room for code within the {safe_limit}-token safe limit"
    )]
    ContextBudget {
        provider: String,
        fixed_tokens: usize,
        safe_limit: usize,
    },

    #[error("template '{template}' failed to render: {message}")]
    Template { template: String, message: String },

    #[error("task aborted: {0}")]
    Aborted(String),
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider(e) => e.kind(),
            Self::RetryExhausted(e) => e.kind(),
            Self::ContextBudget { .. } => ErrorKind::ContextBudget,
            Self::Template { .. } => ErrorKind::Template,
            Self::Aborted(_) => ErrorKind::Aborted,
        }
    }
}

/// Fatal problems found while loading configuration, inputs or templates.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported config format '{}' (use .yaml, .yml, .json or .toml)", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("environment variable '{var}' is not set")]
    MissingEnvVar { var: String },

    #[error("provider '{provider}' is missing required field '{field}'")]
    MissingField { provider: String, field: String },

    #[error("workflow role '{role}' names unknown provider '{provider}'")]
    UnknownProvider { role: String, provider: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("prompt template not found: {}", .0.display())]
    TemplateNotFound(PathBuf),

    #[error("prompt template is empty: {}", .0.display())]
    EmptyTemplate(PathBuf),

    #[error("prompt template '{name}' is invalid: {message}")]
    Template { name: String, message: String },

    #[error(transparent)]
    Input(#[from] coordination::Error),
}

/// A phase whose required tasks did not all succeed.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("phase {phase} failed: {}", describe_failures(.failed))]
pub struct PhaseFailure {
    pub phase: WorkflowState,
    /// Each failed role with its error.
    pub failed: Vec<(AgentRole, TaskError)>,
}

fn describe_failures(failed: &[(AgentRole, TaskError)]) -> String {
    failed
        .iter()
        .map(|(role, err)| format!("{role}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl PhaseFailure {
    pub fn roles(&self) -> Vec<AgentRole> {
        self.failed.iter().map(|(role, _)| *role).collect()
    }

    pub fn was_cancelled(&self) -> bool {
        self.failed
            .iter()
            .any(|(_, err)| err.kind() == ErrorKind::Cancelled)
    }
}

/// Why a workflow run stopped before `Done`.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Phase(#[from] PhaseFailure),

    #[error("phase {phase}: failed to save {artifact}: {source}")]
    Persist {
        phase: WorkflowState,
        artifact: ArtifactKind,
        #[source]
        source: coordination::Error,
    },

    #[error(transparent)]
    Transition(#[from] IllegalTransition),
}

impl WorkflowError {
    /// Phase that was executing when the run stopped.
    pub fn phase(&self) -> WorkflowState {
        match self {
            Self::Phase(f) => f.phase,
            Self::Persist { phase, .. } => *phase,
            Self::Transition(t) => t.from,
        }
    }

    pub fn was_cancelled(&self) -> bool {
        matches!(self, Self::Phase(f) if f.was_cancelled())
    }

    /// Roles whose tasks failed, if the run stopped on a task failure.
    pub fn failed_roles(&self) -> Vec<AgentRole> {
        match self {
            Self::Phase(f) => f.roles(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> ProviderError {
        ProviderError::Transient {
            provider: "openai".into(),
            message: "connection reset".into(),
        }
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        for kind in [
            ErrorKind::Auth,
            ErrorKind::MalformedResponse,
            ErrorKind::Rejected,
            ErrorKind::Cancelled,
            ErrorKind::ContextBudget,
            ErrorKind::Template,
            ErrorKind::Aborted,
        ] {
            assert!(!kind.is_retryable(), "{kind} must not be retried");
        }
    }

    #[test]
    fn test_retry_exhausted_keeps_last_kind() {
        let err = RetryExhausted {
            attempts: 3,
            last: transient(),
        };
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.to_string().contains("3 attempt"));

        let task: TaskError = err.into();
        assert_eq!(task.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_rate_limit_message() {
        let err = ProviderError::RateLimited {
            provider: "anthropic".into(),
            retry_after: Some(Duration::from_secs(30)),
            message: "slow down".into(),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert!(err.to_string().contains("retry after 30s"));
        assert_eq!(err.provider(), "anthropic");
    }

    #[test]
    fn test_phase_failure_display() {
        let failure = PhaseFailure {
            phase: WorkflowState::IndependentAudit,
            failed: vec![(AgentRole::AiA, TaskError::Provider(transient()))],
        };
        let text = failure.to_string();
        assert!(text.contains("IndependentAudit"));
        assert!(text.contains("AI_A"));
        assert_eq!(failure.roles(), vec![AgentRole::AiA]);
        assert!(!failure.was_cancelled());
    }
}
