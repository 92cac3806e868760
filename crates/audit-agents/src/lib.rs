//! Audit Agents Library
//!
//! Async half of the cross-audit pipeline:
//! - provider clients for OpenAI- and Anthropic-style APIs (`providers`)
//! - bounded retries with timeouts and cancellation (`retry`)
//! - typed prompt templates (`prompts`)
//! - the per-task agent runner and the four-phase coordinator (`runner`, `orchestrator`)
//! - configuration loading, connection checks and scaffolding (`config`, `connectivity`, `setup`)
//!
//! The deterministic pieces (snapshots, chunking, run directories) live in
//! the `coordination` crate.

pub mod config;
pub mod connectivity;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod retry;
pub mod runner;
pub mod setup;
pub mod state_machine;
pub mod telemetry;

pub use config::{Config, EnvMode};
pub use errors::{ConfigError, ErrorKind, PhaseFailure, ProviderError, TaskError, WorkflowError};
pub use orchestrator::{CrossAuditCoordinator, RunInputs, WorkflowOutcome};
pub use prompts::{PromptSet, PromptVars, TemplateId};
pub use providers::{ProviderClient, ProviderResponse, TokenUsage};
pub use retry::RetryController;
pub use runner::{AgentResult, AgentRole, AgentRunner, AgentStatus, AgentTask};
pub use state_machine::{StateMachine, WorkflowState};
pub use telemetry::RunManifest;
