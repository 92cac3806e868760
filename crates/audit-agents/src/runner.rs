//! Agent runner: drives one model through one labelled task.
//!
//! The runner renders the task's template, splits the codebase to fit the
//! provider's budget, and calls the provider once per chunk. Several chunks
//! are followed by one merge call. Errors never escape: every outcome is an
//! `AgentResult` and the coordinator decides what a failure means.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use coordination::{estimate_tokens, ArtifactKind, Chunker, CodebaseSnapshot, TokenBudget};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{ErrorKind, TaskError};
use crate::prompts::{PromptSet, PromptVars, TemplateId};
use crate::providers::{ProviderClient, TokenUsage};
use crate::retry::RetryController;

/// Who performs a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentRole {
    #[serde(rename = "AI_A")]
    AiA,
    #[serde(rename = "AI_B")]
    AiB,
    #[serde(rename = "arbitrator")]
    Arbitrator,
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AiA => write!(f, "AI_A"),
            Self::AiB => write!(f, "AI_B"),
            Self::Arbitrator => write!(f, "arbitrator"),
        }
    }
}

/// One unit of work for one provider. Consumed by `AgentRunner::run`.
#[derive(Debug, Clone)]
pub struct AgentTask {
    pub role: AgentRole,
    pub template: TemplateId,
    pub artifact: ArtifactKind,
    pub bug_report: Arc<str>,
    /// Prior-phase reports, keyed by template placeholder.
    pub inputs: Vec<(&'static str, Arc<str>)>,
    pub snapshot: Arc<CodebaseSnapshot>,
}

impl AgentTask {
    pub fn new(
        role: AgentRole,
        template: TemplateId,
        artifact: ArtifactKind,
        bug_report: Arc<str>,
        snapshot: Arc<CodebaseSnapshot>,
    ) -> Self {
        Self {
            role,
            template,
            artifact,
            bug_report,
            inputs: Vec::new(),
            snapshot,
        }
    }

    pub fn with_input(mut self, placeholder: &'static str, text: Arc<str>) -> Self {
        self.inputs.push((placeholder, text));
        self
    }

    fn base_vars(&self, template: TemplateId) -> PromptVars {
        let mut vars = PromptVars::new(template).text("bug_report", &self.bug_report);
        for (name, text) in &self.inputs {
            vars.set_text(*name, text);
        }
        vars
    }
}

/// Terminal status of a task.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentStatus {
    Succeeded,
    Failed(TaskError),
}

/// Everything known about a finished task.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub role: AgentRole,
    pub artifact: ArtifactKind,
    pub provider: String,
    pub model: String,
    pub status: AgentStatus,
    /// Response text; present only on success.
    pub text: Option<Arc<str>>,
    /// Logical provider calls issued (one per chunk plus the merge call).
    pub calls: u32,
    pub usage: Option<TokenUsage>,
    pub elapsed_ms: u64,
}

impl AgentResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, AgentStatus::Succeeded)
    }

    pub fn error(&self) -> Option<&TaskError> {
        match &self.status {
            AgentStatus::Failed(e) => Some(e),
            AgentStatus::Succeeded => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(TaskError::kind)
    }
}

/// Binds one provider to its retry policy, budget and the prompt set.
#[derive(Clone)]
pub struct AgentRunner {
    provider: Arc<dyn ProviderClient>,
    retry: RetryController,
    budget: TokenBudget,
    prompts: Arc<PromptSet>,
}

impl AgentRunner {
    pub fn new(
        provider: Arc<dyn ProviderClient>,
        retry: RetryController,
        budget: TokenBudget,
        prompts: Arc<PromptSet>,
    ) -> Self {
        Self {
            provider,
            retry,
            budget,
            prompts,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub async fn run(&self, task: AgentTask) -> AgentResult {
        let start = Instant::now();
        let mut calls = 0;
        let mut usage: Option<TokenUsage> = None;

        info!(
            role = %task.role,
            provider = self.provider.name(),
            artifact = %task.artifact,
            "Agent task started"
        );
        let outcome = self.execute(&task, &mut calls, &mut usage).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let (status, text) = match outcome {
            Ok(text) => {
                info!(role = %task.role, calls, elapsed_ms, "Agent task succeeded");
                (AgentStatus::Succeeded, Some(Arc::from(text)))
            }
            Err(e) => {
                warn!(role = %task.role, kind = %e.kind(), error = %e, "Agent task failed");
                (AgentStatus::Failed(e), None)
            }
        };

        AgentResult {
            role: task.role,
            artifact: task.artifact,
            provider: self.provider.name().to_string(),
            model: self.provider.model().to_string(),
            status,
            text,
            calls,
            usage,
            elapsed_ms,
        }
    }

    async fn execute(
        &self,
        task: &AgentTask,
        calls: &mut u32,
        usage: &mut Option<TokenUsage>,
    ) -> Result<String, TaskError> {
        let mut fixed: Vec<&str> = vec![task.bug_report.as_ref()];
        fixed.extend(task.inputs.iter().map(|(_, text)| text.as_ref()));
        let codebase_budget =
            self.budget
                .codebase_budget(&fixed)
                .ok_or_else(|| TaskError::ContextBudget {
                    provider: self.provider.name().to_string(),
                    fixed_tokens: fixed.iter().map(|s| estimate_tokens(s)).sum(),
                    safe_limit: self.budget.safe_limit,
                })?;

        let chunks = Chunker::new(codebase_budget).chunks(&task.snapshot);
        let total = chunks.len();

        if total == 1 {
            let mut vars = task.base_vars(task.template);
            for chunk in chunks {
                if chunk.oversized {
                    warn!(role = %task.role, tokens = chunk.estimated_tokens, budget = codebase_budget,
                        "Single file exceeds the codebase budget, sending it whole");
                }
                vars.set_text("codebase", &chunk.render());
            }
            return self.send(&vars, calls, usage).await;
        }

        info!(role = %task.role, chunks = total, budget = codebase_budget, "Codebase split into chunks");
        let mut analyses = Vec::with_capacity(total);
        for chunk in chunks {
            if chunk.oversized {
                warn!(role = %task.role, chunk = chunk.index, tokens = chunk.estimated_tokens,
                    "Chunk holds one file larger than the budget, sending it whole");
            }
            let mut vars = task.base_vars(task.template);
            vars.set_text("codebase", &chunk.render());
            vars.set_chunk(chunk.index, chunk.total);
            let analysis = self.send(&vars, calls, usage).await?;
            analyses.push(format!(
                "## Analysis of Chunk {}/{}\n{}",
                chunk.index, chunk.total, analysis
            ));
        }

        let mut task_vars = task.base_vars(task.template);
        task_vars.set_text("codebase", &split_codebase_note(total));
        let task_prompt = self.prompts.render(&task_vars)?;
        let joined = analyses.join("\n\n");
        if self.budget.codebase_budget(&[&task_prompt, &joined]).is_none() {
            return Err(TaskError::ContextBudget {
                provider: self.provider.name().to_string(),
                fixed_tokens: estimate_tokens(&task_prompt) + estimate_tokens(&joined),
                safe_limit: self.budget.safe_limit,
            });
        }

        let merge = PromptVars::new(TemplateId::ChunkMerge)
            .text("task_prompt", &task_prompt)
            .text("chunk_analyses", &joined);
        self.send(&merge, calls, usage).await
    }

    async fn send(
        &self,
        vars: &PromptVars,
        calls: &mut u32,
        usage: &mut Option<TokenUsage>,
    ) -> Result<String, TaskError> {
        let prompt = self.prompts.render(vars)?;
        *calls += 1;
        let response = self.retry.call(self.provider.as_ref(), &prompt).await?;
        if let Some(u) = response.usage {
            *usage.get_or_insert_with(TokenUsage::default) += u;
        }
        Ok(response.text)
    }
}

/// Stands in for the codebase when the task template is replayed for the merge.
fn split_codebase_note(total: usize) -> String {
    format!("(The code was analysed in {total} parts; your analysis of each part is given below.)")
}
