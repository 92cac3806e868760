//! Run manifest: a JSON record of what one workflow run did.
//!
//! Written as `run.json` inside the run directory whether the run succeeds
//! or not, so a failed run can be diagnosed without re-running it.

use chrono::{DateTime, Utc};
use coordination::{ArtifactKind, CodebaseStats, ReportWriter};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::ErrorKind;
use crate::providers::TokenUsage;
use crate::runner::{AgentResult, AgentRole};
use crate::state_machine::{TransitionRecord, WorkflowState};

pub use coordination::MANIFEST_FILENAME;

/// Outcome of one agent task, flattened for the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub phase: WorkflowState,
    pub role: AgentRole,
    pub artifact: ArtifactKind,
    pub provider: String,
    pub model: String,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub calls: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    pub elapsed_ms: u64,
}

impl TaskSummary {
    pub fn from_result(phase: WorkflowState, result: &AgentResult) -> Self {
        Self {
            phase,
            role: result.role,
            artifact: result.artifact,
            provider: result.provider.clone(),
            model: result.model.clone(),
            succeeded: result.succeeded(),
            error_kind: result.error_kind(),
            error: result.error().map(ToString::to_string),
            calls: result.calls,
            usage: result.usage,
            elapsed_ms: result.elapsed_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub final_state: WorkflowState,
    /// Phase that was executing when the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<WorkflowState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub codebase: CodebaseStats,
    pub transitions: Vec<TransitionRecord>,
    pub tasks: Vec<TaskSummary>,
    /// Artifact files written, in write order.
    pub artifacts: Vec<String>,
}

impl RunManifest {
    pub fn new(run_id: u32, codebase: CodebaseStats) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            final_state: WorkflowState::Init,
            failed_phase: None,
            failure: None,
            codebase,
            transitions: Vec::new(),
            tasks: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn record_task(&mut self, phase: WorkflowState, result: &AgentResult) {
        self.tasks.push(TaskSummary::from_result(phase, result));
    }

    /// Sum of reported usage across every task.
    pub fn total_usage(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for usage in self.tasks.iter().filter_map(|t| t.usage) {
            total += usage;
        }
        total
    }

    pub fn total_calls(&self) -> u32 {
        self.tasks.iter().map(|t| t.calls).sum()
    }

    /// Stamp the end of the run and persist it. A failed write is logged,
    /// never fatal: artifacts already on disk stay valid.
    pub fn finish(
        &mut self,
        writer: &ReportWriter,
        final_state: WorkflowState,
        transitions: &[TransitionRecord],
    ) {
        self.finished_at = Some(Utc::now());
        self.final_state = final_state;
        self.transitions = transitions.to_vec();
        self.artifacts = writer
            .written()
            .iter()
            .map(|kind| writer.names().filename(*kind).to_string())
            .collect();

        match writer.write_json(MANIFEST_FILENAME, self) {
            Ok(path) => info!(
                path = %path.display(),
                state = %final_state,
                calls = self.total_calls(),
                tokens = self.total_usage().total(),
                "Run manifest written"
            ),
            Err(e) => warn!(error = %e, "Failed to write run manifest"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ProviderError, TaskError};
    use crate::runner::AgentStatus;
    use coordination::{ArtifactNames, RunDirectory};
    use std::sync::Arc;

    fn result(role: AgentRole, status: AgentStatus) -> AgentResult {
        AgentResult {
            role,
            artifact: ArtifactKind::AuditReportA,
            provider: "openai".into(),
            model: "gpt-4o".into(),
            text: matches!(status, AgentStatus::Succeeded).then(|| Arc::from("report")),
            status,
            calls: 2,
            usage: Some(TokenUsage {
                input_tokens: 100,
                output_tokens: 20,
            }),
            elapsed_ms: 5,
        }
    }

    #[test]
    fn test_task_summary_records_failure() {
        let failed = result(
            AgentRole::AiB,
            AgentStatus::Failed(TaskError::Provider(ProviderError::Auth {
                provider: "openai".into(),
                message: "HTTP 401".into(),
            })),
        );
        let summary = TaskSummary::from_result(WorkflowState::IndependentAudit, &failed);
        assert!(!summary.succeeded);
        assert_eq!(summary.error_kind, Some(ErrorKind::Auth));
        assert!(summary.error.unwrap().contains("HTTP 401"));
    }

    #[test]
    fn test_manifest_written_to_run_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let run = RunDirectory::allocate(tmp.path()).unwrap();
        let mut writer = ReportWriter::new(run, ArtifactNames::default());
        writer.write(ArtifactKind::AuditReportA, "report").unwrap();

        let mut manifest = RunManifest::new(writer.run().run_id(), CodebaseStats::default());
        manifest.record_task(
            WorkflowState::IndependentAudit,
            &result(AgentRole::AiA, AgentStatus::Succeeded),
        );
        manifest.record_task(
            WorkflowState::IndependentAudit,
            &result(AgentRole::AiB, AgentStatus::Succeeded),
        );
        manifest.finish(&writer, WorkflowState::Done, &[]);

        assert_eq!(manifest.total_calls(), 4);
        assert_eq!(manifest.total_usage().total(), 240);

        let raw = std::fs::read_to_string(writer.run().path().join(MANIFEST_FILENAME)).unwrap();
        let back: RunManifest = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.final_state, WorkflowState::Done);
        assert_eq!(back.artifacts, vec!["audit_report_A.md".to_string()]);
        assert_eq!(back.tasks.len(), 2);
        assert!(back.finished_at.is_some());
    }
}
