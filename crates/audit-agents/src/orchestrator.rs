//! Cross-audit coordinator: runs the four phases of a bug investigation.
//!
//! ```text
//! IndependentAudit   AI_A ─┐            ┌─ AI_B      audit_report_{A,B}
//!                          └─ barrier ──┘
//! Consolidation      own + other audit per side       consolidation_{A,B}
//! CrossAudit         each side reviews the peer's     cross_audit_{A_on_B,B_on_A}
//! FinalArbitration   arbitrator reads all six         definitive_fixes
//! ```
//!
//! The tasks of a phase run concurrently on a `JoinSet`; draining the set is
//! the barrier. Successful artifacts are saved as soon as the barrier is
//! reached, before the phase decides whether the run may continue. The
//! coordinator is the only writer to the run directory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use coordination::{ArtifactKind, CodebaseSnapshot, ReportWriter};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::errors::{ConfigError, PhaseFailure, TaskError, WorkflowError};
use crate::prompts::{PromptSet, TemplateId};
use crate::providers::build_provider;
use crate::retry::RetryController;
use crate::runner::{AgentResult, AgentRole, AgentRunner, AgentStatus, AgentTask};
use crate::state_machine::{StateMachine, WorkflowState};
use crate::telemetry::RunManifest;

/// Phases in execution order.
pub const PHASES: [WorkflowState; 4] = [
    WorkflowState::IndependentAudit,
    WorkflowState::Consolidation,
    WorkflowState::CrossAudit,
    WorkflowState::FinalArbitration,
];

/// Bug report and codebase shared by every task of a run.
#[derive(Debug, Clone)]
pub struct RunInputs {
    pub bug_report: Arc<str>,
    pub snapshot: Arc<CodebaseSnapshot>,
}

impl RunInputs {
    pub fn new(bug_report: impl Into<Arc<str>>, snapshot: CodebaseSnapshot) -> Self {
        Self {
            bug_report: bug_report.into(),
            snapshot: Arc::new(snapshot),
        }
    }
}

/// What a finished run produced.
#[derive(Debug)]
pub struct WorkflowOutcome {
    pub run_id: u32,
    pub run_dir: PathBuf,
    pub final_state: WorkflowState,
    /// Paths of artifacts on disk, in write order.
    pub artifacts: Vec<PathBuf>,
    /// Final arbitration text, when the run reached `Done`.
    pub definitive_fixes: Option<Arc<str>>,
    pub error: Option<WorkflowError>,
    pub manifest: RunManifest,
}

impl WorkflowOutcome {
    pub fn succeeded(&self) -> bool {
        self.final_state == WorkflowState::Done
    }

    pub fn failed_phase(&self) -> Option<WorkflowState> {
        self.error.as_ref().map(WorkflowError::phase)
    }
}

/// Binds the three roles to their runners and drives a run.
#[derive(Clone)]
pub struct CrossAuditCoordinator {
    ai_a: AgentRunner,
    ai_b: AgentRunner,
    arbitrator: AgentRunner,
    cancel: CancellationToken,
}

impl CrossAuditCoordinator {
    pub fn new(
        ai_a: AgentRunner,
        ai_b: AgentRunner,
        arbitrator: AgentRunner,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ai_a,
            ai_b,
            arbitrator,
            cancel,
        }
    }

    /// Build one runner per role from the configured providers.
    pub fn from_config(
        config: &Config,
        prompts: Arc<PromptSet>,
        cancel: CancellationToken,
    ) -> Result<Self, ConfigError> {
        let runner_for = |role: &str, name: &str| -> Result<AgentRunner, ConfigError> {
            let provider = config
                .provider(name)
                .ok_or_else(|| ConfigError::UnknownProvider {
                    role: role.to_string(),
                    provider: name.to_string(),
                })?;
            let retry = RetryController::new(provider.retry.clone(), provider.timeout, cancel.clone());
            Ok(AgentRunner::new(
                build_provider(provider)?,
                retry,
                provider.budget,
                prompts.clone(),
            ))
        };

        Ok(Self::new(
            runner_for("ai_a", &config.workflow.ai_a)?,
            runner_for("ai_b", &config.workflow.ai_b)?,
            runner_for("final_arbitrator", &config.workflow.final_arbitrator)?,
            cancel.clone(),
        ))
    }

    fn runner(&self, role: AgentRole) -> &AgentRunner {
        match role {
            AgentRole::AiA => &self.ai_a,
            AgentRole::AiB => &self.ai_b,
            AgentRole::Arbitrator => &self.arbitrator,
        }
    }

    /// Execute every phase. Never returns early with an error: failures are
    /// recorded on the outcome and the manifest is written either way.
    pub async fn run(&self, inputs: &RunInputs, writer: &mut ReportWriter) -> WorkflowOutcome {
        let mut machine = StateMachine::new();
        let mut manifest = RunManifest::new(writer.run().run_id(), inputs.snapshot.stats());
        let mut reports: HashMap<ArtifactKind, Arc<str>> = HashMap::new();

        info!(
            run_id = writer.run().run_id(),
            files = inputs.snapshot.len(),
            chars = inputs.snapshot.total_chars(),
            a = self.ai_a.provider_name(),
            b = self.ai_b.provider_name(),
            arbitrator = self.arbitrator.provider_name(),
            "Starting cross-audit run"
        );

        let error = match self
            .drive(&mut machine, inputs, writer, &mut manifest, &mut reports)
            .await
        {
            Ok(()) => None,
            Err(e) => {
                let reason = if e.was_cancelled() {
                    "cancelled".to_string()
                } else {
                    e.to_string()
                };
                error!(phase = %e.phase(), error = %e, "Run failed");
                if let Err(t) = machine.fail(&reason) {
                    warn!(error = %t, "Could not record failure transition");
                }
                manifest.failed_phase = Some(e.phase());
                manifest.failure = Some(reason);
                Some(e)
            }
        };

        manifest.finish(writer, machine.current(), machine.transitions());
        info!(summary = %machine.summary(), "Run finished");

        WorkflowOutcome {
            run_id: writer.run().run_id(),
            run_dir: writer.run().path().to_path_buf(),
            final_state: machine.current(),
            artifacts: writer.written().iter().map(|k| writer.path_for(*k)).collect(),
            definitive_fixes: reports.get(&ArtifactKind::DefinitiveFixes).cloned(),
            error,
            manifest,
        }
    }

    async fn drive(
        &self,
        machine: &mut StateMachine,
        inputs: &RunInputs,
        writer: &mut ReportWriter,
        manifest: &mut RunManifest,
        reports: &mut HashMap<ArtifactKind, Arc<str>>,
    ) -> Result<(), WorkflowError> {
        for phase in PHASES {
            machine.advance(phase, None)?;
            let tasks = phase_tasks(phase, inputs, reports);
            let results = self.run_phase(phase, tasks).await;

            let mut failed: Vec<(AgentRole, TaskError)> = Vec::new();
            for result in results {
                manifest.record_task(phase, &result);
                match (&result.text, result.error()) {
                    (Some(text), _) => {
                        writer.write(result.artifact, text).map_err(|source| {
                            WorkflowError::Persist {
                                phase,
                                artifact: result.artifact,
                                source,
                            }
                        })?;
                        reports.insert(result.artifact, text.clone());
                    }
                    (None, Some(e)) => failed.push((result.role, e.clone())),
                    (None, None) => failed.push((
                        result.role,
                        TaskError::Aborted("task returned no text".into()),
                    )),
                }
            }

            if !failed.is_empty() {
                return Err(PhaseFailure { phase, failed }.into());
            }
            info!(phase = %phase, "Phase complete");
        }

        machine.advance(WorkflowState::Done, None)?;
        Ok(())
    }

    /// Spawn every task of a phase and wait for all of them.
    ///
    /// Results come back in task order. A task that panicked is reported as
    /// an `Aborted` failure for its role.
    async fn run_phase(&self, phase: WorkflowState, tasks: Vec<AgentTask>) -> Vec<AgentResult> {
        let mut join_set: JoinSet<(usize, AgentResult)> = JoinSet::new();
        let mut pending: Vec<Option<(AgentRole, ArtifactKind, String, String)>> = Vec::new();

        for (slot, task) in tasks.into_iter().enumerate() {
            let runner = self.runner(task.role).clone();
            info!(phase = %phase, role = %task.role, artifact = %task.artifact,
                provider = runner.provider_name(), "Dispatching task");
            pending.push(Some((
                task.role,
                task.artifact,
                runner.provider_name().to_string(),
                runner.model().to_string(),
            )));
            join_set.spawn(async move { (slot, runner.run(task).await) });
        }

        let mut done: Vec<Option<AgentResult>> = vec![None; pending.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((slot, result)) => {
                    pending[slot] = None;
                    done[slot] = Some(result);
                }
                Err(e) => warn!(phase = %phase, error = %e, "Agent task panicked"),
            }
        }

        done.into_iter()
            .zip(pending)
            .filter_map(|(result, lost)| {
                result.or_else(|| {
                    lost.map(|(role, artifact, provider, model)| AgentResult {
                        role,
                        artifact,
                        provider,
                        model,
                        status: AgentStatus::Failed(TaskError::Aborted(
                            "agent task panicked".into(),
                        )),
                        text: None,
                        calls: 0,
                        usage: None,
                        elapsed_ms: 0,
                    })
                })
            })
            .collect()
    }
}

/// Tasks for one phase, fed by the reports of the phases before it.
pub fn phase_tasks(
    phase: WorkflowState,
    inputs: &RunInputs,
    reports: &HashMap<ArtifactKind, Arc<str>>,
) -> Vec<AgentTask> {
    let report = |kind: ArtifactKind| -> Arc<str> {
        reports.get(&kind).cloned().unwrap_or_else(|| Arc::from(""))
    };
    let task = |role, template, artifact| {
        AgentTask::new(
            role,
            template,
            artifact,
            inputs.bug_report.clone(),
            inputs.snapshot.clone(),
        )
    };

    use ArtifactKind::*;
    match phase {
        WorkflowState::IndependentAudit => vec![
            task(AgentRole::AiA, TemplateId::BugSlayer, AuditReportA),
            task(AgentRole::AiB, TemplateId::BugSlayer, AuditReportB),
        ],
        WorkflowState::Consolidation => vec![
            task(AgentRole::AiA, TemplateId::AuditConsolidator, ConsolidationA)
                .with_input("own_report", report(AuditReportA))
                .with_input("other_report", report(AuditReportB)),
            task(AgentRole::AiB, TemplateId::AuditConsolidator, ConsolidationB)
                .with_input("own_report", report(AuditReportB))
                .with_input("other_report", report(AuditReportA)),
        ],
        WorkflowState::CrossAudit => vec![
            task(AgentRole::AiA, TemplateId::CrossAuditor, CrossAuditAOnB)
                .with_input("peer_consolidation", report(ConsolidationB))
                .with_input("own_consolidation", report(ConsolidationA)),
            task(AgentRole::AiB, TemplateId::CrossAuditor, CrossAuditBOnA)
                .with_input("peer_consolidation", report(ConsolidationA))
                .with_input("own_consolidation", report(ConsolidationB)),
        ],
        WorkflowState::FinalArbitration => vec![task(
            AgentRole::Arbitrator,
            TemplateId::FinalConsolidator,
            DefinitiveFixes,
        )
        .with_input("consolidation_a", report(ConsolidationA))
        .with_input("consolidation_b", report(ConsolidationB))
        .with_input("cross_audit_a_on_b", report(CrossAuditAOnB))
        .with_input("cross_audit_b_on_a", report(CrossAuditBOnA))
        .with_input("audit_report_a", report(AuditReportA))
        .with_input("audit_report_b", report(AuditReportB))],
        WorkflowState::Init | WorkflowState::Done | WorkflowState::Failed => Vec::new(),
    }
}
