//! Workflow State Machine: explicit phases and legal transition guards.
//!
//! The coordinator calls `advance()` to move from one phase to the next.
//! Each call validates the edge and records it, so the manifest can replay
//! exactly how far a run got and why it stopped.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// The phases of a cross-audit run.
///
/// Every run starts at `Init` and terminates at either `Done` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Inputs loaded, nothing dispatched yet.
    Init,
    /// Both auditors analyse the bug independently.
    IndependentAudit,
    /// Each auditor reconciles its own audit with the other's.
    Consolidation,
    /// Each auditor critiques the other's consolidation.
    CrossAudit,
    /// The arbitrator produces the definitive fix list.
    FinalArbitration,
    /// All artifacts written. Terminal.
    Done,
    /// A required task failed or the run was cancelled. Terminal.
    Failed,
}

impl WorkflowState {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "Init"),
            Self::IndependentAudit => write!(f, "IndependentAudit"),
            Self::Consolidation => write!(f, "Consolidation"),
            Self::CrossAudit => write!(f, "CrossAudit"),
            Self::FinalArbitration => write!(f, "FinalArbitration"),
            Self::Done => write!(f, "Done"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Legal transitions between workflow states.
///
/// ```text
/// Init → IndependentAudit | Failed
/// IndependentAudit → Consolidation | Failed
/// Consolidation → CrossAudit | Failed
/// CrossAudit → FinalArbitration | Failed
/// FinalArbitration → Done | Failed
/// ```
fn is_legal_transition(from: WorkflowState, to: WorkflowState) -> bool {
    use WorkflowState::*;

    // Any non-terminal state can transition to Failed.
    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Init, IndependentAudit)
            | (IndependentAudit, Consolidation)
            | (Consolidation, CrossAudit)
            | (CrossAudit, FinalArbitration)
            | (FinalArbitration, Done)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: WorkflowState,
    pub to: WorkflowState,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: WorkflowState,
    pub to: WorkflowState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Tracks the current phase and the full transition log.
pub struct StateMachine {
    current: WorkflowState,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: WorkflowState::Init,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> WorkflowState {
        self.current
    }

    /// Attempt to advance to the next state.
    pub fn advance(
        &mut self,
        to: WorkflowState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(from = %self.current, to = %to, reason, "State transition");

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    /// Transition to `Failed` from any non-terminal state.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(WorkflowState::Failed, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// One-line history, e.g. for the final log line.
    pub fn summary(&self) -> String {
        let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        let mut out = format!(
            "{} → {} ({}ms, {} transitions)",
            WorkflowState::Init,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        );
        if !states.is_empty() {
            out.push_str(&format!(" [{}]", states.join(" → ")));
        }
        out
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(state: WorkflowState) -> StateMachine {
        StateMachine {
            current: state,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    #[test]
    fn test_initial_state() {
        let sm = StateMachine::new();
        assert_eq!(sm.current(), WorkflowState::Init);
        assert!(!sm.is_terminal());
        assert!(sm.transitions().is_empty());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut sm = StateMachine::new();
        sm.advance(WorkflowState::IndependentAudit, None).unwrap();
        sm.advance(WorkflowState::Consolidation, Some("both audits in"))
            .unwrap();
        sm.advance(WorkflowState::CrossAudit, None).unwrap();
        sm.advance(WorkflowState::FinalArbitration, None).unwrap();
        sm.advance(WorkflowState::Done, None).unwrap();

        assert!(sm.is_terminal());
        assert_eq!(sm.transitions().len(), 5);
    }

    #[test]
    fn test_failure_from_any_state() {
        for state in [
            WorkflowState::Init,
            WorkflowState::IndependentAudit,
            WorkflowState::Consolidation,
            WorkflowState::CrossAudit,
            WorkflowState::FinalArbitration,
        ] {
            let mut sm = at(state);
            assert!(sm.fail("test failure").is_ok());
            assert_eq!(sm.current(), WorkflowState::Failed);
            assert!(sm.is_terminal());
        }
    }

    #[test]
    fn test_cannot_transition_from_terminal() {
        let mut sm = at(WorkflowState::Done);
        let err = sm.advance(WorkflowState::CrossAudit, None).unwrap_err();
        assert_eq!(err.from, WorkflowState::Done);
        assert_eq!(err.to, WorkflowState::CrossAudit);
        assert!(sm.fail("nope").is_err());

        let mut failed = at(WorkflowState::Failed);
        assert!(failed.fail("again").is_err());
    }

    #[test]
    fn test_illegal_skip_transition() {
        let mut sm = StateMachine::new();
        sm.advance(WorkflowState::IndependentAudit, None).unwrap();

        // Consolidation can't be skipped
        let err = sm.advance(WorkflowState::CrossAudit, None).unwrap_err();
        assert_eq!(err.from, WorkflowState::IndependentAudit);
        assert!(sm.advance(WorkflowState::Init, None).is_err());
    }

    #[test]
    fn test_failure_reason_recorded() {
        let mut sm = StateMachine::new();
        sm.advance(WorkflowState::IndependentAudit, None).unwrap();
        sm.fail("AI_A exhausted retries").unwrap();

        let record = sm.transitions().last().unwrap();
        assert_eq!(record.from, WorkflowState::IndependentAudit);
        assert_eq!(record.reason.as_deref(), Some("AI_A exhausted retries"));
    }

    #[test]
    fn test_transition_record_serde() {
        let record = TransitionRecord {
            from: WorkflowState::CrossAudit,
            to: WorkflowState::FinalArbitration,
            elapsed_ms: 12345,
            reason: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"cross_audit\""));
        assert!(!json.contains("reason"));
        let restored: TransitionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.to, WorkflowState::FinalArbitration);
    }

    #[test]
    fn test_summary() {
        let mut sm = StateMachine::new();
        sm.advance(WorkflowState::IndependentAudit, None).unwrap();
        sm.fail("cancelled").unwrap();
        let summary = sm.summary();
        assert!(summary.contains("Failed"));
        assert!(summary.contains("2 transitions"));
    }
}
