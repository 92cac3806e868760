//! End-to-end runs of the four-phase pipeline against scripted providers.
//!
//! No network: each role gets a `ScriptedProvider` that replays queued
//! replies and records every call, so ordering and failure handling can be
//! checked on virtual time.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use audit_agents::config::{Config, EnvMode};
use audit_agents::errors::{ConfigError, ProviderError};
use audit_agents::providers::{ProviderClient, ProviderResponse};
use audit_agents::{
    AgentRole, AgentRunner, CrossAuditCoordinator, PromptSet, RetryController, RunInputs,
    WorkflowOutcome, WorkflowState,
};
use coordination::{
    ArtifactKind, ArtifactNames, CodebaseSnapshot, ReportWriter, RetryPolicy, RunDirectory,
    SourceFile, TokenBudget,
};
use tokio_util::sync::CancellationToken;

const FIXES: &str = "## Fix #1
**Filename:** app/divide.py
**Broken Code:**
```python
return a / b
```
**Fixed Code:**
```python
if b == 0:
    raise ValueError(\"b must be non-zero\")
return a / b
```
**Rationale:** Both audits traced the crash to an unchecked zero divisor.
";

/// Shared, ordered log of call starts and ends across all providers.
type EventLog = Arc<Mutex<Vec<String>>>;

struct ScriptedProvider {
    name: &'static str,
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    /// Virtual-time delay before answering the nth call (1-based).
    delays: Vec<(u32, Duration)>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicU32,
    events: EventLog,
}

impl ScriptedProvider {
    fn new(name: &'static str, events: &EventLog) -> Self {
        Self {
            name,
            replies: Mutex::new(VecDeque::new()),
            delays: Vec::new(),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
            events: events.clone(),
        }
    }

    fn reply(self, text: &str) -> Self {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    fn fail_always(self) -> Self {
        for _ in 0..16 {
            self.replies.lock().unwrap().push_back(Err(ProviderError::Transient {
                provider: self.name.into(),
                message: "HTTP 503: overloaded".into(),
            }));
        }
        self
    }

    fn delay_call(mut self, call: u32, delay: Duration) -> Self {
        self.delays.push((call, delay));
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn prompt(&self, index: usize) -> String {
        self.prompts.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn send(&self, prompt: &str) -> Result<ProviderResponse, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.events.lock().unwrap().push(format!("start:{}:{n}", self.name));

        if let Some((_, delay)) = self.delays.iter().find(|(call, _)| *call == n) {
            tokio::time::sleep(*delay).await;
        }

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("{} reply {n}", self.name)));
        self.events.lock().unwrap().push(format!("end:{}:{n}", self.name));
        reply.map(|text| ProviderResponse { text, usage: None })
    }
}

fn runner(provider: Arc<ScriptedProvider>, cancel: &CancellationToken) -> AgentRunner {
    AgentRunner::new(
        provider,
        RetryController::new(
            RetryPolicy::fixed(3, Duration::from_secs(1)),
            Duration::from_secs(120),
            cancel.clone(),
        ),
        TokenBudget::new(100_000),
        Arc::new(PromptSet::defaults().unwrap()),
    )
}

fn inputs() -> RunInputs {
    let snapshot = CodebaseSnapshot::from_files([
        SourceFile::new("app/divide.py", "def divide(a, b):\n    return a / b\n"),
        SourceFile::new("app/main.py", "from app.divide import divide\nprint(divide(1, 0))\n"),
    ])
    .unwrap();
    RunInputs::new(
        "ZeroDivisionError: division by zero in app/divide.py line 2",
        snapshot,
    )
}

async fn run_pipeline(
    root: &Path,
    a: &Arc<ScriptedProvider>,
    b: &Arc<ScriptedProvider>,
    arbitrator: &Arc<ScriptedProvider>,
    cancel: CancellationToken,
) -> (WorkflowOutcome, ReportWriter) {
    let coordinator = CrossAuditCoordinator::new(
        runner(a.clone(), &cancel),
        runner(b.clone(), &cancel),
        runner(arbitrator.clone(), &cancel),
        cancel,
    );
    let run = RunDirectory::allocate(root).unwrap();
    let mut writer = ReportWriter::new(run, ArtifactNames::default());
    let outcome = coordinator.run(&inputs(), &mut writer).await;
    (outcome, writer)
}

/// Value following `label` on the same line, or the next non-empty line.
fn field_after<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    let mut lines = text.lines().skip_while(|l| !l.contains(label));
    let first = lines.next()?;
    let inline = first.split_once(label)?.1.trim_start_matches('*').trim();
    if !inline.is_empty() {
        return Some(inline);
    }
    lines.map(str::trim).find(|l| !l.is_empty())
}

#[tokio::test(start_paused = true)]
async fn full_pipeline_writes_all_artifacts() {
    let tmp = tempfile::tempdir().unwrap();
    let events = EventLog::default();
    let a = Arc::new(
        ScriptedProvider::new("alpha", &events)
            .reply("alpha audit: unchecked divisor")
            .reply("alpha consolidation")
            .reply("alpha cross audit"),
    );
    let b = Arc::new(
        ScriptedProvider::new("beta", &events)
            .reply("beta audit: main passes zero")
            .reply("beta consolidation")
            .reply("beta cross audit"),
    );
    let arbitrator = Arc::new(ScriptedProvider::new("gamma", &events).reply(FIXES));

    let (outcome, writer) = run_pipeline(tmp.path(), &a, &b, &arbitrator, CancellationToken::new()).await;

    assert!(outcome.succeeded(), "run failed: {:?}", outcome.error);
    assert_eq!(outcome.final_state, WorkflowState::Done);
    assert_eq!(outcome.artifacts.len(), 7);
    for kind in ArtifactKind::ALL {
        assert!(writer.exists(kind), "{kind} missing");
    }
    assert_eq!((a.calls(), b.calls(), arbitrator.calls()), (3, 3, 1));

    // Consolidation sees both audits, each side its own first.
    let a_consolidation = a.prompt(1);
    assert!(a_consolidation.contains("alpha audit: unchecked divisor"));
    assert!(a_consolidation.contains("beta audit: main passes zero"));
    // Cross audit reviews the peer's consolidation.
    assert!(a.prompt(2).contains("beta consolidation"));
    assert!(b.prompt(2).contains("alpha consolidation"));
    // The arbitrator receives every report.
    let final_prompt = arbitrator.prompt(0);
    for text in [
        "alpha consolidation",
        "beta consolidation",
        "alpha cross audit",
        "beta cross audit",
    ] {
        assert!(final_prompt.contains(text), "final prompt lacks {text}");
    }

    let fixes = std::fs::read_to_string(writer.path_for(ArtifactKind::DefinitiveFixes)).unwrap();
    assert!(fixes.contains("Fix #1"));
    for label in ["Filename:", "Broken Code:", "Fixed Code:", "Rationale:"] {
        assert!(
            field_after(&fixes, label).is_some_and(|v| !v.is_empty()),
            "{label} is empty"
        );
    }
    assert_eq!(outcome.definitive_fixes.as_deref(), Some(FIXES));

    let manifest = std::fs::read_to_string(outcome.run_dir.join("run.json")).unwrap();
    let manifest: serde_json::Value = serde_json::from_str(&manifest).unwrap();
    assert_eq!(manifest["final_state"], "done");
    assert_eq!(manifest["tasks"].as_array().unwrap().len(), 7);
}

#[tokio::test(start_paused = true)]
async fn audit_failure_keeps_surviving_report() {
    let tmp = tempfile::tempdir().unwrap();
    let events = EventLog::default();
    let a = Arc::new(ScriptedProvider::new("alpha", &events).fail_always());
    let b = Arc::new(ScriptedProvider::new("beta", &events).reply("beta audit"));
    let arbitrator = Arc::new(ScriptedProvider::new("gamma", &events));

    let (outcome, writer) = run_pipeline(tmp.path(), &a, &b, &arbitrator, CancellationToken::new()).await;

    assert_eq!(outcome.final_state, WorkflowState::Failed);
    assert_eq!(outcome.failed_phase(), Some(WorkflowState::IndependentAudit));
    assert_eq!(
        outcome.error.as_ref().unwrap().failed_roles(),
        vec![AgentRole::AiA]
    );
    assert_eq!(a.calls(), 3);
    assert_eq!(b.calls(), 1);
    assert_eq!(arbitrator.calls(), 0);

    assert!(writer.exists(ArtifactKind::AuditReportB));
    assert!(!writer.exists(ArtifactKind::AuditReportA));
    assert!(!writer.exists(ArtifactKind::ConsolidationA));
    assert!(!writer.exists(ArtifactKind::ConsolidationB));
    assert_eq!(outcome.artifacts, vec![writer.path_for(ArtifactKind::AuditReportB)]);

    let manifest = std::fs::read_to_string(outcome.run_dir.join("run.json")).unwrap();
    let manifest: serde_json::Value = serde_json::from_str(&manifest).unwrap();
    assert_eq!(manifest["final_state"], "failed");
    assert_eq!(manifest["failed_phase"], "independent_audit");
}

#[tokio::test(start_paused = true)]
async fn consolidation_waits_for_slow_audit() {
    let tmp = tempfile::tempdir().unwrap();
    let events = EventLog::default();
    let a = Arc::new(ScriptedProvider::new("alpha", &events).delay_call(1, Duration::from_secs(30)));
    let b = Arc::new(ScriptedProvider::new("beta", &events));
    let arbitrator = Arc::new(ScriptedProvider::new("gamma", &events));

    let (outcome, _) = run_pipeline(tmp.path(), &a, &b, &arbitrator, CancellationToken::new()).await;
    assert!(outcome.succeeded());

    let log = events.lock().unwrap().clone();
    let pos = |event: &str| {
        log.iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("{event} not logged: {log:?}"))
    };
    // Both audits start before either finishes.
    assert!(pos("start:beta:1") < pos("end:alpha:1"));
    // No consolidation call before the slow audit is done.
    assert!(pos("end:alpha:1") < pos("start:beta:2"));
    assert!(pos("end:alpha:1") < pos("start:alpha:2"));
    // Same barrier before arbitration.
    assert!(pos("end:alpha:3") < pos("start:gamma:1"));
    assert!(pos("end:beta:3") < pos("start:gamma:1"));
}

#[tokio::test(start_paused = true)]
async fn cancellation_fails_run_and_keeps_manifest() {
    let tmp = tempfile::tempdir().unwrap();
    let events = EventLog::default();
    let a = Arc::new(ScriptedProvider::new("alpha", &events).delay_call(1, Duration::from_secs(60)));
    let b = Arc::new(ScriptedProvider::new("beta", &events));
    let arbitrator = Arc::new(ScriptedProvider::new("gamma", &events));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let (outcome, writer) = run_pipeline(tmp.path(), &a, &b, &arbitrator, cancel).await;

    assert_eq!(outcome.final_state, WorkflowState::Failed);
    assert!(outcome.error.as_ref().unwrap().was_cancelled());
    assert_eq!(outcome.manifest.failure.as_deref(), Some("cancelled"));
    // The fast audit finished before the interrupt and stays on disk.
    assert!(writer.exists(ArtifactKind::AuditReportB));
    assert!(outcome.run_dir.join("run.json").is_file());
}

#[test]
fn unset_api_key_stops_before_run_setup() {
    let tmp = tempfile::tempdir().unwrap();
    let config_path = tmp.path().join("config.yaml");
    std::fs::write(
        &config_path,
        r#"
apis:
  openai:
    api_key: ${OPENAI_API_KEY}
    model: gpt-4o
    temperature: 0.2
    max_tokens: 4000
  anthropic:
    api_key: ${ANTHROPIC_API_KEY}
    model: claude-sonnet-4-20250514
    temperature: 0.2
    max_tokens: 4000
workflow:
  ai_a: openai
  ai_b: anthropic
  final_arbitrator: anthropic
paths:
  results_root: results
"#,
    )
    .unwrap();

    let only_openai = |var: &str| (var == "OPENAI_API_KEY").then(|| "sk-test".to_string());
    let err = Config::load_with_env(&config_path, EnvMode::Strict, only_openai).unwrap_err();
    assert!(matches!(
        &err,
        ConfigError::MissingEnvVar { var } if var == "ANTHROPIC_API_KEY"
    ));

    // With both keys the same file yields a runnable coordinator.
    let both = |_: &str| Some("sk-test".to_string());
    let config = Config::load_with_env(&config_path, EnvMode::Strict, both).unwrap();
    let prompts = Arc::new(PromptSet::defaults().unwrap());
    CrossAuditCoordinator::from_config(&config, prompts, CancellationToken::new()).unwrap();

    // Loading is side-effect free: no run directory exists until one is allocated.
    assert_eq!(config.paths.results_root, tmp.path().join("results"));
    assert!(!config.paths.results_root.exists());
}
