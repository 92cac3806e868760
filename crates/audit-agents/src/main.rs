//! `audit-agents`: cross-validated bug investigation with several LLMs.
//!
//! Two models audit the bug independently, consolidate, review each other,
//! and an arbitrator writes the definitive fixes. Every run gets its own
//! `bugNNNN_results/` folder.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use audit_agents::config::{Config, EnvMode, DEFAULT_CONFIG_FILE};
use audit_agents::{connectivity, logging, setup};
use audit_agents::{CrossAuditCoordinator, PromptSet, RunInputs, WorkflowOutcome};
use clap::Parser;
use coordination::{
    snapshot_from_paths, validate_content, CodebaseSnapshot, FileWalker, ReportWriter, RoleTarget,
    RunDirectory,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const EXAMPLES: &str = "Examples:
  audit-agents --setup                          scaffold codebase/, prompts/, bug.txt, config.yaml
  audit-agents --test-connections               probe every configured provider
  audit-agents                                  bug.txt + codebase/ from config.yaml
  audit-agents --bug crash.txt --codebase src/  custom inputs
  audit-agents --files src/main.py src/util.py  explicit file list
  audit-agents --validate-only                  size check, no API calls

Each run writes bug####_results/ with all reports and run.json.";

#[derive(Parser, Debug)]
#[command(
    name = "audit-agents",
    version,
    about = "Multi-model cross-audit bug investigation",
    after_help = EXAMPLES
)]
struct Cli {
    /// Configuration file (.yaml, .yml, .json or .toml)
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Create the project structure (codebase/, prompts/, bug.txt, config.yaml)
    #[arg(long)]
    setup: bool,

    /// Probe every configured provider once and exit
    #[arg(long)]
    test_connections: bool,

    /// Bug description file (default: paths.bug_file)
    #[arg(long)]
    bug: Option<PathBuf>,

    /// Codebase folder to analyze (default: paths.codebase_folder)
    #[arg(long, conflicts_with = "files")]
    codebase: Option<PathBuf>,

    /// Specific files to analyze instead of a folder
    #[arg(long, num_args = 1..)]
    files: Vec<PathBuf>,

    /// Only report content sizes against each provider's limit
    #[arg(long)]
    validate_only: bool,

    /// Print only the final fixes, no progress output
    #[arg(long)]
    output_only: bool,
}

/// Progress output on stdout, silenced by `--output-only`.
struct Console {
    quiet: bool,
}

impl Console {
    fn say(&self, line: impl AsRef<str>) {
        if !self.quiet {
            println!("{}", line.as_ref());
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.output_only);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let console = Console {
        quiet: cli.output_only,
    };

    if cli.setup {
        return cmd_setup(&console);
    }

    load_env_file(&cli.config);
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    if cli.test_connections {
        return cmd_test_connections(&cli.config, cancel).await;
    }

    let config = Config::load(&cli.config, EnvMode::Strict)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    let bug_file = cli.bug.clone().unwrap_or_else(|| config.paths.bug_file.clone());
    if !bug_file.is_file() {
        bail!(
            "bug file '{}' not found (run with --setup to create the project structure)",
            bug_file.display()
        );
    }
    let bug_report = std::fs::read_to_string(&bug_file)
        .with_context(|| format!("failed to read {}", bug_file.display()))?;

    let snapshot = load_snapshot(&cli, &config, &console)?;

    report_sizes(&config, &bug_report, &snapshot, &console);
    if cli.validate_only {
        console.say("\nValidation complete. Content is ready for analysis.");
        return Ok(ExitCode::SUCCESS);
    }

    let prompts = PromptSet::load(&config.paths.prompts_folder, &config.prompts)
        .context("failed to load prompt templates")?;
    let coordinator = CrossAuditCoordinator::from_config(&config, Arc::new(prompts), cancel)?;

    let run_dir = RunDirectory::allocate(&config.paths.results_root)?;
    run_dir.copy_bug_file(&bug_file)?;
    console.say(format!(
        "\nStarting cross-audit run #{} in {}",
        run_dir.run_id(),
        run_dir.path().display()
    ));

    let mut writer = ReportWriter::new(run_dir, config.output.clone());
    let inputs = RunInputs::new(bug_report, snapshot);
    let outcome = coordinator.run(&inputs, &mut writer).await;

    Ok(report_outcome(&outcome, &console))
}

fn cmd_setup(console: &Console) -> Result<ExitCode> {
    let root = std::env::current_dir().context("cannot determine the current directory")?;
    let created = setup::scaffold(&root)?;

    console.say("Setting up project structure...");
    for path in &created {
        let shown = path.strip_prefix(&root).unwrap_or(path);
        console.say(format!("   - Created '{}'", shown.display()));
    }
    console.say("Project structure ready!");
    console.say("Next steps:");
    console.say("   1. Edit 'bug.txt' with your bug description");
    console.say("   2. Put your code files in the 'codebase/' folder");
    console.say("   3. Set OPENAI_API_KEY / ANTHROPIC_API_KEY (or a .env file)");
    console.say("   4. Run: audit-agents");
    console.say("   5. Results are saved in auto-numbered 'bug####_results/' folders");
    Ok(ExitCode::SUCCESS)
}

async fn cmd_test_connections(config_path: &Path, cancel: CancellationToken) -> Result<ExitCode> {
    let config = Config::load(config_path, EnvMode::Lenient)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    println!("Testing API connections...");
    let results = connectivity::test_connections(&config, cancel).await;
    for result in &results {
        println!("   {result}");
    }
    let passed = results.iter().filter(|r| r.passed()).count();
    println!("{passed}/{} providers connected", results.len());

    Ok(if passed == results.len() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn load_snapshot(cli: &Cli, config: &Config, console: &Console) -> Result<CodebaseSnapshot> {
    if !cli.files.is_empty() {
        let snapshot = snapshot_from_paths(&cli.files)?;
        console.say(format!("Using specific files: {} files", snapshot.len()));
        return Ok(snapshot);
    }

    let root = cli
        .codebase
        .clone()
        .unwrap_or_else(|| config.paths.codebase_folder.clone());
    let snapshot = FileWalker::new(&root, &config.paths.supported_extensions)
        .snapshot()
        .with_context(|| format!("failed to read codebase folder {}", root.display()))?;
    if snapshot.is_empty() {
        bail!(
            "no supported code files found in '{}' (supported extensions: {})",
            root.display(),
            config.paths.supported_extensions.join(", ")
        );
    }
    console.say(format!(
        "Using codebase folder: {} ({} files)",
        root.display(),
        snapshot.len()
    ));
    Ok(snapshot)
}

fn report_sizes(config: &Config, bug_report: &str, snapshot: &CodebaseSnapshot, console: &Console) {
    let roles = [
        ("AI_A", &config.workflow.ai_a),
        ("AI_B", &config.workflow.ai_b),
        ("arbitrator", &config.workflow.final_arbitrator),
    ];
    let targets: Vec<RoleTarget<'_>> = roles
        .iter()
        .filter_map(|(role, name)| {
            let provider = config.provider(name)?;
            Some(RoleTarget {
                role,
                provider: &provider.name,
                model: &provider.model,
                budget: provider.budget,
            })
        })
        .collect();
    let report = validate_content(bug_report, &snapshot.render(), &targets);

    console.say("Content analysis:");
    console.say(format!("   - Bug description: {} chars", report.bug_report_chars));
    console.say(format!("   - Codebase: {} chars", report.codebase_chars));
    for role in &report.roles {
        let status = if role.fits { "FITS" } else { "TOO LARGE" };
        console.say(format!(
            "   - {} ({} / {}): {}/{} tokens {}",
            role.role, role.provider, role.model, role.estimated_tokens, role.safe_limit, status
        ));
    }
    if !report.all_fit() {
        console.say("Content too large for some providers; it will be split into chunks.");
    }
}

fn report_outcome(outcome: &WorkflowOutcome, console: &Console) -> ExitCode {
    if outcome.succeeded() {
        let fixes = outcome.definitive_fixes.as_deref().unwrap_or_default();
        if console.quiet {
            println!("{fixes}");
        } else {
            console.say(format!("\nResults saved to: {}", outcome.run_dir.display()));
            console.say(format!("\n{}", "=".repeat(60)));
            console.say("DEFINITIVE BUG FIXES");
            console.say("=".repeat(60));
            console.say(fixes);
        }
        info!(run_id = outcome.run_id, "Run complete");
        return ExitCode::SUCCESS;
    }

    let phase = outcome
        .failed_phase()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "unknown".into());
    eprintln!("Run #{} failed during {phase}", outcome.run_id);
    if let Some(err) = &outcome.error {
        eprintln!("   {err}");
        let roles: Vec<String> = err.failed_roles().iter().map(|r| r.to_string()).collect();
        if !roles.is_empty() {
            eprintln!("   Failed roles: {}", roles.join(", "));
        }
    }
    if outcome.artifacts.is_empty() {
        eprintln!("No artifacts were produced.");
    } else {
        eprintln!("Artifacts kept in {}:", outcome.run_dir.display());
        for path in &outcome.artifacts {
            eprintln!("   - {}", path.display());
        }
    }
    ExitCode::FAILURE
}

/// `.env` next to the config file first, then the working directory.
fn load_env_file(config_path: &Path) {
    if let Some(dir) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let env_path = dir.join(".env");
        if env_path.exists() {
            dotenv::from_path(&env_path).ok();
        }
    }
    dotenv::dotenv().ok();
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, cancelling in-flight requests");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Could not install Ctrl-C handler"),
        }
    });
}
