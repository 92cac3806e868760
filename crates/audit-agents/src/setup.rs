//! Project scaffolding for `--setup`.
//!
//! Creates whatever is missing of the default layout and never overwrites
//! an existing file.

use std::fs;
use std::path::{Path, PathBuf};

use coordination::{Error, Result};
use tracing::info;

use crate::config::{PathsConfig, PromptFiles, DEFAULT_CONFIG_FILE};
use crate::prompts::TemplateId;

pub const SAMPLE_BUG: &str = "PROBLEM: Describe your issue here

STACK TRACE:
Paste your error/stack trace here

DESCRIPTION:
Provide detailed description of:
- What you were trying to do
- What happened instead
- Steps to reproduce
- Expected behavior

ENVIRONMENT:
- Programming language and version
- Framework versions
- Operating system
- Other relevant details
";

pub const SAMPLE_CONFIG: &str = r#"# API keys are read from the environment (or a .env file next to this one).
apis:
  openai:
    api_key: ${OPENAI_API_KEY}
    base_url: https://api.openai.com
    model: o3
    temperature: 1.0
    max_tokens: 8000
    timeout_secs: 120
  anthropic:
    api_key: ${ANTHROPIC_API_KEY}
    base_url: https://api.anthropic.com
    model: claude-sonnet-4-20250514
    temperature: 0.2
    max_tokens: 8000
    retry_strategy:
      attempts: 3
      backoff_type: exponential
      initial_delay: 1.0
      multiplier: 2.0

workflow:
  ai_a: openai
  ai_b: anthropic
  final_arbitrator: anthropic
  retry_attempts: 3
  retry_delay: 1.0

paths:
  bug_file: bug.txt
  codebase_folder: codebase
  prompts_folder: prompts
  results_root: .
  supported_extensions: [.py, .js, .java, .cpp, .c, .h, .cs, .php, .rb, .go, .rs, .ts, .jsx, .tsx]
"#;

/// Scaffold the default layout under `root`. Returns what was created.
pub fn scaffold(root: &Path) -> Result<Vec<PathBuf>> {
    let paths = PathsConfig::default();
    let mut created = Vec::new();

    for dir in [&paths.codebase_folder, &paths.prompts_folder] {
        let dir = root.join(dir);
        if !dir.is_dir() {
            fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
            created.push(dir);
        }
    }

    let files = PromptFiles::default();
    let prompts_dir = root.join(&paths.prompts_folder);
    for id in TemplateId::USER_TEMPLATES {
        if let Some(name) = id.filename(&files) {
            write_if_missing(&prompts_dir.join(name), id.default_source(), &mut created)?;
        }
    }

    write_if_missing(&root.join(&paths.bug_file), SAMPLE_BUG, &mut created)?;
    write_if_missing(&root.join(DEFAULT_CONFIG_FILE), SAMPLE_CONFIG, &mut created)?;

    for path in &created {
        info!(path = %path.display(), "Created");
    }
    Ok(created)
}

fn write_if_missing(path: &Path, content: &str, created: &mut Vec<PathBuf>) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    fs::write(path, content).map_err(|e| Error::io(path, e))?;
    created.push(path.to_path_buf());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, EnvMode};
    use crate::prompts::PromptSet;

    #[test]
    fn test_scaffold_creates_loadable_project() {
        let dir = tempfile::tempdir().unwrap();
        let created = scaffold(dir.path()).unwrap();
        // two folders, four templates, bug.txt, config.yaml
        assert_eq!(created.len(), 8);

        let config = Config::load_with_env(
            &dir.path().join(DEFAULT_CONFIG_FILE),
            EnvMode::Strict,
            |_| Some("sk-test".to_string()),
        )
        .unwrap();
        assert_eq!(config.workflow.ai_a, "openai");
        assert_eq!(config.paths.codebase_folder, dir.path().join("codebase"));

        PromptSet::load(&config.paths.prompts_folder, &config.prompts).unwrap();
    }

    #[test]
    fn test_scaffold_keeps_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bug.txt"), "my real bug").unwrap();

        let created = scaffold(dir.path()).unwrap();
        assert!(!created.contains(&dir.path().join("bug.txt")));
        assert_eq!(
            fs::read_to_string(dir.path().join("bug.txt")).unwrap(),
            "my real bug"
        );

        assert!(scaffold(dir.path()).unwrap().is_empty());
    }
}
