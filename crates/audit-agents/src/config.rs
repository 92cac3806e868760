//! Pipeline configuration: providers, role assignment, paths, prompt and
//! output filenames.
//!
//! Loading is two-stage. The file is parsed into a format-neutral JSON tree,
//! `${VAR}` placeholders are substituted from the environment, and only then
//! is the typed, validated `Config` built. The result is immutable and handed
//! to every component's constructor.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use coordination::{ArtifactNames, BackoffType, RetryPolicy, TokenBudget};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Per-call wall-clock timeout when a provider doesn't set one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_EXTENSIONS: &[&str] = &[
    ".py", ".js", ".java", ".cpp", ".c", ".h", ".cs", ".php", ".rb", ".go", ".rs", ".ts", ".jsx",
    ".tsx",
];

static ENV_PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("ENV_PLACEHOLDER_RE regex should compile")
});

// ── Provider settings ──────────────────────────────────────────────────

/// Wire dialect spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Openai,
    Anthropic,
}

impl ProviderKind {
    /// Guess the dialect from the provider's key in `apis`.
    pub fn infer(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.contains("anthropic") || name.contains("claude") {
            Some(Self::Anthropic)
        } else if name.contains("openai") || name.contains("gpt") {
            Some(Self::Openai)
        } else {
            None
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Openai => "https://api.openai.com",
            Self::Anthropic => "https://api.anthropic.com",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Openai => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// Per-provider override of the workflow retry defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryStrategy {
    pub attempts: Option<u32>,
    #[serde(default)]
    pub backoff_type: BackoffType,
    /// Seconds.
    pub initial_delay: Option<f64>,
    pub multiplier: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawProvider {
    kind: Option<ProviderKind>,
    #[serde(default)]
    api_key: String,
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    timeout_secs: Option<u64>,
    context_window: Option<usize>,
    retry_strategy: Option<RetryStrategy>,
}

/// Fully resolved settings for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    /// Key under `apis`.
    pub name: String,
    pub kind: ProviderKind,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub budget: TokenBudget,
    pub retry: RetryPolicy,
}

impl ProviderConfig {
    /// Whether the key is absent or still the scaffolded placeholder.
    pub fn has_placeholder_key(&self) -> bool {
        let key = self.api_key.trim();
        key.is_empty()
            || key.starts_with("${")
            || key == format!("your_{}_api_key_here", self.name)
    }
}

// ── Workflow, paths, prompts ───────────────────────────────────────────

fn default_retry_attempts() -> u32 {
    coordination::resilience::DEFAULT_ATTEMPTS
}

fn default_retry_delay() -> f64 {
    coordination::resilience::DEFAULT_INITIAL_DELAY_SECS
}

#[derive(Debug, Clone, Deserialize)]
struct RawWorkflow {
    ai_a: String,
    ai_b: String,
    final_arbitrator: String,
    #[serde(default = "default_retry_attempts")]
    retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    retry_delay: f64,
}

/// Which provider plays which role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRoles {
    pub ai_a: String,
    pub ai_b: String,
    pub final_arbitrator: String,
}

/// Input and output locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub bug_file: PathBuf,
    pub codebase_folder: PathBuf,
    pub prompts_folder: PathBuf,
    /// Directory under which `bugNNNN_results` folders are created.
    pub results_root: PathBuf,
    pub supported_extensions: Vec<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            bug_file: PathBuf::from("bug.txt"),
            codebase_folder: PathBuf::from("codebase"),
            prompts_folder: PathBuf::from("prompts"),
            results_root: PathBuf::from("."),
            supported_extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Template filenames inside the prompts folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptFiles {
    pub bug_slayer: String,
    pub audit_consolidator: String,
    pub cross_auditor: String,
    pub final_consolidator: String,
}

impl Default for PromptFiles {
    fn default() -> Self {
        Self {
            bug_slayer: "bug_slayer_prompt.txt".into(),
            audit_consolidator: "audit_consolidator_prompt.txt".into(),
            cross_auditor: "cross_auditor_prompt.txt".into(),
            final_consolidator: "final_consolidator_prompt.txt".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    apis: BTreeMap<String, RawProvider>,
    workflow: RawWorkflow,
    #[serde(default)]
    paths: PathsConfig,
    #[serde(default)]
    prompts: PromptFiles,
    #[serde(default)]
    output: BTreeMap<String, String>,
}

// ── Top-level config ───────────────────────────────────────────────────

/// How unset `${VAR}` placeholders are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvMode {
    /// Any unset variable is a `ConfigError`.
    Strict,
    /// Unset variables become empty strings (connection checks skip them).
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "json" => Some(Self::Json),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }
}

/// Immutable, validated pipeline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub providers: BTreeMap<String, ProviderConfig>,
    pub workflow: WorkflowRoles,
    pub paths: PathsConfig,
    pub prompts: PromptFiles,
    pub output: ArtifactNames,
}

impl Config {
    /// Load from a file, resolving placeholders from the process environment.
    pub fn load(path: &Path, mode: EnvMode) -> Result<Self, ConfigError> {
        Self::load_with_env(path, mode, |var| std::env::var(var).ok())
    }

    /// Load with an explicit environment lookup.
    pub fn load_with_env<F>(path: &Path, mode: EnvMode, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if !path.is_file() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| ConfigError::UnsupportedFormat(path.to_path_buf()))?;
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut tree = parse_tree(&text, format).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        substitute_env(&mut tree, &lookup, mode)?;

        let raw: RawConfig =
            serde_json::from_value(tree).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        let mut config = Self::from_raw(raw)?;

        // Relative paths are taken from the config file's directory.
        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            config.paths.rebase(base);
        }
        Ok(config)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        if raw.workflow.retry_attempts < 1 {
            return Err(ConfigError::Invalid(
                "workflow.retry_attempts must be at least 1".into(),
            ));
        }
        if !(raw.workflow.retry_delay.is_finite() && raw.workflow.retry_delay >= 0.0) {
            return Err(ConfigError::Invalid(
                "workflow.retry_delay must be a non-negative number of seconds".into(),
            ));
        }
        let workflow_policy = RetryPolicy::exponential(
            raw.workflow.retry_attempts,
            Duration::from_secs_f64(raw.workflow.retry_delay),
            coordination::resilience::DEFAULT_MULTIPLIER,
        );

        let mut providers = BTreeMap::new();
        for (name, settings) in raw.apis {
            let provider = resolve_provider(&name, settings, workflow_policy)?;
            providers.insert(name, provider);
        }

        let workflow = WorkflowRoles {
            ai_a: raw.workflow.ai_a,
            ai_b: raw.workflow.ai_b,
            final_arbitrator: raw.workflow.final_arbitrator,
        };
        for (role, provider) in [
            ("ai_a", &workflow.ai_a),
            ("ai_b", &workflow.ai_b),
            ("final_arbitrator", &workflow.final_arbitrator),
        ] {
            if !providers.contains_key(provider) {
                return Err(ConfigError::UnknownProvider {
                    role: role.into(),
                    provider: provider.clone(),
                });
            }
        }

        let output = ArtifactNames::with_overrides(
            raw.output.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        )?;

        Ok(Self {
            providers,
            workflow,
            paths: raw.paths,
            prompts: raw.prompts,
            output,
        })
    }

    /// Settings of a configured provider.
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }
}

impl PathsConfig {
    fn rebase(&mut self, base: &Path) {
        for path in [
            &mut self.bug_file,
            &mut self.codebase_folder,
            &mut self.prompts_folder,
            &mut self.results_root,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

fn resolve_provider(
    name: &str,
    raw: RawProvider,
    workflow_policy: RetryPolicy,
) -> Result<ProviderConfig, ConfigError> {
    let missing = |field: &str| ConfigError::MissingField {
        provider: name.to_string(),
        field: field.to_string(),
    };

    let kind = raw
        .kind
        .or_else(|| ProviderKind::infer(name))
        .ok_or_else(|| {
            ConfigError::Invalid(format!(
                "cannot infer the API kind of provider '{name}'; set `kind: openai` or `kind: anthropic`"
            ))
        })?;
    let model = raw.model.filter(|m| !m.trim().is_empty()).ok_or_else(|| missing("model"))?;
    let temperature = raw.temperature.ok_or_else(|| missing("temperature"))?;
    let max_tokens = raw.max_tokens.ok_or_else(|| missing("max_tokens"))?;
    if max_tokens == 0 {
        return Err(ConfigError::Invalid(format!(
            "provider '{name}': max_tokens must be positive"
        )));
    }

    let retry = match raw.retry_strategy {
        None => workflow_policy,
        Some(strategy) => resolve_strategy(name, strategy, workflow_policy)?,
    };

    let timeout_secs = raw.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(ConfigError::Invalid(format!(
            "provider '{name}': timeout_secs must be positive"
        )));
    }

    Ok(ProviderConfig {
        name: name.to_string(),
        kind,
        api_key: raw.api_key,
        base_url: raw
            .base_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| kind.default_base_url().to_string()),
        budget: TokenBudget::for_model(&model, raw.context_window),
        model,
        temperature,
        max_tokens,
        timeout: Duration::from_secs(timeout_secs),
        retry,
    })
}

fn resolve_strategy(
    name: &str,
    strategy: RetryStrategy,
    workflow_policy: RetryPolicy,
) -> Result<RetryPolicy, ConfigError> {
    let attempts = strategy.attempts.unwrap_or(workflow_policy.attempts);
    if attempts < 1 {
        return Err(ConfigError::Invalid(format!(
            "provider '{name}': retry_strategy.attempts must be at least 1"
        )));
    }
    let initial = strategy
        .initial_delay
        .unwrap_or(workflow_policy.initial_delay.as_secs_f64());
    if !(initial.is_finite() && initial >= 0.0) {
        return Err(ConfigError::Invalid(format!(
            "provider '{name}': retry_strategy.initial_delay must be a non-negative number"
        )));
    }
    let initial = Duration::from_secs_f64(initial);

    Ok(match strategy.backoff_type {
        BackoffType::Fixed => RetryPolicy::fixed(attempts, initial),
        BackoffType::Exponential => {
            let multiplier = strategy.multiplier.unwrap_or(workflow_policy.multiplier);
            if !(multiplier.is_finite() && multiplier >= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "provider '{name}': retry_strategy.multiplier must be at least 1.0"
                )));
            }
            RetryPolicy::exponential(attempts, initial, multiplier)
        }
    })
}

fn parse_tree(text: &str, format: ConfigFormat) -> Result<Value, String> {
    match format {
        ConfigFormat::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::from_str(text).map_err(|e| e.to_string()),
    }
}

/// Replace `${VAR}` in every string value of the tree.
pub fn substitute_env<F>(tree: &mut Value, lookup: &F, mode: EnvMode) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match tree {
        Value::String(s) => {
            if let Some(replaced) = substitute_str(s, lookup, mode)? {
                *s = replaced;
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_env(item, lookup, mode)?;
            }
        }
        Value::Object(map) => {
            for value in map.values_mut() {
                substitute_env(value, lookup, mode)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// `None` when the string holds no placeholder.
fn substitute_str<F>(s: &str, lookup: &F, mode: EnvMode) -> Result<Option<String>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !ENV_PLACEHOLDER_RE.is_match(s) {
        return Ok(None);
    }
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in ENV_PLACEHOLDER_RE.captures_iter(s) {
        let (Some(whole), Some(var)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&s[last..whole.start()]);
        match lookup(var.as_str()) {
            Some(value) => out.push_str(&value),
            None if mode == EnvMode::Lenient => {
                tracing::warn!(var = var.as_str(), "Environment variable not set");
            }
            None => {
                return Err(ConfigError::MissingEnvVar {
                    var: var.as_str().to_string(),
                })
            }
        }
        last = whole.end();
    }
    out.push_str(&s[last..]);
    Ok(Some(out))
}
