//! Prompt templates with a typed placeholder contract.
//!
//! Every template is minijinja text. At load time each one is compiled and
//! its free variables are checked against the contract of its slot: all
//! required placeholders must appear and nothing outside the contract may.
//! Rendering runs with strict undefined behaviour, so a typo can't silently
//! render as an empty string.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use minijinja::{Environment, UndefinedBehavior, Value};
use tracing::debug;

use crate::config::PromptFiles;
use crate::errors::{ConfigError, TaskError};

/// Template slots used by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TemplateId {
    BugSlayer,
    AuditConsolidator,
    CrossAuditor,
    FinalConsolidator,
    /// Built in: merges per-chunk analyses into the answer the task asks for.
    ChunkMerge,
}

const CHUNK_FIELDS: &[&str] = &["chunk_index", "chunk_total"];

/// minijinja globals a template may use without them counting as placeholders.
const BUILTIN_GLOBALS: &[&str] = &["range", "dict", "namespace", "debug", "loop"];

impl TemplateId {
    /// Slots loaded from the prompts folder.
    pub const USER_TEMPLATES: [TemplateId; 4] = [
        Self::BugSlayer,
        Self::AuditConsolidator,
        Self::CrossAuditor,
        Self::FinalConsolidator,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::BugSlayer => "bug_slayer",
            Self::AuditConsolidator => "audit_consolidator",
            Self::CrossAuditor => "cross_auditor",
            Self::FinalConsolidator => "final_consolidator",
            Self::ChunkMerge => "chunk_merge",
        }
    }

    pub fn required(self) -> &'static [&'static str] {
        match self {
            Self::BugSlayer => &["bug_report", "codebase"],
            Self::AuditConsolidator => &["bug_report", "codebase", "own_report", "other_report"],
            Self::CrossAuditor => &["bug_report", "codebase", "peer_consolidation"],
            Self::FinalConsolidator => &[
                "bug_report",
                "codebase",
                "consolidation_a",
                "consolidation_b",
                "cross_audit_a_on_b",
                "cross_audit_b_on_a",
            ],
            Self::ChunkMerge => &["task_prompt", "chunk_analyses"],
        }
    }

    /// Optional placeholders, beyond the chunk fields every user template gets.
    fn extra_optional(self) -> &'static [&'static str] {
        match self {
            Self::CrossAuditor => &["own_consolidation"],
            Self::FinalConsolidator => &["audit_report_a", "audit_report_b"],
            _ => &[],
        }
    }

    pub fn optional(self) -> Vec<&'static str> {
        if self == Self::ChunkMerge {
            return Vec::new();
        }
        let mut fields = self.extra_optional().to_vec();
        fields.extend_from_slice(CHUNK_FIELDS);
        fields
    }

    /// Configured filename of a user template; `None` for built-ins.
    pub fn filename(self, files: &PromptFiles) -> Option<&str> {
        match self {
            Self::BugSlayer => Some(&files.bug_slayer),
            Self::AuditConsolidator => Some(&files.audit_consolidator),
            Self::CrossAuditor => Some(&files.cross_auditor),
            Self::FinalConsolidator => Some(&files.final_consolidator),
            Self::ChunkMerge => None,
        }
    }

    pub fn default_source(self) -> &'static str {
        match self {
            Self::BugSlayer => DEFAULT_BUG_SLAYER,
            Self::AuditConsolidator => DEFAULT_AUDIT_CONSOLIDATOR,
            Self::CrossAuditor => DEFAULT_CROSS_AUDITOR,
            Self::FinalConsolidator => DEFAULT_FINAL_CONSOLIDATOR,
            Self::ChunkMerge => CHUNK_MERGE_TEMPLATE,
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Values bound to one template rendering.
///
/// Optional placeholders start out as `none`, so templates can test them
/// with `{% if ... %}` under strict undefined behaviour.
#[derive(Debug, Clone)]
pub struct PromptVars {
    template: TemplateId,
    values: BTreeMap<&'static str, Value>,
}

impl PromptVars {
    pub fn new(template: TemplateId) -> Self {
        let values = template
            .optional()
            .into_iter()
            .map(|name| (name, Value::from(())))
            .collect();
        Self { template, values }
    }

    pub fn text(mut self, name: &'static str, value: &str) -> Self {
        self.values.insert(name, Value::from(value));
        self
    }

    pub fn set_text(&mut self, name: &'static str, value: &str) {
        self.values.insert(name, Value::from(value));
    }

    /// Bind 1-based chunk position; only meaningful when there are several.
    pub fn set_chunk(&mut self, index: usize, total: usize) {
        self.values.insert("chunk_index", Value::from(index));
        self.values.insert("chunk_total", Value::from(total));
    }
}

/// Compiled, contract-checked templates.
#[derive(Debug)]
pub struct PromptSet {
    env: Environment<'static>,
}

impl PromptSet {
    /// Load the four user templates from `dir` and add the built-ins.
    pub fn load(dir: &Path, files: &PromptFiles) -> Result<Self, ConfigError> {
        if !dir.is_dir() {
            return Err(ConfigError::TemplateNotFound(dir.to_path_buf()));
        }
        let mut sources = Vec::new();
        for id in TemplateId::USER_TEMPLATES {
            let Some(filename) = id.filename(files) else {
                continue;
            };
            let path = dir.join(filename);
            if !path.is_file() {
                return Err(ConfigError::TemplateNotFound(path));
            }
            let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            if text.trim().is_empty() {
                return Err(ConfigError::EmptyTemplate(path));
            }
            debug!(template = %id, path = %path.display(), "Loaded prompt template");
            sources.push((id, text));
        }
        Self::from_sources(sources)
    }

    /// Build from in-memory sources; the built-in merge template is added.
    pub fn from_sources<I>(sources: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (TemplateId, String)>,
    {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);

        let mut loaded = HashSet::new();
        let builtins = [(TemplateId::ChunkMerge, CHUNK_MERGE_TEMPLATE.to_string())];
        for (id, source) in sources.into_iter().chain(builtins) {
            if source.trim().is_empty() {
                return Err(ConfigError::Template {
                    name: id.name().into(),
                    message: "template is empty".into(),
                });
            }
            env.add_template_owned(id.name(), source)
                .map_err(|e| ConfigError::Template {
                    name: id.name().into(),
                    message: e.to_string(),
                })?;
            check_contract(&env, id)?;
            loaded.insert(id);
        }

        for id in TemplateId::USER_TEMPLATES {
            if !loaded.contains(&id) {
                return Err(ConfigError::Template {
                    name: id.name().into(),
                    message: "no template provided".into(),
                });
            }
        }
        Ok(Self { env })
    }

    /// The stock templates written by `--setup`.
    pub fn defaults() -> Result<Self, ConfigError> {
        Self::from_sources(
            TemplateId::USER_TEMPLATES.map(|id| (id, id.default_source().to_string())),
        )
    }

    pub fn render(&self, vars: &PromptVars) -> Result<String, TaskError> {
        let id = vars.template;
        let template_error = |e: minijinja::Error| TaskError::Template {
            template: id.name().into(),
            message: e.to_string(),
        };
        let template = self.env.get_template(id.name()).map_err(template_error)?;
        template.render(&vars.values).map_err(template_error)
    }
}

fn check_contract(env: &Environment<'static>, id: TemplateId) -> Result<(), ConfigError> {
    let template = env
        .get_template(id.name())
        .map_err(|e| ConfigError::Template {
            name: id.name().into(),
            message: e.to_string(),
        })?;
    let used = template.undeclared_variables(false);

    let missing: Vec<&str> = id
        .required()
        .iter()
        .copied()
        .filter(|name| !used.contains(*name))
        .collect();
    if !missing.is_empty() {
        return Err(ConfigError::Template {
            name: id.name().into(),
            message: format!("missing required placeholder(s): {}", missing.join(", ")),
        });
    }

    let optional = id.optional();
    let mut unknown: Vec<&str> = used
        .iter()
        .map(String::as_str)
        .filter(|name| {
            !id.required().contains(name)
                && !optional.contains(name)
                && !BUILTIN_GLOBALS.contains(name)
        })
        .collect();
    if !unknown.is_empty() {
        unknown.sort_unstable();
        return Err(ConfigError::Template {
            name: id.name().into(),
            message: format!("unknown placeholder(s): {}", unknown.join(", ")),
        });
    }
    Ok(())
}

// ── Built-in and default templates ─────────────────────────────────────

const CHUNK_MERGE_TEMPLATE: &str = "\
The codebase for the task below was too large for one request, so you worked through it in parts. Your analysis of each part follows the task.

Now give the single, complete answer the task asks for. Combine the findings from every part, drop duplicates, resolve contradictions against the code you saw, and follow the task's output format exactly, including every field it requires.

# TASK:
{{ task_prompt }}

# YOUR ANALYSES OF EACH PART:
{{ chunk_analyses }}
";

const DEFAULT_BUG_SLAYER: &str = "\
You are a senior engineer investigating a bug report. Read the bug description and the code, find the root cause, and propose concrete fixes.

For each fix use this format:

Fix #N
Filename: <path of the file to change>
Broken Code:
<the exact code that is wrong>
Fixed Code:
<the corrected code>
Rationale: <why this fixes the bug>

# BUG DESCRIPTION AND STACK TRACE:
{{ bug_report }}

# CODEBASE FILES{% if chunk_total %} (part {{ chunk_index }} of {{ chunk_total }}){% endif %}:
{{ codebase }}

Please analyze this bug thoroughly and provide your detailed analysis report.
";

const DEFAULT_AUDIT_CONSOLIDATOR: &str = "\
You previously audited a bug. Another engineer audited the same bug independently. Compare both analyses against the code, keep what holds up, drop what doesn't, and produce one consolidated list of fixes in the same Fix # format (Filename, Broken Code, Fixed Code, Rationale).

# ORIGINAL BUG DESCRIPTION:
{{ bug_report }}

# ORIGINAL CODEBASE{% if chunk_total %} (part {{ chunk_index }} of {{ chunk_total }}){% endif %}:
{{ codebase }}

# YOUR PREVIOUS ANALYSIS:
{{ own_report }}

# OTHER AI'S ANALYSIS:
{{ other_report }}

Please provide your consolidated analysis after reviewing both reports.
";

const DEFAULT_CROSS_AUDITOR: &str = "\
Review another engineer's consolidated bug analysis. Check every proposed fix against the code: is the broken code real, does the fixed code compile in context, does it address the root cause? List the fixes you confirm, the ones you reject and why, and anything they missed.

# ORIGINAL BUG DESCRIPTION:
{{ bug_report }}

# ORIGINAL CODEBASE{% if chunk_total %} (part {{ chunk_index }} of {{ chunk_total }}){% endif %}:
{{ codebase }}

# CONSOLIDATION UNDER REVIEW:
{{ peer_consolidation }}
{% if own_consolidation %}
# YOUR OWN CONSOLIDATION (for reference):
{{ own_consolidation }}
{% endif %}
Please provide your cross-audit of the consolidation above.
";

const DEFAULT_FINAL_CONSOLIDATOR: &str = "\
You are the final arbitrator. Two engineers audited a bug, consolidated their findings and then audited each other's consolidations. Produce the definitive list of validated fixes.

For each fix use exactly this format:

Fix #N
Filename: <path>
Broken Code:
<exact code to replace>
Fixed Code:
<replacement code>
Rationale: <why>
Attribution: <percentage of the fix credited to AI_A and to AI_B>

# ORIGINAL BUG DESCRIPTION:
{{ bug_report }}

# ORIGINAL CODEBASE{% if chunk_total %} (part {{ chunk_index }} of {{ chunk_total }}){% endif %}:
{{ codebase }}

# CONSOLIDATION FROM AI_A:
{{ consolidation_a }}

# CONSOLIDATION FROM AI_B:
{{ consolidation_b }}

# AI_A'S CROSS-AUDIT OF AI_B:
{{ cross_audit_a_on_b }}

# AI_B'S CROSS-AUDIT OF AI_A:
{{ cross_audit_b_on_a }}
{% if audit_report_a %}
# INITIAL AUDIT REPORT A:
{{ audit_report_a }}
{% endif %}{% if audit_report_b %}
# INITIAL AUDIT REPORT B:
{{ audit_report_b }}
{% endif %}
Please create the final, definitive list of validated bug fixes.
";

#[cfg(test)]
mod tests {
    use super::*;

    fn sources_with(id: TemplateId, text: &str) -> Vec<(TemplateId, String)> {
        TemplateId::USER_TEMPLATES
            .map(|t| {
                if t == id {
                    (t, text.to_string())
                } else {
                    (t, t.default_source().to_string())
                }
            })
            .to_vec()
    }

    #[test]
    fn test_defaults_satisfy_contracts() {
        PromptSet::defaults().unwrap();
    }

    #[test]
    fn test_render_bug_slayer() {
        let set = PromptSet::defaults().unwrap();
        let vars = PromptVars::new(TemplateId::BugSlayer)
            .text("bug_report", "NullPointerException in Foo")
            .text("codebase", "# ===== foo.py =====");
        let prompt = set.render(&vars).unwrap();
        assert!(prompt.contains("NullPointerException in Foo"));
        assert!(prompt.contains("# ===== foo.py ====="));
        assert!(!prompt.contains("part "));
    }

    #[test]
    fn test_chunk_fields_render_when_set() {
        let set = PromptSet::defaults().unwrap();
        let mut vars = PromptVars::new(TemplateId::BugSlayer)
            .text("bug_report", "bug")
            .text("codebase", "code");
        vars.set_chunk(2, 3);
        assert!(set.render(&vars).unwrap().contains("(part 2 of 3)"));
    }

    #[test]
    fn test_missing_required_placeholder_rejected() {
        let err = PromptSet::from_sources(sources_with(
            TemplateId::AuditConsolidator,
            "{{ bug_report }} {{ codebase }} {{ own_report }}",
        ))
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::Template { name, message } if name == "audit_consolidator" && message.contains("other_report"))
        );
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let err = PromptSet::from_sources(sources_with(
            TemplateId::BugSlayer,
            "{{ bug_report }} {{ codebase }} {{ stack_trace }}",
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Template { message, .. } if message.contains("stack_trace")));
    }

    #[test]
    fn test_syntax_error_rejected() {
        let err = PromptSet::from_sources(sources_with(
            TemplateId::BugSlayer,
            "{{ bug_report }} {{ codebase ",
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Template { .. }));
    }

    #[test]
    fn test_missing_template_rejected() {
        let sources = vec![(
            TemplateId::BugSlayer,
            TemplateId::BugSlayer.default_source().to_string(),
        )];
        assert!(PromptSet::from_sources(sources).is_err());
    }

    #[test]
    fn test_unbound_required_value_fails_render() {
        let set = PromptSet::defaults().unwrap();
        let vars = PromptVars::new(TemplateId::BugSlayer).text("bug_report", "bug");
        let err = set.render(&vars).unwrap_err();
        assert!(matches!(err, TaskError::Template { template, .. } if template == "bug_slayer"));
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        let files = PromptFiles::default();
        for id in TemplateId::USER_TEMPLATES {
            std::fs::write(
                dir.path().join(id.filename(&files).unwrap()),
                id.default_source(),
            )
            .unwrap();
        }
        PromptSet::load(dir.path(), &files).unwrap();

        std::fs::write(dir.path().join(&files.cross_auditor), "  \n").unwrap();
        assert!(matches!(
            PromptSet::load(dir.path(), &files),
            Err(ConfigError::EmptyTemplate(_))
        ));

        std::fs::remove_file(dir.path().join(&files.cross_auditor)).unwrap();
        assert!(matches!(
            PromptSet::load(dir.path(), &files),
            Err(ConfigError::TemplateNotFound(_))
        ));
    }

    #[test]
    fn test_optional_vars_default_to_none() {
        let set = PromptSet::defaults().unwrap();
        let vars = PromptVars::new(TemplateId::FinalConsolidator)
            .text("bug_report", "bug")
            .text("codebase", "code")
            .text("consolidation_a", "CONS_A")
            .text("consolidation_b", "CONS_B")
            .text("cross_audit_a_on_b", "XA")
            .text("cross_audit_b_on_a", "XB");
        let prompt = set.render(&vars).unwrap();
        assert!(prompt.contains("CONS_A"));
        assert!(!prompt.contains("INITIAL AUDIT REPORT"));
        assert!(!prompt.contains("part "));
    }

    #[test]
    fn test_chunk_merge_embeds_task_prompt() {
        let set = PromptSet::defaults().unwrap();
        let vars = PromptVars::new(TemplateId::ChunkMerge)
            .text("task_prompt", "Fix #N\nAttribution: <split>")
            .text("chunk_analyses", "## Analysis of Chunk 1/2\nfirst");
        let prompt = set.render(&vars).unwrap();
        assert!(prompt.contains("Attribution: <split>"));
        assert!(prompt.contains("## Analysis of Chunk 1/2\nfirst"));
        assert!(!prompt.contains("standard bug analysis report"));
    }
}
