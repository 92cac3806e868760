//! Token budgeting for provider context windows.
//!
//! A provider gets 75% of its context window for the prompt; the rest is
//! reserved for formatting and the response. The codebase share of a prompt
//! is whatever is left after the fixed inputs and a flat overhead.

use serde::{Deserialize, Serialize};

use crate::context_packer::estimate_tokens;

/// Context window assumed for models not in the table.
pub const DEFAULT_CONTEXT_WINDOW: usize = 100_000;

/// Context window of the large-context models.
pub const LARGE_CONTEXT_WINDOW: usize = 200_000;

/// Share of the context window usable for prompt input, in percent.
pub const SAFE_LIMIT_PERCENT: usize = 75;

/// Flat token allowance for template text around the inputs.
pub const PROMPT_OVERHEAD_TOKENS: usize = 400;

/// Context window for a model name when the config doesn't give one.
pub fn context_window_for_model(model: &str) -> usize {
    let model = model.trim().to_ascii_lowercase();
    if model == "o3" || model.starts_with("o3-") || model.starts_with("claude-") {
        LARGE_CONTEXT_WINDOW
    } else {
        DEFAULT_CONTEXT_WINDOW
    }
}

/// Token limits for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudget {
    pub context_window: usize,
    pub safe_limit: usize,
}

impl TokenBudget {
    pub fn new(context_window: usize) -> Self {
        Self {
            context_window,
            safe_limit: context_window * SAFE_LIMIT_PERCENT / 100,
        }
    }

    /// Budget from an explicit window, falling back to the model table.
    pub fn for_model(model: &str, context_window: Option<usize>) -> Self {
        Self::new(context_window.unwrap_or_else(|| context_window_for_model(model)))
    }

    /// Tokens left for codebase content once `fixed_inputs` are in the prompt.
    ///
    /// `None` when the fixed inputs alone use up the safe limit.
    pub fn codebase_budget<S: AsRef<str>>(&self, fixed_inputs: &[S]) -> Option<usize> {
        let fixed: usize = fixed_inputs
            .iter()
            .map(|s| estimate_tokens(s.as_ref()))
            .sum();
        self.safe_limit
            .checked_sub(fixed + PROMPT_OVERHEAD_TOKENS)
            .filter(|left| *left > 0)
    }

    pub fn fits(&self, tokens: usize) -> bool {
        tokens <= self.safe_limit
    }
}

/// Token estimate of one workflow role against its provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEstimate {
    pub role: String,
    pub provider: String,
    pub model: String,
    pub estimated_tokens: usize,
    pub safe_limit: usize,
    pub fits: bool,
}

/// Size report printed by validate-only mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentReport {
    pub bug_report_chars: usize,
    pub codebase_chars: usize,
    pub roles: Vec<RoleEstimate>,
}

impl ContentReport {
    pub fn all_fit(&self) -> bool {
        self.roles.iter().all(|r| r.fits)
    }
}

/// One role to check: (role label, provider name, model, budget).
pub struct RoleTarget<'a> {
    pub role: &'a str,
    pub provider: &'a str,
    pub model: &'a str,
    pub budget: TokenBudget,
}

/// Estimate bug report plus codebase against each role's provider.
pub fn validate_content(
    bug_report: &str,
    codebase: &str,
    targets: &[RoleTarget<'_>],
) -> ContentReport {
    let estimated = estimate_tokens(bug_report) + estimate_tokens(codebase);
    ContentReport {
        bug_report_chars: bug_report.chars().count(),
        codebase_chars: codebase.chars().count(),
        roles: targets
            .iter()
            .map(|t| RoleEstimate {
                role: t.role.to_string(),
                provider: t.provider.to_string(),
                model: t.model.to_string(),
                estimated_tokens: estimated,
                safe_limit: t.budget.safe_limit,
                fits: t.budget.fits(estimated),
            })
            .collect(),
    }
}
