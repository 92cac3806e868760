//! Named outputs of a cross-audit run and their filenames.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::report_writer::{BUG_COPY_FILENAME, MANIFEST_FILENAME};

/// One of the seven reports a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    AuditReportA,
    AuditReportB,
    ConsolidationA,
    ConsolidationB,
    CrossAuditAOnB,
    CrossAuditBOnA,
    DefinitiveFixes,
}

impl ArtifactKind {
    /// All artifacts in pipeline order.
    pub const ALL: [ArtifactKind; 7] = [
        Self::AuditReportA,
        Self::AuditReportB,
        Self::ConsolidationA,
        Self::ConsolidationB,
        Self::CrossAuditAOnB,
        Self::CrossAuditBOnA,
        Self::DefinitiveFixes,
    ];

    /// Logical name used in configuration and the manifest.
    pub fn key(self) -> &'static str {
        match self {
            Self::AuditReportA => "audit_report_a",
            Self::AuditReportB => "audit_report_b",
            Self::ConsolidationA => "consolidation_a",
            Self::ConsolidationB => "consolidation_b",
            Self::CrossAuditAOnB => "cross_audit_a_on_b",
            Self::CrossAuditBOnA => "cross_audit_b_on_a",
            Self::DefinitiveFixes => "definitive_fixes",
        }
    }

    pub fn default_filename(self) -> &'static str {
        match self {
            Self::AuditReportA => "audit_report_A.md",
            Self::AuditReportB => "audit_report_B.md",
            Self::ConsolidationA => "consolidation_A.md",
            Self::ConsolidationB => "consolidation_B.md",
            Self::CrossAuditAOnB => "cross_audit_A_on_B.md",
            Self::CrossAuditBOnA => "cross_audit_B_on_A.md",
            Self::DefinitiveFixes => "definitive_fixes.md",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.key() == key)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Filename for each artifact, defaults plus configured overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNames {
    names: BTreeMap<ArtifactKind, String>,
}

impl Default for ArtifactNames {
    fn default() -> Self {
        Self {
            names: ArtifactKind::ALL
                .into_iter()
                .map(|k| (k, k.default_filename().to_string()))
                .collect(),
        }
    }
}

impl ArtifactNames {
    /// Apply overrides keyed by logical name.
    ///
    /// Unknown keys are rejected. Every filename must be a bare name that
    /// stays inside the run directory, must not shadow `bug.txt` or
    /// `run.json`, and must differ from every other artifact's filename.
    pub fn with_overrides<'a, I>(overrides: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut names = Self::default();
        for (key, filename) in overrides {
            let kind =
                ArtifactKind::from_key(key).ok_or_else(|| Error::UnknownArtifact(key.into()))?;
            check_filename(kind, filename)?;
            names.names.insert(kind, filename.to_string());
        }

        let mut seen: HashMap<&str, ArtifactKind> = HashMap::new();
        for (kind, filename) in &names.names {
            if let Some(first) = seen.insert(filename.as_str(), *kind) {
                return Err(invalid(
                    *kind,
                    filename,
                    format!("already used by artifact '{first}'"),
                ));
            }
        }
        Ok(names)
    }

    pub fn filename(&self, kind: ArtifactKind) -> &str {
        self.names
            .get(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| kind.default_filename())
    }
}

fn check_filename(kind: ArtifactKind, filename: &str) -> Result<()> {
    if filename.trim().is_empty() {
        return Err(invalid(kind, filename, "filename is empty"));
    }
    let bare = !filename.contains(['/', '\\'])
        && Path::new(filename).file_name().and_then(|n| n.to_str()) == Some(filename);
    if !bare || filename == "." || filename == ".." {
        return Err(invalid(kind, filename, "must be a plain filename without directories"));
    }
    if filename == BUG_COPY_FILENAME || filename == MANIFEST_FILENAME {
        return Err(invalid(kind, filename, "reserved for the run's own files"));
    }
    Ok(())
}

fn invalid(kind: ArtifactKind, filename: &str, reason: impl Into<String>) -> Error {
    Error::InvalidArtifactName {
        artifact: kind.key().to_string(),
        filename: filename.to_string(),
        reason: reason.into(),
    }
}
