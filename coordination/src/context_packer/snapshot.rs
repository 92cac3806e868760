//! Codebase snapshot: the ordered set of source files handed to agents.
//!
//! Order is discovery order and is significant: chunking and rendering
//! both walk `files()` front to back.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One source file captured from the codebase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path relative to the codebase root, `/`-separated.
    pub path: String,
    /// Full file content.
    pub content: String,
    /// Lowercased extension including the dot (e.g. `.py`), empty if none.
    pub extension: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let extension = extension_tag(&path);
        Self {
            path,
            content: content.into(),
            extension,
        }
    }

    /// Number of characters in the content.
    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }

    /// Render this file as a delimited section of the codebase context.
    pub fn render_section(&self) -> String {
        format!(
            "# ===== {} =====\n# Size: {} characters\n\n{}\n\n",
            self.path,
            self.char_count(),
            self.content
        )
    }
}

/// Lowercased `.ext` tag of a path, or an empty string.
pub fn extension_tag(path: &str) -> String {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => file_name[idx..].to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Aggregate statistics about a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodebaseStats {
    pub total_files: usize,
    pub total_chars: usize,
    /// File count per extension tag.
    pub file_types: BTreeMap<String, usize>,
    /// Largest file by character count.
    pub largest_file: Option<String>,
    pub largest_chars: usize,
}

/// Ordered, duplicate-free collection of source files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodebaseSnapshot {
    files: Vec<SourceFile>,
    seen: HashSet<String>,
}

impl CodebaseSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from files already in discovery order.
    pub fn from_files(files: impl IntoIterator<Item = SourceFile>) -> Result<Self> {
        let mut snapshot = Self::new();
        for file in files {
            snapshot.push(file)?;
        }
        Ok(snapshot)
    }

    /// Append a file. Rejects a path that is already present.
    pub fn push(&mut self, file: SourceFile) -> Result<()> {
        if !self.seen.insert(file.path.clone()) {
            return Err(Error::DuplicatePath(file.path));
        }
        self.files.push(file);
        Ok(())
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_chars(&self) -> usize {
        self.files.iter().map(SourceFile::char_count).sum()
    }

    /// Render the whole codebase as one context block.
    pub fn render(&self) -> String {
        if self.files.is_empty() {
            return "# No supported files found\n".to_string();
        }
        let mut out = format!("# CODEBASE ANALYSIS - {} files\n\n", self.files.len());
        for file in &self.files {
            out.push_str(&file.render_section());
        }
        out
    }

    pub fn stats(&self) -> CodebaseStats {
        let mut stats = CodebaseStats {
            total_files: self.files.len(),
            ..CodebaseStats::default()
        };
        for file in &self.files {
            let chars = file.char_count();
            stats.total_chars += chars;
            *stats.file_types.entry(file.extension.clone()).or_insert(0) += 1;
            if chars > stats.largest_chars || stats.largest_file.is_none() {
                stats.largest_chars = chars;
                stats.largest_file = Some(file.path.clone());
            }
        }
        stats
    }
}
