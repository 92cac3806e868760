//! File Walker: .gitignore-respecting codebase discovery using the `ignore` crate

use std::fs;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use tracing::{debug, warn};

use super::snapshot::{extension_tag, CodebaseSnapshot, SourceFile};
use crate::error::{Error, Result};

/// Directory names never descended into, on top of hidden dirs and .gitignore.
const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    "__pycache__",
    "build",
    "dist",
    "target",
    "bin",
    "obj",
];

/// Walks a codebase root for files with a supported extension.
pub struct FileWalker {
    root: PathBuf,
    extensions: Vec<String>,
}

impl FileWalker {
    /// `extensions` may be given with or without the leading dot.
    pub fn new(root: impl AsRef<Path>, extensions: &[String]) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extensions: extensions.iter().map(|e| normalize_extension(e)).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return all supported files under root, sorted for deterministic order.
    pub fn source_files(&self) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            return Err(Error::CodebaseNotFound(self.root.clone()));
        }
        if !self.root.is_dir() {
            return Err(Error::NotADirectory(self.root.clone()));
        }

        let mut files = Vec::new();
        let walker = WalkBuilder::new(&self.root)
            .hidden(true) // skip hidden dirs
            .git_ignore(true)
            .require_git(false)
            .filter_entry(|entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                if !is_dir || entry.depth() == 0 {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !SKIPPED_DIRS.contains(&name.as_ref())
            })
            .build();

        for entry in walker {
            let entry = entry.map_err(|e| Error::Walk {
                path: self.root.clone(),
                reason: e.to_string(),
            })?;
            let path = entry.path();
            if path.is_file() && self.is_supported(path) {
                files.push(path.to_path_buf());
            }
        }

        files.sort();
        Ok(files)
    }

    /// Read every supported file into a snapshot, in sorted path order.
    pub fn snapshot(&self) -> Result<CodebaseSnapshot> {
        let paths = self.source_files()?;
        if paths.is_empty() {
            warn!(root = %self.root.display(), "No supported files found in codebase");
        }

        let mut snapshot = CodebaseSnapshot::new();
        for path in paths {
            let relative = path.strip_prefix(&self.root).unwrap_or(&path);
            let content = read_source(&path)?;
            debug!(path = %relative.display(), chars = content.len(), "Captured source file");
            snapshot.push(SourceFile::new(to_slash(relative), content))?;
        }
        Ok(snapshot)
    }

    fn is_supported(&self, path: &Path) -> bool {
        let tag = extension_tag(&path.to_string_lossy());
        !tag.is_empty() && self.extensions.iter().any(|e| *e == tag)
    }
}

/// Build a snapshot from an explicit file list, keeping the given order.
pub fn snapshot_from_paths(paths: &[PathBuf]) -> Result<CodebaseSnapshot> {
    let files = paths
        .iter()
        .map(|path| {
            if !path.is_file() {
                return Err(Error::FileNotFound(path.clone()));
            }
            Ok(SourceFile::new(to_slash(path), read_source(path)?))
        })
        .collect::<Result<Vec<_>>>()?;
    CodebaseSnapshot::from_files(files)
}

/// Read a text file, decoding invalid UTF-8 lossily.
pub fn read_source(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) => {
            warn!(
                path = %path.display(),
                "File contains non-UTF-8 bytes, some characters may be lost"
            );
            Ok(String::from_utf8_lossy(err.as_bytes()).into_owned())
        }
    }
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
