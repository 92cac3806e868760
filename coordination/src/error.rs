//! Error types for the deterministic pipeline pieces.
//!
//! Everything here is local I/O: reading the codebase, allocating a run
//! directory, writing artifacts. Network failures live in the agent crate.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for coordination operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The codebase root does not exist.
    #[error("codebase folder not found: {}", .0.display())]
    CodebaseNotFound(PathBuf),

    /// The codebase root exists but is not a directory.
    #[error("codebase path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// An explicitly listed file is missing.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Two entries resolved to the same relative path.
    #[error("duplicate path in codebase snapshot: {0}")]
    DuplicatePath(String),

    /// Directory walk failed.
    #[error("failed to walk {}: {reason}", path.display())]
    Walk { path: PathBuf, reason: String },

    /// Could not allocate a fresh run directory.
    #[error("could not allocate a run directory under {}: {reason}", root.display())]
    RunAllocation { root: PathBuf, reason: String },

    /// No filename is configured for an artifact.
    #[error("no output filename configured for artifact '{0}'")]
    UnknownArtifact(String),

    /// A configured artifact filename can't be used inside a run directory.
    #[error("invalid output filename '{filename}' for artifact '{artifact}': {reason}")]
    InvalidArtifactName {
        artifact: String,
        filename: String,
        reason: String,
    },

    /// The run manifest could not be serialized.
    #[error("failed to serialize run manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    /// Any other filesystem failure, with the path it concerned.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Attach a path to an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
