//! Coordination Library
//!
//! Deterministic building blocks for the cross-audit pipeline:
//! - codebase discovery and snapshots (`context_packer`)
//! - token-budgeted chunking and size validation (`context_packer::packer`, `budget`)
//! - retry delay policy (`resilience`)
//! - artifact naming, run directories and report writing (`artifacts`, `report_writer`)
//!
//! Nothing here touches the network or needs an async runtime.

pub mod artifacts;
pub mod budget;
pub mod context_packer;
pub mod error;
pub mod report_writer;
pub mod resilience;

pub use artifacts::{ArtifactKind, ArtifactNames};
pub use budget::{validate_content, ContentReport, RoleEstimate, RoleTarget, TokenBudget};
pub use context_packer::{
    estimate_tokens, snapshot_from_paths, Chunker, CodebaseSnapshot, CodebaseStats, ContextChunk,
    FileWalker, SourceFile,
};
pub use error::{Error, Result};
pub use report_writer::{ReportWriter, RunDirectory, BUG_COPY_FILENAME, MANIFEST_FILENAME};
pub use resilience::{BackoffType, RetryPolicy};
