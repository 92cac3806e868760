//! Context Packer: turns a codebase on disk into token-budgeted prompt context
//!
//! `FileWalker` discovers and reads the files, `CodebaseSnapshot` holds them
//! in discovery order, and `Chunker` splits the snapshot for one provider's
//! budget.

pub mod file_walker;
pub mod packer;
pub mod snapshot;

pub use file_walker::{read_source, snapshot_from_paths, FileWalker};
pub use packer::{estimate_tokens, Chunker, Chunks, ContextChunk, CHARS_PER_TOKEN};
pub use snapshot::{CodebaseSnapshot, CodebaseStats, SourceFile};
