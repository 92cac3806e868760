//! Context Chunker: splits a codebase snapshot into token-budgeted chunks
//!
//! Files are never split or truncated. A file too large for the budget on its
//! own gets a chunk to itself, flagged `oversized`, and the caller decides
//! whether to send it anyway.

use std::ops::Range;

use super::snapshot::{CodebaseSnapshot, SourceFile};

/// Token estimate ratio (4 chars ≈ 1 token).
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate tokens for a piece of text, rounding up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Estimated tokens a file costs once rendered into a chunk.
pub fn section_tokens(file: &SourceFile) -> usize {
    estimate_tokens(&file.render_section())
}

/// A contiguous run of whole files from the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextChunk<'a> {
    /// 1-based position of this chunk.
    pub index: usize,
    pub total: usize,
    pub files: &'a [SourceFile],
    pub estimated_tokens: usize,
    /// A single file that alone exceeds the chunk budget.
    pub oversized: bool,
}

impl ContextChunk<'_> {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Render the chunk as codebase context for a prompt.
    pub fn render(&self) -> String {
        if self.files.is_empty() {
            return "# No supported files found\n".to_string();
        }
        let mut out = if self.total == 1 {
            format!("# CODEBASE - {} files\n\n", self.files.len())
        } else {
            format!(
                "# CODEBASE CHUNK {}/{} - {} files\n\n",
                self.index,
                self.total,
                self.files.len()
            )
        };
        for file in self.files {
            out.push_str(&file.render_section());
        }
        out
    }
}

/// Greedy whole-file chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_tokens_per_chunk: usize,
}

impl Chunker {
    pub fn new(max_tokens_per_chunk: usize) -> Self {
        Self {
            max_tokens_per_chunk,
        }
    }

    /// Plan the chunks for a snapshot. The returned iterator is lazy and can
    /// be cloned to walk the same sequence again.
    pub fn chunks<'a>(&self, snapshot: &'a CodebaseSnapshot) -> Chunks<'a> {
        let files = snapshot.files();
        let mut plan: Vec<(Range<usize>, usize)> = Vec::new();
        let mut start = 0;
        let mut running = 0;

        for (i, file) in files.iter().enumerate() {
            let cost = section_tokens(file);
            if i > start && running + cost > self.max_tokens_per_chunk {
                plan.push((start..i, running));
                start = i;
                running = 0;
            }
            running += cost;
        }
        if start < files.len() {
            plan.push((start..files.len(), running));
        }
        if plan.is_empty() {
            plan.push((0..0, 0));
        }

        Chunks {
            files,
            plan,
            max_tokens: self.max_tokens_per_chunk,
            next: 0,
        }
    }
}

/// Iterator over the planned chunks of one snapshot.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    files: &'a [SourceFile],
    plan: Vec<(Range<usize>, usize)>,
    max_tokens: usize,
    next: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = ContextChunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (range, tokens) = self.plan.get(self.next)?.clone();
        self.next += 1;
        let files = &self.files[range];
        Some(ContextChunk {
            index: self.next,
            total: self.plan.len(),
            files,
            estimated_tokens: tokens,
            oversized: files.len() == 1 && tokens > self.max_tokens,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.plan.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks<'_> {}
