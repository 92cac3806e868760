//! Report Writer: per-run output directory and artifact persistence.
//!
//! Every run gets its own `bugNNNN_results` directory. Numbers only grow:
//! the next run takes the highest existing number plus one, and creation
//! retries with the following number if a concurrent run got there first.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::artifacts::{ArtifactKind, ArtifactNames};
use crate::error::{Error, Result};

/// Matches run directory names and captures the run number.
static RUN_DIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^bug(\d{4,})_results$").expect("RUN_DIR_RE regex should compile")
});

/// How many times allocation moves on to the next number before giving up.
const MAX_ALLOCATION_ATTEMPTS: u32 = 64;

/// Filename the bug report is copied to inside the run directory.
pub const BUG_COPY_FILENAME: &str = "bug.txt";

/// Filename of the run manifest inside the run directory.
pub const MANIFEST_FILENAME: &str = "run.json";

/// An allocated, exclusively owned run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    run_id: u32,
    path: PathBuf,
}

impl RunDirectory {
    /// Create the next free `bugNNNN_results` directory under `results_root`.
    pub fn allocate(results_root: impl AsRef<Path>) -> Result<Self> {
        let root = results_root.as_ref();
        fs::create_dir_all(root).map_err(|e| Error::io(root, e))?;

        let mut next = highest_run_id(root)? + 1;
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let path = root.join(Self::dir_name(next));
            match fs::create_dir(&path) {
                Ok(()) => {
                    info!(run_id = next, path = %path.display(), "Allocated run directory");
                    return Ok(Self { run_id: next, path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(run_id = next, "Run directory taken, trying next number");
                    next += 1;
                }
                Err(e) => return Err(Error::io(path, e)),
            }
        }

        Err(Error::RunAllocation {
            root: root.to_path_buf(),
            reason: format!("no free directory after {MAX_ALLOCATION_ATTEMPTS} attempts"),
        })
    }

    /// Directory name for a run number, zero-padded to four digits.
    pub fn dir_name(run_id: u32) -> String {
        format!("bug{run_id:04}_results")
    }

    pub fn run_id(&self) -> u32 {
        self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy the bug report file into the run directory as `bug.txt`.
    pub fn copy_bug_file(&self, bug_file: &Path) -> Result<PathBuf> {
        let target = self.path.join(BUG_COPY_FILENAME);
        fs::copy(bug_file, &target).map_err(|e| Error::io(bug_file, e))?;
        Ok(target)
    }
}

/// Highest run number present under `root`, or 0.
fn highest_run_id(root: &Path) -> Result<u32> {
    let entries = fs::read_dir(root).map_err(|e| Error::io(root, e))?;
    let mut highest = 0;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(root, e))?;
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(caps) = RUN_DIR_RE.captures(&name) else {
            continue;
        };
        if let Ok(n) = caps[1].parse::<u32>() {
            highest = highest.max(n);
        }
    }
    Ok(highest)
}

/// Writes artifacts into one run directory and remembers what it wrote.
#[derive(Debug)]
pub struct ReportWriter {
    run: RunDirectory,
    names: ArtifactNames,
    written: Vec<ArtifactKind>,
}

impl ReportWriter {
    pub fn new(run: RunDirectory, names: ArtifactNames) -> Self {
        Self {
            run,
            names,
            written: Vec::new(),
        }
    }

    pub fn run(&self) -> &RunDirectory {
        &self.run
    }

    pub fn names(&self) -> &ArtifactNames {
        &self.names
    }

    pub fn path_for(&self, kind: ArtifactKind) -> PathBuf {
        self.run.path.join(self.names.filename(kind))
    }

    pub fn exists(&self, kind: ArtifactKind) -> bool {
        self.path_for(kind).is_file()
    }

    /// Write an artifact. Writing the same artifact twice overwrites it.
    pub fn write(&mut self, kind: ArtifactKind, content: &str) -> Result<PathBuf> {
        let path = self.path_for(kind);
        fs::write(&path, content).map_err(|e| Error::io(&path, e))?;
        if !self.written.contains(&kind) {
            self.written.push(kind);
        }
        info!(artifact = %kind, path = %path.display(), "Saved artifact");
        Ok(path)
    }

    /// Write a JSON document (e.g. the run manifest) next to the artifacts.
    pub fn write_json<T: Serialize>(&self, filename: &str, value: &T) -> Result<PathBuf> {
        let path = self.run.path.join(filename);
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, json).map_err(|e| Error::io(&path, e))?;
        Ok(path)
    }

    /// Artifacts written so far, in write order.
    pub fn written(&self) -> &[ArtifactKind] {
        &self.written
    }
}
