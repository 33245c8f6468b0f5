//! Run identity and per-run directory allocation.
//!
//! Every invocation of 3pio gets its own directory under `.3pio/runs/`,
//! named with a compact UTC timestamp plus two memorable words
//! (`20260801T142501Z-brave-otter`). The words make runs easy to refer to
//! in conversation; the timestamp keeps them sorted. Directory creation is
//! the allocation point: if the path already exists, a new word pair is
//! drawn and creation is retried.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::Rng;

/// Result type for run directory operations.
pub type RunResult<T> = Result<T, RunError>;

/// Errors raised while allocating the per-run directory tree.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The run directory (or one of its parents) could not be created.
    #[error("failed to create run directory {path}: {source}")]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Every candidate run id collided with an existing directory.
    #[error("could not allocate a unique run directory under {0}")]
    Exhausted(PathBuf),
}

const ADJECTIVES: &[&str] = &[
    "amber", "bold", "brave", "breezy", "bright", "calm", "clever", "cosmic", "crisp", "daring",
    "dusty", "eager", "fuzzy", "gentle", "golden", "happy", "humble", "jolly", "keen", "lively",
    "lucky", "mellow", "nimble", "polite", "proud", "quiet", "rapid", "rustic", "silver", "sturdy",
    "sunny", "witty",
];

const NOUNS: &[&str] = &[
    "badger", "bison", "condor", "coral", "crane", "dingo", "falcon", "ferret", "gecko", "heron",
    "ibis", "jackal", "koala", "lemur", "lynx", "marmot", "marten", "newt", "ocelot", "orca",
    "otter", "panda", "petrel", "puffin", "quokka", "raven", "shrike", "stoat", "tapir", "toucan",
    "walrus", "wombat",
];

/// Maximum attempts before giving up on a unique directory name.
const ALLOCATE_ATTEMPTS: usize = 16;

/// A run identifier: compact UTC timestamp plus a two-word suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunId {
    stamp: String,
    adjective: &'static str,
    noun: &'static str,
}

impl RunId {
    /// Draws a new run id for the given instant.
    pub fn generate(now: DateTime<Utc>, rng: &mut impl Rng) -> Self {
        Self {
            stamp: now.format("%Y%m%dT%H%M%SZ").to_string(),
            adjective: ADJECTIVES[rng.random_range(0..ADJECTIVES.len())],
            noun: NOUNS[rng.random_range(0..NOUNS.len())],
        }
    }

    /// Redraws only the word suffix, keeping the timestamp.
    fn reroll(&mut self, rng: &mut impl Rng) {
        self.adjective = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
        self.noun = NOUNS[rng.random_range(0..NOUNS.len())];
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.stamp, self.adjective, self.noun)
    }
}

/// The allocated per-run directory and the well-known paths inside it.
///
/// Layout:
///
/// ```text
/// .3pio/runs/<run-id>/
///   test-run.md
///   output.log
///   ipc.jsonl
///   adapters/
///   reports/
/// ```
#[derive(Debug, Clone)]
pub struct RunDir {
    id: RunId,
    root: PathBuf,
}

impl RunDir {
    /// Allocates a fresh run directory under `<base>/.3pio/runs/`.
    ///
    /// Creation of the directory itself is the uniqueness claim: on
    /// `AlreadyExists` the word suffix is redrawn and creation retried.
    pub fn allocate(base: &Path) -> RunResult<Self> {
        let runs = base.join(".3pio").join("runs");
        std::fs::create_dir_all(&runs).map_err(|source| RunError::CreateFailed {
            path: runs.clone(),
            source,
        })?;

        let mut rng = rand::rng();
        let mut id = RunId::generate(Utc::now(), &mut rng);

        for _ in 0..ALLOCATE_ATTEMPTS {
            let root = runs.join(id.to_string());
            match std::fs::create_dir(&root) {
                Ok(()) => {
                    let dir = Self { id, root };
                    dir.create_subdirs()?;
                    return Ok(dir);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    id.reroll(&mut rng);
                }
                Err(source) => return Err(RunError::CreateFailed { path: root, source }),
            }
        }

        Err(RunError::Exhausted(runs))
    }

    fn create_subdirs(&self) -> RunResult<()> {
        for sub in ["adapters", "reports"] {
            let path = self.root.join(sub);
            std::fs::create_dir_all(&path)
                .map_err(|source| RunError::CreateFailed { path, source })?;
        }
        Ok(())
    }

    /// The run identifier.
    pub fn id(&self) -> &RunId {
        &self.id
    }

    /// Absolute root of this run's directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the append-only IPC event log.
    pub fn ipc_path(&self) -> PathBuf {
        self.root.join("ipc.jsonl")
    }

    /// Path of the raw subprocess output capture.
    pub fn output_log(&self) -> PathBuf {
        self.root.join("output.log")
    }

    /// Path of the top-level Markdown report.
    pub fn test_run_md(&self) -> PathBuf {
        self.root.join("test-run.md")
    }

    /// Directory holding per-group `index.md` reports.
    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    /// Directory holding the materialized adapter sources for this run.
    pub fn adapters_dir(&self) -> PathBuf {
        self.root.join("adapters")
    }
}
