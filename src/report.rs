//! The Markdown report engine.
//!
//! Reports live under the run directory: one `index.md` per group in a
//! sanitized directory tree, plus the top-level `test-run.md`. Every
//! regeneration rewrites the whole file from a snapshot of group state,
//! so a report on disk is always internally consistent, even if the run
//! is interrupted mid-write of a later one.
//!
//! Regeneration is debounced per group (~200 ms): rapid event bursts
//! from parallel workers coalesce into one render. [`render_loop`] is
//! the background task driving this; on shutdown the orchestrator
//! bypasses it and flushes everything synchronously.

pub mod markdown;
pub mod paths;
pub mod runfile;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::group::{GroupId, GroupManager, GroupSnapshot};

pub use markdown::{fmt_duration, render_group};
pub use runfile::{RunMeta, RunState, render_run_file};

/// Debounce window for report regeneration.
pub const RENDER_DEBOUNCE: Duration = Duration::from_millis(200);

/// A request for the render loop.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RenderRequest {
    Group(GroupId),
    RunFile,
}

/// Writes rendered reports into the run directory.
pub struct ReportEngine {
    reports_dir: PathBuf,
    run_file: PathBuf,
    meta: RunMeta,
}

impl ReportEngine {
    pub fn new(reports_dir: PathBuf, run_file: PathBuf, meta: RunMeta) -> Self {
        Self {
            reports_dir,
            run_file,
            meta,
        }
    }

    /// Directory a group's report lands in.
    ///
    /// On Windows the segment chain is collapsed to honor `MAX_PATH`;
    /// elsewhere the sanitized chain is used as-is.
    pub fn group_dir(&self, snap: &GroupSnapshot) -> PathBuf {
        #[cfg(windows)]
        let segments = {
            let base_len = self.reports_dir.as_os_str().len() + 1;
            paths::collapse_long_path(base_len, &snap.dir_chain, paths::WINDOWS_PATH_LIMIT)
        };
        #[cfg(not(windows))]
        let segments = snap.dir_chain.clone();

        segments
            .iter()
            .fold(self.reports_dir.clone(), |dir, seg| dir.join(seg))
    }

    /// Renders and writes one group's `index.md`.
    pub fn write_group(&self, snap: &GroupSnapshot) -> std::io::Result<()> {
        let dir = self.group_dir(snap);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("index.md"), markdown::render_group(snap))
    }

    /// Renders and writes `test-run.md`.
    pub fn write_run_file(
        &self,
        snap: &crate::group::RunSnapshot,
        state: RunState,
        exit_code: Option<i32>,
    ) -> std::io::Result<()> {
        let content = runfile::render_run_file(&self.meta, snap, state, exit_code);
        std::fs::write(&self.run_file, content)
    }

    /// Renders everything the manager knows about, synchronously.
    ///
    /// Used at init (all-pending `test-run.md`) and at finalization.
    /// Idempotent: repeated calls with unchanged state write identical
    /// bytes.
    pub fn flush_all(
        &self,
        manager: &GroupManager,
        state: RunState,
        exit_code: Option<i32>,
    ) -> std::io::Result<()> {
        for id in manager.all_ids() {
            if let Some(snap) = manager.snapshot(&id) {
                self.write_group(&snap)?;
            }
        }
        self.write_run_file(&manager.run_snapshot(), state, exit_code)
    }
}

/// Debounced render worker.
///
/// Each incoming request arms (or re-arms) a per-target deadline; when
/// a deadline expires the target is snapshotted and rendered outside
/// the group-manager lock. Cancellation exits immediately: the final
/// flush is the orchestrator's synchronous job.
pub async fn render_loop(
    mut rx: mpsc::Receiver<RenderRequest>,
    manager: Arc<GroupManager>,
    engine: Arc<ReportEngine>,
    cancel: CancellationToken,
) {
    let mut deadlines: HashMap<RenderRequest, Instant> = HashMap::new();

    loop {
        let next_due = deadlines.values().min().copied();

        tokio::select! {
            _ = cancel.cancelled() => return,

            request = rx.recv() => {
                match request {
                    Some(request) => {
                        deadlines.insert(request, Instant::now() + RENDER_DEBOUNCE);
                    }
                    None => return,
                }
            }

            _ = async {
                match next_due {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => {
                let now = Instant::now();
                let due: Vec<RenderRequest> = deadlines
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(req, _)| req.clone())
                    .collect();

                for request in due {
                    deadlines.remove(&request);
                    let result = match &request {
                        RenderRequest::Group(id) => match manager.snapshot(id) {
                            Some(snap) => engine.write_group(&snap),
                            None => Ok(()),
                        },
                        RenderRequest::RunFile => engine.write_run_file(
                            &manager.run_snapshot(),
                            RunState::Running,
                            None,
                        ),
                    };
                    if let Err(e) = result {
                        warn!("report write failed for {request:?}: {e}");
                    }
                }
            }
        }
    }
}
