//! Rendering for the top-level `test-run.md`.

use chrono::{DateTime, SecondsFormat, Utc};

use super::markdown::fmt_duration;
use crate::group::RunSnapshot;

/// Lifecycle states shown in `test-run.md`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Complete,
    Error,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RunState::Running => "RUNNING",
            RunState::Complete => "COMPLETE",
            RunState::Error => "ERROR",
        })
    }
}

/// Static facts about this run, fixed at startup.
#[derive(Debug, Clone)]
pub struct RunMeta {
    pub command: String,
    pub runner: String,
    pub started: DateTime<Utc>,
}

/// Renders the whole `test-run.md`.
pub fn render_run_file(
    meta: &RunMeta,
    snap: &RunSnapshot,
    state: RunState,
    exit_code: Option<i32>,
) -> String {
    let mut out = String::with_capacity(1024);

    out.push_str("# Test run\n\n");
    out.push_str(&format!("- Command: `{}`\n", meta.command));
    out.push_str(&format!("- Runner: {}\n", meta.runner));
    out.push_str(&format!(
        "- Started: {}\n",
        meta.started.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    out.push_str(&format!("- Status: {state}\n"));
    if let Some(code) = exit_code {
        out.push_str(&format!("- Exit code: {code}\n"));
    }
    if let Some(collected) = snap.collected {
        out.push_str(&format!("- Collected: {collected}\n"));
    }

    out.push('\n');
    out.push_str("## Summary\n\n");
    let totals = &snap.totals;
    let mut parts = vec![
        format!("{} passed", totals.passed),
        format!("{} failed", totals.failed),
    ];
    if totals.skipped > 0 {
        parts.push(format!("{} skipped", totals.skipped));
    }
    if totals.xfailed > 0 {
        parts.push(format!("{} xfailed", totals.xfailed));
    }
    if totals.xpassed > 0 {
        parts.push(format!("{} xpassed", totals.xpassed));
    }
    parts.push(format!("{} total", totals.total()));
    out.push_str(&format!("Results: {}\n", parts.join(", ")));

    out.push('\n');
    out.push_str("## Groups\n\n");
    if snap.roots.is_empty() {
        out.push_str("No test groups discovered yet.\n");
    } else {
        out.push_str("| Status | Name | Tests | Duration | Report |\n");
        out.push_str("|---|---|---|---|---|\n");
        for root in &snap.roots {
            out.push_str(&format!(
                "| {} | {} | {} | {} | [{}](reports/{}/index.md) |\n",
                root.status,
                root.name,
                root.tests,
                fmt_duration(root.duration),
                root.name,
                root.dir_name,
            ));
        }
    }

    out
}
