//! Markdown rendering for per-group `index.md` reports.
//!
//! Rendering is a pure function of a [`GroupSnapshot`]: the same state
//! always produces the same bytes (the `updated` timestamp aside), and
//! every write replaces the whole file. Consistency under interruption
//! is worth the extra I/O.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::group::GroupSnapshot;

/// Formats a duration in seconds the way reports display it.
pub fn fmt_duration(secs: Option<f64>) -> String {
    match secs {
        Some(s) => format!("{s:.2}s"),
        None => "-".to_string(),
    }
}

fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn yaml_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Renders the full `index.md` for one group.
pub fn render_group(snap: &GroupSnapshot) -> String {
    let mut out = String::with_capacity(1024);

    let parent_path = snap.parent_names.join(" > ");
    out.push_str("---\n");
    out.push_str(&format!("group_name: {}\n", yaml_quote(&snap.name)));
    out.push_str(&format!("parent_path: {}\n", yaml_quote(&parent_path)));
    out.push_str(&format!("status: {}\n", snap.status));
    out.push_str(&format!("duration: {}\n", fmt_duration(snap.duration)));
    out.push_str(&format!("created: {}\n", fmt_time(snap.created)));
    out.push_str(&format!("updated: {}\n", fmt_time(snap.updated)));
    out.push_str("---\n\n");

    let mut breadcrumb = snap.parent_names.clone();
    breadcrumb.push(snap.name.clone());
    out.push_str(&format!("# Results for {}\n", breadcrumb.join(" > ")));

    // Summary only where it carries information beyond the case list:
    // root groups and groups with subgroups.
    if snap.is_root() || !snap.children.is_empty() {
        out.push('\n');
        out.push_str("## Summary\n\n");
        out.push_str(&format!("- Status: {}\n", snap.status));
        out.push_str(&format!("- Group tests: {}\n", snap.recursive.total()));
        out.push_str(&format!("- Passed: {}\n", snap.recursive.passed));
        out.push_str(&format!("- Failed: {}\n", snap.recursive.failed));
        out.push_str(&format!("- Skipped: {}\n", snap.recursive.skipped));
        if snap.recursive.xfailed > 0 {
            out.push_str(&format!("- Xfailed: {}\n", snap.recursive.xfailed));
        }
        if snap.recursive.xpassed > 0 {
            out.push_str(&format!("- Xpassed: {}\n", snap.recursive.xpassed));
        }
        out.push_str(&format!("- Duration: {}\n", fmt_duration(snap.duration)));
    }

    if !snap.cases.is_empty() {
        out.push('\n');
        out.push_str("## Test case results\n\n");
        for case in &snap.cases {
            out.push_str(&format!(
                "- {} {} ({})\n",
                case.glyph(),
                case.name,
                fmt_duration(case.duration)
            ));
            if let Some(error) = &case.error {
                out.push('\n');
                out.push_str("  ```\n");
                for line in error.message.lines() {
                    out.push_str(&format!("  {line}\n"));
                }
                if let Some(trace) = &error.trace {
                    for line in trace.lines() {
                        out.push_str(&format!("  {line}\n"));
                    }
                }
                out.push_str("  ```\n\n");
            }
            if let Some(reason) = &case.xfail_reason {
                out.push_str(&format!("  - expected failure: {reason}\n"));
            }
        }
    }

    if !snap.children.is_empty() {
        out.push('\n');
        out.push_str("## Subgroups\n\n");
        out.push_str("| Status | Name | Tests | Duration | Report |\n");
        out.push_str("|---|---|---|---|---|\n");
        for child in &snap.children {
            out.push_str(&format!(
                "| {} | {} | {} | {} | [{}]({}/index.md) |\n",
                child.status,
                child.name,
                child.tests,
                fmt_duration(child.duration),
                child.name,
                child.dir_name,
            ));
        }
    }

    if let Some(stdout) = &snap.stdout
        && !stdout.is_empty()
    {
        out.push('\n');
        out.push_str("## Captured stdout\n\n```\n");
        out.push_str(stdout);
        if !stdout.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("```\n");
    }
    if let Some(stderr) = &snap.stderr
        && !stderr.is_empty()
    {
        out.push('\n');
        out.push_str("## Captured stderr\n\n```\n");
        out.push_str(stderr);
        if !stderr.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("```\n");
    }

    out
}
