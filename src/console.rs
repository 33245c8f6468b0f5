//! Terminal output: preamble, per-group result lines, final summary.
//!
//! The console stays terse on purpose. One line per completed root
//! group, a pointer to the report on failure, and a final `Results:`
//! roll-up; per-test detail lives in the Markdown reports.

use std::io::Write;
use std::path::Path;

use chrono::Local;
use console::style;

use crate::group::{RootCompletion, RunSnapshot};
use crate::ipc::Status;

/// Formats and writes the user-facing console stream.
pub struct ConsoleFormatter<W: Write> {
    out: W,
}

impl ConsoleFormatter<std::io::Stderr> {
    /// Console output goes to stderr so the tee of the child's stdout
    /// stays clean.
    pub fn stderr() -> Self {
        Self {
            out: std::io::stderr(),
        }
    }
}

impl<W: Write> ConsoleFormatter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Printed once at startup.
    pub fn preamble(&mut self, command: &str, cwd: &Path, run_dir: &Path, test_run_md: &Path) {
        let now = Local::now().format("%H:%M:%S");
        let _ = writeln!(self.out, "3pio · {now} · {}", cwd.display());
        let _ = writeln!(self.out, "  command:  {command}");
        let _ = writeln!(self.out, "  run dir:  {}", run_dir.display());
        let _ = writeln!(self.out, "  report:   {}", test_run_md.display());
        let _ = writeln!(self.out);
    }

    fn styled_status(status: Status) -> console::StyledObject<&'static str> {
        let label = status.label();
        match status {
            Status::Pass | Status::Xpass => style(label).green(),
            Status::Fail | Status::Error => style(label).red().bold(),
            Status::Skip | Status::NoTests | Status::Xfail => style(label).yellow(),
            Status::Pending | Status::Running => style(label).dim(),
        }
    }

    /// One line per completed root group, plus failure pointers.
    pub fn group_result(&mut self, completion: &RootCompletion) {
        let duration = match completion.duration {
            Some(secs) => format!("{secs:.2}s"),
            None => "-".to_string(),
        };
        let _ = writeln!(
            self.out,
            "{} {} ({duration})",
            Self::styled_status(completion.status),
            completion.name,
        );

        if completion.status.is_failure() {
            let _ = writeln!(self.out, "     see {}", completion.report_path);
            for name in &completion.failed_tests {
                let _ = writeln!(self.out, "     ✗ {name}");
            }
            if completion.more_failed > 0 {
                let _ = writeln!(self.out, "     +{} more", completion.more_failed);
            }
        }
    }

    /// The final `Results:` line and one closing sentence.
    pub fn summary(&mut self, snapshot: &RunSnapshot) {
        let totals = &snapshot.totals;

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

        let _ = writeln!(self.out);
        let _ = writeln!(self.out, "Results: {}", parts.join(", "));

        let sentence = if totals.failed > 0 {
            style("Some tests failed.").red().bold()
        } else if totals.total() > 0 && totals.skipped == totals.total() {
            style("All tests were skipped.").yellow()
        } else if totals.skipped > 0 {
            style("All executed tests passed; some were skipped.").green()
        } else {
            style("All tests passed!").green().bold()
        };
        let _ = writeln!(self.out, "{sentence}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::ChildSummary;
    use crate::ipc::Totals;

    fn render<F: FnOnce(&mut ConsoleFormatter<&mut Vec<u8>>)>(f: F) -> String {
        let mut buf = Vec::new();
        let mut console = ConsoleFormatter::new(&mut buf);
        f(&mut console);
        String::from_utf8(buf).unwrap()
    }

    fn snapshot(totals: Totals) -> RunSnapshot {
        RunSnapshot {
            roots: vec![ChildSummary {
                name: "a.test.js".to_string(),
                dir_name: "a_test_js".to_string(),
                status: Status::Pass,
                tests: totals.total(),
                duration: Some(0.1),
            }],
            totals,
            collected: None,
        }
    }

    #[test]
    fn test_group_result_line() {
        let out = render(|c| {
            c.group_result(&RootCompletion {
                name: "a.test.js".to_string(),
                status: Status::Pass,
                duration: Some(0.25),
                failed_tests: vec![],
                more_failed: 0,
                report_path: "reports/a_test_js/index.md".to_string(),
            })
        });
        assert!(out.contains("PASS a.test.js (0.25s)"));
        assert!(!out.contains("see reports/"));
    }

    #[test]
    fn test_failed_group_points_at_report() {
        let out = render(|c| {
            c.group_result(&RootCompletion {
                name: "b.test.js".to_string(),
                status: Status::Fail,
                duration: None,
                failed_tests: vec!["one".to_string(), "two".to_string(), "three".to_string()],
                more_failed: 4,
                report_path: "reports/b_test_js/index.md".to_string(),
            })
        });
        assert!(out.contains("FAIL b.test.js (-)"));
        assert!(out.contains("see reports/b_test_js/index.md"));
        assert!(out.contains("✗ one"));
        assert!(out.contains("+4 more"));
    }

    #[test]
    fn test_summary_lines() {
        let out = render(|c| {
            c.summary(&snapshot(Totals {
                passed: 3,
                failed: 0,
                skipped: 0,
                xfailed: 0,
                xpassed: 0,
            }))
        });
        assert!(out.contains("Results: 3 passed, 0 failed, 3 total"));
        assert!(out.contains("All tests passed!"));
    }

    #[test]
    fn test_summary_with_optional_counts() {
        let out = render(|c| {
            c.summary(&snapshot(Totals {
                passed: 1,
                failed: 1,
                skipped: 2,
                xfailed: 1,
                xpassed: 1,
            }))
        });
        assert!(out.contains(
            "Results: 1 passed, 1 failed, 2 skipped, 1 xfailed, 1 xpassed, 6 total"
        ));
        assert!(out.contains("Some tests failed."));
    }

    #[test]
    fn test_summary_all_skipped() {
        let out = render(|c| {
            c.summary(&snapshot(Totals {
                passed: 0,
                failed: 0,
                skipped: 2,
                xfailed: 0,
                xpassed: 0,
            }))
        });
        assert!(out.contains("All tests were skipped."));
    }

    #[test]
    fn test_preamble_mentions_artifacts() {
        let out = render(|c| {
            c.preamble(
                "npx jest",
                Path::new("/work"),
                Path::new("/work/.3pio/runs/x"),
                Path::new("/work/.3pio/runs/x/test-run.md"),
            )
        });
        assert!(out.contains("command:  npx jest"));
        assert!(out.contains("run dir:  /work/.3pio/runs/x"));
        assert!(out.contains("test-run.md"));
    }
}
