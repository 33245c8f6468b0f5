//! Processor for `cargo test` libtest JSON output.
//!
//! `cargo test` interleaves two streams: stderr announces which suite
//! binary is about to run (`Running unittests src/lib.rs (target/...)`,
//! `Doc-tests mycrate`), stdout carries the libtest JSON events for
//! that suite. Both are captured into one file in order, so a
//! demarcation line always precedes the JSON it contextualizes; the
//! parser keeps a *current crate* and interprets every JSON line
//! against it. Test names split on `::` into the module hierarchy
//! beneath the crate root.

use std::collections::HashSet;

use serde::Deserialize;
use tracing::debug;

use super::NativeParser;
use crate::ipc::{Collection, Event, GroupRef, GroupResult, Status, TestCase, TestError, Totals};

#[derive(Debug, Deserialize)]
struct LibtestLine {
    #[serde(rename = "type")]
    kind: String,
    event: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    test_count: Option<u64>,
    #[serde(default)]
    passed: Option<u64>,
    #[serde(default)]
    failed: Option<u64>,
    #[serde(default)]
    ignored: Option<u64>,
    #[serde(default)]
    exec_time: Option<f64>,
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
}

#[derive(Debug)]
struct SuiteContext {
    crate_label: String,
    in_flight: HashSet<String>,
}

/// Stateful translator for one `cargo test` run.
pub struct CargoTestParser {
    current: Option<SuiteContext>,
}

impl Default for CargoTestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CargoTestParser {
    pub fn new() -> Self {
        Self { current: None }
    }

    /// Extracts the crate label from a stderr demarcation line, if this
    /// is one.
    ///
    /// `Running unittests src/lib.rs (target/debug/deps/mycrate-1a2b)`
    /// yields `mycrate`; `Running tests/cli.rs (target/.../cli-3c4d)`
    /// yields `cli`; `Doc-tests mycrate` yields `doc:mycrate`.
    fn demarcation(line: &str) -> Option<String> {
        let trimmed = line.trim_start();

        if let Some(rest) = trimmed.strip_prefix("Doc-tests ") {
            let name = rest.trim();
            if !name.is_empty() {
                return Some(format!("doc:{name}"));
            }
            return None;
        }

        if trimmed.starts_with("Running ") {
            let binary = trimmed
                .rsplit_once('(')
                .map(|(_, tail)| tail.trim_end_matches(')'))?;
            let stem = binary.rsplit(['/', '\\']).next()?;
            // Deps binaries are `<name>-<metadata hash>`.
            let label = stem.rsplit_once('-').map(|(name, _)| name).unwrap_or(stem);
            if !label.is_empty() {
                return Some(label.to_string());
            }
        }

        None
    }

    /// Hierarchy for a `::`-separated test path beneath `crate_label`.
    fn hierarchy(crate_label: &str, name: &str) -> (Vec<String>, String) {
        let mut names: Vec<String> = vec![crate_label.to_string()];
        names.extend(name.split("::").map(|s| s.to_string()));
        let leaf = names.pop().unwrap_or_default();
        (names, leaf)
    }

    /// Errors out tests the previous suite never reported.
    fn flush_in_flight(&mut self, events: &mut Vec<Event>) {
        let Some(suite) = self.current.take() else {
            return;
        };
        for name in suite.in_flight {
            let (parents, leaf) = Self::hierarchy(&suite.crate_label, &name);
            events.push(Event::TestCase(TestCase {
                test_name: leaf,
                parent_names: parents,
                status: Status::Error,
                duration: None,
                error: Some(TestError {
                    message: "runner exited before reporting this test".to_string(),
                    trace: None,
                }),
                stdout: None,
                stderr: None,
                xfail_reason: None,
            }));
        }
    }

    fn on_suite(&mut self, line: &LibtestLine, events: &mut Vec<Event>) {
        let Some(suite) = self.current.as_mut() else {
            debug!("suite event with no crate context: {:?}", line.event);
            return;
        };

        match line.event.as_str() {
            "started" => {
                events.push(Event::GroupStart(GroupRef {
                    group_name: suite.crate_label.clone(),
                    parent_names: vec![],
                }));
                events.push(Event::CollectionStart(Collection {
                    collected: line.test_count,
                }));
            }
            "ok" | "failed" => {
                let totals = Totals {
                    passed: line.passed.unwrap_or(0),
                    failed: line.failed.unwrap_or(0),
                    skipped: line.ignored.unwrap_or(0),
                    xfailed: 0,
                    xpassed: 0,
                };
                let status = if line.event == "failed" {
                    Status::Fail
                } else if totals.total() == 0 {
                    Status::NoTests
                } else {
                    Status::Pass
                };
                events.push(Event::GroupResult(GroupResult {
                    group_name: suite.crate_label.clone(),
                    parent_names: vec![],
                    status,
                    duration: line.exec_time,
                    totals,
                    stdout: None,
                    stderr: None,
                }));
                suite.in_flight.clear();
            }
            other => debug!("ignoring suite event {other:?}"),
        }
    }

    fn on_test(&mut self, line: &LibtestLine, events: &mut Vec<Event>) {
        let Some(suite) = self.current.as_mut() else {
            debug!("test event with no crate context: {:?}", line.name);
            return;
        };
        let Some(name) = line.name.as_deref() else {
            return;
        };

        match line.event.as_str() {
            "started" => {
                suite.in_flight.insert(name.to_string());
                let (parents, _) = Self::hierarchy(&suite.crate_label, name);
                if let Some((leaf_parent, ancestors)) = parents.split_last() {
                    events.push(Event::GroupDiscovered(GroupRef {
                        group_name: leaf_parent.clone(),
                        parent_names: ancestors.to_vec(),
                    }));
                }
            }
            "ok" | "failed" | "ignored" | "timeout" => {
                suite.in_flight.remove(name);
                let status = match line.event.as_str() {
                    "ok" => Status::Pass,
                    "ignored" => Status::Skip,
                    _ => Status::Fail,
                };
                let (parents, leaf) = Self::hierarchy(&suite.crate_label, name);
                events.push(Event::TestCase(TestCase {
                    test_name: leaf,
                    parent_names: parents,
                    status,
                    duration: line.exec_time,
                    error: (status == Status::Fail).then(|| TestError {
                        message: line
                            .stdout
                            .clone()
                            .filter(|s| !s.is_empty())
                            .unwrap_or_else(|| "test failed".to_string()),
                        trace: None,
                    }),
                    stdout: (status != Status::Fail)
                        .then(|| line.stdout.clone())
                        .flatten()
                        .filter(|s| !s.is_empty()),
                    stderr: line.stderr.clone().filter(|s| !s.is_empty()),
                    xfail_reason: None,
                }));
            }
            other => debug!("ignoring test event {other:?}"),
        }
    }
}

impl NativeParser for CargoTestParser {
    fn handle_line(&mut self, line: &str) -> Vec<Event> {
        let mut events = Vec::new();

        if let Ok(parsed) = serde_json::from_str::<LibtestLine>(line) {
            match parsed.kind.as_str() {
                "suite" => self.on_suite(&parsed, &mut events),
                "test" => self.on_test(&parsed, &mut events),
                other => debug!("ignoring libtest line type {other:?}"),
            }
            return events;
        }

        if let Some(label) = Self::demarcation(line) {
            // A new suite begins; anything the old one left unreported
            // is an error.
            self.flush_in_flight(&mut events);
            self.current = Some(SuiteContext {
                crate_label: label.clone(),
                in_flight: HashSet::new(),
            });
            events.push(Event::GroupDiscovered(GroupRef {
                group_name: label,
                parent_names: vec![],
            }));
        }
        // Everything else is cargo build chatter.

        events
    }

    fn finish(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        self.flush_in_flight(&mut events);
        events
    }
}
