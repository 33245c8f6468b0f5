//! Processor for `cargo nextest run --message-format libtest-json`.
//!
//! Nextest's libtest-compatible events carry names of the form
//! `crate::module$test_name`: everything left of `$` is the suite
//! path, the remainder is the test. The crate is therefore read
//! straight off every event and no stderr demarcation is needed.

use std::collections::{HashMap, HashSet};

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
    exec_time: Option<f64>,
    #[serde(default)]
    stdout: Option<String>,
}

#[derive(Debug, Default)]
struct CrateStats {
    totals: Totals,
    duration: f64,
}

/// Stateful translator for one nextest run.
pub struct NextestParser {
    crates: HashMap<String, CrateStats>,
    crate_order: Vec<String>,
    in_flight: HashSet<String>,
}

impl Default for NextestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl NextestParser {
    pub fn new() -> Self {
        Self {
            crates: HashMap::new(),
            crate_order: Vec::new(),
            in_flight: HashSet::new(),
        }
    }

    /// Splits `crate::module$test` into its hierarchy and leaf.
    fn hierarchy(name: &str) -> (Vec<String>, String) {
        match name.split_once('$') {
            Some((suite, test)) => {
                let parents: Vec<String> = suite.split("::").map(|s| s.to_string()).collect();
                (parents, test.to_string())
            }
            // Plain libtest shape as a fallback.
            None => {
                let mut parts: Vec<String> = name.split("::").map(|s| s.to_string()).collect();
                let leaf = parts.pop().unwrap_or_default();
                (parts, leaf)
            }
        }
    }

    fn note_crate(&mut self, parents: &[String], events: &mut Vec<Event>) {
        let Some(root) = parents.first() else {
            return;
        };
        if !self.crates.contains_key(root) {
            self.crates.insert(root.clone(), CrateStats::default());
            self.crate_order.push(root.clone());
            events.push(Event::GroupStart(GroupRef {
                group_name: root.clone(),
                parent_names: vec![],
            }));
        }
    }

    fn error_case(name: &str) -> Event {
        let (parents, leaf) = Self::hierarchy(name);
        Event::TestCase(TestCase {
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
        })
    }
}

impl NativeParser for NextestParser {
    fn handle_line(&mut self, line: &str) -> Vec<Event> {
        let parsed: LibtestLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(_) => {
                debug!("skipping non-JSON nextest line: {line}");
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        match (parsed.kind.as_str(), parsed.event.as_str()) {
            ("suite", "started") => {
                events.push(Event::CollectionStart(Collection {
                    collected: parsed.test_count,
                }));
            }
            ("suite", "ok") | ("suite", "failed") => {
                // Per-crate results, from the stats accumulated off
                // individual test events.
                for root in &self.crate_order {
                    let stats = &self.crates[root];
                    let status = if stats.totals.failed > 0 {
                        Status::Fail
                    } else if stats.totals.total() == 0 {
                        Status::NoTests
                    } else {
                        Status::Pass
                    };
                    events.push(Event::GroupResult(GroupResult {
                        group_name: root.clone(),
                        parent_names: vec![],
                        status,
                        duration: Some(stats.duration),
                        totals: stats.totals,
                        stdout: None,
                        stderr: None,
                    }));
                }
            }
            ("test", "started") => {
                if let Some(name) = parsed.name.as_deref() {
                    self.in_flight.insert(name.to_string());
                    let (parents, _) = Self::hierarchy(name);
                    self.note_crate(&parents, &mut events);
                    if let Some((leaf_parent, ancestors)) = parents.split_last() {
                        events.push(Event::GroupDiscovered(GroupRef {
                            group_name: leaf_parent.clone(),
                            parent_names: ancestors.to_vec(),
                        }));
                    }
                }
            }
            ("test", "ok") | ("test", "failed") | ("test", "ignored") => {
                let Some(name) = parsed.name.as_deref() else {
                    return events;
                };
                self.in_flight.remove(name);

                let status = match parsed.event.as_str() {
                    "ok" => Status::Pass,
                    "ignored" => Status::Skip,
                    _ => Status::Fail,
                };
                let (parents, leaf) = Self::hierarchy(name);
                self.note_crate(&parents, &mut events);
                if let Some(root) = parents.first()
                    && let Some(stats) = self.crates.get_mut(root)
                {
                    match status {
                        Status::Pass => stats.totals.passed += 1,
                        Status::Skip => stats.totals.skipped += 1,
                        _ => stats.totals.failed += 1,
                    }
                    stats.duration += parsed.exec_time.unwrap_or(0.0);
                }

                events.push(Event::TestCase(TestCase {
                    test_name: leaf,
                    parent_names: parents,
                    status,
                    duration: parsed.exec_time,
                    error: (status == Status::Fail).then(|| TestError {
                        message: parsed
                            .stdout
                            .clone()
                            .filter(|s| !s.is_empty())
                            .unwrap_or_else(|| "test failed".to_string()),
                        trace: None,
                    }),
                    stdout: (status != Status::Fail)
                        .then(|| parsed.stdout.clone())
                        .flatten()
                        .filter(|s| !s.is_empty()),
                    stderr: None,
                    xfail_reason: None,
                }));
            }
            (kind, event) => debug!("ignoring nextest event {kind}/{event}"),
        }
        events
    }

    fn finish(&mut self) -> Vec<Event> {
        self.in_flight
            .drain()
            .collect::<Vec<_>>()
            .iter()
            .map(|name| Self::error_case(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut NextestParser, lines: &[&str]) -> Vec<Event> {
        let mut events = Vec::new();
        for line in lines {
            events.extend(parser.handle_line(line));
        }
        events
    }

    #[test]
    fn test_dollar_split_hierarchy() {
        let (parents, leaf) = NextestParser::hierarchy("mycrate::math$test_add");
        assert_eq!(parents, vec!["mycrate".to_string(), "math".to_string()]);
        assert_eq!(leaf, "test_add");
    }

    #[test]
    fn test_full_run_produces_crate_results() {
        let mut parser = NextestParser::new();
        let events = feed(
            &mut parser,
            &[
                r#"{"type":"suite","event":"started","test_count":2}"#,
                r#"{"type":"test","event":"started","name":"alpha::m$t_ok"}"#,
                r#"{"type":"test","event":"ok","name":"alpha::m$t_ok","exec_time":0.1}"#,
                r#"{"type":"test","event":"started","name":"beta$t_bad"}"#,
                r#"{"type":"test","event":"failed","name":"beta$t_bad","exec_time":0.2,"stdout":"boom"}"#,
                r#"{"type":"suite","event":"failed","passed":1,"failed":1}"#,
            ],
        );

        let results: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::GroupResult(r) => Some(r),
                _ => None,
            })
            .collect();
        assert_eq!(results.len(), 2);

        let alpha = results.iter().find(|r| r.group_name == "alpha").unwrap();
        assert_eq!(alpha.status, Status::Pass);
        assert_eq!(alpha.totals.passed, 1);

        let beta = results.iter().find(|r| r.group_name == "beta").unwrap();
        assert_eq!(beta.status, Status::Fail);
        assert_eq!(beta.totals.failed, 1);
    }

    #[test]
    fn test_failed_case_carries_output() {
        let mut parser = NextestParser::new();
        let events = feed(
            &mut parser,
            &[
                r#"{"type":"test","event":"started","name":"c$t"}"#,
                r#"{"type":"test","event":"failed","name":"c$t","exec_time":0.2,"stdout":"assert!"}"#,
            ],
        );

        let case = events
            .iter()
            .find_map(|e| match e {
                Event::TestCase(tc) => Some(tc),
                _ => None,
            })
            .unwrap();
        assert_eq!(case.parent_names, vec!["c".to_string()]);
        assert!(case.error.as_ref().unwrap().message.contains("assert!"));
    }

    #[test]
    fn test_finish_errors_in_flight() {
        let mut parser = NextestParser::new();
        feed(
            &mut parser,
            &[r#"{"type":"test","event":"started","name":"c::m$hang"}"#],
        );
        let events = parser.finish();

        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::TestCase(tc) => {
                assert_eq!(tc.status, Status::Error);
                assert_eq!(tc.test_name, "hang");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
