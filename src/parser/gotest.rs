//! Processor for `go test -json` output.
//!
//! Every stdout line is a JSON object with an `Action`, the owning
//! `Package`, and optionally a `Test` name. Packages become root
//! groups; `/`-separated subtest names become nested subgroups. A name
//! is only known to be a group once a child shows up under it, so
//! group events for subtest levels are deferred until their first
//! child runs; names that never grow children complete as plain test
//! cases.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use super::NativeParser;
use crate::ipc::{Event, GroupRef, GroupResult, Status, TestCase, TestError, Totals};

#[derive(Debug, Deserialize)]
struct GoLine {
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "Package", default)]
    package: Option<String>,
    #[serde(rename = "Test", default)]
    test: Option<String>,
    #[serde(rename = "Elapsed", default)]
    elapsed: Option<f64>,
    #[serde(rename = "Output", default)]
    output: Option<String>,
}

#[derive(Debug, Default)]
struct TestState {
    has_children: bool,
    group_announced: bool,
    output: String,
    done: bool,
}

#[derive(Debug, Default)]
struct PackageState {
    announced: bool,
    no_test_files: bool,
    current_test: Option<String>,
    output: String,
    totals: Totals,
    tests: HashMap<String, TestState>,
}

/// Stateful translator for one `go test -json` stream.
pub struct GoTestParser {
    packages: HashMap<String, PackageState>,
    package_order: Vec<String>,
}

impl Default for GoTestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl GoTestParser {
    pub fn new() -> Self {
        Self {
            packages: HashMap::new(),
            package_order: Vec::new(),
        }
    }

    fn ensure_package(&mut self, name: &str, events: &mut Vec<Event>) {
        let state = self.packages.entry(name.to_string()).or_default();
        if !state.announced {
            state.announced = true;
            self.package_order.push(name.to_string());
            events.push(Event::GroupStart(GroupRef {
                group_name: name.to_string(),
                parent_names: vec![],
            }));
        }
    }

    /// Parent chain for a `/`-separated test path within a package.
    fn hierarchy(package: &str, test_path: &str) -> (Vec<String>, String) {
        let mut names: Vec<String> = vec![package.to_string()];
        names.extend(test_path.split('/').map(|s| s.to_string()));
        let leaf = names.pop().unwrap_or_default();
        (names, leaf)
    }

    fn on_run(&mut self, package: &str, test: &str, events: &mut Vec<Event>) {
        self.ensure_package(package, events);
        let state = self.packages.get_mut(package).expect("just ensured");
        state.current_test = Some(test.to_string());
        state.tests.entry(test.to_string()).or_default();

        // A subtest's arrival proves every prefix above it is a group.
        if let Some((parent_path, _)) = test.rsplit_once('/') {
            let mut ancestors_to_announce = Vec::new();
            for (i, _) in parent_path.match_indices('/').chain([(parent_path.len(), "")]) {
                let prefix = &parent_path[..i];
                let ancestor = state.tests.entry(prefix.to_string()).or_default();
                ancestor.has_children = true;
                if !ancestor.group_announced {
                    ancestor.group_announced = true;
                    ancestors_to_announce.push(prefix.to_string());
                }
            }
            for prefix in ancestors_to_announce {
                let (parents, name) = Self::hierarchy(package, &prefix);
                events.push(Event::GroupStart(GroupRef {
                    group_name: name,
                    parent_names: parents,
                }));
            }
        }
    }

    fn on_done(
        &mut self,
        package: &str,
        test: Option<&str>,
        action: &str,
        elapsed: Option<f64>,
        events: &mut Vec<Event>,
    ) {
        self.ensure_package(package, events);
        let state = self.packages.get_mut(package).expect("just ensured");

        let status = match action {
            "pass" => Status::Pass,
            "skip" => Status::Skip,
            _ => Status::Fail,
        };

        match test {
            Some(test) => {
                let test_state = state.tests.entry(test.to_string()).or_default();
                test_state.done = true;
                let output = std::mem::take(&mut test_state.output);
                let has_children = test_state.has_children;
                if state.current_test.as_deref() == Some(test) {
                    state.current_test = None;
                }

                let (parents, name) = Self::hierarchy(package, test);
                if has_children {
                    // Intermediate subtest levels report as groups so
                    // durations roll up correctly in reports.
                    events.push(Event::GroupResult(GroupResult {
                        group_name: name,
                        parent_names: parents,
                        status,
                        duration: elapsed,
                        totals: Totals::default(),
                        stdout: (!output.is_empty()).then_some(output),
                        stderr: None,
                    }));
                } else {
                    match status {
                        Status::Pass => state.totals.passed += 1,
                        Status::Skip => state.totals.skipped += 1,
                        _ => state.totals.failed += 1,
                    }
                    events.push(Event::TestCase(TestCase {
                        test_name: name,
                        parent_names: parents,
                        status,
                        duration: elapsed,
                        error: (status == Status::Fail).then(|| TestError {
                            message: if output.is_empty() {
                                "test failed".to_string()
                            } else {
                                output.clone()
                            },
                            trace: None,
                        }),
                        stdout: (status != Status::Fail && !output.is_empty())
                            .then_some(output),
                        stderr: None,
                        xfail_reason: None,
                    }));
                }
            }
            None => {
                // Package-level completion.
                let ran_none = state.tests.is_empty();
                let final_status = if state.no_test_files || (ran_none && status == Status::Skip)
                {
                    Status::NoTests
                } else {
                    status
                };
                let output = std::mem::take(&mut state.output);
                events.push(Event::GroupResult(GroupResult {
                    group_name: package.to_string(),
                    parent_names: vec![],
                    status: final_status,
                    duration: elapsed,
                    totals: state.totals,
                    stdout: (!output.is_empty()).then_some(output),
                    stderr: None,
                }));
            }
        }
    }

    fn on_output(&mut self, package: &str, test: Option<&str>, output: &str) {
        let state = self.packages.entry(package.to_string()).or_default();
        if output.contains("[no test files]") {
            state.no_test_files = true;
        }

        // Attach to the named test, else the most recently running one,
        // else the package itself.
        let target = test
            .map(|t| t.to_string())
            .or_else(|| state.current_test.clone());
        match target {
            Some(test) => {
                state
                    .tests
                    .entry(test)
                    .or_default()
                    .output
                    .push_str(output);
            }
            None => state.output.push_str(output),
        }
    }
}

impl NativeParser for GoTestParser {
    fn handle_line(&mut self, line: &str) -> Vec<Event> {
        let parsed: GoLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(_) => {
                // Build noise and stderr chatter; not ours to interpret.
                debug!("skipping non-JSON go test line: {line}");
                return Vec::new();
            }
        };
        let Some(package) = parsed.package.as_deref() else {
            return Vec::new();
        };

        let mut events = Vec::new();
        match parsed.action.as_str() {
            "run" => {
                if let Some(test) = parsed.test.as_deref() {
                    self.on_run(package, test, &mut events);
                } else {
                    self.ensure_package(package, &mut events);
                }
            }
            "cont" => {
                if let Some(test) = parsed.test.clone()
                    && let Some(state) = self.packages.get_mut(package)
                {
                    state.current_test = Some(test);
                }
            }
            "pause" => {}
            "output" => {
                self.on_output(package, parsed.test.as_deref(), parsed.output.as_deref().unwrap_or(""));
            }
            "pass" | "fail" | "skip" => {
                self.on_done(
                    package,
                    parsed.test.as_deref(),
                    &parsed.action,
                    parsed.elapsed,
                    &mut events,
                );
            }
            other => {
                debug!("ignoring go test action {other:?}");
            }
        }
        events
    }

    fn finish(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        for package in &self.package_order {
            let Some(state) = self.packages.get_mut(package) else {
                continue;
            };
            let unfinished: Vec<String> = state
                .tests
                .iter()
                .filter(|(_, t)| !t.done && !t.has_children)
                .map(|(name, _)| name.clone())
                .collect();
            for test in unfinished {
                state.tests.get_mut(&test).expect("just listed").done = true;
                let (parents, name) = Self::hierarchy(package, &test);
                events.push(Event::TestCase(TestCase {
                    test_name: name,
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
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut GoTestParser, lines: &[&str]) -> Vec<Event> {
        let mut events = Vec::new();
        for line in lines {
            events.extend(parser.handle_line(line));
        }
        events
    }

    #[test]
    fn test_package_with_passing_tests() {
        let mut parser = GoTestParser::new();
        let events = feed(
            &mut parser,
            &[
                r#"{"Action":"run","Package":"example.com/p1","Test":"TestAdd"}"#,
                r#"{"Action":"pass","Package":"example.com/p1","Test":"TestAdd","Elapsed":0.01}"#,
                r#"{"Action":"pass","Package":"example.com/p1","Elapsed":0.05}"#,
            ],
        );

        let result = events
            .iter()
            .find_map(|e| match e {
                Event::GroupResult(r) if r.parent_names.is_empty() => Some(r),
                _ => None,
            })
            .expect("package result");
        assert_eq!(result.group_name, "example.com/p1");
        assert_eq!(result.status, Status::Pass);
        assert_eq!(result.totals.passed, 1);
    }

    #[test]
    fn test_no_test_files_package() {
        let mut parser = GoTestParser::new();
        let events = feed(
            &mut parser,
            &[
                r#"{"Action":"output","Package":"example.com/p2","Output":"?   \texample.com/p2\t[no test files]\n"}"#,
                r#"{"Action":"skip","Package":"example.com/p2","Elapsed":0}"#,
            ],
        );

        let result = events
            .iter()
            .find_map(|e| match e {
                Event::GroupResult(r) => Some(r),
                _ => None,
            })
            .expect("package result");
        assert_eq!(result.status, Status::NoTests);
    }

    #[test]
    fn test_subtests_become_nested_groups() {
        let mut parser = GoTestParser::new();
        let events = feed(
            &mut parser,
            &[
                r#"{"Action":"run","Package":"p","Test":"TestFoo"}"#,
                r#"{"Action":"run","Package":"p","Test":"TestFoo/bar"}"#,
                r#"{"Action":"pass","Package":"p","Test":"TestFoo/bar","Elapsed":0.01}"#,
                r#"{"Action":"pass","Package":"p","Test":"TestFoo","Elapsed":0.02}"#,
            ],
        );

        // TestFoo is announced as a group once bar proves it has children.
        let group_start = events.iter().any(|e| {
            matches!(e, Event::GroupStart(g)
                if g.group_name == "TestFoo" && g.parent_names == vec!["p".to_string()])
        });
        assert!(group_start, "expected TestFoo group start: {events:?}");

        // bar is a leaf test case under p > TestFoo.
        let case = events
            .iter()
            .find_map(|e| match e {
                Event::TestCase(tc) => Some(tc),
                _ => None,
            })
            .expect("leaf test case");
        assert_eq!(case.test_name, "bar");
        assert_eq!(case.parent_names, vec!["p".to_string(), "TestFoo".to_string()]);

        // TestFoo completes as a group result carrying its duration.
        let group_result = events
            .iter()
            .find_map(|e| match e {
                Event::GroupResult(r) if r.group_name == "TestFoo" => Some(r),
                _ => None,
            })
            .expect("intermediate group result");
        assert_eq!(group_result.duration, Some(0.02));
    }

    #[test]
    fn test_failure_output_attaches_to_test() {
        let mut parser = GoTestParser::new();
        let events = feed(
            &mut parser,
            &[
                r#"{"Action":"run","Package":"p","Test":"TestBad"}"#,
                r#"{"Action":"output","Package":"p","Test":"TestBad","Output":"--- FAIL: TestBad\n"}"#,
                r#"{"Action":"output","Package":"p","Test":"TestBad","Output":"    math_test.go:12: expected 2\n"}"#,
                r#"{"Action":"fail","Package":"p","Test":"TestBad","Elapsed":0.01}"#,
            ],
        );

        let case = events
            .iter()
            .find_map(|e| match e {
                Event::TestCase(tc) => Some(tc),
                _ => None,
            })
            .expect("test case");
        assert_eq!(case.status, Status::Fail);
        let error = case.error.as_ref().expect("error details");
        assert!(error.message.contains("expected 2"));
    }

    #[test]
    fn test_empty_subtest_name_is_preserved() {
        let mut parser = GoTestParser::new();
        let events = feed(
            &mut parser,
            &[
                r#"{"Action":"run","Package":"p","Test":"TestFoo"}"#,
                r#"{"Action":"run","Package":"p","Test":"TestFoo/"}"#,
                r#"{"Action":"pass","Package":"p","Test":"TestFoo/","Elapsed":0}"#,
            ],
        );

        let case = events
            .iter()
            .find_map(|e| match e {
                Event::TestCase(tc) => Some(tc),
                _ => None,
            })
            .expect("test case");
        assert_eq!(case.test_name, "");
    }

    #[test]
    fn test_non_json_lines_are_skipped() {
        let mut parser = GoTestParser::new();
        assert!(parser.handle_line("# example.com/p1 build failed").is_empty());
    }

    #[test]
    fn test_finish_errors_in_flight_tests() {
        let mut parser = GoTestParser::new();
        feed(
            &mut parser,
            &[r#"{"Action":"run","Package":"p","Test":"TestHang"}"#],
        );
        let events = parser.finish();

        let case = events
            .iter()
            .find_map(|e| match e {
                Event::TestCase(tc) => Some(tc),
                _ => None,
            })
            .expect("errored case");
        assert_eq!(case.status, Status::Error);
        assert!(case.error.as_ref().unwrap().message.contains("runner exited"));
    }
}
