//! The IPC event pipeline shared by adapters and native parsers.
//!
//! All test events flow through a single append-only JSON-Lines file
//! (`ipc.jsonl` in the run directory). In-process adapters for JS and
//! Python runners append to it directly from the child process; for
//! native runners a parser task inside 3pio appends equivalent events.
//! One reader tails the file and delivers typed [`Event`]s to the group
//! manager.
//!
//! # Wire format
//!
//! One UTF-8 JSON object per line, shaped as
//! `{"eventType": "...", "payload": {...}}`. Writers rely on atomic
//! appends for correctness, so each line is kept well under 4 KiB by
//! trimming oversized error payloads. Readers ignore unknown fields and
//! skip unparseable lines; the schema is forward-compatible by
//! construction.
//!
//! # Ordering
//!
//! The only guarantee is that lines are delivered exactly once, in file
//! order. Adapters in parallel workers interleave arbitrarily; the group
//! model is what makes that safe.

pub mod reader;
pub mod writer;

use serde::{Deserialize, Serialize};

pub use reader::IpcReader;
pub use writer::IpcWriter;

/// Result type for IPC operations.
pub type IpcResult<T> = Result<T, IpcError>;

/// Errors raised by the IPC writer and reader.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// I/O failure on the event file.
    #[error("IPC file error: {0}")]
    Io(#[from] std::io::Error),

    /// An event could not be serialized.
    #[error("failed to encode IPC event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A single event on the IPC stream.
///
/// The variants map one-to-one onto the wire `eventType` values emitted
/// by adapters and native parsers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "payload")]
pub enum Event {
    /// A group (file, package, crate, describe block, ...) exists.
    #[serde(rename = "testGroupDiscovered")]
    GroupDiscovered(GroupRef),

    /// A group has begun executing.
    #[serde(rename = "testGroupStart")]
    GroupStart(GroupRef),

    /// Terminal result for a group, with aggregate totals.
    #[serde(rename = "testGroupResult")]
    GroupResult(GroupResult),

    /// Result (or update) for one test case.
    #[serde(rename = "testCase")]
    TestCase(TestCase),

    /// The runner started collecting tests.
    #[serde(rename = "collectionStart")]
    CollectionStart(Collection),

    /// The runner finished collecting tests.
    #[serde(rename = "collectionFinish")]
    CollectionFinish(Collection),

    /// The producing side considers the run complete.
    #[serde(rename = "runComplete")]
    RunComplete(Empty),
}

/// Identifies a group by its name and ancestor chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRef {
    pub group_name: String,
    #[serde(default)]
    pub parent_names: Vec<String>,
}

/// Terminal result event for a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupResult {
    pub group_name: String,
    #[serde(default)]
    pub parent_names: Vec<String>,
    pub status: Status,
    /// Duration in seconds, when the producer knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default)]
    pub totals: Totals,
    /// Group-level captured output (setup/teardown, package banners).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

/// Aggregate counts carried by a [`GroupResult`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    #[serde(default)]
    pub passed: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub skipped: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub xfailed: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub xpassed: u64,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl Totals {
    /// Total number of counted test cases.
    pub fn total(&self) -> u64 {
        self.passed + self.failed + self.skipped + self.xfailed + self.xpassed
    }
}

/// A test case result event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub test_name: String,
    #[serde(default)]
    pub parent_names: Vec<String>,
    pub status: Status,
    /// Duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TestError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xfail_reason: Option<String>,
}

/// Failure details attached to a test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

/// Collection progress payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collected: Option<u64>,
}

/// Empty payload for events that carry none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Status of a test case or group, shared across the whole pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Running,
    Pass,
    Fail,
    Skip,
    NoTests,
    Error,
    Xfail,
    Xpass,
}

impl Status {
    /// Whether this status is terminal (no further transitions expected).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Pending | Status::Running)
    }

    /// Whether this status counts as a failure for aggregation.
    pub fn is_failure(&self) -> bool {
        matches!(self, Status::Fail | Status::Error)
    }

    /// Uppercase label used in reports and on the console.
    pub fn label(&self) -> &'static str {
        match self {
            Status::Pending => "PENDING",
            Status::Running => "RUNNING",
            Status::Pass => "PASS",
            Status::Fail => "FAIL",
            Status::Skip => "SKIP",
            Status::NoTests => "NO_TESTS",
            Status::Error => "ERROR",
            Status::Xfail => "XFAIL",
            Status::Xpass => "XPASS",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_round_trip() {
        let event = Event::TestCase(TestCase {
            test_name: "adds two numbers".to_string(),
            parent_names: vec!["math.test.js".to_string(), "add".to_string()],
            status: Status::Fail,
            duration: Some(0.012),
            error: Some(TestError {
                message: "expected 2, got 3".to_string(),
                trace: None,
            }),
            stdout: None,
            stderr: None,
            xfail_reason: None,
        });

        let line = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&line).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let event = Event::GroupDiscovered(GroupRef {
            group_name: "pkg".to_string(),
            parent_names: vec![],
        });
        let line = serde_json::to_string(&event).unwrap();

        assert!(line.contains(r#""eventType":"testGroupDiscovered""#));
        assert!(line.contains(r#""groupName":"pkg""#));
        assert!(line.contains(r#""parentNames":[]"#));
    }

    #[test]
    fn test_unknown_payload_fields_are_ignored() {
        let line = r#"{"eventType":"testCase","payload":{"testName":"t","parentNames":["f"],"status":"pass","someFutureField":42}}"#;
        let event: Event = serde_json::from_str(line).unwrap();
        match event {
            Event::TestCase(tc) => assert_eq!(tc.status, Status::Pass),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_type_is_an_error() {
        let line = r#"{"eventType":"somethingElse","payload":{}}"#;
        assert!(serde_json::from_str::<Event>(line).is_err());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_string(&Status::NoTests).unwrap(), r#""no_tests""#);
        assert_eq!(serde_json::to_string(&Status::Xfail).unwrap(), r#""xfail""#);
    }
}
