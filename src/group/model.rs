//! The hierarchical test-group data model.
//!
//! Groups are the universal unit of the report tree: a file, a package,
//! a crate, a describe block, a class, or a subtest level are all just
//! groups at different depths. Identity is a pure function of the
//! hierarchy, which is what lets discovery events from parallel workers
//! collapse onto one entity no matter the order they arrive in.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::ipc::{Status, TestError, Totals};

/// Deterministic group identifier: the first 16 bytes of SHA-256 over
/// the `:`-joined hierarchy, hex-encoded.
pub type GroupId = String;

/// Computes the identifier for a group at `parents` / `name`.
pub fn group_id(parents: &[String], name: &str) -> GroupId {
    let mut joined = String::new();
    for p in parents {
        joined.push_str(p);
        joined.push(':');
    }
    joined.push_str(name);

    let digest = Sha256::digest(joined.as_bytes());
    let mut id = String::with_capacity(32);
    for byte in &digest[..16] {
        id.push_str(&format!("{byte:02x}"));
    }
    id
}

/// One node in the group tree.
#[derive(Debug, Clone)]
pub struct TestGroup {
    pub id: GroupId,
    /// The runner's native name for this level.
    pub name: String,
    /// Ancestor names from the root down, excluding this group.
    pub parent_names: Vec<String>,
    /// Sanitized directory segment, unique among siblings.
    pub dir_name: String,
    /// Last explicitly assigned status (pending/running, or a terminal
    /// status delivered by a group-result event).
    pub status: Status,
    /// Whether `status` came from a terminal group-result event.
    pub has_result: bool,
    /// Aggregate totals delivered by the group-result event, if any.
    pub totals: Option<Totals>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Duration in seconds when supplied directly by an event.
    pub duration: Option<f64>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    /// Captured group-level output (setup/teardown), when an event
    /// carries it. The process-level catchall is `output.log`.
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// Test cases directly at this level, in first-seen order.
    pub cases: Vec<CaseRecord>,
    /// Child group ids, in first-discovery order.
    pub subgroups: Vec<GroupId>,
}

impl TestGroup {
    pub fn new(
        name: String,
        parent_names: Vec<String>,
        dir_name: String,
        now: DateTime<Utc>,
    ) -> Self {
        let id = group_id(&parent_names, &name);
        Self {
            id,
            name,
            parent_names,
            dir_name,
            status: Status::Pending,
            has_result: false,
            totals: None,
            start_time: None,
            end_time: None,
            duration: None,
            created: now,
            updated: now,
            stdout: None,
            stderr: None,
            cases: Vec::new(),
            subgroups: Vec::new(),
        }
    }

    /// Nesting depth (0 for roots).
    pub fn depth(&self) -> usize {
        self.parent_names.len()
    }

    /// Effective duration in seconds, preferring the explicit value.
    pub fn duration_secs(&self) -> Option<f64> {
        self.duration.or_else(|| {
            let (start, end) = (self.start_time?, self.end_time?);
            Some((end - start).num_milliseconds() as f64 / 1000.0)
        })
    }

    /// Upserts a test case by name; the newest event wins.
    pub fn upsert_case(&mut self, case: CaseRecord) {
        match self.cases.iter_mut().find(|c| c.name == case.name) {
            Some(existing) => *existing = case,
            None => self.cases.push(case),
        }
    }
}

/// A leaf test case.
#[derive(Debug, Clone)]
pub struct CaseRecord {
    pub name: String,
    pub status: Status,
    /// Duration in seconds.
    pub duration: Option<f64>,
    pub error: Option<TestError>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub xfail_reason: Option<String>,
}

impl CaseRecord {
    /// Status glyph used in reports.
    pub fn glyph(&self) -> &'static str {
        status_glyph(self.status)
    }
}

/// Report glyph for a status.
pub fn status_glyph(status: Status) -> &'static str {
    match status {
        Status::Pass => "✓",
        Status::Fail | Status::Error => "✗",
        Status::Skip | Status::NoTests => "○",
        Status::Xfail => "⊗",
        Status::Xpass => "⊕",
        Status::Pending | Status::Running => "·",
    }
}

/// Folds child statuses into a parent status.
///
/// Used for parents that never received their own group-result event.
/// The rules, in order: any failing child fails the parent; an
/// unexpected pass surfaces as a plain pass; a parent whose children
/// were all skipped (or had nothing to run) is itself skipped, with
/// skip winning over no-tests; everything else is a pass. Expected
/// failures never fail the parent.
pub fn fold_statuses<I: IntoIterator<Item = Status>>(children: I) -> Status {
    let mut saw_any = false;
    let mut all_skip_like = true;
    let mut saw_skip = false;

    for status in children {
        saw_any = true;
        match status {
            Status::Fail | Status::Error => return Status::Fail,
            Status::Skip => saw_skip = true,
            Status::NoTests => {}
            _ => all_skip_like = false,
        }
    }

    if !saw_any {
        return Status::NoTests;
    }
    if all_skip_like {
        return if saw_skip { Status::Skip } else { Status::NoTests };
    }
    Status::Pass
}

/// Accumulates a case status into recursive totals.
pub fn count_case(totals: &mut Totals, status: Status) {
    match status {
        Status::Pass => totals.passed += 1,
        Status::Fail | Status::Error => totals.failed += 1,
        Status::Skip | Status::NoTests => totals.skipped += 1,
        Status::Xfail => totals.xfailed += 1,
        Status::Xpass => totals.xpassed += 1,
        Status::Pending | Status::Running => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_id_is_deterministic() {
        let parents = vec!["math.test.js".to_string()];
        let a = group_id(&parents, "add");
        let b = group_id(&parents, "add");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_group_id_depends_on_hierarchy() {
        let a = group_id(&["f".to_string()], "t");
        let b = group_id(&["g".to_string()], "t");
        let c = group_id(&[], "t");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_group_id_matches_known_digest() {
        // sha256("a:b")[..16] in hex.
        let id = group_id(&["a".to_string()], "b");
        let digest = Sha256::digest(b"a:b");
        let expected: String = digest[..16].iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(id, expected);
    }

    #[test]
    fn test_fold_failure_wins() {
        let folded = fold_statuses([Status::Pass, Status::Fail, Status::Skip]);
        assert_eq!(folded, Status::Fail);
        assert_eq!(fold_statuses([Status::Error]), Status::Fail);
    }

    #[test]
    fn test_fold_xfail_does_not_fail_parent() {
        assert_eq!(fold_statuses([Status::Pass, Status::Xfail]), Status::Pass);
        assert_eq!(fold_statuses([Status::Xfail]), Status::Pass);
    }

    #[test]
    fn test_fold_xpass_is_pass() {
        assert_eq!(fold_statuses([Status::Xpass, Status::Skip]), Status::Pass);
    }

    #[test]
    fn test_fold_all_skipped() {
        assert_eq!(fold_statuses([Status::Skip, Status::Skip]), Status::Skip);
        assert_eq!(fold_statuses([Status::NoTests]), Status::NoTests);
        assert_eq!(
            fold_statuses([Status::Skip, Status::NoTests]),
            Status::Skip
        );
    }

    #[test]
    fn test_upsert_case_last_event_wins() {
        let now = Utc::now();
        let mut group = TestGroup::new("f".to_string(), vec![], "f".to_string(), now);

        group.upsert_case(CaseRecord {
            name: "t".to_string(),
            status: Status::Running,
            duration: None,
            error: None,
            stdout: None,
            stderr: None,
            xfail_reason: None,
        });
        group.upsert_case(CaseRecord {
            name: "t".to_string(),
            status: Status::Pass,
            duration: Some(0.5),
            error: None,
            stdout: None,
            stderr: None,
            xfail_reason: None,
        });

        assert_eq!(group.cases.len(), 1);
        assert_eq!(group.cases[0].status, Status::Pass);
        assert_eq!(group.cases[0].duration, Some(0.5));
    }
}
