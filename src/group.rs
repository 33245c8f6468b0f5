//! In-memory test-group tree and event application.
//!
//! The [`GroupManager`] is the single authority on run state. It ingests
//! IPC events arriving in arbitrary order from parallel workers, keeps a
//! tree of [`TestGroup`]s keyed by deterministic ids, and reports which
//! groups became dirty so the render side can regenerate their reports.
//!
//! # Concurrency
//!
//! All event application happens under one mutex and is O(depth) per
//! event. The lock is never held across I/O: rendering works from
//! snapshots cloned out of the tree.

pub mod model;

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::ipc::{Event, Status, Totals};
use crate::report::paths::{assign_unique, sanitize_segment};

pub use model::{CaseRecord, GroupId, TestGroup, fold_statuses, group_id, status_glyph};

/// What changed as a result of applying one event.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    /// Groups whose reports need regeneration.
    pub dirty: Vec<GroupId>,
    /// Root groups that just received their terminal result.
    pub completions: Vec<RootCompletion>,
    /// Whether `test-run.md` needs regeneration.
    pub run_file_dirty: bool,
}

/// Console-facing summary of a completed root group.
#[derive(Debug, Clone)]
pub struct RootCompletion {
    pub name: String,
    pub status: Status,
    pub duration: Option<f64>,
    /// Up to three failed test names, plus how many more there were.
    pub failed_tests: Vec<String>,
    pub more_failed: usize,
    /// Report path relative to the run directory.
    pub report_path: String,
}

/// Rendering snapshot of one group, cloned out under the lock.
#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    pub name: String,
    pub parent_names: Vec<String>,
    /// Sanitized directory segments from the root group to this one.
    pub dir_chain: Vec<String>,
    pub status: Status,
    pub duration: Option<f64>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub cases: Vec<CaseRecord>,
    pub children: Vec<ChildSummary>,
    pub recursive: Totals,
}

impl GroupSnapshot {
    pub fn is_root(&self) -> bool {
        self.parent_names.is_empty()
    }
}

/// One row of a subgroup table.
#[derive(Debug, Clone)]
pub struct ChildSummary {
    pub name: String,
    pub dir_name: String,
    pub status: Status,
    pub tests: u64,
    pub duration: Option<f64>,
}

/// Snapshot of the whole run, for `test-run.md` and the final summary.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub roots: Vec<ChildSummary>,
    pub totals: Totals,
    pub collected: Option<u64>,
}

#[derive(Default)]
struct GroupTree {
    groups: HashMap<GroupId, TestGroup>,
    roots: Vec<GroupId>,
    /// Directory names already used per parent ("" keys the root level).
    sibling_dirs: HashMap<GroupId, HashSet<String>>,
    collected: Option<u64>,
}

/// The shared, lock-protected group tree.
pub struct GroupManager {
    state: Mutex<GroupTree>,
}

impl Default for GroupManager {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GroupTree::default()),
        }
    }

    /// Applies one IPC event to the tree.
    ///
    /// Creation is idempotent: any event mentioning an unknown hierarchy
    /// materializes the missing ancestors as pending groups. Orphan test
    /// cases (no parent at all) are logged and dropped.
    pub fn apply(&self, event: &Event) -> ApplyOutcome {
        let now = Utc::now();
        let mut tree = self.state.lock().expect("group tree lock poisoned");
        let mut outcome = ApplyOutcome::default();

        match event {
            Event::GroupDiscovered(g) => {
                let id = tree.ensure_group(&g.parent_names, &g.group_name, now);
                outcome.dirty.push(id);
                outcome.run_file_dirty = true;
            }
            Event::GroupStart(g) => {
                let id = tree.ensure_group(&g.parent_names, &g.group_name, now);
                let group = tree.groups.get_mut(&id).expect("just ensured");
                if group.status == Status::Pending {
                    group.status = Status::Running;
                }
                group.start_time.get_or_insert(now);
                group.updated = now;
                outcome.dirty.push(id);
                outcome.run_file_dirty = true;
            }
            Event::TestCase(tc) => {
                let Some((parent_name, ancestors)) = tc.parent_names.split_last() else {
                    warn!("dropping orphan test case {:?} (no parent group)", tc.test_name);
                    return outcome;
                };
                let parent_id = tree.ensure_group(ancestors, parent_name, now);
                let parent = tree.groups.get_mut(&parent_id).expect("just ensured");
                parent.upsert_case(CaseRecord {
                    name: tc.test_name.clone(),
                    status: tc.status,
                    duration: tc.duration,
                    error: tc.error.clone(),
                    stdout: tc.stdout.clone(),
                    stderr: tc.stderr.clone(),
                    xfail_reason: tc.xfail_reason.clone(),
                });
                parent.updated = now;
                outcome.dirty.push(parent_id);
                outcome.dirty.extend(tree.ancestor_ids(&tc.parent_names));
                outcome.run_file_dirty = true;
            }
            Event::GroupResult(gr) => {
                let id = tree.ensure_group(&gr.parent_names, &gr.group_name, now);
                let group = tree.groups.get_mut(&id).expect("just ensured");
                if gr.status.is_terminal() {
                    group.status = gr.status;
                    group.has_result = true;
                }
                group.totals = Some(gr.totals);
                group.duration = gr.duration.or(group.duration);
                if gr.stdout.is_some() {
                    group.stdout = gr.stdout.clone();
                }
                if gr.stderr.is_some() {
                    group.stderr = gr.stderr.clone();
                }
                group.end_time.get_or_insert(now);
                group.updated = now;

                outcome.dirty.push(id.clone());
                outcome
                    .dirty
                    .extend(tree.ancestor_ids(&gr.parent_names));
                outcome.run_file_dirty = true;

                if gr.parent_names.is_empty() {
                    outcome.completions.push(tree.root_completion(&id));
                }
            }
            Event::CollectionStart(c) | Event::CollectionFinish(c) => {
                if c.collected.is_some() {
                    tree.collected = c.collected;
                }
                outcome.run_file_dirty = true;
            }
            Event::RunComplete(_) => {
                debug!("producer signaled run complete");
            }
        }

        outcome
    }

    /// Snapshot of one group for rendering. `None` if the id is unknown.
    pub fn snapshot(&self, id: &GroupId) -> Option<GroupSnapshot> {
        let tree = self.state.lock().expect("group tree lock poisoned");
        tree.snapshot(id)
    }

    /// Snapshot of the run roll-up for `test-run.md` and the console.
    pub fn run_snapshot(&self) -> RunSnapshot {
        let tree = self.state.lock().expect("group tree lock poisoned");
        let mut totals = Totals::default();
        let roots = tree
            .roots
            .iter()
            .filter_map(|id| tree.groups.get(id))
            .map(|g| {
                let recursive = tree.recursive_totals(g);
                totals.passed += recursive.passed;
                totals.failed += recursive.failed;
                totals.skipped += recursive.skipped;
                totals.xfailed += recursive.xfailed;
                totals.xpassed += recursive.xpassed;
                ChildSummary {
                    name: g.name.clone(),
                    dir_name: g.dir_name.clone(),
                    status: tree.derived_status(g),
                    tests: recursive.total(),
                    duration: g.duration_secs(),
                }
            })
            .collect();

        RunSnapshot {
            roots,
            totals,
            collected: tree.collected,
        }
    }

    /// Ids of every group currently in the tree, roots first.
    pub fn all_ids(&self) -> Vec<GroupId> {
        let tree = self.state.lock().expect("group tree lock poisoned");
        let mut ids = Vec::with_capacity(tree.groups.len());
        let mut stack: Vec<GroupId> = tree.roots.iter().rev().cloned().collect();
        while let Some(id) = stack.pop() {
            if let Some(g) = tree.groups.get(&id) {
                stack.extend(g.subgroups.iter().rev().cloned());
            }
            ids.push(id);
        }
        ids
    }
}

impl GroupTree {
    /// Ensures the group (and its whole ancestor chain) exists.
    fn ensure_group(
        &mut self,
        parents: &[String],
        name: &str,
        now: DateTime<Utc>,
    ) -> GroupId {
        let id = group_id(parents, name);
        if self.groups.contains_key(&id) {
            return id;
        }

        let parent_id = match parents.split_last() {
            Some((pname, pparents)) => self.ensure_group(pparents, pname, now),
            None => GroupId::new(),
        };

        let used = self.sibling_dirs.entry(parent_id.clone()).or_default();
        let dir_name = assign_unique(used, &sanitize_segment(name));
        used.insert(dir_name.clone());

        let group = TestGroup::new(name.to_string(), parents.to_vec(), dir_name, now);
        if parents.is_empty() {
            self.roots.push(id.clone());
        } else if let Some(parent) = self.groups.get_mut(&parent_id) {
            parent.subgroups.push(id.clone());
        }
        self.groups.insert(id.clone(), group);
        id
    }

    /// Ids of every proper ancestor of the hierarchy given by `names`.
    fn ancestor_ids(&self, names: &[String]) -> Vec<GroupId> {
        (0..names.len())
            .map(|i| group_id(&names[..i], &names[i]))
            .collect()
    }

    /// Display status: explicit result wins, otherwise fold children.
    fn derived_status(&self, group: &TestGroup) -> Status {
        if group.has_result {
            return group.status;
        }

        let mut statuses: Vec<Status> = group.cases.iter().map(|c| c.status).collect();
        statuses.extend(
            group
                .subgroups
                .iter()
                .filter_map(|id| self.groups.get(id))
                .map(|child| self.derived_status(child)),
        );

        if statuses.is_empty() {
            return group.status;
        }
        if statuses.iter().any(|s| !s.is_terminal()) {
            return Status::Running;
        }
        fold_statuses(statuses)
    }

    /// Recursive counts over all descendant test cases.
    ///
    /// Falls back to event-supplied totals when no individual cases were
    /// reported (some runners only send aggregates).
    fn recursive_totals(&self, group: &TestGroup) -> Totals {
        let mut totals = Totals::default();
        self.accumulate(group, &mut totals);
        if totals.total() == 0
            && let Some(event_totals) = group.totals
        {
            return event_totals;
        }
        totals
    }

    fn accumulate(&self, group: &TestGroup, totals: &mut Totals) {
        for case in &group.cases {
            model::count_case(totals, case.status);
        }
        for child in group.subgroups.iter().filter_map(|id| self.groups.get(id)) {
            self.accumulate(child, totals);
        }
    }

    fn snapshot(&self, id: &GroupId) -> Option<GroupSnapshot> {
        let group = self.groups.get(id)?;

        let mut dir_chain: Vec<String> = (0..group.parent_names.len())
            .filter_map(|i| {
                let pid = group_id(&group.parent_names[..i], &group.parent_names[i]);
                self.groups.get(&pid).map(|g| g.dir_name.clone())
            })
            .collect();
        dir_chain.push(group.dir_name.clone());

        let children = group
            .subgroups
            .iter()
            .filter_map(|cid| self.groups.get(cid))
            .map(|child| ChildSummary {
                name: child.name.clone(),
                dir_name: child.dir_name.clone(),
                status: self.derived_status(child),
                tests: self.recursive_totals(child).total(),
                duration: child.duration_secs(),
            })
            .collect();

        Some(GroupSnapshot {
            name: group.name.clone(),
            parent_names: group.parent_names.clone(),
            dir_chain,
            status: self.derived_status(group),
            duration: group.duration_secs(),
            created: group.created,
            updated: group.updated,
            stdout: group.stdout.clone(),
            stderr: group.stderr.clone(),
            cases: group.cases.clone(),
            children,
            recursive: self.recursive_totals(group),
        })
    }

    /// Builds the console notice for a root group that just finished.
    fn root_completion(&self, id: &GroupId) -> RootCompletion {
        let group = &self.groups[id];
        let mut failed = Vec::new();
        self.collect_failed_names(group, &mut failed);
        let more = failed.len().saturating_sub(3);
        failed.truncate(3);

        RootCompletion {
            name: group.name.clone(),
            status: self.derived_status(group),
            duration: group.duration_secs(),
            failed_tests: failed,
            more_failed: more,
            report_path: format!("reports/{}/index.md", group.dir_name),
        }
    }

    fn collect_failed_names(&self, group: &TestGroup, out: &mut Vec<String>) {
        for case in &group.cases {
            if case.status.is_failure() {
                out.push(case.name.clone());
            }
        }
        for child in group.subgroups.iter().filter_map(|id| self.groups.get(id)) {
            self.collect_failed_names(child, out);
        }
    }
}
