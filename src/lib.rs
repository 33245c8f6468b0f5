//! # 3pio
//!
//! A wrapper around existing test runners that produces persistent,
//! structured Markdown reports of a test run while keeping the user's
//! familiar console experience. `3pio npm test` or
//! `3pio cargo test --workspace` runs the underlying command unchanged
//! in spirit, and leaves behind `.3pio/runs/<run-id>/` with a
//! hierarchical report tree and the raw output.
//!
//! ## Architecture
//!
//! The crate is organized around one event pipeline:
//!
//! - [`runner`] — ordered registry that detects which runner a command
//!   uses (Jest, Vitest, Mocha, Cypress, pytest, `go test`,
//!   `cargo test`, `cargo nextest`) and rewrites the command line to
//!   inject reporters or JSON-output flags.
//! - [`adapter`] — embedded reporter/plugin sources for the
//!   adapter-based runners, materialized per run with the IPC path
//!   baked in.
//! - [`ipc`] — the append-only JSON-Lines event file shared by
//!   adapters and native parsers, with a tailing reader.
//! - [`parser`] — native processors translating `go test -json` and
//!   libtest JSON output into the same events an adapter would emit.
//! - [`group`] — the in-memory tree of test groups: deterministic ids,
//!   order-independent event application, status folding.
//! - [`report`] — debounced Markdown regeneration: per-group
//!   `index.md` files and the top-level `test-run.md`.
//! - [`console`] — the terse terminal stream.
//! - [`orchestrator`] — subprocess lifecycle, signal handling, output
//!   teeing, ordered shutdown, exit-code mirroring.
//! - [`run`] — run identity and the per-run directory layout.

pub mod adapter;
pub mod console;
pub mod group;
pub mod ipc;
pub mod orchestrator;
pub mod parser;
pub mod report;
pub mod run;
pub mod runner;

// Re-export the types most embedders need.

pub use group::{GroupManager, GroupSnapshot};
pub use ipc::{Event, Status};
pub use orchestrator::{LaunchError, run as run_command};
pub use report::ReportEngine;
pub use run::RunDir;
pub use runner::{RunnerRegistry, RewrittenCommand};
