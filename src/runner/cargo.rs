//! `cargo test` and `cargo nextest` runner definitions (native-parse).
//!
//! Both use libtest's JSON output. For `cargo test` that format is
//! nightly-gated, so the child — and only the child — gets
//! `RUSTC_BOOTSTRAP=1`. Toolchain specifiers (`cargo +nightly test`)
//! are tolerated by skipping the `+...` token during detection.

use std::path::Path;

use super::{ProjectContext, RewrittenCommand, RunnerDefinition};
use crate::adapter::AdapterKind;

/// Subcommand position, accounting for a `+toolchain` specifier.
fn cargo_subcommand(args: &[String]) -> Option<(usize, &str)> {
    if args.first().map(|s| s.as_str()) != Some("cargo") {
        return None;
    }
    let index = if args.get(1).is_some_and(|a| a.starts_with('+')) {
        2
    } else {
        1
    };
    args.get(index).map(|s| (index, s.as_str()))
}

pub struct CargoTest;

impl RunnerDefinition for CargoTest {
    fn name(&self) -> &'static str {
        "cargo test"
    }

    fn adapter(&self) -> Option<AdapterKind> {
        None
    }

    fn detect(&self, args: &[String], _project: &ProjectContext) -> bool {
        matches!(cargo_subcommand(args), Some((_, "test")))
    }

    /// Appends the libtest JSON flags behind the `--` separator.
    fn rewrite(&self, args: &[String], _adapter_path: Option<&Path>) -> RewrittenCommand {
        let mut rewritten = args.to_vec();
        if !rewritten.iter().any(|a| a == "--") {
            rewritten.push("--".to_string());
        }
        for flag in ["-Z", "unstable-options", "--format", "json", "--report-time"] {
            rewritten.push(flag.to_string());
        }

        let mut cmd = RewrittenCommand::from_args(&rewritten);
        cmd.env
            .push(("RUSTC_BOOTSTRAP".to_string(), "1".to_string()));
        cmd
    }
}

pub struct CargoNextest;

impl RunnerDefinition for CargoNextest {
    fn name(&self) -> &'static str {
        "cargo nextest"
    }

    fn adapter(&self) -> Option<AdapterKind> {
        None
    }

    fn detect(&self, args: &[String], _project: &ProjectContext) -> bool {
        match cargo_subcommand(args) {
            Some((index, "nextest")) => {
                args.get(index + 1).map(|s| s.as_str()) == Some("run")
            }
            _ => false,
        }
    }

    /// Inserts the experimental libtest-json flags after `run`.
    fn rewrite(&self, args: &[String], _adapter_path: Option<&Path>) -> RewrittenCommand {
        let mut rewritten = args.to_vec();
        let run_index = rewritten
            .iter()
            .position(|a| a == "run")
            .unwrap_or(rewritten.len() - 1);
        rewritten.insert(run_index + 1, "libtest-json".to_string());
        rewritten.insert(run_index + 1, "--message-format".to_string());

        let mut cmd = RewrittenCommand::from_args(&rewritten);
        cmd.env.push((
            "NEXTEST_EXPERIMENTAL_LIBTEST_JSON".to_string(),
            "1".to_string(),
        ));
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_detects_with_toolchain_specifier() {
        let project = ProjectContext::default();
        assert!(CargoTest.detect(&args(&["cargo", "test"]), &project));
        assert!(CargoTest.detect(&args(&["cargo", "+nightly", "test"]), &project));
        assert!(!CargoTest.detect(&args(&["cargo", "build"]), &project));
        assert!(!CargoTest.detect(&args(&["cargo", "nextest", "run"]), &project));
    }

    #[test]
    fn test_cargo_test_rewrite_appends_libtest_flags() {
        let cmd = CargoTest.rewrite(&args(&["cargo", "test", "--workspace"]), None);
        assert_eq!(cmd.program, "cargo");
        assert_eq!(
            cmd.args,
            vec![
                "test",
                "--workspace",
                "--",
                "-Z",
                "unstable-options",
                "--format",
                "json",
                "--report-time"
            ]
        );
        assert_eq!(
            cmd.env,
            vec![("RUSTC_BOOTSTRAP".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn test_cargo_test_reuses_existing_separator() {
        let cmd = CargoTest.rewrite(&args(&["cargo", "test", "--", "my_filter"]), None);
        assert_eq!(cmd.args.iter().filter(|a| *a == "--").count(), 1);
        assert!(cmd.args.ends_with(&["--report-time".to_string()]));
    }

    #[test]
    fn test_nextest_rewrite_inserts_message_format() {
        let cmd = CargoNextest.rewrite(&args(&["cargo", "nextest", "run", "-p", "core"]), None);
        assert_eq!(
            cmd.args,
            vec!["nextest", "run", "--message-format", "libtest-json", "-p", "core"]
        );
        assert_eq!(
            cmd.env,
            vec![(
                "NEXTEST_EXPERIMENTAL_LIBTEST_JSON".to_string(),
                "1".to_string()
            )]
        );
    }

    #[test]
    fn test_nextest_requires_run_subcommand() {
        let project = ProjectContext::default();
        assert!(!CargoNextest.detect(&args(&["cargo", "nextest", "list"]), &project));
        assert!(CargoNextest.detect(&args(&["cargo", "+beta", "nextest", "run"]), &project));
    }
}
