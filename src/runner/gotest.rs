//! `go test` runner definition (native-parse).

use std::path::Path;

use super::{ProjectContext, RewrittenCommand, RunnerDefinition, RunnerResult, reject_flags};
use crate::adapter::AdapterKind;

pub struct GoTest;

impl RunnerDefinition for GoTest {
    fn name(&self) -> &'static str {
        "go test"
    }

    fn adapter(&self) -> Option<AdapterKind> {
        None
    }

    fn detect(&self, args: &[String], _project: &ProjectContext) -> bool {
        args.first().map(|s| s.as_str()) == Some("go")
            && args.get(1).map(|s| s.as_str()) == Some("test")
    }

    fn reject_unsupported(&self, args: &[String]) -> RunnerResult<()> {
        reject_flags(
            args,
            "go test",
            "coverage",
            &["-cover", "-coverprofile", "-covermode"],
        )
    }

    /// Ensures `-json` is present so every line of stdout is parseable.
    fn rewrite(&self, args: &[String], _adapter_path: Option<&Path>) -> RewrittenCommand {
        let mut rewritten = args.to_vec();
        if !rewritten.iter().any(|a| a == "-json") {
            // Directly after the `test` subcommand, before package patterns.
            rewritten.insert(2, "-json".to_string());
        }
        RewrittenCommand::from_args(&rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_detects_go_test_only() {
        let project = ProjectContext::default();
        assert!(GoTest.detect(&args(&["go", "test", "./..."]), &project));
        assert!(!GoTest.detect(&args(&["go", "build"]), &project));
        assert!(!GoTest.detect(&args(&["cargo", "test"]), &project));
    }

    #[test]
    fn test_json_flag_inserted_once() {
        let cmd = GoTest.rewrite(&args(&["go", "test", "./..."]), None);
        assert_eq!(cmd.args, vec!["test", "-json", "./..."]);

        let cmd = GoTest.rewrite(&args(&["go", "test", "-json", "./..."]), None);
        assert_eq!(cmd.args, vec!["test", "-json", "./..."]);
    }

    #[test]
    fn test_is_native() {
        assert!(GoTest.is_native());
    }
}
