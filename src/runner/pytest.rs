//! pytest runner definition.
//!
//! Adapter-based: the run is instrumented with `-p threepio_adapter`,
//! and the materialized adapter directory is prepended to `PYTHONPATH`
//! in the child environment so the plugin module resolves regardless of
//! where pytest is invoked from.

use std::path::Path;

use crate::adapter::AdapterKind;
use super::{ProjectContext, RewrittenCommand, RunnerDefinition, RunnerResult, has_command_token, reject_flags};

pub struct Pytest;

impl RunnerDefinition for Pytest {
    fn name(&self) -> &'static str {
        "pytest"
    }

    fn adapter(&self) -> Option<AdapterKind> {
        Some(AdapterKind::Pytest)
    }

    fn detect(&self, args: &[String], _project: &ProjectContext) -> bool {
        if has_command_token(args, "pytest") || has_command_token(args, "py.test") {
            return true;
        }
        // `python -m pytest` and friends.
        args.windows(2).any(|w| {
            w[0] == "-m"
                && w[1] == "pytest"
        })
    }

    fn reject_unsupported(&self, args: &[String]) -> RunnerResult<()> {
        reject_flags(args, "pytest", "coverage", &["--cov", "--cov-report"])?;
        reject_flags(args, "pytest", "watch", &["--looponfail", "-f"])
    }

    fn rewrite(&self, args: &[String], adapter_path: Option<&Path>) -> RewrittenCommand {
        let mut rewritten = args.to_vec();
        rewritten.push("-p".to_string());
        rewritten.push("threepio_adapter".to_string());

        let mut cmd = RewrittenCommand::from_args(&rewritten);
        if let Some(plugin_dir) = adapter_path.and_then(|p| p.parent()) {
            let mut python_path = plugin_dir.display().to_string();
            if let Ok(existing) = std::env::var("PYTHONPATH")
                && !existing.is_empty()
            {
                python_path.push(if cfg!(windows) { ';' } else { ':' });
                python_path.push_str(&existing);
            }
            cmd.env.push(("PYTHONPATH".to_string(), python_path));
        }
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunnerError;
    use std::path::PathBuf;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_detects_direct_and_module_invocations() {
        let project = ProjectContext::default();
        assert!(Pytest.detect(&args(&["pytest", "tests/"]), &project));
        assert!(Pytest.detect(&args(&["python", "-m", "pytest"]), &project));
        assert!(Pytest.detect(&args(&[".venv/bin/pytest"]), &project));
        assert!(!Pytest.detect(&args(&["python", "-m", "unittest"]), &project));
    }

    #[test]
    fn test_rewrite_injects_plugin_and_pythonpath() {
        let adapter = PathBuf::from("/runs/x/adapters/threepio_adapter.py");
        let cmd = Pytest.rewrite(&args(&["pytest", "-q"]), Some(&adapter));

        assert_eq!(cmd.program, "pytest");
        assert!(cmd.args.ends_with(&["-p".to_string(), "threepio_adapter".to_string()]));
        let (key, value) = &cmd.env[0];
        assert_eq!(key, "PYTHONPATH");
        assert!(value.starts_with("/runs/x/adapters"));
    }

    #[test]
    fn test_coverage_is_refused() {
        let err = Pytest
            .reject_unsupported(&args(&["pytest", "--cov=src"]))
            .unwrap_err();
        assert!(matches!(
            err,
            RunnerError::Unsupported { mode: "coverage", .. }
        ));
    }
}
