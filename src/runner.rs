//! Test-runner detection and command rewriting.
//!
//! The registry is an **ordered** list of runner definitions; iteration
//! order is the precedence order. Ordering matters twice: Vitest is
//! registered before Jest so an `npm test` script that calls vitest is
//! never claimed by the Jest matcher, and `cargo nextest` is registered
//! before `cargo test` because every nextest invocation also contains
//! the word `cargo`.
//!
//! A definition answers three questions:
//!
//! 1. **Is this mine?** ([`RunnerDefinition::detect`]) — from explicit
//!    command markers and, for package-manager wrappers (`npm`, `npx`,
//!    `yarn`, `pnpm`), from `package.json` scripts and dependencies.
//! 2. **Can I run it?** ([`RunnerDefinition::reject_unsupported`]) —
//!    watch and coverage modes are refused up front instead of hanging
//!    or producing misleading reports.
//! 3. **How do I instrument it?** ([`RunnerDefinition::rewrite`]) —
//!    reporter/plugin flags for adapter-based runners, JSON-output
//!    flags and child-only environment variables for native ones.

pub mod cargo;
pub mod gotest;
pub mod js;
pub mod pytest;

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::adapter::AdapterKind;

/// Result type for runner detection and rewriting.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors raised before any subprocess is spawned.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// No registered runner recognized the command.
    #[error("could not detect a supported test runner in `{0}`")]
    UnknownRunner(String),

    /// The command asks for a mode 3pio refuses to wrap.
    #[error("{runner} {mode} mode is not supported by 3pio; remove `{flag}` and rerun")]
    Unsupported {
        runner: &'static str,
        mode: &'static str,
        flag: String,
    },

    /// No command was given at all.
    #[error("no test command given")]
    EmptyCommand,
}

/// The command to actually spawn, after instrumentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Environment additions for the child process only.
    pub env: Vec<(String, String)>,
}

impl RewrittenCommand {
    fn from_args(args: &[String]) -> Self {
        Self {
            program: args[0].clone(),
            args: args[1..].to_vec(),
            env: Vec::new(),
        }
    }
}

/// The slice of `package.json` that detection cares about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageJson {
    #[serde(default)]
    pub scripts: HashMap<String, String>,
    #[serde(default)]
    pub dependencies: HashMap<String, String>,
    #[serde(default, rename = "devDependencies")]
    pub dev_dependencies: HashMap<String, String>,
}

impl PackageJson {
    /// Whether the named package appears in either dependency table.
    pub fn depends_on(&self, name: &str) -> bool {
        self.dependencies.contains_key(name) || self.dev_dependencies.contains_key(name)
    }
}

/// Project files consulted during detection.
#[derive(Debug, Clone, Default)]
pub struct ProjectContext {
    pub package_json: Option<PackageJson>,
}

impl ProjectContext {
    /// Loads detection context from the working directory.
    ///
    /// A missing or malformed `package.json` is not an error; detection
    /// simply proceeds without it.
    pub fn load(cwd: &Path) -> Self {
        let package_json = std::fs::read_to_string(cwd.join("package.json"))
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok());
        Self { package_json }
    }
}

impl std::fmt::Debug for dyn RunnerDefinition + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerDefinition")
            .field("name", &self.name())
            .finish()
    }
}

/// One supported test runner.
pub trait RunnerDefinition: Send + Sync {
    /// Short name used in logs, reports, and error messages.
    fn name(&self) -> &'static str;

    /// The adapter this runner needs, or `None` for native-parse runners.
    fn adapter(&self) -> Option<AdapterKind>;

    /// Whether results come from parsing the runner's own JSON output.
    fn is_native(&self) -> bool {
        self.adapter().is_none()
    }

    /// Whether this command belongs to this runner.
    fn detect(&self, args: &[String], project: &ProjectContext) -> bool;

    /// Refuses flags 3pio cannot wrap (watch mode, coverage).
    fn reject_unsupported(&self, _args: &[String]) -> RunnerResult<()> {
        Ok(())
    }

    /// Produces the instrumented command.
    ///
    /// `adapter_path` is the materialized adapter source for
    /// adapter-based runners, `None` for native ones.
    fn rewrite(&self, args: &[String], adapter_path: Option<&Path>) -> RewrittenCommand;
}

/// Ordered collection of runner definitions.
pub struct RunnerRegistry {
    definitions: Vec<Box<dyn RunnerDefinition>>,
}

impl RunnerRegistry {
    /// The built-in registry, in precedence order.
    pub fn with_defaults() -> Self {
        Self {
            definitions: vec![
                Box::new(js::Vitest),
                Box::new(js::Jest),
                Box::new(js::Mocha),
                Box::new(js::Cypress),
                Box::new(pytest::Pytest),
                Box::new(gotest::GoTest),
                Box::new(cargo::CargoNextest),
                Box::new(cargo::CargoTest),
            ],
        }
    }

    /// Finds the runner for a command, in registration order.
    pub fn detect(
        &self,
        args: &[String],
        project: &ProjectContext,
    ) -> RunnerResult<&dyn RunnerDefinition> {
        if args.is_empty() {
            return Err(RunnerError::EmptyCommand);
        }
        self.definitions
            .iter()
            .map(|d| d.as_ref())
            .find(|d| d.detect(args, project))
            .ok_or_else(|| RunnerError::UnknownRunner(args.join(" ")))
    }
}

/// Whether any token equals `tool` or is a path ending in `/tool`.
pub(crate) fn has_command_token(args: &[String], tool: &str) -> bool {
    args.iter().any(|a| {
        a == tool
            || a.strip_suffix(tool)
                .is_some_and(|prefix| prefix.ends_with('/') || prefix.ends_with('\\'))
    })
}

/// The script a package-manager invocation would run, if resolvable.
///
/// Handles `npm test`, `npm run <name>`, `pnpm test`, `pnpm run <name>`,
/// `yarn <name>` and `yarn test`.
pub(crate) fn wrapped_script<'a>(
    args: &[String],
    project: &'a ProjectContext,
) -> Option<&'a str> {
    let pkg = project.package_json.as_ref()?;
    let manager = args.first()?.as_str();
    if !matches!(manager, "npm" | "pnpm" | "yarn") {
        return None;
    }

    let script_name = match args.get(1).map(|s| s.as_str()) {
        Some("test") | Some("t") => "test",
        Some("run") => args.get(2)?.as_str(),
        Some(other) if manager == "yarn" => other,
        _ => return None,
    };
    pkg.scripts.get(script_name).map(|s| s.as_str())
}

/// True when flags must go behind a `--` separator to reach the tool.
pub(crate) fn needs_separator(args: &[String]) -> bool {
    matches!(args.first().map(|s| s.as_str()), Some("npm") | Some("pnpm"))
        && !args.iter().any(|a| a == "--")
}

/// Rejects the first token matching any of `flags` (prefix match).
pub(crate) fn reject_flags(
    args: &[String],
    runner: &'static str,
    mode: &'static str,
    flags: &[&str],
) -> RunnerResult<()> {
    for arg in args {
        if flags.iter().any(|f| arg == f || arg.starts_with(&format!("{f}="))) {
            return Err(RunnerError::Unsupported {
                runner,
                mode,
                flag: arg.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn project_with_test_script(script: &str) -> ProjectContext {
        let mut scripts = HashMap::new();
        scripts.insert("test".to_string(), script.to_string());
        ProjectContext {
            package_json: Some(PackageJson {
                scripts,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_empty_command_is_an_error() {
        let registry = RunnerRegistry::with_defaults();
        assert!(matches!(
            registry.detect(&[], &ProjectContext::default()),
            Err(RunnerError::EmptyCommand)
        ));
    }

    #[test]
    fn test_unknown_runner_is_an_error() {
        let registry = RunnerRegistry::with_defaults();
        let err = registry
            .detect(&args(&["make", "lint"]), &ProjectContext::default())
            .unwrap_err();
        assert!(matches!(err, RunnerError::UnknownRunner(_)));
    }

    #[test]
    fn test_explicit_command_beats_package_json() {
        // package.json says jest, but the command says vitest.
        let registry = RunnerRegistry::with_defaults();
        let project = project_with_test_script("jest");
        let runner = registry
            .detect(&args(&["npx", "vitest", "run"]), &project)
            .unwrap();
        assert_eq!(runner.name(), "vitest");
    }

    #[test]
    fn test_npm_test_resolves_through_scripts() {
        let registry = RunnerRegistry::with_defaults();
        let project = project_with_test_script("vitest run");
        let runner = registry
            .detect(&args(&["npm", "test"]), &project)
            .unwrap();
        assert_eq!(runner.name(), "vitest");
    }

    #[test]
    fn test_nextest_wins_over_cargo_test() {
        let registry = RunnerRegistry::with_defaults();
        let runner = registry
            .detect(
                &args(&["cargo", "nextest", "run"]),
                &ProjectContext::default(),
            )
            .unwrap();
        assert_eq!(runner.name(), "cargo nextest");
    }

    #[test]
    fn test_has_command_token_matches_paths() {
        assert!(has_command_token(
            &args(&["node_modules/.bin/jest", "--ci"]),
            "jest"
        ));
        assert!(!has_command_token(&args(&["project", "--ci"]), "jest"));
        // "majestic" must not match "jest".
        assert!(!has_command_token(&args(&["majestic"]), "jest"));
    }

    #[test]
    fn test_needs_separator() {
        assert!(needs_separator(&args(&["npm", "test"])));
        assert!(!needs_separator(&args(&["npm", "test", "--"])));
        assert!(!needs_separator(&args(&["npx", "jest"])));
        assert!(!needs_separator(&args(&["yarn", "test"])));
    }

    #[test]
    fn test_reject_flags_matches_prefix_forms() {
        let err = reject_flags(
            &args(&["jest", "--coverage=true"]),
            "jest",
            "coverage",
            &["--coverage"],
        )
        .unwrap_err();
        assert!(matches!(err, RunnerError::Unsupported { .. }));
        assert!(reject_flags(&args(&["jest"]), "jest", "coverage", &["--coverage"]).is_ok());
    }
}
