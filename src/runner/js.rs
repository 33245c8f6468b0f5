//! JavaScript runner definitions: Vitest, Jest, Mocha, Cypress.
//!
//! All four are adapter-based: the rewritten command points the
//! runner's reporter mechanism at a materialized adapter source.
//! The registry registers Vitest before Jest, so an ambiguous npm
//! script is resolved in Vitest's favor when it names vitest.

use std::path::Path;

use crate::adapter::AdapterKind;
use super::{
    ProjectContext, RewrittenCommand, RunnerDefinition, RunnerResult, has_command_token,
    needs_separator, reject_flags, wrapped_script,
};

fn detect_js_tool(tool: &str, args: &[String], project: &ProjectContext) -> bool {
    if has_command_token(args, tool) {
        return true;
    }
    wrapped_script(args, project).is_some_and(|script| script.contains(tool))
}

/// Appends flags, inserting the `--` pass-through separator when the
/// command goes through npm/pnpm and has none yet.
fn append_flags(args: &[String], flags: &[String]) -> RewrittenCommand {
    let mut rewritten = args.to_vec();
    if needs_separator(args) {
        rewritten.push("--".to_string());
    }
    rewritten.extend_from_slice(flags);
    RewrittenCommand::from_args(&rewritten)
}

fn adapter_arg(adapter_path: Option<&Path>) -> String {
    adapter_path
        .map(|p| p.display().to_string())
        .unwrap_or_default()
}

/// Vitest. Reporter syntax is `--reporter <path>`, one path per flag;
/// the default reporter is kept alongside the adapter so the user's
/// console output is unchanged.
pub struct Vitest;

impl RunnerDefinition for Vitest {
    fn name(&self) -> &'static str {
        "vitest"
    }

    fn adapter(&self) -> Option<AdapterKind> {
        Some(AdapterKind::Vitest)
    }

    fn detect(&self, args: &[String], project: &ProjectContext) -> bool {
        detect_js_tool("vitest", args, project)
    }

    fn reject_unsupported(&self, args: &[String]) -> RunnerResult<()> {
        reject_flags(args, "vitest", "watch", &["--watch", "-w"])?;
        reject_flags(args, "vitest", "coverage", &["--coverage"])
    }

    fn rewrite(&self, args: &[String], adapter_path: Option<&Path>) -> RewrittenCommand {
        append_flags(
            args,
            &[
                "--reporter".to_string(),
                "default".to_string(),
                "--reporter".to_string(),
                adapter_arg(adapter_path),
            ],
        )
    }
}

/// Jest. Its `--reporters` flag is greedy: it swallows every following
/// token until the next `--`-prefixed flag, so the injected reporter
/// path must be the very last token of the command line.
pub struct Jest;

impl RunnerDefinition for Jest {
    fn name(&self) -> &'static str {
        "jest"
    }

    fn adapter(&self) -> Option<AdapterKind> {
        Some(AdapterKind::Jest)
    }

    fn detect(&self, args: &[String], project: &ProjectContext) -> bool {
        if detect_js_tool("jest", args, project) {
            return true;
        }
        // Bare `npm test` with no resolvable script: fall back to the
        // dependency tables.
        wrapped_script(args, project).is_none()
            && matches!(
                args.first().map(|s| s.as_str()),
                Some("npm") | Some("yarn") | Some("pnpm")
            )
            && args.get(1).map(|s| s.as_str()) == Some("test")
            && project
                .package_json
                .as_ref()
                .is_some_and(|pkg| pkg.depends_on("jest"))
    }

    fn reject_unsupported(&self, args: &[String]) -> RunnerResult<()> {
        reject_flags(args, "jest", "watch", &["--watch", "--watchAll"])?;
        reject_flags(args, "jest", "coverage", &["--coverage"])
    }

    fn rewrite(&self, args: &[String], adapter_path: Option<&Path>) -> RewrittenCommand {
        append_flags(
            args,
            &["--reporters".to_string(), adapter_arg(adapter_path)],
        )
    }
}

/// Mocha.
pub struct Mocha;

impl RunnerDefinition for Mocha {
    fn name(&self) -> &'static str {
        "mocha"
    }

    fn adapter(&self) -> Option<AdapterKind> {
        Some(AdapterKind::Mocha)
    }

    fn detect(&self, args: &[String], project: &ProjectContext) -> bool {
        detect_js_tool("mocha", args, project)
    }

    fn reject_unsupported(&self, args: &[String]) -> RunnerResult<()> {
        reject_flags(args, "mocha", "watch", &["--watch", "-w"])
    }

    fn rewrite(&self, args: &[String], adapter_path: Option<&Path>) -> RewrittenCommand {
        append_flags(
            args,
            &["--reporter".to_string(), adapter_arg(adapter_path)],
        )
    }
}

/// Cypress. Runs mocha-compatible reporters, so injection looks like
/// Mocha's.
pub struct Cypress;

impl RunnerDefinition for Cypress {
    fn name(&self) -> &'static str {
        "cypress"
    }

    fn adapter(&self) -> Option<AdapterKind> {
        Some(AdapterKind::Cypress)
    }

    fn detect(&self, args: &[String], project: &ProjectContext) -> bool {
        detect_js_tool("cypress", args, project)
    }

    fn rewrite(&self, args: &[String], adapter_path: Option<&Path>) -> RewrittenCommand {
        append_flags(
            args,
            &["--reporter".to_string(), adapter_arg(adapter_path)],
        )
    }
}
