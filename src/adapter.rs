//! Adapter sources embedded in the binary and materialized per run.
//!
//! Adapter-based runners (Jest, Vitest, Mocha, Cypress, pytest) load an
//! in-process reporter/plugin that writes IPC events. The sources ship
//! inside the 3pio binary and are written out fresh for every run with
//! the absolute IPC path baked in as a string literal. Baking beats
//! environment variables: env does not reliably survive the nested
//! spawns inside JS workspace tooling, a file path in the source always
//! does.

use std::path::{Path, PathBuf};

use include_dir::{Dir, include_dir};

/// Embedded adapter sources.
static ADAPTERS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/adapters");

/// Token in each adapter source that the IPC path literal replaces.
const IPC_PATH_MARKER: &str = "__THREEPIO_IPC_PATH__";

/// Result type for adapter materialization.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Errors raised while materializing an adapter.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The embedded source is missing (a build problem, not a user one).
    #[error("adapter source '{0}' is not embedded in this binary")]
    MissingSource(&'static str),

    /// The embedded source has no IPC path marker to replace.
    #[error("adapter source '{0}' has no IPC path marker")]
    MissingMarker(&'static str),

    /// Writing the materialized adapter failed.
    #[error("failed to write adapter '{name}': {source}")]
    WriteFailed {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Which adapter a runner needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Jest,
    Vitest,
    Mocha,
    Cypress,
    Pytest,
}

impl AdapterKind {
    /// File name of the embedded source and of the materialized copy.
    pub fn file_name(&self) -> &'static str {
        match self {
            AdapterKind::Jest => "jest.cjs",
            AdapterKind::Vitest => "vitest.mjs",
            AdapterKind::Mocha => "mocha.cjs",
            AdapterKind::Cypress => "cypress.cjs",
            AdapterKind::Pytest => "threepio_adapter.py",
        }
    }
}

/// Escapes a path into a double-quoted string literal.
///
/// JSON string syntax is a subset of both JavaScript and Python string
/// syntax, so one escaper covers every adapter language, including
/// backslashes on Windows and non-ASCII directory names.
fn path_literal(path: &Path) -> String {
    serde_json::to_string(&path.to_string_lossy())
        .unwrap_or_else(|_| format!("{:?}", path.to_string_lossy()))
}

/// Writes the adapter for `kind` under `dest_dir` with `ipc_path` baked in.
///
/// A fresh copy is written per run; nothing is cached across runs.
/// Returns the absolute path to reference in the rewritten command.
pub fn materialize(
    kind: AdapterKind,
    dest_dir: &Path,
    ipc_path: &Path,
) -> AdapterResult<PathBuf> {
    let name = kind.file_name();
    let source = ADAPTERS_DIR
        .get_file(name)
        .and_then(|f| f.contents_utf8())
        .ok_or(AdapterError::MissingSource(name))?;

    if !source.contains(IPC_PATH_MARKER) {
        return Err(AdapterError::MissingMarker(name));
    }
    let baked = source.replace(IPC_PATH_MARKER, &path_literal(ipc_path));

    let dest = dest_dir.join(name);
    std::fs::write(&dest, baked).map_err(|source| AdapterError::WriteFailed { name, source })?;
    Ok(dest)
}
