//! 3pio CLI - structured reports for any test runner.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use threepio::orchestrator;

#[derive(Parser)]
#[command(name = "3pio")]
#[command(about = "Run a test command and capture structured Markdown reports", long_about = None)]
#[command(version)]
struct Cli {
    /// The test command to wrap, verbatim (e.g. `npm test`,
    /// `cargo test --workspace`, `go test ./...`).
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        required = true,
        value_name = "TEST_COMMAND"
    )]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging() {
        eprintln!("3pio: {e}");
    }

    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => {
            eprintln!("3pio: cannot determine working directory: {e}");
            return ExitCode::from(orchestrator::EXIT_IO as u8);
        }
    };

    match orchestrator::run(cli.command, &cwd).await {
        // The child's exit code, mirrored without translation.
        Ok(code) => ExitCode::from((code & 0xff) as u8),
        Err(e) => {
            eprintln!("3pio: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

/// Diagnostic trace goes to `.3pio/debug.log`, never to the console.
fn init_logging() -> Result<()> {
    let dir = std::path::Path::new(".3pio");
    std::fs::create_dir_all(dir).context("failed to create .3pio directory")?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("debug.log"))
        .context("failed to open .3pio/debug.log")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}
