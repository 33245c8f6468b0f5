//! Run lifecycle: detect, instrument, spawn, stream, finalize.
//!
//! The orchestrator glues every subsystem together around one child
//! process:
//!
//! ```text
//!   argv ──► RunnerRegistry ──► RunDir ──► adapter ──► rewritten cmd
//!                                                          │
//!                       ┌──────────── spawn ◄──────────────┘
//!                       ▼
//!              child stdout/stderr
//!        native: ──► output.log ──► native parser ──┐
//!        adapter: ─► tee (terminal + output.log)    │ (adapter writes
//!                                                   ▼  ipc.jsonl itself)
//!                                             ipc.jsonl
//!                                                   │
//!                  IPC reader ──► dispatcher ──► GroupManager
//!                                       │              │
//!                                  console lines   render loop
//! ```
//!
//! Shutdown ordering is the delicate part: the child exits, the native
//! parser gets one final drain of the capture file (never close it
//! earlier), then the IPC reader gets its final drain, the dispatcher
//! runs dry, and only then are reports finalized and the child's exit
//! code mirrored.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapter::{self, AdapterError};
use crate::console::ConsoleFormatter;
use crate::group::GroupManager;
use crate::ipc::{IpcReader, IpcWriter};
use crate::parser;
use crate::report::{RenderRequest, ReportEngine, RunMeta, RunState, render_loop};
use crate::run::{RunDir, RunError};
use crate::runner::{ProjectContext, RunnerError, RunnerRegistry};

/// How long a signaled child gets before being killed outright.
const SIGNAL_GRACE: Duration = Duration::from_secs(5);

/// Exit code for pre-spawn configuration errors.
pub const EXIT_USAGE: i32 = 2;
/// Exit code for filesystem errors 3pio itself hit.
pub const EXIT_IO: i32 = 3;

/// Result type for launching a run.
pub type LaunchResult<T> = Result<T, LaunchError>;

/// Fatal errors surfaced to the user instead of a test run.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    RunDir(#[from] RunError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Ipc(#[from] crate::ipc::IpcError),

    #[error("failed to prepare run artifacts: {0}")]
    Io(#[from] std::io::Error),
}

impl LaunchError {
    /// 3pio's own exit codes, distinguishable from any child's.
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::Runner(_) => EXIT_USAGE,
            LaunchError::RunDir(_)
            | LaunchError::Adapter(_)
            | LaunchError::Ipc(_)
            | LaunchError::Io(_) => EXIT_IO,
        }
    }
}

/// Runs the wrapped test command to completion.
///
/// Returns the exit code to mirror. Everything fatal happens before
/// the child is spawned; once it runs, failures degrade into partial
/// reports rather than errors.
pub async fn run(args: Vec<String>, cwd: &Path) -> LaunchResult<i32> {
    // Detection and refusals come before any filesystem work.
    let registry = RunnerRegistry::with_defaults();
    let project = ProjectContext::load(cwd);
    let runner = registry.detect(&args, &project)?;
    runner.reject_unsupported(&args)?;

    let run_dir = RunDir::allocate(cwd)?;
    info!("run {} using {}", run_dir.id(), runner.name());

    let adapter_path = match runner.adapter() {
        Some(kind) => Some(adapter::materialize(
            kind,
            &run_dir.adapters_dir(),
            &run_dir.ipc_path(),
        )?),
        None => None,
    };
    let command = runner.rewrite(&args, adapter_path.as_deref());

    let meta = RunMeta {
        command: args.join(" "),
        runner: runner.name().to_string(),
        started: Utc::now(),
    };
    let manager = Arc::new(GroupManager::new());
    let engine = Arc::new(ReportEngine::new(
        run_dir.reports_dir(),
        run_dir.test_run_md(),
        meta.clone(),
    ));
    // test-run.md exists from the first moment, in PENDING/RUNNING form.
    engine.write_run_file(&manager.run_snapshot(), RunState::Running, None)?;

    let mut console = ConsoleFormatter::stderr();
    console.preamble(&meta.command, cwd, run_dir.root(), &run_dir.test_run_md());

    // Background pipeline.
    let (event_tx, mut event_rx) = mpsc::channel(256);
    let (render_tx, render_rx) = mpsc::channel(256);
    let producers_done = CancellationToken::new();
    let child_exited = CancellationToken::new();
    let render_cancel = CancellationToken::new();

    let render_task = tokio::spawn(render_loop(
        render_rx,
        manager.clone(),
        engine.clone(),
        render_cancel.clone(),
    ));

    let reader_task = tokio::spawn(
        IpcReader::new(run_dir.ipc_path()).run(event_tx, producers_done.clone()),
    );

    let dispatcher_manager = manager.clone();
    let dispatcher_task = tokio::spawn(async move {
        let mut console = ConsoleFormatter::stderr();
        while let Some(event) = event_rx.recv().await {
            let outcome = dispatcher_manager.apply(&event);
            for completion in &outcome.completions {
                console.group_result(completion);
            }
            for id in outcome.dirty {
                let _ = render_tx.send(RenderRequest::Group(id)).await;
            }
            if outcome.run_file_dirty {
                let _ = render_tx.send(RenderRequest::RunFile).await;
            }
        }
    });

    let parser_task = if runner.is_native() {
        let native = parser::parser_for(runner.name())
            .expect("native runner without a registered parser");
        Some(tokio::spawn(parser::run_native_parser(
            native,
            run_dir.output_log(),
            IpcWriter::open(&run_dir.ipc_path())?,
            child_exited.clone(),
        )))
    } else {
        None
    };

    // Interrupt plumbing: one token, the received signal stashed for
    // forwarding.
    let interrupted = CancellationToken::new();
    let received_signal = Arc::new(AtomicI32::new(0));
    spawn_signal_listener(interrupted.clone(), received_signal.clone());

    // Spawn and supervise the child.
    let exit_code = match spawn_child(&command, cwd, &run_dir, runner.is_native()).await {
        Ok((child, tee_tasks)) => {
            let code = supervise(child, &interrupted, received_signal.as_ref()).await;
            for tee in tee_tasks {
                let _ = tee.await;
            }
            code
        }
        Err(e) => {
            error!("failed to spawn `{}`: {e}", command.program);
            eprintln!("3pio: failed to spawn `{}`: {e}", command.program);
            1
        }
    };

    // Ordered shutdown: capture file drains first, IPC second.
    child_exited.cancel();
    if let Some(task) = parser_task {
        let _ = task.await;
    }
    producers_done.cancel();
    let _ = reader_task.await;
    let _ = dispatcher_task.await;
    render_cancel.cancel();
    let _ = render_task.await;

    // Finalize reports; a best-effort write must not mask the child's
    // exit code.
    if let Err(e) = engine.flush_all(&manager, RunState::Complete, Some(exit_code)) {
        error!("failed to finalize reports: {e}");
        eprintln!("3pio: failed to finalize reports: {e}");
    }

    console.summary(&manager.run_snapshot());
    Ok(exit_code)
}

/// Spawns the rewritten command with the right output plumbing.
///
/// Native runners write both streams into a capture file inside the
/// run directory (a real file, not a pipe, so nothing is lost if the
/// child outruns the reader). Adapter-based runners keep the user's
/// console experience: output is teed to the terminal and to
/// `output.log`.
async fn spawn_child(
    command: &crate::runner::RewrittenCommand,
    cwd: &Path,
    run_dir: &RunDir,
    native: bool,
) -> std::io::Result<(tokio::process::Child, Vec<tokio::task::JoinHandle<()>>)> {
    let mut cmd = tokio::process::Command::new(&command.program);
    cmd.args(&command.args).current_dir(cwd);
    for (key, value) in &command.env {
        cmd.env(key, value);
    }
    cmd.stdin(Stdio::null());

    if native {
        let capture = std::fs::File::create(run_dir.output_log())?;
        cmd.stdout(Stdio::from(capture.try_clone()?));
        cmd.stderr(Stdio::from(capture));
        let child = cmd.spawn()?;
        Ok((child, Vec::new()))
    } else {
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        let mut child = cmd.spawn()?;

        let log = std::fs::File::create(run_dir.output_log())?;
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let tee_out = tokio::spawn(tee(stdout, tokio::io::stdout(), log.try_clone()?));
        let tee_err = tokio::spawn(tee(stderr, tokio::io::stderr(), log));
        Ok((child, vec![tee_out, tee_err]))
    }
}

/// Copies a child stream to the terminal and the output log.
async fn tee<R, W>(mut from: R, mut terminal: W, log: std::fs::File)
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut log = tokio::fs::File::from_std(log);
    let mut buf = [0u8; 8192];
    loop {
        match from.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = &buf[..n];
                if terminal.write_all(chunk).await.is_err() {
                    debug!("terminal write failed; continuing log-only");
                }
                if log.write_all(chunk).await.is_err() {
                    warn!("output.log write failed");
                }
            }
        }
    }
    let _ = terminal.flush().await;
    let _ = log.flush().await;
}

/// Waits for the child, handling one interrupt along the way.
///
/// On interrupt the received signal is forwarded, the child gets a
/// grace period, then a hard kill. The returned code always reflects
/// how the child actually ended (`128 + signal` on Unix).
async fn supervise(
    mut child: tokio::process::Child,
    interrupted: &CancellationToken,
    received_signal: &AtomicI32,
) -> i32 {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = interrupted.cancelled() => None,
    };

    let status = match exited {
        Some(status) => status,
        None => {
            forward_signal(&child, received_signal.load(Ordering::SeqCst));
            match tokio::time::timeout(SIGNAL_GRACE, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!("child ignored the forwarded signal; killing it");
                    let _ = child.start_kill();
                    child.wait().await
                }
            }
        }
    };

    match status {
        Ok(status) => exit_code_of(status),
        Err(e) => {
            error!("failed waiting for child: {e}");
            1
        }
    }
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(unix)]
fn forward_signal(child: &tokio::process::Child, signal: i32) {
    let signal = if signal == 0 { libc::SIGINT } else { signal };
    if let Some(pid) = child.id() {
        debug!("forwarding signal {signal} to pid {pid}");
        unsafe {
            libc::kill(pid as libc::pid_t, signal);
        }
    }
}

#[cfg(not(unix))]
fn forward_signal(_child: &tokio::process::Child, _signal: i32) {
    // On Windows the grace-then-kill path in `supervise` is the whole
    // story; there is no signal to forward.
}

/// Installs the SIGINT/SIGTERM listener (Ctrl-C elsewhere).
fn spawn_signal_listener(token: CancellationToken, received: Arc<AtomicI32>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(_) => return,
            };
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => return,
            };
            tokio::select! {
                _ = sigint.recv() => received.store(libc::SIGINT, Ordering::SeqCst),
                _ = sigterm.recv() => received.store(libc::SIGTERM, Ordering::SeqCst),
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            received.store(2, Ordering::SeqCst);
        }
        token.cancel();
    });
}
