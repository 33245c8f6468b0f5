//! Native-runner output processors.
//!
//! Go and Rust test runners need no in-process adapter: their own JSON
//! output carries everything. A processor tails the combined
//! stdout+stderr capture file of the subprocess, translates each line
//! into IPC events, and appends them to the same `ipc.jsonl` the
//! adapters would have written — downstream, the group manager cannot
//! tell the two sources apart.
//!
//! The capture is a regular file, not a pipe: pipe buffers lose output
//! when the child exits faster than the reader drains them. The tail
//! loop synchronizes with a "child exited" signal and always performs
//! one final drain before letting the processor finish.

pub mod cargotest;
pub mod gotest;
pub mod nextest;

use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::ipc::{Event, IpcWriter};

/// Translates one native runner's output lines into IPC events.
pub trait NativeParser: Send {
    /// Processes one line of the combined output capture.
    fn handle_line(&mut self, line: &str) -> Vec<Event>;

    /// Called once after the child exited and the capture is drained.
    ///
    /// Tests still in flight at this point surface as errors: the
    /// runner died before reporting them.
    fn finish(&mut self) -> Vec<Event>;
}

/// The processor for a detected native runner, by registry name.
pub fn parser_for(runner_name: &str) -> Option<Box<dyn NativeParser>> {
    match runner_name {
        "go test" => Some(Box::new(gotest::GoTestParser::new())),
        "cargo test" => Some(Box::new(cargotest::CargoTestParser::new())),
        "cargo nextest" => Some(Box::new(nextest::NextestParser::new())),
        _ => None,
    }
}

/// Tails the capture file, feeding complete lines to the parser and
/// appending the produced events to the IPC file.
///
/// Runs until `child_exited` fires, then drains to EOF one final time
/// and lets the parser flush its in-flight state.
pub async fn run_native_parser(
    mut parser: Box<dyn NativeParser>,
    capture_path: PathBuf,
    mut ipc: IpcWriter,
    child_exited: CancellationToken,
) {
    let mut offset: u64 = 0;
    let mut partial: Vec<u8> = Vec::new();
    let mut ticker = tokio::time::interval(crate::ipc::reader::POLL_INTERVAL);

    let mut emit = |events: Vec<Event>, ipc: &mut IpcWriter| {
        for event in events {
            if let Err(e) = ipc.write(&event) {
                warn!("failed to append native-parser event: {e}");
            }
        }
    };

    loop {
        let done = tokio::select! {
            _ = child_exited.cancelled() => true,
            _ = ticker.tick() => false,
        };

        let events = drain_lines(&capture_path, &mut offset, &mut partial, parser.as_mut()).await;
        emit(events, &mut ipc);

        if done {
            // Whatever is left in the partial buffer is a final line the
            // runner never terminated.
            if !partial.is_empty() {
                let line = String::from_utf8_lossy(&partial).to_string();
                partial.clear();
                emit(parser.handle_line(&line), &mut ipc);
            }
            emit(parser.finish(), &mut ipc);
            return;
        }
    }
}

async fn drain_lines(
    path: &PathBuf,
    offset: &mut u64,
    partial: &mut Vec<u8>,
    parser: &mut dyn NativeParser,
) -> Vec<Event> {
    let mut events = Vec::new();

    let Ok(mut file) = tokio::fs::File::open(path).await else {
        return events;
    };
    if file.seek(std::io::SeekFrom::Start(*offset)).await.is_err() {
        return events;
    }

    let mut buf = Vec::new();
    match file.read_to_end(&mut buf).await {
        Ok(0) => return events,
        Ok(n) => *offset += n as u64,
        Err(e) => {
            warn!("capture read error at offset {offset}: {e}");
            return events;
        }
    }

    partial.extend_from_slice(&buf);
    while let Some(newline) = partial.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = partial.drain(..=newline).collect();
        let line = String::from_utf8_lossy(&line[..line.len() - 1]);
        if !line.is_empty() {
            events.extend(parser.handle_line(&line));
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct EchoParser {
        finished: bool,
    }

    impl NativeParser for EchoParser {
        fn handle_line(&mut self, line: &str) -> Vec<Event> {
            vec![Event::GroupDiscovered(crate::ipc::GroupRef {
                group_name: line.to_string(),
                parent_names: vec![],
            })]
        }

        fn finish(&mut self) -> Vec<Event> {
            self.finished = true;
            vec![Event::RunComplete(crate::ipc::Empty {})]
        }
    }

    #[tokio::test]
    async fn test_loop_translates_lines_and_finishes() {
        let temp = TempDir::new().unwrap();
        let capture = temp.path().join("output.log");
        let ipc_path = temp.path().join("ipc.jsonl");

        std::fs::write(&capture, "alpha\nbeta\n").unwrap();
        let ipc = IpcWriter::open(&ipc_path).unwrap();

        let exited = CancellationToken::new();
        exited.cancel();
        run_native_parser(
            Box::new(EchoParser { finished: false }),
            capture,
            ipc,
            exited,
        )
        .await;

        let content = std::fs::read_to_string(&ipc_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("alpha"));
        assert!(lines[1].contains("beta"));
        assert!(lines[2].contains("runComplete"));
    }

    #[tokio::test]
    async fn test_unterminated_final_line_is_flushed() {
        let temp = TempDir::new().unwrap();
        let capture = temp.path().join("output.log");
        let ipc_path = temp.path().join("ipc.jsonl");

        std::fs::write(&capture, "tail-without-newline").unwrap();
        let ipc = IpcWriter::open(&ipc_path).unwrap();

        let exited = CancellationToken::new();
        exited.cancel();
        run_native_parser(
            Box::new(EchoParser { finished: false }),
            capture,
            ipc,
            exited,
        )
        .await;

        let content = std::fs::read_to_string(&ipc_path).unwrap();
        assert!(content.contains("tail-without-newline"));
    }
}
