//! Tailing reader for the IPC event file.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Event;

/// How often the tail loop looks for new bytes.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Long-lived tail loop over the IPC file.
///
/// The reader remembers its byte offset, reads to EOF on every poll
/// tick, buffers a trailing partial line until its newline arrives, and
/// delivers each complete line as a typed [`Event`]. Lines that fail to
/// parse (malformed JSON, unknown `eventType`) are logged and skipped;
/// the stream must survive forward-compatible producers.
///
/// The file may not exist yet when the loop starts: adapters create it
/// on their first event. Absence is treated the same as EOF.
pub struct IpcReader {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
}

impl IpcReader {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            offset: 0,
            partial: Vec::new(),
        }
    }

    /// Runs until `producers_done` fires, then performs one final drain.
    ///
    /// Events are delivered in file-append order, exactly once. The
    /// receiver dropping its end terminates the loop early.
    pub async fn run(mut self, tx: mpsc::Sender<Event>, producers_done: CancellationToken) {
        let mut ticker = tokio::time::interval(POLL_INTERVAL);

        loop {
            tokio::select! {
                _ = producers_done.cancelled() => {
                    self.drain(&tx).await;
                    debug!("IPC reader finished after final drain at offset {}", self.offset);
                    return;
                }
                _ = ticker.tick() => {
                    if !self.drain(&tx).await {
                        return;
                    }
                }
            }
        }
    }

    /// Reads from the stored offset to EOF and dispatches complete lines.
    ///
    /// Returns `false` if the receiving side has gone away.
    async fn drain(&mut self, tx: &mpsc::Sender<Event>) -> bool {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(f) => f,
            // Not created yet; nothing to read.
            Err(_) => return true,
        };

        if file.seek(std::io::SeekFrom::Start(self.offset)).await.is_err() {
            return true;
        }

        let mut buf = Vec::new();
        match file.read_to_end(&mut buf).await {
            Ok(0) => return true,
            Ok(n) => self.offset += n as u64,
            Err(e) => {
                warn!("IPC read error at offset {}: {}", self.offset, e);
                return true;
            }
        }

        self.partial.extend_from_slice(&buf);

        while let Some(newline) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=newline).collect();
            let line = &line[..line.len() - 1];
            if line.is_empty() {
                continue;
            }

            match serde_json::from_slice::<Event>(line) {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        return false;
                    }
                }
                Err(e) => {
                    warn!(
                        "skipping unparseable IPC line: {} ({})",
                        String::from_utf8_lossy(line),
                        e
                    );
                }
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{GroupRef, IpcWriter, Status, TestCase};
    use tempfile::TempDir;

    fn discovered(name: &str) -> Event {
        Event::GroupDiscovered(GroupRef {
            group_name: name.to_string(),
            parent_names: vec![],
        })
    }

    async fn collect_all(path: PathBuf, expected: usize) -> Vec<Event> {
        let (tx, mut rx) = mpsc::channel(64);
        let done = CancellationToken::new();
        let reader = IpcReader::new(path);
        let handle = tokio::spawn(reader.run(tx, done.clone()));

        let mut events = Vec::new();
        while events.len() < expected {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(e)) => events.push(e),
                _ => break,
            }
        }
        done.cancel();
        handle.await.unwrap();
        events
    }

    #[tokio::test]
    async fn test_reads_events_in_file_order() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ipc.jsonl");

        let mut writer = IpcWriter::open(&path).unwrap();
        writer.write(&discovered("a.test.js")).unwrap();
        writer.write(&discovered("b.test.js")).unwrap();

        let events = collect_all(path, 2).await;
        assert_eq!(events, vec![discovered("a.test.js"), discovered("b.test.js")]);
    }

    #[tokio::test]
    async fn test_skips_corrupt_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ipc.jsonl");

        std::fs::write(
            &path,
            "not json at all\n{\"eventType\":\"unknownKind\",\"payload\":{}}\n",
        )
        .unwrap();
        let mut writer = IpcWriter::open(&path).unwrap();
        writer.write(&discovered("survivor")).unwrap();

        let events = collect_all(path, 1).await;
        assert_eq!(events, vec![discovered("survivor")]);
    }

    #[tokio::test]
    async fn test_buffers_partial_trailing_line() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ipc.jsonl");

        let event = Event::TestCase(TestCase {
            test_name: "t".to_string(),
            parent_names: vec!["f".to_string()],
            status: Status::Pass,
            duration: None,
            error: None,
            stdout: None,
            stderr: None,
            xfail_reason: None,
        });
        let line = serde_json::to_string(&event).unwrap();
        let (head, tail) = line.split_at(line.len() / 2);

        // First half without the newline, then the rest.
        std::fs::write(&path, head).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let done = CancellationToken::new();
        let handle = tokio::spawn(IpcReader::new(path.clone()).run(tx, done.clone()));

        tokio::time::sleep(Duration::from_millis(250)).await;
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(f, "{tail}\n").unwrap();

        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, event);

        done.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_final_drain_after_cancel() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ipc.jsonl");

        let (tx, mut rx) = mpsc::channel(8);
        let done = CancellationToken::new();
        // Cancel before the reader ever polls; the event must still arrive
        // via the final drain.
        let mut writer = IpcWriter::open(&path).unwrap();
        writer.write(&discovered("late")).unwrap();
        done.cancel();

        IpcReader::new(path).run(tx, done).await;
        assert_eq!(rx.recv().await, Some(discovered("late")));
    }
}
