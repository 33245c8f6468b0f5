//! Append-only writer for the IPC event file.

use std::io::Write;
use std::path::Path;

use super::{Event, IpcResult};

/// Keep every line comfortably under the 4 KiB atomic-append boundary.
const MAX_LINE_BYTES: usize = 3 * 1024;

/// Writes events to the shared JSON-Lines file.
///
/// The file is opened in append mode and each event becomes exactly one
/// `write` of a newline-terminated line, so concurrent writers (the
/// native parser inside 3pio, adapters in the child process) interleave
/// at line granularity without locking.
pub struct IpcWriter {
    file: std::fs::File,
}

impl IpcWriter {
    /// Opens (creating if needed) the event file for appending.
    pub fn open(path: &Path) -> IpcResult<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self { file })
    }

    /// Appends one event as a single line.
    ///
    /// Oversized error payloads are trimmed before encoding so the line
    /// stays within the atomic-append limit.
    pub fn write(&mut self, event: &Event) -> IpcResult<()> {
        let event = trim_event(event.clone());
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Trims unbounded text fields so the encoded line stays small.
fn trim_event(mut event: Event) -> Event {
    if let Event::TestCase(tc) = &mut event {
        if let Some(err) = &mut tc.error {
            truncate_to(&mut err.message, MAX_LINE_BYTES / 4);
            if let Some(trace) = &mut err.trace {
                truncate_to(trace, MAX_LINE_BYTES / 2);
            }
        }
        if let Some(out) = &mut tc.stdout {
            truncate_to(out, MAX_LINE_BYTES / 4);
        }
        if let Some(err) = &mut tc.stderr {
            truncate_to(err, MAX_LINE_BYTES / 4);
        }
    }
    event
}

fn truncate_to(s: &mut String, max_bytes: usize) {
    if s.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
    s.push_str("… [trimmed]");
}
