//! Append-only text log sinks.
//!
//! One record per line, written under a process-wide mutex:
//!
//! ```text
//! Size: <u16> Type: <u8> ID: <u64> Data: <u64>
//! ```
//!
//! The file names are normative for compatibility with existing tooling
//! (including their historical spelling).

use crate::NetError;
use dedupmap::Message;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Stream-processor log.
pub const TCP_LOG: &str = "tcp_messaages.log";
/// Datagram-processor log.
pub const UDP_LOG: &str = "udp_messaages.log";
/// Combined-binary stream log.
pub const SYSTEM_LOG: &str = "messages_system.log";

/// A mutex-guarded append-only record log.
pub struct LogSink {
    file: Mutex<File>,
}

impl LogSink {
    /// Opens (creating if needed) the log at `path` in append mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, NetError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(file) })
    }

    /// Appends one record line.
    pub fn append(&self, msg: &Message) -> Result<(), NetError> {
        let mut file = self.file.lock();
        writeln!(
            file,
            "Size: {} Type: {} ID: {} Data: {}",
            msg.size, msg.kind, msg.id, msg.data
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process;

    #[test]
    fn lines_match_the_normative_format() {
        let path = std::env::temp_dir().join(format!("dedupmap-sink-{}.log", process::id()));
        let sink = LogSink::open(&path).unwrap();

        sink.append(&Message { size: 19, kind: 1, id: 1001, data: 12345 }).unwrap();
        sink.append(&Message { size: 19, kind: 255, id: u64::MAX, data: 0 }).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Size: 19 Type: 1 ID: 1001 Data: 12345"));
        assert_eq!(
            lines.next(),
            Some("Size: 19 Type: 255 ID: 18446744073709551615 Data: 0")
        );
        assert_eq!(lines.next(), None);

        std::fs::remove_file(&path).ok();
    }
}
