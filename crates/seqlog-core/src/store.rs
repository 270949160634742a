//! Log Store Abstraction
//!
//! The traits in this module describe the native, handle-based log store the
//! reader sits on top of. The store owns persistence and record numbering;
//! the reader only consumes whole-buffer block reads.
//!
//! ## Handles
//!
//! ```text
//! LogStore::open(log, machine) ──→ LogHandle   (read capability)
//!     read_block(direction, record_number, buf)
//!     oldest_index() / count() / generation()
//!     clear()
//!     register_change_wait() ──→ ChangeSignal
//!
//! LogStore::open_writer(log, machine) ──→ LogWriter   (write capability)
//!     append(timestamp, payload) ──→ record_number
//! ```
//!
//! ## Record Numbers
//!
//! Records are addressed by absolute record number. The retained range is
//! `oldest_index() .. oldest_index() + count()`. When the log wraps the
//! oldest number advances; when it is cleared numbering restarts and the
//! store reports [`ReadError::GenerationChanged`] to every handle once.

use std::fmt;

use crate::error::{ReadError, Result};
use crate::signal::ChangeSignal;

/// Machine name meaning "this machine".
pub const LOCAL_MACHINE: &str = ".";

/// Which way a block read walks from its start record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReadDirection {
    /// start, start + 1, start + 2, ...
    #[default]
    Forward,
    /// start, start - 1, start - 2, ...
    Backward,
}

impl ReadDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadDirection::Forward => "forward",
            ReadDirection::Backward => "backward",
        }
    }
}

/// Normalized (log, machine) identity.
///
/// Log and machine names compare case-insensitively, and an empty machine
/// name is the local machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogKey {
    log: String,
    machine: String,
}

impl LogKey {
    pub fn new(log: &str, machine: &str) -> Self {
        let machine = machine.trim();
        let machine = if machine.is_empty() {
            LOCAL_MACHINE.to_string()
        } else {
            machine.to_lowercase()
        };
        Self {
            log: log.trim().to_lowercase(),
            machine,
        }
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    pub fn machine(&self) -> &str {
        &self.machine
    }
}

impl fmt::Display for LogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\\{}", self.machine, self.log)
    }
}

/// Read capability for one log.
///
/// Implementations must be usable from any thread; a handle is still only
/// driven by one reader at a time.
pub trait LogHandle: Send + Sync {
    /// Copies as many whole records as fit into `buf`, starting at
    /// `start_index` and walking in `direction`. Returns the number of bytes
    /// written.
    ///
    /// If the first record does not fit, fails with
    /// [`ReadError::BufferTooSmall`] carrying the size it needs. If the log
    /// was cleared since this handle last read, fails once with
    /// [`ReadError::GenerationChanged`].
    fn read_block(
        &self,
        direction: ReadDirection,
        start_index: u64,
        buf: &mut [u8],
    ) -> std::result::Result<usize, ReadError>;

    /// Record number of the oldest retained record.
    fn oldest_index(&self) -> Result<u64>;

    /// Number of retained records.
    fn count(&self) -> Result<u64>;

    /// Token that changes every time the log is cleared, for stores that
    /// can report one. Readers use it to drop cached blocks that predate a
    /// clear made through another handle.
    fn generation(&self) -> Result<Option<u64>> {
        Ok(None)
    }

    /// Atomically removes every record.
    fn clear(&self) -> Result<()>;

    /// Registers a wait primitive raised after every append. The
    /// registration lives as long as this handle.
    fn register_change_wait(&self) -> Result<ChangeSignal>;
}

/// Write capability for one log.
pub trait LogWriter: Send + Sync {
    /// Appends one record and returns the record number it was given.
    fn append(&self, timestamp: u64, payload: &[u8]) -> Result<u64>;
}

/// Opens handles on logs by (log, machine).
pub trait LogStore: Send + Sync {
    fn open(&self, log: &str, machine: &str) -> Result<Box<dyn LogHandle>>;

    fn open_writer(&self, log: &str, machine: &str) -> Result<Box<dyn LogWriter>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_key_normalization() {
        assert_eq!(LogKey::new("Application", "."), LogKey::new("application", ""));
        assert_eq!(LogKey::new("System", "HOST-1"), LogKey::new("system", "host-1"));
        assert_ne!(LogKey::new("System", "host-1"), LogKey::new("System", "host-2"));
    }

    #[test]
    fn test_log_key_display() {
        let key = LogKey::new("Security", "");
        assert_eq!(key.to_string(), ".\\security");
        assert_eq!(key.machine(), LOCAL_MACHINE);
        assert_eq!(key.log(), "security");
    }

    #[test]
    fn test_default_direction_is_forward() {
        assert_eq!(ReadDirection::default(), ReadDirection::Forward);
        assert_eq!(ReadDirection::Backward.as_str(), "backward");
    }
}
