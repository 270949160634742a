//! SeqLog Core
//!
//! Shared building blocks for reading and watching sequential,
//! record-numbered logs:
//!
//! - [`record`]: the framed record layout and a zero-copy record view
//! - [`store`]: the handle-based store traits the reader is written against
//! - [`signal`]: the coalescing change signal handed out by stores
//! - [`memory`]: a complete in-memory store
//! - [`error`]: store and block-read error types

pub mod error;
pub mod memory;
pub mod record;
pub mod signal;
pub mod store;

pub use error::{Error, ReadError, Result};
pub use memory::{MemoryLogConfig, MemoryLogStore, MemoryStoreStats};
pub use record::{encode_record, LogEntry, RecordLayout, RecordView, LAYOUT, MAX_RECORD_SIZE};
pub use signal::ChangeSignal;
pub use store::{LogHandle, LogKey, LogStore, LogWriter, ReadDirection, LOCAL_MACHINE};

/// Milliseconds since the Unix epoch, the timestamp unit used by records.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
