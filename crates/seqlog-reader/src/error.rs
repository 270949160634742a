//! Reader Error Types
//!
//! ## Error Categories
//!
//! ### Range Errors
//! - `EntryNotFound`: Logical index at or past the live count
//! - `RecordNotFound`: Absolute record number outside the retained range
//!
//! Both are ordinary outcomes under concurrent clears and wraps. Iteration
//! turns them into the end of the sequence.
//!
//! ### Read Errors
//! - `ReadFailed`: `read_block` still failed after its single local retry;
//!   the store's [`ReadError`] (and its native code) is attached
//! - `RecordTooLarge`: A record needs a bigger buffer than `max_buffer_size`
//!
//! ### Store Errors
//! - `Store`: Opening, counting, clearing or framing failed in the store
//!   layer
//!
//! ## Usage
//!
//! All reader operations return `Result<T>` which is aliased to
//! `Result<T, Error>`.

use seqlog_core::ReadError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Entry {index} not found (log holds {count} entries)")]
    EntryNotFound { index: u64, count: u64 },

    #[error("Record {record_number} not found (retained range {oldest}..{end})")]
    RecordNotFound {
        record_number: u64,
        oldest: u64,
        end: u64,
    },

    #[error("Reading record {record_number} failed: {source}")]
    ReadFailed {
        record_number: u64,
        #[source]
        source: ReadError,
    },

    #[error("Record needs a {needed} byte buffer, limit is {max} bytes")]
    RecordTooLarge { needed: usize, max: usize },

    #[error("Store error: {0}")]
    Store(#[from] seqlog_core::Error),
}

impl Error {
    /// True for the out-of-range outcomes.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::EntryNotFound { .. } | Error::RecordNotFound { .. }
        )
    }

    /// Native error code carried by this error, if any.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Error::ReadFailed { source, .. } => source.os_code(),
            Error::Store(e) => e.os_code(),
            _ => None,
        }
    }
}
