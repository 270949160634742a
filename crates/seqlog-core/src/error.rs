//! Error Types for SeqLog
//!
//! This module defines the errors raised by the log store abstraction and by
//! record framing.
//!
//! ## Error Categories
//!
//! ### Store Errors ([`Error`])
//! - `LogNotFound`: The (log, machine) pair does not name an existing log
//! - `AccessDenied`: The caller may not open the log
//! - `Os`: Any other native failure, with the originating code attached
//!
//! ### Framing Errors ([`Error::InvalidRecord`])
//! - Length prefix smaller than the fixed header plus trailer
//! - Record extends past the end of the buffer
//! - Trailing length copy disagrees with the leading length
//! - Bad signature bytes
//!
//! ### Block Read Outcomes ([`ReadError`])
//! `read_block` has its own taxonomy because two of its failures are not
//! really failures: `BufferTooSmall` and `GenerationChanged` are answered by
//! the reader with one local retry each.
//!
//! ## Usage
//! All functions in this crate return `Result<T>`, aliased to
//! `Result<T, Error>`, so `?` propagates store failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Log '{log}' not found on machine '{machine}'")]
    LogNotFound { log: String, machine: String },

    #[error("Access denied to log '{log}' on machine '{machine}'")]
    AccessDenied { log: String, machine: String },

    #[error("Store error (code {code}): {message}")]
    Os { code: i32, message: String },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl Error {
    /// Native error code carried by this error, if any.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Error::Os { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a failed `read_block` call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    /// The first record at the requested position does not fit the buffer.
    #[error("Buffer too small: {needed} bytes needed")]
    BufferTooSmall { needed: usize },

    /// The log was cleared or replaced since the handle last read from it.
    #[error("Log generation changed")]
    GenerationChanged,

    /// The requested record number is not currently retained by the log.
    #[error("Record {index} is not in the log")]
    InvalidIndex { index: u64 },

    /// Any other native failure.
    #[error("Read failed (code {code}): {message}")]
    Os { code: i32, message: String },
}

impl ReadError {
    /// Returns true for the failures the reader answers with a local retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReadError::BufferTooSmall { .. } | ReadError::GenerationChanged
        )
    }

    /// Native error code carried by this error, if any.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            ReadError::Os { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ReadError::BufferTooSmall { needed: 64 }.is_transient());
        assert!(ReadError::GenerationChanged.is_transient());
        assert!(!ReadError::InvalidIndex { index: 3 }.is_transient());
        assert!(!ReadError::Os {
            code: 5,
            message: "denied".to_string()
        }
        .is_transient());
    }

    #[test]
    fn os_code_is_exposed() {
        let err = Error::Os {
            code: 1500,
            message: "corrupt".to_string(),
        };
        assert_eq!(err.os_code(), Some(1500));
        assert_eq!(
            ReadError::Os {
                code: 87,
                message: "bad parameter".to_string()
            }
            .os_code(),
            Some(87)
        );
        assert_eq!(ReadError::GenerationChanged.os_code(), None);
    }

    #[test]
    fn display_includes_context() {
        let err = Error::LogNotFound {
            log: "Application".to_string(),
            machine: ".".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Log 'Application' not found on machine '.'"
        );
    }
}
