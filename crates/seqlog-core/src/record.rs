//! Record Framing
//!
//! This module defines the on-store layout of a single log record and the
//! zero-copy view used to read it out of a block buffer.
//!
//! ## Record Layout
//!
//! ```text
//! ┌──────────┬───────────┬───────────────┬───────────┬─────────┬──────────┐
//! │ Length   │ Signature │ Record Number │ Timestamp │ Payload │ Length   │
//! │ (4, LE)  │ "LfLe"    │ (8, LE)       │ (8, LE)   │ (N)     │ (4, LE)  │
//! └──────────┴───────────┴───────────────┴───────────┴─────────┴──────────┘
//! ```
//!
//! `Length` is the total size of the record, header and trailer included.
//! The trailing copy is what makes bidirectional stepping O(1): the record
//! that ends at offset `o` starts at `o - length_at(o - 4)`.
//!
//! ## Design Decisions
//! - Every field offset lives in one [`RecordLayout`] table ([`LAYOUT`]);
//!   nothing else in the workspace hard-codes an offset.
//! - [`RecordView::parse`] validates the whole frame once, so the accessors
//!   can read fields without re-checking bounds.
//! - A view borrows the buffer it was parsed from. Use
//!   [`RecordView::to_entry`] to keep a record past the next buffer refill.
//!
//! ## Example
//! ```ignore
//! let frame = encode_record(7, 1_700_000_000_000, b"disk full")?;
//! let view = RecordView::parse(&frame, 0)?;
//! assert_eq!(view.record_number(), 7);
//! assert_eq!(view.payload(), b"disk full");
//! ```

use bytes::{Buf, BufMut, Bytes};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Signature stored at [`RecordLayout::signature`]: the bytes `"LfLe"`.
pub const RECORD_SIGNATURE: u32 = 0x654c_664c;

/// Largest record the framing accepts (16 MiB).
pub const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Byte offsets of the fields inside a framed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    /// Leading total length (u32, LE).
    pub length: usize,
    /// Signature (u32, LE).
    pub signature: usize,
    /// Record number assigned by the store (u64, LE).
    pub record_number: usize,
    /// Write time in milliseconds since epoch (u64, LE).
    pub timestamp: usize,
    /// First payload byte.
    pub payload: usize,
    /// Size of the trailing length copy.
    pub trailer: usize,
}

/// The layout every record in the store uses.
pub const LAYOUT: RecordLayout = RecordLayout {
    length: 0,
    signature: 4,
    record_number: 8,
    timestamp: 16,
    payload: 24,
    trailer: 4,
};

impl RecordLayout {
    /// Size of a record with an empty payload.
    pub const fn min_record_size(&self) -> usize {
        self.payload + self.trailer
    }

    /// Total framed size of a record carrying `payload_len` bytes.
    pub const fn framed_size(&self, payload_len: usize) -> usize {
        self.payload + payload_len + self.trailer
    }
}

/// Frames a record for storage.
pub fn encode_record(record_number: u64, timestamp: u64, payload: &[u8]) -> Result<Vec<u8>> {
    let size = LAYOUT.framed_size(payload.len());
    if size > MAX_RECORD_SIZE {
        return Err(Error::InvalidRecord(format!(
            "record of {} bytes exceeds maximum of {} bytes",
            size, MAX_RECORD_SIZE
        )));
    }

    let mut buf = Vec::with_capacity(size);
    buf.put_u32_le(size as u32);
    buf.put_u32_le(RECORD_SIGNATURE);
    buf.put_u64_le(record_number);
    buf.put_u64_le(timestamp);
    buf.put_slice(payload);
    buf.put_u32_le(size as u32);
    Ok(buf)
}

/// Reads the length prefix stored at `offset`, if four bytes are available.
pub fn length_at(buf: &[u8], offset: usize) -> Option<usize> {
    let end = offset.checked_add(4)?;
    let mut cursor = buf.get(offset..end)?;
    Some(cursor.get_u32_le() as usize)
}

/// Offset of the record following the one at `offset`.
///
/// Returns `None` when the record at `offset` is the last whole record in
/// `buf`: no complete record frame follows it, or either length prefix is
/// implausible.
pub fn next_record_offset(buf: &[u8], offset: usize) -> Option<usize> {
    let length = length_at(buf, offset)?;
    if length < LAYOUT.min_record_size() {
        return None;
    }
    let next = offset.checked_add(length)?;
    let following = length_at(buf, next)?;
    if following < LAYOUT.min_record_size() {
        return None;
    }
    let following_end = next.checked_add(following)?;
    (following_end <= buf.len()).then_some(next)
}

/// Offset of the record preceding the one at `offset`, found through the
/// trailing length copy just before `offset`.
pub fn previous_record_offset(buf: &[u8], offset: usize) -> Option<usize> {
    let trailer = offset.checked_sub(LAYOUT.trailer)?;
    let length = length_at(buf, trailer)?;
    if length < LAYOUT.min_record_size() {
        return None;
    }
    offset.checked_sub(length)
}

/// A validated, borrowed view of one record inside a block buffer.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> RecordView<'a> {
    /// Parses and validates the record starting at `offset` in `buf`.
    pub fn parse(buf: &'a [u8], offset: usize) -> Result<Self> {
        let length = length_at(buf, offset).ok_or_else(|| {
            Error::InvalidRecord(format!("no length prefix at offset {}", offset))
        })?;

        if length < LAYOUT.min_record_size() {
            return Err(Error::InvalidRecord(format!(
                "length {} at offset {} is below the minimum of {}",
                length,
                offset,
                LAYOUT.min_record_size()
            )));
        }

        let end = offset
            .checked_add(length)
            .filter(|end| *end <= buf.len())
            .ok_or_else(|| {
                Error::InvalidRecord(format!(
                    "record at offset {} with length {} overruns buffer of {} bytes",
                    offset,
                    length,
                    buf.len()
                ))
            })?;

        let bytes = &buf[offset..end];

        let trailer = length_at(bytes, length - LAYOUT.trailer).unwrap_or(0);
        if trailer != length {
            return Err(Error::InvalidRecord(format!(
                "trailing length {} does not match leading length {} at offset {}",
                trailer, length, offset
            )));
        }

        let mut cursor = &bytes[LAYOUT.signature..];
        let signature = cursor.get_u32_le();
        if signature != RECORD_SIGNATURE {
            return Err(Error::InvalidRecord(format!(
                "bad signature {:#010x} at offset {}",
                signature, offset
            )));
        }

        Ok(Self { bytes, offset })
    }

    /// Offset of this record within the buffer it was parsed from.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total framed size in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn record_number(&self) -> u64 {
        let mut cursor = &self.bytes[LAYOUT.record_number..];
        cursor.get_u64_le()
    }

    pub fn timestamp(&self) -> u64 {
        let mut cursor = &self.bytes[LAYOUT.timestamp..];
        cursor.get_u64_le()
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[LAYOUT.payload..self.bytes.len() - LAYOUT.trailer]
    }

    /// The complete frame, header and trailer included.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Copies the record out of the buffer.
    pub fn to_entry(&self) -> LogEntry {
        LogEntry {
            record_number: self.record_number(),
            timestamp: self.timestamp(),
            payload: Bytes::copy_from_slice(self.payload()),
        }
    }
}

/// An owned copy of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Record number assigned by the store
    pub record_number: u64,

    /// Write time in milliseconds since epoch
    pub timestamp: u64,

    /// Record payload
    pub payload: Bytes,
}

impl LogEntry {
    pub fn new(record_number: u64, timestamp: u64, payload: Bytes) -> Self {
        Self {
            record_number,
            timestamp,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(records: &[(u64, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (number, payload) in records {
            buf.extend(encode_record(*number, 1000 + number, payload).unwrap());
        }
        buf
    }

    #[test]
    fn test_encode_then_parse() {
        let frame = encode_record(42, 1_700_000_000_000, b"service started").unwrap();
        assert_eq!(frame.len(), LAYOUT.framed_size(15));

        let view = RecordView::parse(&frame, 0).unwrap();
        assert_eq!(view.record_number(), 42);
        assert_eq!(view.timestamp(), 1_700_000_000_000);
        assert_eq!(view.payload(), b"service started");
        assert_eq!(view.size(), frame.len());
        assert_eq!(view.offset(), 0);
    }

    #[test]
    fn test_leading_and_trailing_length_match() {
        let frame = encode_record(1, 0, b"abc").unwrap();
        let leading = length_at(&frame, 0).unwrap();
        let trailing = length_at(&frame, frame.len() - 4).unwrap();
        assert_eq!(leading, frame.len());
        assert_eq!(leading, trailing);
    }

    #[test]
    fn test_empty_payload() {
        let frame = encode_record(0, 0, b"").unwrap();
        assert_eq!(frame.len(), LAYOUT.min_record_size());
        let view = RecordView::parse(&frame, 0).unwrap();
        assert!(view.payload().is_empty());
    }

    #[test]
    fn test_step_forward_and_back() {
        let buf = block(&[(10, b"a"), (11, b"bbbb"), (12, b"cc")]);

        let second = next_record_offset(&buf, 0).unwrap();
        let third = next_record_offset(&buf, second).unwrap();
        assert!(next_record_offset(&buf, third).is_none());

        assert_eq!(RecordView::parse(&buf, third).unwrap().record_number(), 12);
        assert_eq!(previous_record_offset(&buf, third), Some(second));
        assert_eq!(previous_record_offset(&buf, second), Some(0));
        assert!(previous_record_offset(&buf, 0).is_none());
    }

    #[test]
    fn test_truncated_record_rejected() {
        let frame = encode_record(3, 0, b"payload").unwrap();
        let err = RecordView::parse(&frame[..frame.len() - 1], 0).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord(_)));
    }

    #[test]
    fn test_trailer_mismatch_rejected() {
        let mut frame = encode_record(3, 0, b"payload").unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(RecordView::parse(&frame, 0).is_err());
    }

    #[test]
    fn test_bad_signature_rejected() {
        let mut frame = encode_record(3, 0, b"payload").unwrap();
        frame[LAYOUT.signature] = b'X';
        assert!(RecordView::parse(&frame, 0).is_err());
    }

    #[test]
    fn test_implausible_length_stops_walk() {
        let mut buf = block(&[(1, b"x"), (2, b"y")]);
        buf[0] = 3;
        buf[1] = 0;
        buf[2] = 0;
        buf[3] = 0;
        assert!(next_record_offset(&buf, 0).is_none());
    }

    #[test]
    fn test_oversized_record_rejected() {
        let payload = vec![0u8; MAX_RECORD_SIZE];
        assert!(encode_record(0, 0, &payload).is_err());
    }

    #[test]
    fn test_to_entry_copies() {
        let frame = encode_record(9, 77, b"copied").unwrap();
        let entry = RecordView::parse(&frame, 0).unwrap().to_entry();
        drop(frame);
        assert_eq!(entry, LogEntry::new(9, 77, Bytes::from_static(b"copied")));
    }
}
