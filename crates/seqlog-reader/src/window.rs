//! Cache Window
//!
//! One reusable buffer holding the last block returned by `read_block`: a
//! contiguous run of whole records, plus a cursor that walks between them.
//!
//! ## Orientation
//!
//! ```text
//! Forward window (read forward from 40):
//!   offset 0          →            bytes_cached
//!   [ #40 ][ #41 ][ #42 ][ #43 ]
//!
//! Backward window (read backward from 40):
//!   offset 0          →            bytes_cached
//!   [ #40 ][ #39 ][ #38 ][ #37 ]
//! ```
//!
//! `first_index` is always the record at offset 0. A forward window can
//! reach `first_index` and above, a backward window `first_index` and below.
//!
//! ## Cursor Walk
//!
//! Moving one record deeper into the buffer uses the leading length
//! (`offset + length_at(offset)`), moving back toward offset 0 uses the
//! trailing copy (`offset - length_at(offset - 4)`). Running off either end
//! is a miss: the cursor stays on the last record it reached and the caller
//! refills the window.

use seqlog_core::record::{next_record_offset, previous_record_offset};
use seqlog_core::{ReadDirection, RecordView};

use crate::error::Result;

#[derive(Debug)]
pub struct CacheWindow {
    buffer: Vec<u8>,
    bytes_cached: usize,
    first_index: Option<u64>,
    direction: ReadDirection,
    cursor_index: u64,
    cursor_offset: usize,
}

impl CacheWindow {
    /// Creates an invalid window with a buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            bytes_cached: 0,
            first_index: None,
            direction: ReadDirection::Forward,
            cursor_index: 0,
            cursor_offset: 0,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.first_index.is_some()
    }

    pub fn first_index(&self) -> Option<u64> {
        self.first_index
    }

    pub fn direction(&self) -> ReadDirection {
        self.direction
    }

    pub fn cursor_index(&self) -> u64 {
        self.cursor_index
    }

    pub fn cursor_offset(&self) -> usize {
        self.cursor_offset
    }

    pub fn bytes_cached(&self) -> usize {
        self.bytes_cached
    }

    /// Size of the allocated buffer.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// The cached records.
    pub fn contents(&self) -> &[u8] {
        &self.buffer[..self.bytes_cached]
    }

    /// Drops the cached block but keeps the allocation.
    pub fn reset(&mut self) {
        self.bytes_cached = 0;
        self.first_index = None;
        self.cursor_index = 0;
        self.cursor_offset = 0;
    }

    /// Enlarges the buffer to at least `needed` bytes. The window is
    /// invalidated.
    pub fn grow(&mut self, needed: usize) {
        self.reset();
        if self.buffer.len() < needed {
            self.buffer.resize(needed, 0);
        }
    }

    /// The whole buffer, for a block read to fill. Invalidates the window
    /// until [`install`](Self::install) is called.
    pub fn fill_target(&mut self) -> &mut [u8] {
        self.reset();
        &mut self.buffer
    }

    /// Marks the first `bytes_read` bytes as a block read in `direction`
    /// starting at record `first_index`, and puts the cursor on it.
    pub fn install(&mut self, direction: ReadDirection, first_index: u64, bytes_read: usize) {
        self.bytes_cached = bytes_read.min(self.buffer.len());
        self.first_index = Some(first_index);
        self.direction = direction;
        self.cursor_index = first_index;
        self.cursor_offset = 0;
    }

    /// True if `index` can be reached from the cursor without a block read.
    pub fn can_locate(&self, index: u64) -> bool {
        self.walk(index).is_ok()
    }

    /// Moves the cursor onto `index` and returns its offset, or `None` on a
    /// miss. After a miss the cursor rests on the last record it reached.
    pub fn locate(&mut self, index: u64) -> Option<usize> {
        let (position, hit) = match self.walk(index) {
            Ok(position) => (position, true),
            Err(position) => (position, false),
        };
        if self.is_valid() {
            self.cursor_index = position.0;
            self.cursor_offset = position.1;
        }
        hit.then_some(self.cursor_offset)
    }

    /// The record under the cursor.
    pub fn current(&self) -> Result<RecordView<'_>> {
        Ok(RecordView::parse(self.contents(), self.cursor_offset)?)
    }

    /// Walks from the cursor toward `index`. `Ok` holds the (index, offset)
    /// reached; `Err` holds the last position reached before leaving the
    /// window.
    fn walk(&self, index: u64) -> std::result::Result<(u64, usize), (u64, usize)> {
        let mut position = (self.cursor_index, self.cursor_offset);
        let Some(first) = self.first_index else {
            return Err(position);
        };

        let reachable = match self.direction {
            ReadDirection::Forward => index >= first,
            ReadDirection::Backward => index <= first,
        };
        if !reachable || self.bytes_cached == 0 {
            return Err(position);
        }

        let contents = self.contents();
        while position.0 != index {
            let ascending = index > position.0;
            let deeper = ascending == (self.direction == ReadDirection::Forward);
            let next = if deeper {
                next_record_offset(contents, position.1)
            } else {
                previous_record_offset(contents, position.1)
            };
            let Some(offset) = next else {
                return Err(position);
            };
            position = if ascending {
                (position.0 + 1, offset)
            } else {
                (position.0 - 1, offset)
            };
        }
        Ok(position)
    }
}
