//! Random Access Index
//!
//! Resolves a record position to a [`RecordView`] over a [`CacheWindow`],
//! issuing `read_block` calls only when the window cannot answer.
//!
//! ## Positions
//!
//! - **Logical index**: zero-based, counted from the oldest retained record.
//!   `logical = 0` is always the oldest record, so it follows wraps and
//!   clears.
//! - **Record number**: absolute, assigned by the store.
//!
//! Both are range-checked against the live `oldest_index()`/`count()` of the
//! handle before the window is consulted.
//!
//! ## Stale Windows
//!
//! The live bounds seen when a block was installed are kept with it. Before
//! answering a hit the index compares them with the current bounds and drops
//! the window when the log was cleared in between:
//!
//! - the store's generation token changed, or
//! - `oldest` moved backward, or
//! - `oldest` stayed put while `count` shrank.
//!
//! Stores without a generation token cannot reveal a clear followed by
//! enough appends to restore the old bounds. In that case the window keeps
//! serving the pre-clear block until a miss, a `GenerationChanged` or an
//! explicit `reset`.
//!
//! ## Read Flow
//!
//! ```text
//! get(logical)
//!     ↓
//! live range check ──out of range──→ EntryNotFound
//!     ↓
//! drop window if the log was cleared since install
//!     ↓
//! window.locate(oldest + logical) ──HIT──→ record
//!     ↓ MISS
//! choose direction (backward if the record above is cached)
//!     ↓
//! read_block ──BufferTooSmall──→ grow, retry once
//!            ──GenerationChanged──→ reset, re-anchor, retry once
//!            ──anything else / repeated kind──→ ReadFailed
//!     ↓
//! install block, cursor on offset 0 → record
//! ```

use seqlog_core::{LogHandle, ReadDirection, ReadError, RecordView};
use seqlog_observability::metrics::{
    CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, READ_FAILURES_TOTAL, READ_RETRIES_TOTAL,
};
use tracing::debug;

use crate::config::{DirectionPolicy, ReaderConfig};
use crate::error::{Error, Result};
use crate::window::CacheWindow;

#[derive(Debug, Clone, Copy)]
enum Anchor {
    Logical(u64),
    Absolute(u64),
}

/// Live bounds of the log as seen by one lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LiveBounds {
    oldest: u64,
    count: u64,
    generation: Option<u64>,
}

impl LiveBounds {
    /// True if a block installed under `self` cannot hold records of a log
    /// now at `live`.
    fn cleared_since(&self, live: &LiveBounds) -> bool {
        let generation_moved = matches!(
            (self.generation, live.generation),
            (Some(then), Some(now)) if then != now
        );
        generation_moved
            || live.oldest < self.oldest
            || (live.oldest == self.oldest && live.count < self.count)
    }
}

/// Cached random access to the records of one log handle.
///
/// The handle is passed per call so one index can serve whichever handle
/// its owner currently holds.
#[derive(Debug)]
pub struct RandomAccessIndex {
    window: CacheWindow,
    installed_under: Option<LiveBounds>,
    config: ReaderConfig,
}

impl RandomAccessIndex {
    pub fn new(config: ReaderConfig) -> Self {
        Self {
            window: CacheWindow::new(config.initial_buffer_size),
            installed_under: None,
            config,
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn window(&self) -> &CacheWindow {
        &self.window
    }

    /// Drops the cached block. The next lookup reads from the store.
    pub fn reset(&mut self) {
        self.window.reset();
        self.installed_under = None;
    }

    /// Returns the record at `logical` positions past the oldest one.
    pub fn get<'a>(&'a mut self, handle: &dyn LogHandle, logical: u64) -> Result<RecordView<'a>> {
        self.fetch(handle, Anchor::Logical(logical))
    }

    /// Returns the record with the given absolute record number.
    pub fn get_absolute<'a>(
        &'a mut self,
        handle: &dyn LogHandle,
        record_number: u64,
    ) -> Result<RecordView<'a>> {
        self.fetch(handle, Anchor::Absolute(record_number))
    }

    fn resolve(handle: &dyn LogHandle, anchor: Anchor) -> Result<(u64, LiveBounds)> {
        let oldest = handle.oldest_index()?;
        let count = handle.count()?;
        let live = LiveBounds {
            oldest,
            count,
            generation: handle.generation()?,
        };
        let record_number = match anchor {
            Anchor::Logical(index) if index < count => oldest + index,
            Anchor::Logical(index) => return Err(Error::EntryNotFound { index, count }),
            Anchor::Absolute(record_number)
                if record_number >= oldest && record_number < oldest + count =>
            {
                record_number
            }
            Anchor::Absolute(record_number) => {
                return Err(Error::RecordNotFound {
                    record_number,
                    oldest,
                    end: oldest + count,
                })
            }
        };
        Ok((record_number, live))
    }

    fn choose_direction(&self, record_number: u64) -> ReadDirection {
        match self.config.direction_policy {
            DirectionPolicy::AlwaysForward => ReadDirection::Forward,
            DirectionPolicy::Adaptive => {
                if record_number
                    .checked_add(1)
                    .is_some_and(|above| self.window.can_locate(above))
                {
                    ReadDirection::Backward
                } else {
                    ReadDirection::Forward
                }
            }
        }
    }

    fn fetch<'a>(&'a mut self, handle: &dyn LogHandle, anchor: Anchor) -> Result<RecordView<'a>> {
        let (mut record_number, mut live) = Self::resolve(handle, anchor)?;

        if self
            .installed_under
            .is_some_and(|installed| installed.cleared_since(&live))
        {
            debug!(record_number, "Log cleared since the window was filled");
            self.reset();
        }

        if self.window.locate(record_number).is_some() {
            CACHE_HITS_TOTAL.inc();
            debug!(record_number, "Window hit");
            return self.window.current();
        }

        CACHE_MISSES_TOTAL.inc();
        let mut direction = self.choose_direction(record_number);
        debug!(
            record_number,
            direction = direction.as_str(),
            "Window miss, reading block"
        );

        let mut grown = false;
        let mut reanchored = false;
        self.installed_under = None;
        loop {
            match handle.read_block(direction, record_number, self.window.fill_target()) {
                Ok(0) => {
                    READ_FAILURES_TOTAL.inc();
                    return Err(Error::ReadFailed {
                        record_number,
                        source: ReadError::InvalidIndex {
                            index: record_number,
                        },
                    });
                }
                Ok(bytes_read) => {
                    self.window.install(direction, record_number, bytes_read);
                    self.installed_under = Some(live);
                    return self.window.current();
                }
                Err(ReadError::BufferTooSmall { needed }) if !grown => {
                    grown = true;
                    if needed > self.config.max_buffer_size {
                        return Err(Error::RecordTooLarge {
                            needed,
                            max: self.config.max_buffer_size,
                        });
                    }
                    READ_RETRIES_TOTAL
                        .with_label_values(&["buffer_too_small"])
                        .inc();
                    debug!(record_number, needed, "Growing block buffer");
                    self.window.grow(needed);
                }
                Err(ReadError::GenerationChanged) if !reanchored => {
                    reanchored = true;
                    READ_RETRIES_TOTAL
                        .with_label_values(&["generation_changed"])
                        .inc();
                    self.window.reset();
                    (record_number, live) = Self::resolve(handle, anchor)?;
                    direction = self.choose_direction(record_number);
                    debug!(record_number, "Log generation changed, re-anchored");
                }
                Err(source) => {
                    READ_FAILURES_TOTAL.inc();
                    return Err(Error::ReadFailed {
                        record_number,
                        source,
                    });
                }
            }
        }
    }
}
