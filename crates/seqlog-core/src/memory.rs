//! In-Memory Log Store
//!
//! A complete [`LogStore`] kept in process memory. It behaves like the native
//! store the reader is written against, which makes it the backend for tests
//! and for embedding the reader without an operating-system log service.
//!
//! ## Behavior
//!
//! - **Record numbers** start at 0 and increase by one per append.
//! - **Wrap**: when `max_records` or `max_bytes` is exceeded the oldest
//!   records age out silently and `oldest_index()` advances.
//! - **Clear** removes every record, restarts numbering at 0 and advances
//!   the log generation. Every other open handle reports
//!   [`ReadError::GenerationChanged`] on its next `read_block`, once.
//! - **Change waits** are raised after every append and are dropped together
//!   with the handle that registered them.
//! - **Fault injection**: [`MemoryLogStore::inject_read_faults`] queues errors
//!   returned by the next `read_block` calls on any handle of that log.
//!
//! ## Usage
//!
//! ```ignore
//! let store = MemoryLogStore::new();
//! store.create_log("Application", ".");
//! store.append("Application", ".", now_ms(), b"service started")?;
//!
//! let handle = store.open("Application", ".")?;
//! assert_eq!(handle.count()?, 1);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, ReadError, Result};
use crate::record::encode_record;
use crate::signal::ChangeSignal;
use crate::store::{LogHandle, LogKey, LogStore, LogWriter, ReadDirection};

/// Capacity limits for every log in a [`MemoryLogStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLogConfig {
    /// Maximum retained records before the oldest age out (None = unbounded)
    #[serde(default)]
    pub max_records: Option<usize>,

    /// Maximum retained framed bytes before the oldest age out (None = unbounded)
    #[serde(default)]
    pub max_bytes: Option<usize>,
}

/// Counters describing how the store has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    /// Read handles opened
    pub opens: u64,
    /// Writer handles opened
    pub writer_opens: u64,
    /// Calls to `register_change_wait`
    pub wait_registrations: u64,
    /// Change waits currently registered (handles still open)
    pub active_waits: usize,
}

#[derive(Debug, Default)]
struct StoreCounters {
    opens: AtomicU64,
    writer_opens: AtomicU64,
    wait_registrations: AtomicU64,
}

/// A [`LogStore`] holding its logs in memory.
pub struct MemoryLogStore {
    logs: RwLock<HashMap<LogKey, Arc<MemoryLog>>>,
    config: MemoryLogConfig,
    counters: Arc<StoreCounters>,
    next_handle_id: AtomicU64,
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLogStore {
    /// Creates an empty store with unbounded logs.
    pub fn new() -> Self {
        Self::with_config(MemoryLogConfig::default())
    }

    /// Creates an empty store whose logs wrap at the given limits.
    pub fn with_config(config: MemoryLogConfig) -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            config,
            counters: Arc::new(StoreCounters::default()),
            next_handle_id: AtomicU64::new(1),
        }
    }

    /// Creates the log if it does not exist yet.
    pub fn create_log(&self, log: &str, machine: &str) {
        let key = LogKey::new(log, machine);
        let mut logs = self.logs.write();
        logs.entry(key.clone())
            .or_insert_with(|| Arc::new(MemoryLog::new(key, self.config.clone())));
    }

    pub fn contains_log(&self, log: &str, machine: &str) -> bool {
        self.logs.read().contains_key(&LogKey::new(log, machine))
    }

    /// Appends one record without opening a writer.
    pub fn append(&self, log: &str, machine: &str, timestamp: u64, payload: &[u8]) -> Result<u64> {
        self.find(log, machine)?.append(timestamp, payload)
    }

    /// Clears the log without opening a handle.
    pub fn clear(&self, log: &str, machine: &str) -> Result<()> {
        self.find(log, machine)?.clear();
        Ok(())
    }

    /// Makes `open` and `open_writer` fail with [`Error::AccessDenied`].
    pub fn set_access_denied(&self, log: &str, machine: &str, denied: bool) -> Result<()> {
        self.find(log, machine)?
            .denied
            .store(denied, Ordering::Release);
        Ok(())
    }

    /// Queues errors returned, in order, by the next `read_block` calls.
    pub fn inject_read_faults(
        &self,
        log: &str,
        machine: &str,
        faults: impl IntoIterator<Item = ReadError>,
    ) -> Result<()> {
        self.find(log, machine)?.faults.lock().extend(faults);
        Ok(())
    }

    pub fn stats(&self) -> MemoryStoreStats {
        let active_waits = self
            .logs
            .read()
            .values()
            .map(|log| log.waits.lock().values().map(Vec::len).sum::<usize>())
            .sum();

        MemoryStoreStats {
            opens: self.counters.opens.load(Ordering::Relaxed),
            writer_opens: self.counters.writer_opens.load(Ordering::Relaxed),
            wait_registrations: self.counters.wait_registrations.load(Ordering::Relaxed),
            active_waits,
        }
    }

    fn find(&self, log: &str, machine: &str) -> Result<Arc<MemoryLog>> {
        let key = LogKey::new(log, machine);
        self.logs
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::LogNotFound {
                log: log.to_string(),
                machine: machine.to_string(),
            })
    }

    fn find_accessible(&self, log: &str, machine: &str) -> Result<Arc<MemoryLog>> {
        let found = self.find(log, machine)?;
        if found.denied.load(Ordering::Acquire) {
            return Err(Error::AccessDenied {
                log: log.to_string(),
                machine: machine.to_string(),
            });
        }
        Ok(found)
    }
}

impl LogStore for MemoryLogStore {
    fn open(&self, log: &str, machine: &str) -> Result<Box<dyn LogHandle>> {
        let target = self.find_accessible(log, machine)?;
        self.counters.opens.fetch_add(1, Ordering::Relaxed);

        let generation = target.state.lock().generation;
        Ok(Box::new(MemoryLogHandle {
            id: self.next_handle_id.fetch_add(1, Ordering::Relaxed),
            log: target,
            seen_generation: AtomicU64::new(generation),
            counters: Arc::clone(&self.counters),
        }))
    }

    fn open_writer(&self, log: &str, machine: &str) -> Result<Box<dyn LogWriter>> {
        let target = self.find_accessible(log, machine)?;
        self.counters.writer_opens.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryLogWriter { log: target }))
    }
}

struct LogState {
    records: VecDeque<Vec<u8>>,
    oldest: u64,
    bytes: usize,
    generation: u64,
}

struct MemoryLog {
    key: LogKey,
    config: MemoryLogConfig,
    state: Mutex<LogState>,
    /// handle id -> change waits registered through that handle
    waits: Mutex<HashMap<u64, Vec<ChangeSignal>>>,
    faults: Mutex<VecDeque<ReadError>>,
    denied: AtomicBool,
}

impl MemoryLog {
    fn new(key: LogKey, config: MemoryLogConfig) -> Self {
        Self {
            key,
            config,
            state: Mutex::new(LogState {
                records: VecDeque::new(),
                oldest: 0,
                bytes: 0,
                generation: 0,
            }),
            waits: Mutex::new(HashMap::new()),
            faults: Mutex::new(VecDeque::new()),
            denied: AtomicBool::new(false),
        }
    }

    fn append(&self, timestamp: u64, payload: &[u8]) -> Result<u64> {
        let record_number = {
            let mut state = self.state.lock();
            let record_number = state.oldest + state.records.len() as u64;
            let frame = encode_record(record_number, timestamp, payload)?;
            state.bytes += frame.len();
            state.records.push_back(frame);
            self.enforce_capacity(&mut state);
            record_number
        };

        for signal in self.waits.lock().values().flatten() {
            signal.raise();
        }

        Ok(record_number)
    }

    fn enforce_capacity(&self, state: &mut LogState) {
        let mut evicted = 0u64;
        while state.records.len() > 1 && self.over_capacity(state) {
            if let Some(frame) = state.records.pop_front() {
                state.bytes -= frame.len();
                state.oldest += 1;
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!(
                log = %self.key,
                evicted,
                oldest = state.oldest,
                "Log wrapped"
            );
        }
    }

    fn over_capacity(&self, state: &LogState) -> bool {
        let too_many = self
            .config
            .max_records
            .is_some_and(|max| max > 0 && state.records.len() > max);
        let too_big = self
            .config
            .max_bytes
            .is_some_and(|max| state.bytes > max);
        too_many || too_big
    }

    fn clear(&self) -> u64 {
        let mut state = self.state.lock();
        state.records.clear();
        state.oldest = 0;
        state.bytes = 0;
        state.generation += 1;
        debug!(log = %self.key, generation = state.generation, "Log cleared");
        state.generation
    }

    fn read_block(
        &self,
        seen_generation: &AtomicU64,
        direction: ReadDirection,
        start_index: u64,
        buf: &mut [u8],
    ) -> std::result::Result<usize, ReadError> {
        if let Some(fault) = self.faults.lock().pop_front() {
            return Err(fault);
        }

        let state = self.state.lock();
        if seen_generation.swap(state.generation, Ordering::AcqRel) != state.generation {
            return Err(ReadError::GenerationChanged);
        }

        let end = state.oldest + state.records.len() as u64;
        if start_index < state.oldest || start_index >= end {
            return Err(ReadError::InvalidIndex { index: start_index });
        }

        let position = (start_index - state.oldest) as usize;
        let positions: Box<dyn Iterator<Item = usize>> = match direction {
            ReadDirection::Forward => Box::new(position..state.records.len()),
            ReadDirection::Backward => Box::new((0..=position).rev()),
        };

        let mut written = 0;
        for pos in positions {
            let frame = &state.records[pos];
            if written + frame.len() > buf.len() {
                if written == 0 {
                    return Err(ReadError::BufferTooSmall {
                        needed: frame.len(),
                    });
                }
                break;
            }
            buf[written..written + frame.len()].copy_from_slice(frame);
            written += frame.len();
        }

        Ok(written)
    }
}

struct MemoryLogHandle {
    id: u64,
    log: Arc<MemoryLog>,
    seen_generation: AtomicU64,
    counters: Arc<StoreCounters>,
}

impl LogHandle for MemoryLogHandle {
    fn read_block(
        &self,
        direction: ReadDirection,
        start_index: u64,
        buf: &mut [u8],
    ) -> std::result::Result<usize, ReadError> {
        self.log
            .read_block(&self.seen_generation, direction, start_index, buf)
    }

    fn oldest_index(&self) -> Result<u64> {
        Ok(self.log.state.lock().oldest)
    }

    fn count(&self) -> Result<u64> {
        Ok(self.log.state.lock().records.len() as u64)
    }

    fn generation(&self) -> Result<Option<u64>> {
        Ok(Some(self.log.state.lock().generation))
    }

    fn clear(&self) -> Result<()> {
        let generation = self.log.clear();
        self.seen_generation.store(generation, Ordering::Release);
        Ok(())
    }

    fn register_change_wait(&self) -> Result<ChangeSignal> {
        let signal = ChangeSignal::new();
        self.log
            .waits
            .lock()
            .entry(self.id)
            .or_default()
            .push(signal.clone());
        self.counters
            .wait_registrations
            .fetch_add(1, Ordering::Relaxed);
        Ok(signal)
    }
}

impl Drop for MemoryLogHandle {
    fn drop(&mut self) {
        self.log.waits.lock().remove(&self.id);
    }
}

struct MemoryLogWriter {
    log: Arc<MemoryLog>,
}

impl LogWriter for MemoryLogWriter {
    fn append(&self, timestamp: u64, payload: &[u8]) -> Result<u64> {
        self.log.append(timestamp, payload)
    }
}
