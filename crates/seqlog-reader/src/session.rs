//! Log Session
//!
//! A (log, machine) pair plus the handles opened on it. The read handle and
//! the writer are opened lazily on first use and kept until
//! [`LogSession::close`].
//!
//! ## Usage
//!
//! ```ignore
//! let mut session = LogSession::new(store, "Application", ".");
//! session.write_entry(b"service started")?;
//!
//! let mut entries = session.entries();
//! for entry in entries.iter() {
//!     println!("#{} {:?}", entry.record_number, entry.payload);
//! }
//! ```

use std::sync::Arc;

use seqlog_core::{now_ms, LogHandle, LogKey, LogStore, LogWriter, RecordView};
use tracing::debug;

use crate::collection::EntryCollection;
use crate::config::ReaderConfig;
use crate::error::Result;
use crate::index::RandomAccessIndex;

pub struct LogSession {
    store: Arc<dyn LogStore>,
    log: String,
    machine: String,
    reader: Option<Box<dyn LogHandle>>,
    writer: Option<Box<dyn LogWriter>>,
    index: RandomAccessIndex,
}

impl LogSession {
    pub fn new(store: Arc<dyn LogStore>, log: &str, machine: &str) -> Self {
        Self::with_config(store, log, machine, ReaderConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn LogStore>,
        log: &str,
        machine: &str,
        config: ReaderConfig,
    ) -> Self {
        Self {
            store,
            log: log.to_string(),
            machine: machine.to_string(),
            reader: None,
            writer: None,
            index: RandomAccessIndex::new(config),
        }
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    pub fn machine(&self) -> &str {
        &self.machine
    }

    pub fn key(&self) -> LogKey {
        LogKey::new(&self.log, &self.machine)
    }

    /// True while a read handle is open.
    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Read-only view over the records of this log.
    pub fn entries(&mut self) -> EntryCollection<'_> {
        EntryCollection::new(self)
    }

    /// Record at `index` positions past the oldest retained one.
    pub fn entry_at(&mut self, index: u64) -> Result<RecordView<'_>> {
        let handle = open_reader(self.store.as_ref(), &self.log, &self.machine, &mut self.reader)?;
        self.index.get(handle, index)
    }

    /// Record with the given absolute record number.
    pub fn record_at(&mut self, record_number: u64) -> Result<RecordView<'_>> {
        let handle = open_reader(self.store.as_ref(), &self.log, &self.machine, &mut self.reader)?;
        self.index.get_absolute(handle, record_number)
    }

    pub fn oldest_index(&mut self) -> Result<u64> {
        let handle = open_reader(self.store.as_ref(), &self.log, &self.machine, &mut self.reader)?;
        Ok(handle.oldest_index()?)
    }

    /// Live number of retained records.
    pub fn count(&mut self) -> Result<u64> {
        let handle = open_reader(self.store.as_ref(), &self.log, &self.machine, &mut self.reader)?;
        Ok(handle.count()?)
    }

    /// Appends one record stamped with the current time.
    pub fn write_entry(&mut self, payload: &[u8]) -> Result<u64> {
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => self.store.open_writer(&self.log, &self.machine)?,
        };
        let writer = self.writer.insert(writer);
        Ok(writer.append(now_ms(), payload)?)
    }

    /// Removes every record from the log and drops the cached block.
    pub fn clear(&mut self) -> Result<()> {
        let handle = open_reader(self.store.as_ref(), &self.log, &self.machine, &mut self.reader)?;
        handle.clear()?;
        self.index.reset();
        debug!(log = %self.log, machine = %self.machine, "Log cleared");
        Ok(())
    }

    /// Drops the cached block; handles stay open.
    pub fn reset(&mut self) {
        self.index.reset();
    }

    /// Closes both handles and drops the cached block.
    pub fn close(&mut self) {
        self.reader = None;
        self.writer = None;
        self.index.reset();
    }
}

fn open_reader<'a>(
    store: &dyn LogStore,
    log: &str,
    machine: &str,
    slot: &'a mut Option<Box<dyn LogHandle>>,
) -> Result<&'a dyn LogHandle> {
    let handle = match slot.take() {
        Some(handle) => handle,
        None => {
            debug!(log, machine, "Opening log");
            store.open(log, machine)?
        }
    };
    let handle = slot.insert(handle);
    Ok(&**handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqlog_core::MemoryLogStore;

    fn session() -> (Arc<MemoryLogStore>, LogSession) {
        let store = Arc::new(MemoryLogStore::new());
        store.create_log("Application", ".");
        let session = LogSession::new(store.clone(), "Application", "");
        (store, session)
    }

    #[test]
    fn test_handles_open_lazily() {
        let (store, mut session) = session();
        assert!(!session.is_open());
        assert_eq!(store.stats().opens, 0);

        assert_eq!(session.count().unwrap(), 0);
        assert!(session.is_open());
        session.count().unwrap();
        assert_eq!(store.stats().opens, 1);
    }

    #[test]
    fn test_write_then_read() {
        let (store, mut session) = session();
        assert_eq!(session.write_entry(b"first").unwrap(), 0);
        assert_eq!(session.write_entry(b"second").unwrap(), 1);
        assert_eq!(store.stats().writer_opens, 1);

        assert_eq!(session.entry_at(1).unwrap().payload(), b"second");
        assert_eq!(session.record_at(0).unwrap().payload(), b"first");
    }

    #[test]
    fn test_clear_resets_window() {
        let (_store, mut session) = session();
        session.write_entry(b"old").unwrap();
        assert_eq!(session.entry_at(0).unwrap().payload(), b"old");

        session.clear().unwrap();
        assert_eq!(session.count().unwrap(), 0);
        session.write_entry(b"new").unwrap();
        assert_eq!(session.entry_at(0).unwrap().payload(), b"new");
    }

    #[test]
    fn test_close_releases_handles() {
        let (store, mut session) = session();
        session.write_entry(b"x").unwrap();
        session.count().unwrap();
        session.close();
        assert!(!session.is_open());

        session.count().unwrap();
        assert_eq!(store.stats().opens, 2);
    }

    #[test]
    fn test_missing_log_surfaces_store_error() {
        let store = Arc::new(MemoryLogStore::new());
        let mut session = LogSession::new(store, "Missing", ".");
        let err = session.count().unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Store(seqlog_core::Error::LogNotFound { .. })
        ));
    }

    #[test]
    fn test_identity() {
        let (_store, session) = session();
        assert_eq!(session.log(), "Application");
        assert_eq!(session.machine(), "");
        assert_eq!(session.key(), LogKey::new("application", "."));
    }
}
