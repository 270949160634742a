//! Entry Collection
//!
//! A read-only, ordered view over the records of a [`LogSession`].
//!
//! - `count()` always asks the store; it is never cached.
//! - `at(i)` returns a zero-copy [`RecordView`] or `EntryNotFound`.
//! - `iter()` / `iter_rev()` are lazy, finite and restartable cursors. Each
//!   step re-resolves its position against the live log, and any failure
//!   (a racing clear included) ends the sequence instead of surfacing.
//!
//! ## Borrowing
//!
//! Records point into the session's block buffer, so a record borrows the
//! collection and must be dropped (or copied with
//! [`RecordView::to_entry`]) before the next lookup. [`EntryIter`] therefore
//! offers two ways to walk:
//!
//! ```ignore
//! // zero-copy
//! let mut cursor = entries.iter();
//! while let Some(record) = cursor.next_record() {
//!     handle(record.payload());
//! }
//!
//! // owned entries through std::iter::Iterator
//! let recent: Vec<LogEntry> = entries.iter_rev().take(10).collect();
//! ```

use std::iter::FusedIterator;

use seqlog_core::{LogEntry, RecordView};
use tracing::debug;

use crate::error::Result;
use crate::session::LogSession;

pub struct EntryCollection<'s> {
    session: &'s mut LogSession,
}

impl<'s> EntryCollection<'s> {
    pub(crate) fn new(session: &'s mut LogSession) -> Self {
        Self { session }
    }

    /// Live number of records.
    pub fn count(&mut self) -> Result<u64> {
        self.session.count()
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.count()? == 0)
    }

    /// Record at `index` positions past the oldest one.
    pub fn at(&mut self, index: u64) -> Result<RecordView<'_>> {
        self.session.entry_at(index)
    }

    /// Oldest to newest.
    pub fn iter(&mut self) -> EntryIter<'_> {
        EntryIter::new(self.session, Order::Oldest)
    }

    /// Newest to oldest.
    pub fn iter_rev(&mut self) -> EntryIter<'_> {
        EntryIter::new(self.session, Order::Newest)
    }
}

impl<'c, 's> IntoIterator for &'c mut EntryCollection<'s> {
    type Item = LogEntry;
    type IntoIter = EntryIter<'c>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Order {
    Oldest,
    Newest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Start,
    At(u64),
    Done,
}

/// Cursor over an [`EntryCollection`].
pub struct EntryIter<'c> {
    session: &'c mut LogSession,
    order: Order,
    cursor: Cursor,
}

impl<'c> EntryIter<'c> {
    fn new(session: &'c mut LogSession, order: Order) -> Self {
        Self {
            session,
            order,
            cursor: Cursor::Start,
        }
    }

    /// Advances and returns the next record without copying it.
    pub fn next_record(&mut self) -> Option<RecordView<'_>> {
        let position = match self.cursor {
            Cursor::Done => return None,
            Cursor::At(position) => position,
            Cursor::Start => match self.order {
                Order::Oldest => 0,
                Order::Newest => match self.session.count() {
                    Ok(count) if count > 0 => count - 1,
                    _ => {
                        self.cursor = Cursor::Done;
                        return None;
                    }
                },
            },
        };

        let following = match self.order {
            Order::Oldest => position.checked_add(1),
            Order::Newest => position.checked_sub(1),
        };
        self.cursor = following.map_or(Cursor::Done, Cursor::At);

        match self.session.entry_at(position) {
            Ok(record) => Some(record),
            Err(e) => {
                if !e.is_not_found() {
                    debug!(position, error = %e, "Iteration ended by read failure");
                }
                self.cursor = Cursor::Done;
                None
            }
        }
    }
}

impl Iterator for EntryIter<'_> {
    type Item = LogEntry;

    fn next(&mut self) -> Option<LogEntry> {
        self.next_record().map(|record| record.to_entry())
    }
}

impl FusedIterator for EntryIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use seqlog_core::MemoryLogStore;
    use std::sync::Arc;

    fn session_with(records: u64) -> (Arc<MemoryLogStore>, LogSession) {
        let store = Arc::new(MemoryLogStore::new());
        store.create_log("app", ".");
        for i in 0..records {
            store
                .append("app", ".", i, format!("e{}", i).as_bytes())
                .unwrap();
        }
        let session = LogSession::new(store.clone(), "app", ".");
        (store, session)
    }

    #[test]
    fn test_iter_yields_all_in_order() {
        let (_store, mut session) = session_with(5);
        let mut entries = session.entries();
        let numbers: Vec<u64> = entries.iter().map(|e| e.record_number).collect();
        assert_eq!(numbers, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_iter_rev_yields_newest_first() {
        let (_store, mut session) = session_with(5);
        let mut entries = session.entries();
        let numbers: Vec<u64> = entries.iter_rev().map(|e| e.record_number).collect();
        assert_eq!(numbers, vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_iter_is_restartable() {
        let (_store, mut session) = session_with(3);
        let mut entries = session.entries();
        assert_eq!(entries.iter().count(), 3);
        assert_eq!(entries.iter().count(), 3);
        assert_eq!((&mut entries).into_iter().count(), 3);
    }

    #[test]
    fn test_empty_log() {
        let (_store, mut session) = session_with(0);
        let mut entries = session.entries();
        assert!(entries.is_empty().unwrap());
        assert!(entries.iter().next().is_none());
        assert!(entries.iter_rev().next().is_none());
        assert!(entries.at(0).unwrap_err().is_not_found());
    }

    #[test]
    fn test_next_record_is_zero_copy() {
        let (_store, mut session) = session_with(2);
        let mut entries = session.entries();
        let mut cursor = entries.iter();
        assert_eq!(cursor.next_record().unwrap().payload(), b"e0");
        assert_eq!(cursor.next_record().unwrap().payload(), b"e1");
        assert!(cursor.next_record().is_none());
        assert!(cursor.next_record().is_none());
    }

    #[test]
    fn test_clear_mid_iteration_ends_sequence() {
        let (store, mut session) = session_with(10);
        let mut entries = session.entries();
        let mut cursor = entries.iter();
        for _ in 0..4 {
            assert!(cursor.next().is_some());
        }
        store.clear("app", ".").unwrap();
        assert!(cursor.next().is_none());
        assert!(cursor.next().is_none());
    }
}
