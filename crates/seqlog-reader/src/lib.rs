//! SeqLog Reader
//!
//! Random access and streaming cursors over an append-only, record-numbered
//! log store, served from one reusable block buffer per session.
//!
//! ## Components
//!
//! - [`CacheWindow`]: the block buffer and its bidirectional cursor
//! - [`RandomAccessIndex`]: logical index / record number → record, with
//!   direction choice and the single-retry policy for transient read errors
//! - [`LogSession`]: a (log, machine) pair with lazily opened handles
//! - [`EntryCollection`]: `count`, `at`, `iter`, `iter_rev` over a session
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use seqlog_core::MemoryLogStore;
//! use seqlog_reader::LogSession;
//!
//! let store = Arc::new(MemoryLogStore::new());
//! store.create_log("Application", ".");
//!
//! let mut session = LogSession::new(store, "Application", ".");
//! session.write_entry(b"service started")?;
//!
//! let mut entries = session.entries();
//! let count = entries.count()?;
//! let newest = entries.at(count - 1)?;
//! println!("{:?}", newest.payload());
//! ```

pub mod collection;
pub mod config;
pub mod error;
pub mod index;
pub mod session;
pub mod window;

pub use collection::{EntryCollection, EntryIter};
pub use config::{DirectionPolicy, ReaderConfig};
pub use error::{Error, Result};
pub use index::RandomAccessIndex;
pub use session::LogSession;
pub use window::CacheWindow;
