//! Notifier Error Types
//!
//! - `NoRuntime`: `subscribe` was called outside a tokio runtime, so there is
//!   nowhere to run the watcher
//! - `Store`: opening the dedicated handle or registering the wait failed
//!
//! Listener callback failures are not errors of the notifier: they are
//! logged, counted and contained within the pass that saw them.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NotifyError>;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("No tokio runtime available to run the change watcher")]
    NoRuntime,

    #[error("Store error: {0}")]
    Store(#[from] seqlog_core::Error),
}
