//! Listener Registrations
//!
//! One registration per subscriber: the callback, the watermark (the record
//! number the listener expects next) and an `active` flag cleared by
//! unsubscribe. The flag is checked before every delivery, which bounds
//! deliveries after unsubscribe to the one already in flight.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use seqlog_core::{LogEntry, LogKey};
use seqlog_observability::metrics::LISTENER_ERRORS_TOTAL;
use tracing::warn;

/// Callback invoked once per new record.
pub type ListenerCallback = dyn Fn(&LogEntry) -> anyhow::Result<()> + Send + Sync;

pub struct ListenerRegistration {
    id: u64,
    callback: Box<ListenerCallback>,
    last_seen: AtomicU64,
    active: AtomicBool,
}

impl ListenerRegistration {
    pub(crate) fn new(id: u64, callback: Box<ListenerCallback>) -> Self {
        Self {
            id,
            callback,
            last_seen: AtomicU64::new(0),
            active: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Record number this listener will be handed next.
    pub fn last_seen(&self) -> u64 {
        self.last_seen.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_last_seen(&self, watermark: u64) {
        self.last_seen.store(watermark, Ordering::Release);
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Runs the callback. Errors and panics are logged and counted here and
    /// reported as `false`.
    pub(crate) fn deliver(&self, key: &LogKey, entry: &LogEntry) -> bool {
        match catch_unwind(AssertUnwindSafe(|| (self.callback)(entry))) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                LISTENER_ERRORS_TOTAL
                    .with_label_values(&[&key.to_string()])
                    .inc();
                warn!(
                    log = %key,
                    listener = self.id,
                    record_number = entry.record_number,
                    error = %e,
                    "Listener callback failed"
                );
                false
            }
            Err(panic) => {
                LISTENER_ERRORS_TOTAL
                    .with_label_values(&[&key.to_string()])
                    .inc();
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(
                    log = %key,
                    listener = self.id,
                    record_number = entry.record_number,
                    panic = %message,
                    "Listener callback panicked"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("id", &self.id)
            .field("last_seen", &self.last_seen())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: u64) -> LogEntry {
        LogEntry::new(n, 0, Default::default())
    }

    #[test]
    fn test_successful_delivery() {
        let registration = ListenerRegistration::new(1, Box::new(|_| Ok(())));
        assert!(registration.deliver(&LogKey::new("app", "."), &entry(0)));
    }

    #[test]
    fn test_error_is_contained() {
        let registration =
            ListenerRegistration::new(2, Box::new(|_| Err(anyhow::anyhow!("subscriber broke"))));
        assert!(!registration.deliver(&LogKey::new("app", "."), &entry(0)));
    }

    #[test]
    fn test_panic_is_contained() {
        let registration = ListenerRegistration::new(3, Box::new(|_| panic!("boom")));
        assert!(!registration.deliver(&LogKey::new("app", "."), &entry(0)));
    }

    #[test]
    fn test_deactivate() {
        let registration = ListenerRegistration::new(4, Box::new(|_| Ok(())));
        registration.set_last_seen(9);
        registration.deactivate();
        assert!(!registration.is_active());
        assert_eq!(registration.last_seen(), 9);
    }
}
