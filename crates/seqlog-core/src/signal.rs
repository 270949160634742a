//! Change Signal
//!
//! The wait primitive a store hands out from
//! [`LogHandle::register_change_wait`](crate::store::LogHandle::register_change_wait).
//!
//! A signal raised while nobody is waiting is remembered (at most one
//! pending wake-up), so several appends between two waits coalesce into a
//! single wake-up. Waiters must therefore re-query the log after waking
//! instead of assuming one record per signal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A cloneable, coalescing "the log changed" signal.
#[derive(Debug, Clone, Default)]
pub struct ChangeSignal {
    inner: Arc<SignalInner>,
}

#[derive(Debug, Default)]
struct SignalInner {
    notify: Notify,
    raised: AtomicU64,
}

impl ChangeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wakes the waiter, or leaves a pending wake-up if none is waiting.
    pub fn raise(&self) {
        self.inner.raised.fetch_add(1, Ordering::Relaxed);
        self.inner.notify.notify_one();
    }

    /// Completes at the next raise, or immediately if one is pending.
    pub async fn changed(&self) {
        self.inner.notify.notified().await;
    }

    /// Total number of raises since creation.
    pub fn raised_count(&self) -> u64 {
        self.inner.raised.load(Ordering::Relaxed)
    }

    /// True when both values refer to the same registration.
    pub fn same_registration(&self, other: &ChangeSignal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_raise_before_wait_is_remembered() {
        let signal = ChangeSignal::new();
        signal.raise();
        tokio::time::timeout(Duration::from_secs(1), signal.changed())
            .await
            .expect("pending raise should complete the wait");
    }

    #[tokio::test]
    async fn test_raises_coalesce() {
        let signal = ChangeSignal::new();
        signal.raise();
        signal.raise();
        signal.raise();
        assert_eq!(signal.raised_count(), 3);

        signal.changed().await;
        let second = tokio::time::timeout(Duration::from_millis(50), signal.changed()).await;
        assert!(second.is_err(), "only one wake-up should be pending");
    }

    #[tokio::test]
    async fn test_clone_shares_registration() {
        let signal = ChangeSignal::new();
        let other = signal.clone();
        assert!(signal.same_registration(&other));
        assert!(!signal.same_registration(&ChangeSignal::new()));

        let waiter = tokio::spawn(async move { other.changed().await });
        signal.raise();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
