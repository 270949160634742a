//! Change Notifier
//!
//! Registry of shared subscriptions, keyed by normalized (log, machine).
//! However many listeners watch a log, the store sees one open handle and
//! one change-wait registration for it.
//!
//! ## Lifecycle per key
//!
//! ```text
//! Unsubscribed ──subscribe──→ Subscribing ──watcher started──→ Active
//!      ↑                                                          │
//!      └──── watcher exited ←── Unsubscribing ←── last listener gone
//! ```
//!
//! ## Locking
//!
//! One registry lock guards the key → subscription map and every listener
//! set mutation (lock order: registry, then listener set). It is never held
//! across a store call or a user callback: subscribe opens the handle and
//! queries counts with the lock released, then re-checks under the lock and
//! joins whichever subscription won a race.
//!
//! ## Usage
//!
//! ```ignore
//! let notifier = ChangeNotifier::new(store, NotifierConfig::default());
//! let handle = notifier.subscribe("Application", ".", |entry| {
//!     println!("new record #{}", entry.record_number);
//!     Ok(())
//! })?;
//! // ...
//! notifier.unsubscribe(handle);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use seqlog_core::{LogEntry, LogKey, LogStore};
use seqlog_observability::metrics::{ACTIVE_LISTENERS, ACTIVE_SUBSCRIPTIONS};
use tokio::runtime::Handle as RuntimeHandle;
use tracing::{debug, info};

use crate::config::NotifierConfig;
use crate::error::{NotifyError, Result};
use crate::listener::ListenerRegistration;
use crate::subscription::{PassOutcome, SharedSubscription, SubscriptionState};

struct NotifierInner {
    store: Arc<dyn LogStore>,
    config: NotifierConfig,
    subscriptions: Mutex<HashMap<LogKey, Arc<SharedSubscription>>>,
    next_listener_id: AtomicU64,
}

impl NotifierInner {
    fn remove_listener(&self, key: &LogKey, listener: &ListenerRegistration) {
        listener.deactivate();

        let mut subscriptions = self.subscriptions.lock();
        let Some(subscription) = subscriptions.get(key).cloned() else {
            return;
        };

        let (removed, now_empty) = subscription.remove_listener(listener.id());
        if removed {
            ACTIVE_LISTENERS.dec();
        }
        if !now_empty {
            drop(subscriptions);
            debug!(log = %key, listener = listener.id(), "Listener removed");
            return;
        }

        subscriptions.remove(key);
        drop(subscriptions);

        ACTIVE_SUBSCRIPTIONS.dec();
        // the watcher drops the last reference, and with it the handle and
        // its wait registration, once it observes the cancellation
        subscription.stop();
        info!(log = %key, "Subscription closed");
    }
}

impl Drop for NotifierInner {
    fn drop(&mut self) {
        for (_, subscription) in self.subscriptions.get_mut().drain() {
            ACTIVE_LISTENERS.sub(subscription.listener_count() as i64);
            ACTIVE_SUBSCRIPTIONS.dec();
            subscription.stop();
        }
    }
}

/// Shares one change subscription per log among any number of listeners.
///
/// Cloning is cheap; clones share the registry.
#[derive(Clone)]
pub struct ChangeNotifier {
    inner: Arc<NotifierInner>,
}

impl ChangeNotifier {
    pub fn new(store: Arc<dyn LogStore>, config: NotifierConfig) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                store,
                config,
                subscriptions: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.inner.config
    }

    /// Registers `callback` for records appended to the log from now on.
    ///
    /// Records already in the log never reach the callback. Must be called
    /// from within a tokio runtime, which hosts the watcher.
    pub fn subscribe<F>(&self, log: &str, machine: &str, callback: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&LogEntry) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let runtime = RuntimeHandle::try_current().map_err(|_| NotifyError::NoRuntime)?;
        let key = LogKey::new(log, machine);
        let listener = Arc::new(ListenerRegistration::new(
            self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed),
            Box::new(callback),
        ));

        loop {
            let existing = self.inner.subscriptions.lock().get(&key).cloned();

            if let Some(subscription) = existing {
                let (_, end) = subscription.bounds()?;
                listener.set_last_seen(end);

                let subscriptions = self.inner.subscriptions.lock();
                let still_current = subscriptions
                    .get(&key)
                    .is_some_and(|current| Arc::ptr_eq(current, &subscription));
                if still_current && subscription.state() == SubscriptionState::Active {
                    subscription.add_listener(Arc::clone(&listener));
                    drop(subscriptions);
                    ACTIVE_LISTENERS.inc();
                    debug!(
                        log = %key,
                        listener = listener.id(),
                        watermark = end,
                        "Listener joined subscription"
                    );
                    return Ok(self.handle_for(key, listener));
                }
                continue;
            }

            let handle = self.inner.store.open(log, machine)?;
            let signal = handle.register_change_wait()?;
            let subscription = Arc::new(SharedSubscription::new(
                key.clone(),
                handle,
                signal,
                self.inner.config.reader.clone(),
            ));
            let (_, end) = subscription.bounds()?;
            listener.set_last_seen(end);

            let mut subscriptions = self.inner.subscriptions.lock();
            if subscriptions.contains_key(&key) {
                // lost the race; join the winner instead
                continue;
            }
            subscription.add_listener(Arc::clone(&listener));
            subscription.start(&runtime, self.inner.config.fallback_poll_interval());
            subscriptions.insert(key.clone(), subscription);
            drop(subscriptions);

            ACTIVE_SUBSCRIPTIONS.inc();
            ACTIVE_LISTENERS.inc();
            info!(
                log = %key,
                listener = listener.id(),
                watermark = end,
                "Subscription created"
            );
            return Ok(self.handle_for(key, listener));
        }
    }

    /// Removes the listener. When it was the last one for its log, the
    /// subscription is torn down and the key becomes free.
    ///
    /// The listener receives at most one more callback, one that was
    /// already in flight when this was called.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        drop(handle);
    }

    pub fn state(&self, log: &str, machine: &str) -> SubscriptionState {
        self.inner
            .subscriptions
            .lock()
            .get(&LogKey::new(log, machine))
            .map_or(SubscriptionState::Unsubscribed, |subscription| {
                subscription.state()
            })
    }

    pub fn listener_count(&self, log: &str, machine: &str) -> usize {
        self.inner
            .subscriptions
            .lock()
            .get(&LogKey::new(log, machine))
            .map_or(0, |subscription| subscription.listener_count())
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    /// Runs a notification pass for the log on the calling thread, or
    /// returns `None` when nobody is subscribed to it.
    ///
    /// This calls the store and user callbacks synchronously; from async
    /// code, call it through `spawn_blocking`.
    pub fn poll_now(&self, log: &str, machine: &str) -> Option<PassOutcome> {
        let subscription = self
            .inner
            .subscriptions
            .lock()
            .get(&LogKey::new(log, machine))
            .cloned()?;
        Some(subscription.run_pass())
    }

    /// Tears down every subscription and waits for the watchers to exit.
    /// Outstanding handles become inert.
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<SharedSubscription>> = self
            .inner
            .subscriptions
            .lock()
            .drain()
            .map(|(_, subscription)| subscription)
            .collect();

        for subscription in drained {
            ACTIVE_LISTENERS.sub(subscription.listener_count() as i64);
            ACTIVE_SUBSCRIPTIONS.dec();
            let key = subscription.key().clone();
            if let Some(watcher) = subscription.stop() {
                drop(subscription);
                let _ = watcher.await;
            }
            info!(log = %key, "Subscription shut down");
        }
    }

    fn handle_for(&self, key: LogKey, listener: Arc<ListenerRegistration>) -> SubscriptionHandle {
        SubscriptionHandle {
            notifier: Arc::downgrade(&self.inner),
            key,
            listener,
        }
    }
}

/// A listener's registration. Dropping it unsubscribes.
pub struct SubscriptionHandle {
    notifier: Weak<NotifierInner>,
    key: LogKey,
    listener: Arc<ListenerRegistration>,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &LogKey {
        &self.key
    }

    pub fn listener_id(&self) -> u64 {
        self.listener.id()
    }

    /// Record number the listener will be handed next.
    pub fn last_seen(&self) -> u64 {
        self.listener.last_seen()
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        match self.notifier.upgrade() {
            Some(notifier) => notifier.remove_listener(&self.key, &self.listener),
            None => self.listener.deactivate(),
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("key", &self.key)
            .field("listener", &self.listener)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqlog_core::MemoryLogStore;

    fn notifier() -> (Arc<MemoryLogStore>, ChangeNotifier) {
        let store = Arc::new(MemoryLogStore::new());
        store.create_log("app", ".");
        let notifier = ChangeNotifier::new(store.clone(), NotifierConfig::default());
        (store, notifier)
    }

    #[test]
    fn test_subscribe_requires_runtime() {
        let (_store, notifier) = notifier();
        let err = notifier.subscribe("app", ".", |_| Ok(())).unwrap_err();
        assert!(matches!(err, NotifyError::NoRuntime));
    }

    #[tokio::test]
    async fn test_missing_log_fails_and_leaves_key_free() {
        let (_store, notifier) = notifier();
        let err = notifier.subscribe("missing", ".", |_| Ok(())).unwrap_err();
        assert!(matches!(err, NotifyError::Store(_)));
        assert_eq!(notifier.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let (_store, notifier) = notifier();
        assert_eq!(notifier.state("app", "."), SubscriptionState::Unsubscribed);

        let first = notifier.subscribe("App", "", |_| Ok(())).unwrap();
        let second = notifier.subscribe("app", ".", |_| Ok(())).unwrap();
        assert_eq!(notifier.state("app", "."), SubscriptionState::Active);
        assert_eq!(notifier.listener_count("app", "."), 2);
        assert_eq!(notifier.subscription_count(), 1);

        notifier.unsubscribe(first);
        assert_eq!(notifier.state("app", "."), SubscriptionState::Active);
        second.unsubscribe();
        assert_eq!(notifier.state("app", "."), SubscriptionState::Unsubscribed);
        assert_eq!(notifier.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_handle_outlives_notifier() {
        let (_store, notifier) = notifier();
        let handle = notifier.subscribe("app", ".", |_| Ok(())).unwrap();
        drop(notifier);
        assert!(!handle.listener.is_active());
        drop(handle);
    }

    #[tokio::test]
    async fn test_poll_now_without_subscription() {
        let (_store, notifier) = notifier();
        assert!(notifier.poll_now("app", ".").is_none());
    }
}
