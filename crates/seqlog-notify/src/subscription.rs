//! Shared Subscription
//!
//! One subscription per (log, machine) with at least one listener. It owns
//! the dedicated read handle, the single change-wait registration made on
//! it, the watcher task, and the listener set.
//!
//! ## Watcher
//!
//! ```text
//! loop {
//!     select! {
//!         cancelled        → exit
//!         signal.changed() → pass
//!         fallback tick    → pass   (only when configured)
//!     }
//!     spawn_blocking(run_pass).await
//! }
//! ```
//!
//! Store calls and user callbacks run on the blocking pool, never on a
//! runtime worker.
//!
//! ## Pass
//!
//! 1. Try-acquire the `notifying` guard (compare-and-swap). If another pass
//!    holds it, leave a rerun request for the holder and return.
//! 2. Snapshot the listener set and release its lock.
//! 3. Per listener: clamp the watermark into `[oldest, end]` (snap to
//!    `oldest` when outside, which is how a clear self-heals), deliver up to
//!    `end - 1`, re-query the bounds and keep going until nothing new
//!    arrived, then clamp once more and store the watermark.
//! 4. Release the guard and run again if a rerun was requested meanwhile.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use seqlog_core::{ChangeSignal, LogHandle, LogKey};
use seqlog_observability::metrics::{ENTRIES_DELIVERED_TOTAL, NOTIFICATION_PASSES_TOTAL};
use seqlog_reader::{RandomAccessIndex, ReaderConfig, Result as ReaderResult};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::listener::ListenerRegistration;

/// Lifecycle of the subscription for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Active,
    Unsubscribing,
}

/// Result of one notification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Another pass was running; it was asked to run again.
    Skipped,
    /// Every listener was brought up to date.
    Completed { delivered: u64 },
    /// At least one listener stopped early on a store error. Its watermark
    /// keeps its progress and the next pass resumes from there.
    Failed { delivered: u64 },
}

impl PassOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassOutcome::Skipped => "skipped",
            PassOutcome::Completed { .. } => "completed",
            PassOutcome::Failed { .. } => "failed",
        }
    }

    pub fn delivered(&self) -> u64 {
        match self {
            PassOutcome::Skipped => 0,
            PassOutcome::Completed { delivered } | PassOutcome::Failed { delivered } => *delivered,
        }
    }

    fn merge(self, next: PassOutcome) -> PassOutcome {
        let delivered = self.delivered() + next.delivered();
        match (self, next) {
            (PassOutcome::Failed { .. }, _) | (_, PassOutcome::Failed { .. }) => {
                PassOutcome::Failed { delivered }
            }
            (PassOutcome::Skipped, PassOutcome::Skipped) => PassOutcome::Skipped,
            _ => PassOutcome::Completed { delivered },
        }
    }
}

/// Single-flight guard over the `notifying` flag.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| PassGuard(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn clamp(watermark: u64, oldest: u64, end: u64) -> u64 {
    if watermark < oldest || watermark > end {
        oldest
    } else {
        watermark
    }
}

pub(crate) struct SharedSubscription {
    key: LogKey,
    handle: Box<dyn LogHandle>,
    signal: ChangeSignal,
    index: Mutex<RandomAccessIndex>,
    /// Mutated only while the registry lock is held.
    listeners: Mutex<Vec<Arc<ListenerRegistration>>>,
    notifying: AtomicBool,
    rerun: AtomicBool,
    state: Mutex<SubscriptionState>,
    cancel: CancellationToken,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl SharedSubscription {
    pub(crate) fn new(
        key: LogKey,
        handle: Box<dyn LogHandle>,
        signal: ChangeSignal,
        reader: ReaderConfig,
    ) -> Self {
        Self {
            key,
            handle,
            signal,
            index: Mutex::new(RandomAccessIndex::new(reader)),
            listeners: Mutex::new(Vec::new()),
            notifying: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            state: Mutex::new(SubscriptionState::Subscribing),
            cancel: CancellationToken::new(),
            watcher: Mutex::new(None),
        }
    }

    pub(crate) fn key(&self) -> &LogKey {
        &self.key
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: SubscriptionState) {
        *self.state.lock() = state;
    }

    /// Retained range `(oldest, end)` as seen through the shared handle.
    pub(crate) fn bounds(&self) -> seqlog_core::Result<(u64, u64)> {
        let oldest = self.handle.oldest_index()?;
        let count = self.handle.count()?;
        Ok((oldest, oldest + count))
    }

    pub(crate) fn add_listener(&self, listener: Arc<ListenerRegistration>) {
        self.listeners.lock().push(listener);
    }

    /// Removes the listener. Returns `(removed, now_empty)`.
    pub(crate) fn remove_listener(&self, listener_id: u64) -> (bool, bool) {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|listener| listener.id() != listener_id);
        (listeners.len() < before, listeners.is_empty())
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Starts the watcher task on `runtime`.
    pub(crate) fn start(self: &Arc<Self>, runtime: &tokio::runtime::Handle, poll: Option<Duration>) {
        let subscription = Arc::clone(self);
        let task = runtime.spawn(async move { subscription.watch(poll).await });
        *self.watcher.lock() = Some(task);
        self.set_state(SubscriptionState::Active);
    }

    /// Asks the watcher to stop and returns its task handle.
    pub(crate) fn stop(&self) -> Option<JoinHandle<()>> {
        self.set_state(SubscriptionState::Unsubscribing);
        for listener in self.listeners.lock().iter() {
            listener.deactivate();
        }
        self.cancel.cancel();
        self.watcher.lock().take()
    }

    async fn watch(self: Arc<Self>, poll: Option<Duration>) {
        info!(log = %self.key, fallback_poll = ?poll, "Change watcher started");

        let mut ticker = poll.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.signal.changed() => {}
                _ = next_tick(&mut ticker) => {}
            }

            let subscription = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || subscription.run_pass()).await {
                Ok(outcome) => {
                    debug!(
                        log = %self.key,
                        outcome = outcome.as_str(),
                        delivered = outcome.delivered(),
                        "Notification pass finished"
                    );
                }
                Err(e) => {
                    error!(log = %self.key, error = %e, "Notification pass task failed");
                }
            }
        }

        self.set_state(SubscriptionState::Unsubscribed);
        info!(log = %self.key, "Change watcher stopped");
    }

    fn acquire_or_defer(&self) -> Option<PassGuard<'_>> {
        if let Some(guard) = PassGuard::acquire(&self.notifying) {
            return Some(guard);
        }
        self.rerun.store(true, Ordering::SeqCst);
        PassGuard::acquire(&self.notifying)
    }

    /// Runs a notification pass on the calling thread.
    pub(crate) fn run_pass(&self) -> PassOutcome {
        let mut outcome = PassOutcome::Skipped;
        while let Some(guard) = self.acquire_or_defer() {
            self.rerun.store(false, Ordering::SeqCst);
            outcome = outcome.merge(self.deliver_all());
            drop(guard);
            if !self.rerun.load(Ordering::SeqCst) {
                break;
            }
        }

        NOTIFICATION_PASSES_TOTAL
            .with_label_values(&[outcome.as_str()])
            .inc();
        outcome
    }

    fn deliver_all(&self) -> PassOutcome {
        let listeners: Vec<Arc<ListenerRegistration>> = self.listeners.lock().clone();

        let mut index = self.index.lock();
        // blocks cached before a clear must not be served again
        index.reset();

        let mut delivered = 0u64;
        let mut failed = false;
        for listener in &listeners {
            if !listener.is_active() {
                continue;
            }
            if let Err(e) = self.notify_listener(&mut index, listener, &mut delivered) {
                failed = true;
                warn!(
                    log = %self.key,
                    listener = listener.id(),
                    watermark = listener.last_seen(),
                    error = %e,
                    "Notification stopped early for listener"
                );
            }
        }

        if delivered > 0 {
            ENTRIES_DELIVERED_TOTAL
                .with_label_values(&[&self.key.to_string()])
                .inc_by(delivered);
        }

        if failed {
            PassOutcome::Failed { delivered }
        } else {
            PassOutcome::Completed { delivered }
        }
    }

    fn notify_listener(
        &self,
        index: &mut RandomAccessIndex,
        listener: &ListenerRegistration,
        delivered: &mut u64,
    ) -> ReaderResult<()> {
        let mut watermark = listener.last_seen();
        let result = self.deliver_from(index, listener, &mut watermark, delivered);

        if let Ok((oldest, end)) = self.bounds() {
            watermark = clamp(watermark, oldest, end);
        }
        listener.set_last_seen(watermark);
        result
    }

    fn deliver_from(
        &self,
        index: &mut RandomAccessIndex,
        listener: &ListenerRegistration,
        watermark: &mut u64,
        delivered: &mut u64,
    ) -> ReaderResult<()> {
        loop {
            let (oldest, end) = self.bounds()?;
            *watermark = clamp(*watermark, oldest, end);
            if *watermark >= end {
                return Ok(());
            }

            while *watermark < end {
                if !listener.is_active() {
                    return Ok(());
                }
                let entry = match index.get_absolute(self.handle.as_ref(), *watermark) {
                    Ok(record) => record.to_entry(),
                    // cleared or wrapped under us; re-query and clamp
                    Err(e) if e.is_not_found() => break,
                    Err(e) => return Err(e),
                };
                listener.deliver(&self.key, &entry);
                *watermark += 1;
                *delivered += 1;
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqlog_core::{LogEntry, LogStore, MemoryLogStore, ReadError};
    use std::sync::Mutex as StdMutex;

    fn subscription(store: &MemoryLogStore) -> SharedSubscription {
        let handle = store.open("app", ".").unwrap();
        let signal = handle.register_change_wait().unwrap();
        SharedSubscription::new(
            LogKey::new("app", "."),
            handle,
            signal,
            ReaderConfig::default(),
        )
    }

    fn recording_listener(
        id: u64,
        watermark: u64,
    ) -> (Arc<ListenerRegistration>, Arc<StdMutex<Vec<u64>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = Arc::new(ListenerRegistration::new(
            id,
            Box::new(move |entry: &LogEntry| {
                sink.lock().unwrap().push(entry.record_number);
                Ok(())
            }),
        ));
        listener.set_last_seen(watermark);
        (listener, seen)
    }

    fn store_with(records: u64) -> MemoryLogStore {
        let store = MemoryLogStore::new();
        store.create_log("app", ".");
        for i in 0..records {
            store.append("app", ".", i, b"r").unwrap();
        }
        store
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp(5, 0, 10), 5);
        assert_eq!(clamp(10, 0, 10), 10);
        assert_eq!(clamp(50, 0, 3), 0);
        assert_eq!(clamp(2, 5, 9), 5);
    }

    #[test]
    fn test_pass_delivers_new_records_once() {
        let store = store_with(2);
        let subscription = subscription(&store);
        let (listener, seen) = recording_listener(1, 2);
        subscription.add_listener(listener.clone());

        store.append("app", ".", 0, b"new").unwrap();
        store.append("app", ".", 0, b"new").unwrap();
        assert_eq!(
            subscription.run_pass(),
            PassOutcome::Completed { delivered: 2 }
        );
        assert_eq!(subscription.run_pass(), PassOutcome::Completed { delivered: 0 });
        assert_eq!(*seen.lock().unwrap(), vec![2, 3]);
        assert_eq!(listener.last_seen(), 4);
    }

    #[test]
    fn test_watermark_self_heals_after_clear() {
        let store = store_with(50);
        let subscription = subscription(&store);
        let (listener, seen) = recording_listener(1, 50);
        subscription.add_listener(listener.clone());

        store.clear("app", ".").unwrap();
        for _ in 0..3 {
            store.append("app", ".", 0, b"after").unwrap();
        }
        subscription.run_pass();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(listener.last_seen(), 3);
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let store = store_with(0);
        let subscription = subscription(&store);
        let broken = Arc::new(ListenerRegistration::new(
            1,
            Box::new(|_| Err(anyhow::anyhow!("nope"))),
        ));
        let (healthy, seen) = recording_listener(2, 0);
        subscription.add_listener(broken.clone());
        subscription.add_listener(healthy);

        store.append("app", ".", 0, b"x").unwrap();
        subscription.run_pass();

        assert_eq!(*seen.lock().unwrap(), vec![0]);
        assert_eq!(broken.last_seen(), 1);
    }

    #[test]
    fn test_store_error_keeps_progress() {
        let store = store_with(0);
        let subscription = subscription(&store);
        let (listener, seen) = recording_listener(1, 0);
        subscription.add_listener(listener.clone());

        store.append("app", ".", 0, b"x").unwrap();
        store
            .inject_read_faults(
                "app",
                ".",
                [ReadError::Os {
                    code: 1500,
                    message: "corrupt".to_string(),
                }],
            )
            .unwrap();

        assert_eq!(subscription.run_pass(), PassOutcome::Failed { delivered: 0 });
        assert_eq!(listener.last_seen(), 0);
        assert_eq!(subscription.run_pass(), PassOutcome::Completed { delivered: 1 });
        assert_eq!(*seen.lock().unwrap(), vec![0]);
    }

    #[test]
    fn test_reentrant_pass_is_skipped() {
        let store = store_with(0);
        let subscription = subscription(&store);
        let guard = PassGuard::acquire(&subscription.notifying).unwrap();
        assert_eq!(subscription.run_pass(), PassOutcome::Skipped);
        assert!(subscription.rerun.load(Ordering::SeqCst));
        drop(guard);
        assert!(matches!(
            subscription.run_pass(),
            PassOutcome::Completed { .. }
        ));
    }

    #[test]
    fn test_inactive_listener_is_skipped() {
        let store = store_with(0);
        let subscription = subscription(&store);
        let (listener, seen) = recording_listener(1, 0);
        subscription.add_listener(listener.clone());
        listener.deactivate();

        store.append("app", ".", 0, b"x").unwrap();
        subscription.run_pass();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_remove_listener_reports_empty() {
        let store = store_with(0);
        let subscription = subscription(&store);
        let (a, _) = recording_listener(1, 0);
        let (b, _) = recording_listener(2, 0);
        subscription.add_listener(a);
        subscription.add_listener(b);

        assert_eq!(subscription.remove_listener(1), (true, false));
        assert_eq!(subscription.remove_listener(1), (false, false));
        assert_eq!(subscription.remove_listener(2), (true, true));
        assert_eq!(subscription.listener_count(), 0);
    }
}
