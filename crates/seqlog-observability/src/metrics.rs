//! Process-wide metrics.
//!
//! Every metric is created lazily and registered with [`REGISTRY`] by
//! [`init`]. Updating a metric before `init` is fine; it only becomes
//! visible to the exporter once registered.

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Global Prometheus metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Reader Metrics
    // ============================================================================

    /// Lookups answered from the cached block
    pub static ref CACHE_HITS_TOTAL: IntCounter = IntCounter::new(
        "seqlog_cache_hits_total",
        "Record lookups answered from the cached block"
    ).expect("metric can be created");

    /// Lookups that required a block read
    pub static ref CACHE_MISSES_TOTAL: IntCounter = IntCounter::new(
        "seqlog_cache_misses_total",
        "Record lookups that required a block read"
    ).expect("metric can be created");

    /// Block read retries by reason
    pub static ref READ_RETRIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("seqlog_read_retries_total", "Block read retries"),
        &["reason"] // buffer_too_small, generation_changed
    ).expect("metric can be created");

    /// Block reads that failed after the retry budget was spent
    pub static ref READ_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "seqlog_read_failures_total",
        "Block reads that failed after retrying"
    ).expect("metric can be created");

    // ============================================================================
    // Notification Metrics
    // ============================================================================

    /// Entries delivered to listeners
    pub static ref ENTRIES_DELIVERED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("seqlog_entries_delivered_total", "Entries delivered to listeners"),
        &["log"]
    ).expect("metric can be created");

    /// Listener callbacks that returned an error or panicked
    pub static ref LISTENER_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("seqlog_listener_errors_total", "Listener callbacks that failed"),
        &["log"]
    ).expect("metric can be created");

    /// Notification passes by outcome
    pub static ref NOTIFICATION_PASSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("seqlog_notification_passes_total", "Notification passes"),
        &["outcome"] // completed, skipped, failed
    ).expect("metric can be created");

    /// Live shared subscriptions
    pub static ref ACTIVE_SUBSCRIPTIONS: IntGauge = IntGauge::new(
        "seqlog_active_subscriptions",
        "Live shared subscriptions"
    ).expect("metric can be created");

    /// Registered listeners across all subscriptions
    pub static ref ACTIVE_LISTENERS: IntGauge = IntGauge::new(
        "seqlog_active_listeners",
        "Registered listeners across all subscriptions"
    ).expect("metric can be created");
}

/// Register all metrics with the global registry
pub fn init() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(CACHE_HITS_TOTAL.clone()))
            .expect("cache_hits_total can be registered");
        REGISTRY
            .register(Box::new(CACHE_MISSES_TOTAL.clone()))
            .expect("cache_misses_total can be registered");
        REGISTRY
            .register(Box::new(READ_RETRIES_TOTAL.clone()))
            .expect("read_retries_total can be registered");
        REGISTRY
            .register(Box::new(READ_FAILURES_TOTAL.clone()))
            .expect("read_failures_total can be registered");
        REGISTRY
            .register(Box::new(ENTRIES_DELIVERED_TOTAL.clone()))
            .expect("entries_delivered_total can be registered");
        REGISTRY
            .register(Box::new(LISTENER_ERRORS_TOTAL.clone()))
            .expect("listener_errors_total can be registered");
        REGISTRY
            .register(Box::new(NOTIFICATION_PASSES_TOTAL.clone()))
            .expect("notification_passes_total can be registered");
        REGISTRY
            .register(Box::new(ACTIVE_SUBSCRIPTIONS.clone()))
            .expect("active_subscriptions can be registered");
        REGISTRY
            .register(Box::new(ACTIVE_LISTENERS.clone()))
            .expect("active_listeners can be registered");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        init();
        let names: Vec<String> = REGISTRY
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"seqlog_cache_hits_total".to_string()));
        assert!(names.contains(&"seqlog_active_listeners".to_string()));
    }

    #[test]
    fn test_labelled_counters() {
        let before = ENTRIES_DELIVERED_TOTAL.with_label_values(&["test-log"]).get();
        ENTRIES_DELIVERED_TOTAL.with_label_values(&["test-log"]).inc_by(3);
        assert_eq!(
            ENTRIES_DELIVERED_TOTAL.with_label_values(&["test-log"]).get(),
            before + 3
        );
    }

    #[test]
    fn test_retry_reasons_are_separate() {
        let grow = READ_RETRIES_TOTAL.with_label_values(&["buffer_too_small"]).get();
        READ_RETRIES_TOTAL.with_label_values(&["generation_changed"]).inc();
        assert_eq!(
            READ_RETRIES_TOTAL.with_label_values(&["buffer_too_small"]).get(),
            grow
        );
    }
}
