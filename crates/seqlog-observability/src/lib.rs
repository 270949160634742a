//! SeqLog Observability
//!
//! Metrics and logging setup shared by the reader and notifier crates.
//!
//! # Features
//!
//! - Prometheus metrics for the block cache and change notifications
//! - `/metrics` endpoint as an axum router
//! - Structured logging with tracing
//!
//! # Usage
//!
//! ```no_run
//! use seqlog_observability::{exporter, metrics};
//!
//! seqlog_observability::init_tracing("info");
//! metrics::init();
//!
//! let metrics_router = exporter::create_metrics_router();
//! ```

pub mod exporter;
pub mod metrics;

pub use exporter::{create_metrics_router, encode_metrics};
pub use metrics::{init as init_metrics, REGISTRY};

use tracing_subscriber::EnvFilter;

/// Initialize all observability components
pub fn init() {
    metrics::init();
}

/// Installs a global fmt subscriber filtered by `RUST_LOG`, or by
/// `default_filter` when `RUST_LOG` is unset or invalid.
///
/// Returns false if a global subscriber was already installed.
pub fn init_tracing(default_filter: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_init_is_safe() {
        init();
        init();
        init_metrics();
    }

    #[test]
    fn test_second_tracing_init_reports_false() {
        init_tracing("debug");
        assert!(!init_tracing("debug"));
    }
}
