//! Notifier Configuration
//!
//! - **reader**: Block buffer settings for each subscription's reader
//! - **fallback_poll_interval_ms**: Run a pass on this period even without a
//!   change signal (default: disabled)

use std::time::Duration;

use seqlog_reader::ReaderConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Reader settings for the per-subscription index
    #[serde(default)]
    pub reader: ReaderConfig,

    /// Fallback pass period in milliseconds, for stores that may drop signals
    #[serde(default)]
    pub fallback_poll_interval_ms: Option<u64>,
}

impl NotifierConfig {
    pub fn fallback_poll_interval(&self) -> Option<Duration> {
        self.fallback_poll_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}
