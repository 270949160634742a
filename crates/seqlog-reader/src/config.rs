//! Reader Configuration
//!
//! - **initial_buffer_size**: Block buffer allocated on first read (default: 40,000 bytes)
//! - **max_buffer_size**: Largest buffer a single oversized record may grow it to (default: 16MB)
//! - **direction_policy**: How a miss picks the block read direction (default: adaptive)
//!
//! ## Usage
//!
//! ```ignore
//! use seqlog_reader::{DirectionPolicy, ReaderConfig};
//!
//! let config = ReaderConfig {
//!     direction_policy: DirectionPolicy::AlwaysForward,
//!     ..Default::default()
//! };
//! ```

use seqlog_core::MAX_RECORD_SIZE;
use serde::{Deserialize, Serialize};

/// How a cache miss chooses the direction of the block read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionPolicy {
    /// Read backward when the record just above the target is already
    /// cached (a descending walk), forward otherwise.
    #[default]
    Adaptive,

    /// Always read forward from the target.
    AlwaysForward,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Block buffer size in bytes allocated on first use (default: 40,000)
    #[serde(default = "default_initial_buffer_size")]
    pub initial_buffer_size: usize,

    /// Upper bound for growing the buffer to fit one record (default: 16MB)
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,

    /// Read direction heuristic (default: adaptive)
    #[serde(default)]
    pub direction_policy: DirectionPolicy,
}

fn default_initial_buffer_size() -> usize {
    40_000
}

fn default_max_buffer_size() -> usize {
    MAX_RECORD_SIZE
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            initial_buffer_size: default_initial_buffer_size(),
            max_buffer_size: default_max_buffer_size(),
            direction_policy: DirectionPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReaderConfig::default();
        assert_eq!(config.initial_buffer_size, 40_000);
        assert_eq!(config.max_buffer_size, 16 * 1024 * 1024);
        assert_eq!(config.direction_policy, DirectionPolicy::Adaptive);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ReaderConfig =
            serde_json::from_str(r#"{"direction_policy":"always_forward"}"#).unwrap();
        assert_eq!(config.direction_policy, DirectionPolicy::AlwaysForward);
        assert_eq!(config.initial_buffer_size, 40_000);
    }
}
