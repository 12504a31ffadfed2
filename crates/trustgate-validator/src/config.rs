use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::history::HISTORY_CAPACITY;

/// Validator-wide tuning. Per-feed overrides live on
/// [`FeedSettings`](crate::FeedSettings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub accuracy_threshold: f64,
    pub consensus_threshold: f64,
    pub max_deviation_percent: f64,
    pub min_consensus_size: usize,
    pub historical_window_days: u32,
    pub enable_caching: bool,
    pub cache_ttl_ms: u64,
    /// How long a cross-oracle consensus score stands in for the consensus
    /// axis of single-feed validations.
    pub consensus_reuse_ms: u64,
    /// Future timestamps within this tolerance are accepted silently.
    pub future_skew_ms: u64,
    pub history_capacity: usize,
}

impl ValidatorConfig {
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub const fn consensus_reuse(&self) -> Duration {
        Duration::from_millis(self.consensus_reuse_ms)
    }

    pub const fn future_skew(&self) -> Duration {
        Duration::from_millis(self.future_skew_ms)
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            accuracy_threshold: 0.95,
            consensus_threshold: 0.8,
            max_deviation_percent: 5.0,
            min_consensus_size: 3,
            historical_window_days: 30,
            enable_caching: true,
            cache_ttl_ms: 60_000,
            consensus_reuse_ms: 300_000,
            future_skew_ms: 5_000,
            history_capacity: HISTORY_CAPACITY,
        }
    }
}
