use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::HashAlgorithm;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub max_data_age_ms: u64,
    pub min_consistency_threshold: f64,
    pub algorithm: HashAlgorithm,
    pub audit_enabled: bool,
    pub audit_retention_days: u32,
    pub audit_prune_interval_ms: u64,
    /// Leading hex zeros a hash chain link needs under the default predicate.
    pub chain_difficulty: usize,
    pub cache_ttl_ms: u64,
    pub validity_threshold: f64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_data_age_ms: 3_600_000,
            min_consistency_threshold: 0.8,
            algorithm: HashAlgorithm::Sha256,
            audit_enabled: true,
            audit_retention_days: 30,
            audit_prune_interval_ms: 3_600_000,
            chain_difficulty: 2,
            cache_ttl_ms: 300_000,
            validity_threshold: 0.7,
        }
    }
}

impl VerifierConfig {
    pub const fn max_data_age(&self) -> Duration {
        Duration::from_millis(self.max_data_age_ms)
    }

    pub const fn audit_prune_interval(&self) -> Duration {
        Duration::from_millis(self.audit_prune_interval_ms)
    }

    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}
