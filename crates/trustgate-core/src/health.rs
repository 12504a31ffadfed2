//! Per-source health metrics.

use serde::{Deserialize, Serialize};

use crate::{CircuitState, SourceId, UtcDateTime};

/// Smoothing factor for latency and error-rate moving averages.
pub const HEALTH_EMA_ALPHA: f64 = 0.1;

const OFFLINE_ERROR_RATE: f64 = 0.5;
const DEGRADED_ERROR_RATE: f64 = 0.2;

/// Coarse health derived from the smoothed error rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Online,
    Degraded,
    Offline,
}

impl HealthState {
    pub fn from_error_rate(error_rate: f64) -> Self {
        if error_rate > OFFLINE_ERROR_RATE {
            Self::Offline
        } else if error_rate > DEGRADED_ERROR_RATE {
            Self::Degraded
        } else {
            Self::Online
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Degraded => "degraded",
            Self::Offline => "offline",
        }
    }
}

/// Read-only health view handed to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub source_id: SourceId,
    pub state: HealthState,
    pub circuit: CircuitState,
    pub latency_ms: f64,
    pub error_rate: f64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub cache_hits: u64,
    pub last_success_at: Option<UtcDateTime>,
    pub last_failure_at: Option<UtcDateTime>,
    pub last_checked_at: Option<UtcDateTime>,
}

/// Mutable health metrics for one source. Owned by the access manager.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthRecord {
    latency_ms: f64,
    error_rate: f64,
    total_requests: u64,
    failed_requests: u64,
    cache_hits: u64,
    last_success_at: Option<UtcDateTime>,
    last_failure_at: Option<UtcDateTime>,
    last_checked_at: Option<UtcDateTime>,
}

impl HealthRecord {
    /// Starts from the source's declared latency and a clean error rate.
    pub fn new(declared_latency_ms: u64) -> Self {
        Self {
            latency_ms: declared_latency_ms as f64,
            error_rate: 0.0,
            total_requests: 0,
            failed_requests: 0,
            cache_hits: 0,
            last_success_at: None,
            last_failure_at: None,
            last_checked_at: None,
        }
    }

    pub fn record_success(&mut self, latency_ms: u64) {
        self.total_requests += 1;
        self.latency_ms = ema(self.latency_ms, latency_ms as f64);
        self.error_rate = ema(self.error_rate, 0.0);
        self.last_success_at = Some(UtcDateTime::now());
    }

    pub fn record_failure(&mut self) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.error_rate = ema(self.error_rate, 1.0);
        self.last_failure_at = Some(UtcDateTime::now());
    }

    pub fn record_cache_hit(&mut self) {
        self.total_requests += 1;
        self.cache_hits += 1;
    }

    /// Folds a health-probe outcome into the error rate only.
    pub fn fold_probe(&mut self, ok: bool) {
        self.error_rate = ema(self.error_rate, if ok { 0.0 } else { 1.0 });
        self.last_checked_at = Some(UtcDateTime::now());
    }

    pub fn state(&self) -> HealthState {
        HealthState::from_error_rate(self.error_rate)
    }

    pub const fn error_rate(&self) -> f64 {
        self.error_rate
    }

    pub const fn latency_ms(&self) -> f64 {
        self.latency_ms
    }

    pub const fn total_requests(&self) -> u64 {
        self.total_requests
    }

    pub fn status(&self, source_id: SourceId, circuit: CircuitState) -> HealthStatus {
        HealthStatus {
            source_id,
            state: self.state(),
            circuit,
            latency_ms: self.latency_ms,
            error_rate: self.error_rate,
            total_requests: self.total_requests,
            failed_requests: self.failed_requests,
            cache_hits: self.cache_hits,
            last_success_at: self.last_success_at,
            last_failure_at: self.last_failure_at,
            last_checked_at: self.last_checked_at,
        }
    }
}

fn ema(previous: f64, sample: f64) -> f64 {
    (1.0 - HEALTH_EMA_ALPHA) * previous + HEALTH_EMA_ALPHA * sample
}
