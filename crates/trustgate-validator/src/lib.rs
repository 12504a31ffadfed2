//! # Trustgate Validator
//!
//! Validates oracle feed observations one at a time and across oracles.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`anomaly`] | Anomaly detector trait and the z-score detector |
//! | [`checks`] | Format, freshness, range, historical, and anomaly checks |
//! | [`config`] | Validator thresholds and cache settings |
//! | [`consensus`] | Median / mean consensus with outlier classification |
//! | [`error`] | Error types |
//! | [`feed`] | Feed registration and per-feed settings |
//! | [`history`] | Bounded per-feed observation history |
//! | [`observation`] | Raw and typed observations |
//! | [`result`] | Per-check and aggregate results, accuracy reports |
//! | [`source`] | Where observations come from |
//! | [`statistics`] | Historical accuracy models |
//! | [`validator`] | The [`FeedValidator`] itself |
//!
//! ## Scoring
//!
//! Every observation goes through all six checks. The aggregate score is the
//! weighted sum below, and an observation is valid when no check raised an
//! error and the score reaches the accuracy threshold.
//!
//! ```text
//! format      0.30
//! freshness   0.20
//! range       0.20
//! consensus   0.15
//! historical  0.10
//! anomaly     0.05
//! ```

pub mod anomaly;
pub mod checks;
pub mod config;
pub mod consensus;
pub mod error;
pub mod feed;
pub mod history;
pub mod observation;
pub mod result;
pub mod source;
pub mod statistics;
pub mod validator;

pub use anomaly::{AnomalyDetector, AnomalyVerdict, DetectorError, DetectorFuture, ZScoreDetector};
pub use config::ValidatorConfig;
pub use consensus::{compute_consensus, ConsensusInput, ConsensusParams, ConsensusResult, OutlierInfo};
pub use error::FeedError;
pub use feed::{AggregationMethod, FeedConfig, FeedSettings, FeedType, OracleFeed, ValueBounds};
pub use history::HistoryStore;
pub use observation::{ObservationValue, OracleObservation, RawObservation};
pub use result::{
    AggregateValidationResult, CheckType, HistoricalAccuracyReport, HistoricalAnomaly, Severity,
    Trend, ValidationIssue, ValidationResult,
};
pub use source::{ObservationFuture, ObservationSource};
pub use statistics::{HistoricalStats, RollingStatsModel, StatisticalModel};
pub use validator::FeedValidator;
