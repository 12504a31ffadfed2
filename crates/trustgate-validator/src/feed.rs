//! Oracle feed descriptors.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use trustgate_core::{FeedId, Query, SourceId};

use crate::FeedError;

/// What kind of fact a feed reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedType {
    Price,
    Rwa,
    Event,
    Identity,
    Credit,
}

impl FeedType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Rwa => "rwa",
            Self::Event => "event",
            Self::Identity => "identity",
            Self::Credit => "credit",
        }
    }

    /// Whether observations must carry a numeric value.
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Price | Self::Rwa | Self::Credit)
    }

    /// Plausible value range. Categorical types are unbounded.
    pub const fn default_bounds(self) -> Option<ValueBounds> {
        match self {
            Self::Price => Some(ValueBounds::new(0.0, 1_000_000.0)),
            Self::Rwa => Some(ValueBounds::new(0.0, 1e12)),
            Self::Credit => Some(ValueBounds::new(0.0, 1_000.0)),
            Self::Event | Self::Identity => None,
        }
    }
}

impl Display for FeedType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueBounds {
    pub min: f64,
    pub max: f64,
}

impl ValueBounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// How a consensus value is derived from participant values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    #[default]
    Median,
    Mean,
}

/// Per-feed validation tuning. Unset overrides fall back to the validator
/// configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub aggregation: AggregationMethod,
    pub min_sources: usize,
    pub max_deviation_percent: Option<f64>,
    pub historical_window_days: Option<u32>,
    pub bounds: Option<ValueBounds>,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            aggregation: AggregationMethod::Median,
            min_sources: 1,
            max_deviation_percent: None,
            historical_window_days: None,
            bounds: None,
        }
    }
}

/// Registration input for a feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub id: String,
    pub source_id: String,
    pub feed_type: FeedType,
    pub update_frequency_secs: u64,
    #[serde(default = "default_declared")]
    pub reliability: f64,
    #[serde(default = "default_declared")]
    pub accuracy: f64,
    #[serde(default = "default_query")]
    pub query: Query,
    #[serde(default)]
    pub settings: FeedSettings,
}

fn default_declared() -> f64 {
    0.9
}

fn default_query() -> Query {
    Query::new("latest")
}

impl FeedConfig {
    pub fn new(
        id: impl Into<String>,
        source_id: impl Into<String>,
        feed_type: FeedType,
        update_frequency_secs: u64,
    ) -> Self {
        Self {
            id: id.into(),
            source_id: source_id.into(),
            feed_type,
            update_frequency_secs,
            reliability: default_declared(),
            accuracy: default_declared(),
            query: default_query(),
            settings: FeedSettings::default(),
        }
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability;
        self
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    pub fn with_settings(mut self, settings: FeedSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn validate(self) -> Result<OracleFeed, FeedError> {
        let id = FeedId::parse(&self.id).map_err(|error| FeedError::Configuration(error.to_string()))?;
        let source_id = SourceId::parse(&self.source_id)
            .map_err(|error| FeedError::Configuration(format!("feed '{id}': {error}")))?;

        if self.update_frequency_secs == 0 {
            return Err(FeedError::Configuration(format!(
                "feed '{id}' update frequency must be greater than zero"
            )));
        }
        for (field, value) in [("reliability", self.reliability), ("accuracy", self.accuracy)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(FeedError::Configuration(format!(
                    "feed '{id}' {field} must be within [0, 1], got {value}"
                )));
            }
        }
        if let Some(bounds) = self.settings.bounds {
            if bounds.min > bounds.max {
                return Err(FeedError::Configuration(format!(
                    "feed '{id}' bounds are inverted ({} > {})",
                    bounds.min, bounds.max
                )));
            }
        }
        if matches!(self.settings.max_deviation_percent, Some(percent) if percent <= 0.0) {
            return Err(FeedError::Configuration(format!(
                "feed '{id}' max deviation must be positive"
            )));
        }

        Ok(OracleFeed {
            id,
            source_id,
            feed_type: self.feed_type,
            update_frequency_secs: self.update_frequency_secs,
            reliability: self.reliability,
            accuracy: self.accuracy,
            query: self.query,
            settings: self.settings,
        })
    }
}

/// A registered feed. `reliability` tracks validation outcomes over time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleFeed {
    pub id: FeedId,
    pub source_id: SourceId,
    pub feed_type: FeedType,
    pub update_frequency_secs: u64,
    pub reliability: f64,
    pub accuracy: f64,
    pub query: Query,
    pub settings: FeedSettings,
}

impl OracleFeed {
    pub const fn update_frequency(&self) -> Duration {
        Duration::from_secs(self.update_frequency_secs)
    }

    pub fn bounds(&self) -> Option<ValueBounds> {
        self.settings.bounds.or(self.feed_type.default_bounds())
    }
}
