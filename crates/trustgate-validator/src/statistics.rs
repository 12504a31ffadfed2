//! Statistical models behind the historical accuracy report.

use std::collections::HashMap;

use serde::Serialize;

use crate::history::numeric_values;
use crate::{HistoricalAnomaly, ObservationValue, OracleFeed, OracleObservation, Trend};

/// Scores a feed's stored history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoricalStats {
    pub accuracy: f64,
    pub reliability: f64,
    pub consistency: f64,
    pub trend: Trend,
    pub anomalies: Vec<HistoricalAnomaly>,
}

pub trait StatisticalModel: Send + Sync {
    /// `history` is oldest first and already limited to the report window.
    fn evaluate(&self, feed: &OracleFeed, history: &[OracleObservation]) -> HistoricalStats;
}

/// Window statistics over stored values.
///
/// - accuracy: share of points within `tolerance_percent` of the window median
/// - reliability: share of update gaps no longer than twice the update frequency
/// - consistency: one minus the coefficient of variation
/// - trend: least-squares drift across the window, relative to the mean
/// - anomalies: points more than `anomaly_z` standard deviations out
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollingStatsModel {
    pub tolerance_percent: f64,
    pub anomaly_z: f64,
    pub trend_threshold: f64,
}

impl Default for RollingStatsModel {
    fn default() -> Self {
        Self {
            tolerance_percent: 5.0,
            anomaly_z: 3.0,
            trend_threshold: 0.01,
        }
    }
}

impl RollingStatsModel {
    pub fn with_tolerance(tolerance_percent: f64) -> Self {
        Self {
            tolerance_percent,
            ..Self::default()
        }
    }

    fn reliability(feed: &OracleFeed, history: &[OracleObservation]) -> f64 {
        if history.len() < 2 {
            return 1.0;
        }
        let max_gap = 2.0 * feed.update_frequency().as_secs_f64();
        let mut timestamps: Vec<_> = history.iter().map(|o| o.timestamp).collect();
        timestamps.sort();

        let gaps = timestamps.windows(2).count();
        let on_time = timestamps
            .windows(2)
            .filter(|pair| pair[1].seconds_since(pair[0]) <= max_gap)
            .count();
        on_time as f64 / gaps as f64
    }

    fn categorical(&self, feed: &OracleFeed, history: &[OracleObservation]) -> HistoricalStats {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for observation in history {
            if let ObservationValue::Categorical(value) = &observation.value {
                *counts.entry(value.as_str()).or_default() += 1;
            }
        }
        let agreement = counts
            .values()
            .max()
            .map(|top| *top as f64 / history.len() as f64)
            .unwrap_or(0.0);

        HistoricalStats {
            accuracy: agreement,
            reliability: Self::reliability(feed, history),
            consistency: agreement,
            trend: Trend::Stable,
            anomalies: Vec::new(),
        }
    }
}

impl StatisticalModel for RollingStatsModel {
    fn evaluate(&self, feed: &OracleFeed, history: &[OracleObservation]) -> HistoricalStats {
        if !feed.feed_type.is_numeric() {
            return self.categorical(feed, history);
        }

        let values = numeric_values(history);
        if values.is_empty() {
            return HistoricalStats {
                accuracy: 0.0,
                reliability: Self::reliability(feed, history),
                consistency: 0.0,
                trend: Trend::Stable,
                anomalies: Vec::new(),
            };
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std_dev = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

        let median = median(&values);
        let tolerance = self.tolerance_percent / 100.0;
        let within = values
            .iter()
            .filter(|value| relative_deviation(**value, median) <= tolerance)
            .count();
        let accuracy = within as f64 / n;

        let consistency = if mean == 0.0 {
            if std_dev == 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            (1.0 - std_dev / mean.abs()).clamp(0.0, 1.0)
        };

        let trend = if values.len() < 2 || mean == 0.0 {
            Trend::Stable
        } else {
            let drift = slope(&values) * (n - 1.0) / mean.abs();
            if drift > self.trend_threshold {
                Trend::Up
            } else if drift < -self.trend_threshold {
                Trend::Down
            } else {
                Trend::Stable
            }
        };

        let anomalies = if std_dev > 0.0 {
            history
                .iter()
                .filter_map(|observation| {
                    let value = observation.value.as_f64()?;
                    let z_score = (value - mean) / std_dev;
                    (z_score.abs() > self.anomaly_z).then(|| HistoricalAnomaly {
                        timestamp: observation.timestamp,
                        value,
                        z_score,
                    })
                })
                .collect()
        } else {
            Vec::new()
        };

        HistoricalStats {
            accuracy,
            reliability: Self::reliability(feed, history),
            consistency,
            trend,
            anomalies,
        }
    }
}

/// Median of a non-empty slice.
pub fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// `|value - reference| / |reference|`, falling back to the absolute
/// difference when the reference is zero.
pub fn relative_deviation(value: f64, reference: f64) -> f64 {
    let difference = (value - reference).abs();
    if reference == 0.0 {
        difference
    } else {
        difference / reference.abs()
    }
}

/// Least-squares slope of `values` against their index.
fn slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n;
    let (numerator, denominator) = values.iter().enumerate().fold(
        (0.0, 0.0),
        |(numerator, denominator), (index, value)| {
            let dx = index as f64 - x_mean;
            (numerator + dx * (value - y_mean), denominator + dx * dx)
        },
    );
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use trustgate_core::{SourceId, UtcDateTime};

    use super::*;
    use crate::{FeedConfig, FeedType};

    fn feed(feed_type: FeedType) -> OracleFeed {
        FeedConfig::new("eth_usd", "pyth", feed_type, 60)
            .validate()
            .expect("valid feed")
    }

    fn series(values: &[f64], spacing_secs: u64) -> Vec<OracleObservation> {
        let start = UtcDateTime::now() - Duration::from_secs(spacing_secs * values.len() as u64);
        let source = SourceId::parse("pyth").expect("valid id");
        values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                let timestamp =
                    UtcDateTime::from_unix_seconds(start.unix_seconds() + (index as u64 * spacing_secs) as i64)
                        .expect("valid timestamp");
                OracleObservation::numeric(source.clone(), *value, timestamp)
            })
            .collect()
    }

    #[test]
    fn rising_series_trends_up() {
        let values: Vec<f64> = (0..12).map(|i| 100.0 + f64::from(i)).collect();
        let stats = RollingStatsModel::default().evaluate(&feed(FeedType::Price), &series(&values, 60));

        assert_eq!(stats.trend, Trend::Up);
        assert_eq!(stats.reliability, 1.0);
        assert!(stats.anomalies.is_empty());
    }

    #[test]
    fn flat_series_is_stable_and_consistent() {
        let stats =
            RollingStatsModel::default().evaluate(&feed(FeedType::Price), &series(&[50.0; 10], 60));

        assert_eq!(stats.trend, Trend::Stable);
        assert_eq!(stats.consistency, 1.0);
        assert_eq!(stats.accuracy, 1.0);
    }

    #[test]
    fn outliers_reduce_accuracy_and_show_as_anomalies() {
        let mut values = vec![100.0; 19];
        values.push(1_000.0);
        let stats = RollingStatsModel::default().evaluate(&feed(FeedType::Price), &series(&values, 60));

        assert!((stats.accuracy - 0.95).abs() < 1e-9);
        assert_eq!(stats.anomalies.len(), 1);
        assert_eq!(stats.anomalies[0].value, 1_000.0);
    }

    #[test]
    fn late_updates_reduce_reliability() {
        let stats =
            RollingStatsModel::default().evaluate(&feed(FeedType::Price), &series(&[1.0; 11], 600));
        assert_eq!(stats.reliability, 0.0);
    }

    #[test]
    fn median_handles_even_lengths() {
        assert_eq!(median(&[1.0, 3.0, 2.0, 10.0]), 2.5);
        assert_eq!(median(&[100.0, 250.0, 101.0]), 101.0);
    }
}
