//! Pluggable anomaly detection.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::numeric_values;
use crate::OracleObservation;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("anomaly detector failed: {0}")]
pub struct DetectorError(pub String);

/// What a detector concluded about one observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub is_anomaly: bool,
    /// Confidence in the anomaly, in `[0, 1]`.
    pub score: f64,
    pub explanation: String,
}

impl AnomalyVerdict {
    pub fn normal() -> Self {
        Self {
            is_anomaly: false,
            score: 0.0,
            explanation: String::new(),
        }
    }
}

pub type DetectorFuture<'a> =
    Pin<Box<dyn Future<Output = Result<AnomalyVerdict, DetectorError>> + Send + 'a>>;

/// Detector contract. `history` holds the feed's stored observations, oldest
/// first, excluding `observation` itself.
pub trait AnomalyDetector: Send + Sync {
    fn detect<'a>(
        &'a self,
        observation: &'a OracleObservation,
        history: &'a [OracleObservation],
    ) -> DetectorFuture<'a>;
}

/// Flags values whose z-score against stored history exceeds `threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZScoreDetector {
    pub threshold: f64,
    pub min_history: usize,
}

impl Default for ZScoreDetector {
    fn default() -> Self {
        Self {
            threshold: 3.0,
            min_history: 10,
        }
    }
}

impl ZScoreDetector {
    pub fn evaluate(&self, value: f64, history: &[f64]) -> AnomalyVerdict {
        if history.len() < self.min_history {
            return AnomalyVerdict::normal();
        }

        let n = history.len() as f64;
        let mean = history.iter().sum::<f64>() / n;
        let std_dev = (history.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

        let z = if std_dev > 0.0 {
            (value - mean).abs() / std_dev
        } else if value == mean {
            0.0
        } else {
            f64::INFINITY
        };

        if z <= self.threshold {
            return AnomalyVerdict::normal();
        }

        AnomalyVerdict {
            is_anomaly: true,
            score: (z / (2.0 * self.threshold)).min(1.0),
            explanation: format!(
                "value {value} is {z:.2} standard deviations from the mean {mean:.4}"
            ),
        }
    }
}

impl AnomalyDetector for ZScoreDetector {
    fn detect<'a>(
        &'a self,
        observation: &'a OracleObservation,
        history: &'a [OracleObservation],
    ) -> DetectorFuture<'a> {
        Box::pin(async move {
            Ok(match observation.value.as_f64() {
                Some(value) => self.evaluate(value, &numeric_values(history)),
                None => AnomalyVerdict::normal(),
            })
        })
    }
}
