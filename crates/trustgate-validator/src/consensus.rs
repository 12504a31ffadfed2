//! Cross-oracle consensus.
//!
//! The consensus value is the median of participant values (or the mean when
//! every participant asks for it). Each participant's relative deviation from
//! it classifies outliers, and the mean deviation drives confidence:
//! `confidence = max(0, 1 - 2 * mean_deviation)` and
//! `score = confidence - outliers / participants`.

use serde::{Deserialize, Serialize};
use trustgate_core::UtcDateTime;

use crate::statistics::{median, relative_deviation};
use crate::{AggregationMethod, FeedError, OracleObservation, Severity, ValidationIssue};

/// One participant's reported value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusInput {
    pub participant: String,
    pub value: f64,
}

impl ConsensusInput {
    pub fn new(participant: impl Into<String>, value: f64) -> Self {
        Self {
            participant: participant.into(),
            value,
        }
    }

    /// Numeric observations only.
    pub fn from_observation(
        participant: impl Into<String>,
        observation: &OracleObservation,
    ) -> Option<Self> {
        observation
            .value
            .as_f64()
            .map(|value| Self::new(participant, value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsensusParams {
    pub max_deviation_percent: f64,
    pub accuracy_threshold: f64,
    pub consensus_threshold: f64,
    pub min_participants: usize,
    pub method: AggregationMethod,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            max_deviation_percent: 5.0,
            accuracy_threshold: 0.95,
            consensus_threshold: 0.8,
            min_participants: 3,
            method: AggregationMethod::Median,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierInfo {
    pub participant: String,
    pub value: f64,
    /// Relative deviation from the consensus value (0.1 = 10%).
    pub deviation: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusResult {
    pub asset_key: Option<String>,
    pub consensus_value: f64,
    pub confidence: f64,
    pub participant_count: usize,
    pub participants: Vec<String>,
    /// Participants that could not report and were left out.
    pub excluded: Vec<String>,
    pub spread: f64,
    pub std_dev: f64,
    pub outliers: Vec<OutlierInfo>,
    pub score: f64,
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
    pub computed_at: UtcDateTime,
}

impl ConsensusResult {
    pub fn critical_outliers(&self) -> impl Iterator<Item = &OutlierInfo> {
        self.outliers
            .iter()
            .filter(|outlier| outlier.severity == Severity::Critical)
    }
}

/// Computes consensus over a batch the caller already holds.
pub fn compute_consensus(
    inputs: &[ConsensusInput],
    params: &ConsensusParams,
) -> Result<ConsensusResult, FeedError> {
    let required = params.min_participants.max(1);
    if inputs.len() < required {
        return Err(FeedError::InsufficientSources {
            required,
            available: inputs.len(),
        });
    }

    let values: Vec<f64> = inputs.iter().map(|input| input.value).collect();
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let consensus_value = match params.method {
        AggregationMethod::Median => median(&values),
        AggregationMethod::Mean => mean,
    };
    let std_dev = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    let spread = values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        - values.iter().copied().fold(f64::INFINITY, f64::min);

    let major_limit = params.max_deviation_percent / 100.0;
    let critical_limit = 2.0 * major_limit;

    let mut outliers = Vec::new();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut deviation_sum = 0.0;

    for input in inputs {
        let deviation = relative_deviation(input.value, consensus_value);
        deviation_sum += deviation;

        let severity = if deviation > critical_limit {
            Severity::Critical
        } else if deviation > major_limit {
            Severity::Major
        } else {
            continue;
        };

        let message = format!(
            "participant '{}' reported {} which deviates {:.2}% from consensus {consensus_value}",
            input.participant,
            input.value,
            deviation * 100.0
        );
        if severity == Severity::Critical {
            errors.push(ValidationIssue::new("CRITICAL_OUTLIER", message, severity));
        } else {
            warnings.push(message);
        }
        outliers.push(OutlierInfo {
            participant: input.participant.clone(),
            value: input.value,
            deviation,
            severity,
        });
    }

    let mean_deviation = deviation_sum / n;
    let confidence = (1.0 - 2.0 * mean_deviation).max(0.0);
    let score = (confidence - outliers.len() as f64 / n).clamp(0.0, 1.0);
    let is_valid = score >= params.accuracy_threshold;

    if confidence < params.consensus_threshold {
        warnings.push(format!(
            "low consensus confidence {confidence:.3} (threshold {})",
            params.consensus_threshold
        ));
    }

    Ok(ConsensusResult {
        asset_key: None,
        consensus_value,
        confidence,
        participant_count: inputs.len(),
        participants: inputs.iter().map(|input| input.participant.clone()).collect(),
        excluded: Vec::new(),
        spread,
        std_dev,
        outliers,
        score,
        is_valid,
        errors,
        warnings,
        computed_at: UtcDateTime::now(),
    })
}
