//! Validation outcomes.

use serde::{Deserialize, Serialize};
use trustgate_core::{FeedId, UtcDateTime};

use crate::OracleObservation;

/// Scoring axes of the single-feed pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    Format,
    Freshness,
    Range,
    Consensus,
    Historical,
    Anomaly,
}

impl CheckType {
    pub const ALL: [Self; 6] = [
        Self::Format,
        Self::Freshness,
        Self::Range,
        Self::Consensus,
        Self::Historical,
        Self::Anomaly,
    ];

    /// Contribution to the aggregate score. The weights sum to one.
    pub const fn weight(self) -> f64 {
        match self {
            Self::Format => 0.30,
            Self::Freshness => 0.20,
            Self::Range => 0.20,
            Self::Consensus => 0.15,
            Self::Historical => 0.10,
            Self::Anomaly => 0.05,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Format => "format",
            Self::Freshness => "freshness",
            Self::Range => "range",
            Self::Consensus => "consensus",
            Self::Historical => "historical",
            Self::Anomaly => "anomaly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: String,
    pub message: String,
    pub severity: Severity,
}

impl ValidationIssue {
    pub fn new(code: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity,
        }
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub check: CheckType,
    pub score: f64,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
    /// Set when the check had nothing to evaluate and returned its neutral score.
    pub skipped: bool,
}

impl ValidationResult {
    pub fn new(check: CheckType) -> Self {
        Self {
            check,
            score: 1.0,
            errors: Vec::new(),
            warnings: Vec::new(),
            skipped: false,
        }
    }

    pub fn skipped(check: CheckType) -> Self {
        Self {
            skipped: true,
            ..Self::new(check)
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score.clamp(0.0, 1.0);
        self
    }

    pub fn push_error(
        &mut self,
        code: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
    ) {
        self.errors.push(ValidationIssue::new(code, message, severity));
    }

    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Weighted combination of every check for one observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateValidationResult {
    pub feed_id: FeedId,
    pub observation: Option<OracleObservation>,
    pub checks: Vec<ValidationResult>,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
    pub score: f64,
    pub is_valid: bool,
    pub cached: bool,
    pub validated_at: UtcDateTime,
}

impl AggregateValidationResult {
    pub fn combine(
        feed_id: FeedId,
        observation: Option<OracleObservation>,
        checks: Vec<ValidationResult>,
        accuracy_threshold: f64,
    ) -> Self {
        let score = checks
            .iter()
            .map(|check| check.check.weight() * check.score)
            .sum::<f64>()
            .clamp(0.0, 1.0);
        let errors: Vec<ValidationIssue> = checks
            .iter()
            .flat_map(|check| check.errors.iter().cloned())
            .collect();
        let warnings = checks
            .iter()
            .flat_map(|check| check.warnings.iter().cloned())
            .collect();
        let is_valid = errors.is_empty() && score >= accuracy_threshold;

        Self {
            feed_id,
            observation,
            checks,
            errors,
            warnings,
            score,
            is_valid,
            cached: false,
            validated_at: UtcDateTime::now(),
        }
    }

    pub fn check(&self, check: CheckType) -> Option<&ValidationResult> {
        self.checks.iter().find(|result| result.check == check)
    }

    pub fn has_error(&self, code: &str) -> bool {
        self.errors.iter().any(|issue| issue.code == code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

/// A stored point that stands out from the rest of the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalAnomaly {
    pub timestamp: UtcDateTime,
    pub value: f64,
    pub z_score: f64,
}

/// Output of the historical accuracy report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoricalAccuracyReport {
    pub feed_id: FeedId,
    pub window_days: u32,
    pub points: usize,
    pub accuracy: f64,
    pub reliability: f64,
    pub consistency: f64,
    pub trend: Trend,
    pub anomalies: Vec<HistoricalAnomaly>,
    pub generated_at: UtcDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        let total: f64 = CheckType::ALL.iter().map(|check| check.weight()).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn any_error_invalidates_a_perfect_score() {
        let mut format = ValidationResult::new(CheckType::Format);
        format.push_error("MISSING_VALUE", "value is missing", Severity::Critical);
        let checks = CheckType::ALL
            .iter()
            .map(|check| {
                if *check == CheckType::Format {
                    format.clone()
                } else {
                    ValidationResult::new(*check)
                }
            })
            .collect();

        let aggregate = AggregateValidationResult::combine(
            FeedId::parse("eth_usd").expect("valid id"),
            None,
            checks,
            0.5,
        );

        assert!((aggregate.score - 1.0).abs() < 1e-12);
        assert!(!aggregate.is_valid);
        assert!(aggregate.has_error("MISSING_VALUE"));
    }

    #[test]
    fn scores_are_clamped() {
        let result = ValidationResult::new(CheckType::Historical).with_score(-0.4);
        assert_eq!(result.score, 0.0);
    }
}
