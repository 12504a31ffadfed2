use serde::{Deserialize, Serialize};
use trustgate_core::{SourceId, UtcDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Cryptographic,
    Temporal,
    Schema,
    Consistency,
}

impl CheckKind {
    pub const ALL: [Self; 4] = [
        Self::Cryptographic,
        Self::Temporal,
        Self::Schema,
        Self::Consistency,
    ];

    pub const fn weight(self) -> f64 {
        match self {
            Self::Cryptographic => 0.4,
            Self::Temporal | Self::Schema | Self::Consistency => 0.2,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cryptographic => "cryptographic",
            Self::Temporal => "temporal",
            Self::Schema => "schema",
            Self::Consistency => "consistency",
        }
    }
}

/// Outcome of one sub-check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub kind: CheckKind,
    pub valid: bool,
    pub confidence: f64,
    pub errors: Vec<String>,
}

impl CheckOutcome {
    pub fn pass(kind: CheckKind, confidence: f64) -> Self {
        Self {
            kind,
            valid: true,
            confidence: confidence.clamp(0.0, 1.0),
            errors: Vec::new(),
        }
    }

    pub fn fail(kind: CheckKind, confidence: f64, errors: Vec<String>) -> Self {
        Self {
            kind,
            valid: false,
            confidence: confidence.clamp(0.0, 1.0),
            errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataVerificationResult {
    pub source_id: SourceId,
    pub payload_hash: String,
    pub valid: bool,
    /// Weighted confidence, renormalized over the checks that ran.
    pub confidence: f64,
    pub checks: Vec<CheckOutcome>,
    pub errors: Vec<String>,
    pub cached: bool,
    pub latency_ms: u64,
    pub verified_at: UtcDateTime,
}

impl DataVerificationResult {
    pub fn combine(
        source_id: SourceId,
        payload_hash: String,
        checks: Vec<CheckOutcome>,
        threshold: f64,
        latency_ms: u64,
    ) -> Self {
        let total_weight: f64 = checks.iter().map(|check| check.kind.weight()).sum();
        let confidence = if total_weight > 0.0 {
            checks
                .iter()
                .map(|check| check.kind.weight() * check.confidence)
                .sum::<f64>()
                / total_weight
        } else {
            0.0
        };
        let valid =
            !checks.is_empty() && checks.iter().all(|check| check.valid) && confidence >= threshold;
        let errors = checks
            .iter()
            .flat_map(|check| {
                check
                    .errors
                    .iter()
                    .map(move |error| format!("{}: {error}", check.kind.as_str()))
            })
            .collect();

        Self {
            source_id,
            payload_hash,
            valid,
            confidence,
            checks,
            errors,
            cached: false,
            latency_ms,
            verified_at: UtcDateTime::now(),
        }
    }

    pub fn check(&self, kind: CheckKind) -> Option<&CheckOutcome> {
        self.checks.iter().find(|check| check.kind == kind)
    }

    pub fn check_kinds(&self) -> Vec<CheckKind> {
        self.checks.iter().map(|check| check.kind).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combine(checks: Vec<CheckOutcome>) -> DataVerificationResult {
        DataVerificationResult::combine(
            SourceId::parse("chainlink").expect("valid id"),
            String::from("00"),
            checks,
            0.7,
            0,
        )
    }

    #[test]
    fn weights_renormalize_over_performed_checks() {
        let result = combine(vec![
            CheckOutcome::pass(CheckKind::Temporal, 1.0),
            CheckOutcome::pass(CheckKind::Schema, 0.5),
        ]);
        assert!((result.confidence - 0.75).abs() < 1e-9);
        assert!(result.valid);
    }

    #[test]
    fn any_failed_check_invalidates() {
        let result = combine(vec![
            CheckOutcome::pass(CheckKind::Cryptographic, 1.0),
            CheckOutcome::pass(CheckKind::Temporal, 1.0),
            CheckOutcome::fail(CheckKind::Schema, 0.9, vec![String::from("missing field 'price'")]),
        ]);
        assert!(result.confidence >= 0.7);
        assert!(!result.valid);
        assert_eq!(result.errors, vec![String::from("schema: missing field 'price'")]);
    }

    #[test]
    fn low_confidence_invalidates() {
        let result = combine(vec![
            CheckOutcome::pass(CheckKind::Temporal, 0.6),
            CheckOutcome::pass(CheckKind::Consistency, 0.5),
        ]);
        assert!(!result.valid);
    }
}
