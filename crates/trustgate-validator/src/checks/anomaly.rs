use crate::anomaly::{AnomalyDetector, AnomalyVerdict};
use crate::{CheckType, OracleObservation, Severity, ValidationResult};

/// Verdicts scored above this are errors rather than warnings.
pub const ANOMALY_ERROR_SCORE: f64 = 0.8;

/// Runs `detector` (if any) and converts its verdict. The verdict is returned
/// alongside so the caller can announce flagged observations.
pub async fn check(
    detector: Option<&dyn AnomalyDetector>,
    observation: Option<&OracleObservation>,
    history: &[OracleObservation],
) -> (ValidationResult, Option<AnomalyVerdict>) {
    let (Some(detector), Some(observation)) = (detector, observation) else {
        return (ValidationResult::skipped(CheckType::Anomaly), None);
    };

    let verdict = match detector.detect(observation, history).await {
        Ok(verdict) => verdict,
        Err(error) => {
            let mut result = ValidationResult::new(CheckType::Anomaly);
            result.push_warning(error.to_string());
            return (result, None);
        }
    };

    (from_verdict(&verdict), Some(verdict))
}

pub fn from_verdict(verdict: &AnomalyVerdict) -> ValidationResult {
    let mut result = ValidationResult::new(CheckType::Anomaly);
    if !verdict.is_anomaly {
        return result;
    }

    if verdict.score > ANOMALY_ERROR_SCORE {
        result.push_error("ANOMALY_DETECTED", verdict.explanation.clone(), Severity::Major);
    } else {
        result.push_warning(format!("possible anomaly: {}", verdict.explanation));
    }
    result.with_score(1.0 - verdict.score)
}
