use crate::{CheckType, Severity, ValidationResult};

/// Stored points the continuity check compares against.
pub const CONTINUITY_POINTS: usize = 5;

const JUMP_ERROR: f64 = 0.30;
const JUMP_WARNING: f64 = 0.15;

/// Compares `value` against the mean of the last few stored points.
pub fn check(value: Option<f64>, history: &[f64]) -> ValidationResult {
    let Some(value) = value else {
        return ValidationResult::skipped(CheckType::Historical);
    };
    if history.len() < CONTINUITY_POINTS {
        return ValidationResult::skipped(CheckType::Historical);
    }

    let recent = &history[history.len() - CONTINUITY_POINTS..];
    let mean = recent.iter().sum::<f64>() / recent.len() as f64;
    if mean == 0.0 {
        return ValidationResult::skipped(CheckType::Historical);
    }

    let mut result = ValidationResult::new(CheckType::Historical);
    let jump = (value - mean).abs() / mean.abs();
    if jump > JUMP_ERROR {
        result.push_error(
            "DISCONTINUITY",
            format!(
                "value jumped {:.1}% from the recent mean {mean:.4}",
                jump * 100.0
            ),
            Severity::Major,
        );
    } else if jump > JUMP_WARNING {
        result.push_warning(format!(
            "value moved {:.1}% from the recent mean {mean:.4}",
            jump * 100.0
        ));
    }

    result.with_score(1.0 - jump)
}
