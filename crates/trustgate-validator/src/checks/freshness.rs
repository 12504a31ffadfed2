use std::time::Duration;

use trustgate_core::UtcDateTime;

use crate::{CheckType, Severity, ValidationResult};

/// Scores how recent an observation is relative to the feed's update
/// frequency. `max_age` is twice the frequency.
///
/// A missing or unparseable timestamp scores zero without an error of its
/// own; the format check reports it.
pub fn check(
    timestamp: Option<UtcDateTime>,
    update_frequency: Duration,
    now: UtcDateTime,
    future_skew: Duration,
) -> ValidationResult {
    let mut result = ValidationResult::new(CheckType::Freshness);
    let Some(timestamp) = timestamp else {
        return result.with_score(0.0);
    };

    let frequency = update_frequency.as_secs_f64();
    let max_age = 2.0 * frequency;
    let mut age = now.seconds_since(timestamp);

    if age < 0.0 {
        if -age > future_skew.as_secs_f64() {
            result.push_warning(format!(
                "timestamp is {:.0}s in the future, treating as current",
                -age
            ));
        }
        age = 0.0;
    }

    if age > max_age {
        let severity = if age > 2.0 * max_age {
            Severity::Critical
        } else {
            Severity::Major
        };
        result.push_error(
            "STALE_DATA",
            format!("observation is {age:.0}s old, limit is {max_age:.0}s"),
            severity,
        );
    } else if age > 1.5 * frequency {
        result.push_warning(format!(
            "observation is {age:.0}s old, expected an update every {frequency:.0}s"
        ));
    }

    let score = if max_age > 0.0 { 1.0 - age / max_age } else { 0.0 };
    result.with_score(score)
}
