use std::time::Duration;

use serde_json::Value;
use trustgate_core::{extract_timestamp, UtcDateTime};

use crate::result::{CheckKind, CheckOutcome};

/// Valid while the payload is no older than `max_age`; confidence decays
/// linearly with age. Future timestamps count as age zero.
pub fn check(payload: &Value, max_age: Duration, now: UtcDateTime) -> CheckOutcome {
    let Some((field, timestamp)) = extract_timestamp(payload) else {
        return CheckOutcome::fail(
            CheckKind::Temporal,
            0.0,
            vec![String::from("payload carries no parseable timestamp")],
        );
    };

    let age = now.seconds_since(timestamp).max(0.0);
    let max_age = max_age.as_secs_f64();
    let confidence = if max_age > 0.0 {
        (1.0 - age / max_age).max(0.0)
    } else {
        0.0
    };

    if age <= max_age {
        CheckOutcome::pass(CheckKind::Temporal, confidence)
    } else {
        CheckOutcome::fail(
            CheckKind::Temporal,
            confidence,
            vec![format!(
                "'{field}' is {age:.0}s old, older than the {max_age:.0}s limit"
            )],
        )
    }
}
