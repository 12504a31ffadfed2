use serde_json::Value;
use trustgate_core::UtcDateTime;

use crate::{CheckType, FeedType, RawObservation, Severity, ValidationResult};

/// Value present (numeric for numeric feed types) and timestamp parseable.
/// Missing metadata only warns.
pub fn check(raw: &RawObservation, feed_type: FeedType) -> ValidationResult {
    let mut result = ValidationResult::new(CheckType::Format);

    match &raw.value {
        None | Some(Value::Null) => {
            result.push_error("MISSING_VALUE", "observation has no value", Severity::Critical);
        }
        Some(value) if feed_type.is_numeric() && value.as_f64().is_none() => {
            result.push_error(
                "NON_NUMERIC_VALUE",
                format!("{feed_type} feeds need a numeric value, got {value}"),
                Severity::Critical,
            );
        }
        Some(_) => {}
    }

    match &raw.timestamp {
        None | Some(Value::Null) => {
            result.push_error(
                "MISSING_TIMESTAMP",
                "observation has no timestamp",
                Severity::Critical,
            );
        }
        Some(timestamp) if UtcDateTime::from_json(timestamp).is_none() => {
            result.push_error(
                "INVALID_TIMESTAMP",
                format!("timestamp {timestamp} is neither RFC 3339 nor unix time"),
                Severity::Critical,
            );
        }
        Some(_) => {}
    }

    if raw.metadata.is_none() {
        result.push_warning("observation carries no metadata");
    }

    let score = if result.is_valid() { 1.0 } else { 0.0 };
    result.with_score(score)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use trustgate_core::SourceId;

    use super::*;

    fn raw() -> RawObservation {
        RawObservation::new(SourceId::parse("pyth").expect("valid id"))
    }

    #[test]
    fn well_formed_observation_scores_one_and_warns_on_missing_metadata() {
        let result = check(
            &raw().with_value(101.5).with_timestamp(UtcDateTime::now()),
            FeedType::Price,
        );

        assert!(result.is_valid());
        assert_eq!(result.score, 1.0);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn text_value_on_price_feed_is_critical() {
        let result = check(
            &raw().with_value("n/a").with_timestamp(UtcDateTime::now()),
            FeedType::Price,
        );

        assert_eq!(result.score, 0.0);
        assert_eq!(result.errors[0].code, "NON_NUMERIC_VALUE");
        assert_eq!(result.errors[0].severity, Severity::Critical);
    }

    #[test]
    fn categorical_feeds_accept_text() {
        let result = check(
            &raw()
                .with_value("approved")
                .with_raw_timestamp(json!(1_700_000_000_000_i64))
                .with_metadata(serde_json::Map::new()),
            FeedType::Identity,
        );
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn missing_value_and_bad_timestamp_are_both_reported() {
        let result = check(&raw().with_raw_timestamp(json!("soon")), FeedType::Credit);
        let codes: Vec<_> = result.errors.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, vec!["MISSING_VALUE", "INVALID_TIMESTAMP"]);
    }
}
