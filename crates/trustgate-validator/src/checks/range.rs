use crate::{CheckType, FeedType, Severity, ValidationResult, ValueBounds};

/// Stored points needed before the historical-average comparison applies.
pub const MIN_TRAILING_POINTS: usize = 10;
/// Number of most recent stored points averaged for the comparison.
pub const TRAILING_WINDOW: usize = 100;

const DEVIATION_ERROR: f64 = 0.50;
const DEVIATION_WARNING: f64 = 0.20;

/// Bounds check plus deviation from the trailing historical average.
///
/// `value` is `None` when the observation had no usable number; numeric
/// feeds then score zero (format reports why), categorical feeds pass.
pub fn check(
    value: Option<f64>,
    feed_type: FeedType,
    bounds: Option<ValueBounds>,
    history: &[f64],
) -> ValidationResult {
    let mut result = ValidationResult::new(CheckType::Range);
    let Some(value) = value else {
        return if feed_type.is_numeric() {
            result.with_score(0.0)
        } else {
            ValidationResult::skipped(CheckType::Range)
        };
    };

    if let Some(bounds) = bounds {
        if !bounds.contains(value) {
            result.push_error(
                "OUT_OF_RANGE",
                format!(
                    "value {value} is outside [{}, {}] for {feed_type} feeds",
                    bounds.min, bounds.max
                ),
                Severity::Critical,
            );
        }
    }

    if history.len() >= MIN_TRAILING_POINTS {
        let trailing = &history[history.len().saturating_sub(TRAILING_WINDOW)..];
        let average = trailing.iter().sum::<f64>() / trailing.len() as f64;
        if average != 0.0 {
            let deviation = (value - average).abs() / average.abs();
            if deviation > DEVIATION_ERROR {
                result.push_error(
                    "HISTORICAL_DEVIATION",
                    format!(
                        "value deviates {:.1}% from the trailing average {average:.4}",
                        deviation * 100.0
                    ),
                    Severity::Major,
                );
            } else if deviation > DEVIATION_WARNING {
                result.push_warning(format!(
                    "value deviates {:.1}% from the trailing average {average:.4}",
                    deviation * 100.0
                ));
            }
        }
    }

    let score = if result.is_valid() { 1.0 } else { 0.5 };
    result.with_score(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn price_bounds() -> Option<ValueBounds> {
        FeedType::Price.default_bounds()
    }

    #[test]
    fn negative_price_is_out_of_range() {
        let result = check(Some(-1.0), FeedType::Price, price_bounds(), &[]);
        assert_eq!(result.errors[0].code, "OUT_OF_RANGE");
        assert_eq!(result.score, 0.5);
    }

    #[test]
    fn short_history_skips_the_average_comparison() {
        let history = vec![100.0; MIN_TRAILING_POINTS - 1];
        let result = check(Some(500.0), FeedType::Price, price_bounds(), &history);
        assert!(result.is_valid());
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn deviation_from_average_warns_then_errors() {
        let history = vec![100.0; MIN_TRAILING_POINTS];

        let warned = check(Some(125.0), FeedType::Price, price_bounds(), &history);
        assert!(warned.is_valid());
        assert_eq!(warned.warnings.len(), 1);

        let failed = check(Some(160.0), FeedType::Price, price_bounds(), &history);
        assert_eq!(failed.errors[0].code, "HISTORICAL_DEVIATION");
    }

    #[test]
    fn numeric_feed_without_value_scores_zero() {
        let result = check(None, FeedType::Rwa, FeedType::Rwa.default_bounds(), &[]);
        assert_eq!(result.score, 0.0);
        assert!(result.errors.is_empty());

        let categorical = check(None, FeedType::Event, None, &[]);
        assert!(categorical.skipped);
        assert_eq!(categorical.score, 1.0);
    }
}
