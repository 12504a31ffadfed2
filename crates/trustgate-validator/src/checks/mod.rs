//! Single-observation checks. Each is a pure function producing one
//! [`ValidationResult`](crate::ValidationResult); the validator runs all of
//! them regardless of earlier failures and aggregates the results.

pub mod anomaly;
pub mod format;
pub mod freshness;
pub mod historical;
pub mod range;
