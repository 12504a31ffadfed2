use std::fmt::{Display, Formatter};
use std::ops::Sub;
use std::time::Duration;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

/// Unix values above this are interpreted as milliseconds.
const MILLIS_CUTOFF: f64 = 1e12;

/// Fields a source may carry its observation time in, in priority order.
pub const TIMESTAMP_FIELDS: [&str; 10] = [
    "timestamp",
    "ts",
    "time",
    "as_of",
    "asOf",
    "updated_at",
    "updatedAt",
    "created_at",
    "createdAt",
    "date",
];

/// First parseable timestamp among [`TIMESTAMP_FIELDS`], with the field it
/// came from.
pub fn extract_timestamp(payload: &Value) -> Option<(&'static str, UtcDateTime)> {
    let object = payload.as_object()?;
    TIMESTAMP_FIELDS.iter().find_map(|field| {
        object
            .get(*field)
            .and_then(UtcDateTime::from_json)
            .map(|timestamp| (*field, timestamp))
    })
}

/// RFC3339 timestamp guaranteed to be UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcDateTime(OffsetDateTime);

impl UtcDateTime {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Parses an RFC3339 timestamp, normalizing any offset to UTC.
    pub fn parse(input: &str) -> Option<Self> {
        OffsetDateTime::parse(input.trim(), &Rfc3339)
            .ok()
            .map(|value| Self(value.to_offset(UtcOffset::UTC)))
    }

    pub fn from_unix_seconds(seconds: i64) -> Option<Self> {
        OffsetDateTime::from_unix_timestamp(seconds).ok().map(Self)
    }

    pub fn from_unix_millis(millis: i64) -> Option<Self> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
            .ok()
            .map(Self)
    }

    /// Reads a timestamp out of a JSON value: an RFC3339 string, a numeric
    /// string, or a unix number in seconds or milliseconds.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Self::parse(text).or_else(|| {
                text.trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(Self::from_unix_number)
            }),
            Value::Number(number) => number.as_f64().and_then(Self::from_unix_number),
            _ => None,
        }
    }

    fn from_unix_number(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        if value >= MILLIS_CUTOFF {
            Self::from_unix_millis(value as i64)
        } else {
            Self::from_unix_seconds(value as i64)
        }
    }

    pub fn into_inner(self) -> OffsetDateTime {
        self.0
    }

    pub fn unix_seconds(self) -> i64 {
        self.0.unix_timestamp()
    }

    /// Seconds elapsed since this instant. Negative for future timestamps.
    pub fn age_secs(self) -> f64 {
        (OffsetDateTime::now_utc() - self.0).as_seconds_f64()
    }

    /// Seconds from `earlier` to `self`.
    pub fn seconds_since(self, earlier: Self) -> f64 {
        (self.0 - earlier.0).as_seconds_f64()
    }

    /// Index of the wall-clock minute containing this instant.
    pub fn minute_bucket(self) -> i64 {
        self.0.unix_timestamp().div_euclid(60)
    }

    pub fn format_rfc3339(self) -> String {
        self.0
            .format(&Rfc3339)
            .expect("UtcDateTime must be RFC3339 formattable")
    }
}

impl Sub<Duration> for UtcDateTime {
    type Output = Self;

    fn sub(self, rhs: Duration) -> Self::Output {
        Self(self.0 - rhs)
    }
}

impl Display for UtcDateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format_rfc3339())
    }
}

impl Serialize for UtcDateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.format_rfc3339())
    }
}

impl<'de> Deserialize<'de> for UtcDateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value)
            .ok_or_else(|| D::Error::custom(format!("timestamp must be RFC3339: '{value}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_utc_timestamp() {
        let parsed = UtcDateTime::parse("2024-01-01T00:00:00Z").expect("must parse");
        assert_eq!(parsed.format_rfc3339(), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn normalizes_offsets_to_utc() {
        let parsed = UtcDateTime::parse("2024-01-01T01:00:00+01:00").expect("must parse");
        assert_eq!(parsed.format_rfc3339(), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn reads_unix_seconds_and_millis_from_json() {
        let seconds = UtcDateTime::from_json(&json!(1_704_067_200)).expect("seconds");
        let millis = UtcDateTime::from_json(&json!(1_704_067_200_000_i64)).expect("millis");
        assert_eq!(seconds, millis);
        assert_eq!(seconds.format_rfc3339(), "2024-01-01T00:00:00Z");
        assert!(UtcDateTime::from_json(&json!("yesterday")).is_none());
        assert!(UtcDateTime::from_json(&json!(true)).is_none());
    }

    #[test]
    fn age_of_past_instant_is_positive() {
        let past = UtcDateTime::now() - Duration::from_secs(200);
        let age = past.age_secs();
        assert!((199.0..210.0).contains(&age), "age was {age}");
    }
}
