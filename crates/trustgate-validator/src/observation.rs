//! Raw and typed observations.
//!
//! Sources hand back a [`RawObservation`] whose value and timestamp may be
//! missing or malformed. The format check decides whether it can be promoted
//! to an [`OracleObservation`], which is what history and statistics use.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use trustgate_core::{Payload, SourceId, UtcDateTime, TIMESTAMP_FIELDS};

use crate::FeedType;

const VALUE_FIELDS: [&str; 5] = ["value", "price", "answer", "rate", "result"];

/// Observed value: a number for price-like feeds, text for categorical ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObservationValue {
    Numeric(f64),
    Categorical(String),
}

impl ObservationValue {
    pub fn from_json(value: &Value, numeric: bool) -> Option<Self> {
        if numeric {
            return value.as_f64().filter(|v| v.is_finite()).map(Self::Numeric);
        }
        match value {
            Value::Null => None,
            Value::Number(number) => number.as_f64().map(Self::Numeric),
            Value::String(text) => Some(Self::Categorical(text.clone())),
            other => Some(Self::Categorical(other.to_string())),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Numeric(value) => Some(*value),
            Self::Categorical(_) => None,
        }
    }
}

/// Observation as delivered by a source, before any checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub source_id: SourceId,
    pub value: Option<Value>,
    pub timestamp: Option<Value>,
    pub metadata: Option<Map<String, Value>>,
}

impl RawObservation {
    pub fn new(source_id: SourceId) -> Self {
        Self {
            source_id,
            value: None,
            timestamp: None,
            metadata: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: UtcDateTime) -> Self {
        self.timestamp = Some(Value::String(timestamp.format_rfc3339()));
        self
    }

    /// Sets the timestamp exactly as a source might send it.
    pub fn with_raw_timestamp(mut self, timestamp: Value) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Extracts value, timestamp, and metadata from a fetched payload. Generic
    /// records are searched for conventional field names.
    pub fn from_payload(source_id: SourceId, payload: &Payload) -> Self {
        match payload {
            Payload::Price(point) => Self {
                source_id,
                value: Some(Value::from(point.value)),
                timestamp: Some(Value::String(point.timestamp.format_rfc3339())),
                metadata: point.metadata.clone(),
            },
            Payload::Record(record) => Self {
                source_id,
                value: first_present(record, &VALUE_FIELDS),
                timestamp: first_present(record, &TIMESTAMP_FIELDS),
                metadata: record
                    .get("metadata")
                    .and_then(Value::as_object)
                    .cloned(),
            },
        }
    }

    pub fn parsed_timestamp(&self) -> Option<UtcDateTime> {
        self.timestamp.as_ref().and_then(UtcDateTime::from_json)
    }

    /// Promotes to a typed observation if value and timestamp are usable for
    /// `feed_type`.
    pub fn promote(&self, feed_type: FeedType) -> Option<OracleObservation> {
        let timestamp = self.parsed_timestamp()?;
        let value = ObservationValue::from_json(self.value.as_ref()?, feed_type.is_numeric())?;
        Some(OracleObservation {
            value,
            timestamp,
            source_id: self.source_id.clone(),
            metadata: self.metadata.clone().unwrap_or_default(),
        })
    }
}

fn first_present(record: &Map<String, Value>, fields: &[&str]) -> Option<Value> {
    fields
        .iter()
        .filter_map(|field| record.get(*field))
        .find(|value| !value.is_null())
        .cloned()
}

/// Well-formed observation. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleObservation {
    pub value: ObservationValue,
    pub timestamp: UtcDateTime,
    pub source_id: SourceId,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl OracleObservation {
    pub fn numeric(source_id: SourceId, value: f64, timestamp: UtcDateTime) -> Self {
        Self {
            value: ObservationValue::Numeric(value),
            timestamp,
            source_id,
            metadata: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use trustgate_core::PricePoint;

    use super::*;

    fn source() -> SourceId {
        SourceId::parse("chainlink").expect("valid id")
    }

    #[test]
    fn records_use_conventional_field_names() {
        let payload = Payload::from_json(json!({
            "answer": 64_000.25,
            "updatedAt": 1_700_000_000,
            "metadata": {"round": 7}
        }))
        .expect("record");

        let raw = RawObservation::from_payload(source(), &payload);
        let observation = raw.promote(FeedType::Price).expect("promotable");

        assert_eq!(observation.value, ObservationValue::Numeric(64_000.25));
        assert_eq!(observation.timestamp.unix_seconds(), 1_700_000_000);
        assert_eq!(observation.metadata.get("round"), Some(&json!(7)));
    }

    #[test]
    fn price_payloads_carry_their_metadata() {
        let now = UtcDateTime::now();
        let payload = Payload::Price(PricePoint::new(10.0, now));
        let raw = RawObservation::from_payload(source(), &payload);

        assert_eq!(raw.value, Some(json!(10.0)));
        assert!(raw.metadata.is_none());
        assert!(raw.promote(FeedType::Price).is_some());
    }

    #[test]
    fn numeric_feeds_reject_text_values() {
        let raw = RawObservation::new(source())
            .with_value("sixty thousand")
            .with_timestamp(UtcDateTime::now());

        assert!(raw.promote(FeedType::Price).is_none());
        assert!(matches!(
            raw.promote(FeedType::Event).map(|o| o.value),
            Some(ObservationValue::Categorical(text)) if text == "sixty thousand"
        ));
    }

    #[test]
    fn unparseable_timestamps_block_promotion() {
        let raw = RawObservation::new(source())
            .with_value(1.0)
            .with_raw_timestamp(json!("yesterday"));
        assert!(raw.parsed_timestamp().is_none());
        assert!(raw.promote(FeedType::Price).is_none());
    }
}
