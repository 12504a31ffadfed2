use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::UtcDateTime;

/// Single price-like reading delivered by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub value: f64,
    pub timestamp: UtcDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl PricePoint {
    pub fn new(value: f64, timestamp: UtcDateTime) -> Self {
        Self {
            value,
            timestamp,
            currency: None,
            metadata: None,
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Data returned by a source, as one of the known shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Price(PricePoint),
    Record(Map<String, Value>),
}

impl Payload {
    /// Interprets a raw JSON document. Tagged payloads are taken as-is, any
    /// other JSON object becomes a generic record.
    pub fn from_json(value: Value) -> Option<Self> {
        if let Ok(tagged) = serde_json::from_value::<Self>(value.clone()) {
            return Some(tagged);
        }
        match value {
            Value::Object(map) => Some(Self::Record(map)),
            _ => None,
        }
    }

    /// Flat JSON view used for field lookups, hashing, and schema checks.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Price(point) => {
                let mut map = Map::new();
                map.insert(String::from("value"), Value::from(point.value));
                map.insert(
                    String::from("timestamp"),
                    Value::String(point.timestamp.format_rfc3339()),
                );
                if let Some(currency) = &point.currency {
                    map.insert(String::from("currency"), Value::String(currency.clone()));
                }
                if let Some(metadata) = &point.metadata {
                    map.insert(String::from("metadata"), Value::Object(metadata.clone()));
                }
                Value::Object(map)
            }
            Self::Record(map) => Value::Object(map.clone()),
        }
    }

    /// Looks up a top-level field, or a nested one with a dotted path.
    pub fn field(&self, path: &str) -> Option<Value> {
        lookup_path(&self.to_value(), path).cloned()
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Price(_) => false,
            Self::Record(map) => map.is_empty(),
        }
    }
}

/// Resolves `a.b.c` style paths against nested JSON objects.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn untagged_objects_become_records() {
        let payload = Payload::from_json(json!({"price": 42.5, "symbol": "ETH"})).expect("record");
        assert!(matches!(payload, Payload::Record(_)));
        assert_eq!(payload.field("price"), Some(json!(42.5)));
    }

    #[test]
    fn tagged_price_payloads_round_trip_through_json() {
        let value = json!({
            "kind": "price",
            "data": {"value": 101.0, "timestamp": "2024-01-01T00:00:00Z"}
        });
        let payload = Payload::from_json(value).expect("price payload");
        match payload {
            Payload::Price(point) => assert_eq!(point.value, 101.0),
            other => panic!("expected price payload, got {other:?}"),
        }
    }

    #[test]
    fn dotted_paths_resolve_nested_fields() {
        let payload = Payload::from_json(json!({"quote": {"usd": {"price": 7}}})).expect("record");
        assert_eq!(payload.field("quote.usd.price"), Some(json!(7)));
        assert_eq!(payload.field("quote.eur"), None);
        assert!(Payload::from_json(json!([1, 2])).is_none());
    }
}
