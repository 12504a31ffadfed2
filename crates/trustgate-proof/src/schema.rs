//! Per-source payload schemas.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use trustgate_core::lookup_path;

use crate::result::{CheckKind, CheckOutcome};

/// Confidence reported when a source has no registered schema.
pub const NO_SCHEMA_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl FieldType {
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field paths may be dotted (`quote.usd.price`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSchema {
    pub required_fields: Vec<String>,
    pub field_types: BTreeMap<String, FieldType>,
}

impl DataSchema {
    pub fn require(mut self, field: impl Into<String>) -> Self {
        self.required_fields.push(field.into());
        self
    }

    pub fn typed(mut self, field: impl Into<String>, field_type: FieldType) -> Self {
        self.field_types.insert(field.into(), field_type);
        self
    }

    /// Human-readable violations, empty when the payload conforms.
    pub fn violations(&self, payload: &Value) -> Vec<String> {
        let missing = self
            .required_fields
            .iter()
            .filter(|field| lookup_path(payload, field).map_or(true, Value::is_null))
            .map(|field| format!("missing required field '{field}'"));

        let mistyped = self.field_types.iter().filter_map(|(field, expected)| {
            let value = lookup_path(payload, field)?;
            (!value.is_null() && !expected.matches(value))
                .then(|| format!("field '{field}' should be {expected}, found {}", json_type(value)))
        });

        missing.chain(mistyped).collect()
    }

    fn rule_count(&self) -> usize {
        self.required_fields.len() + self.field_types.len()
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Confidence is the share of satisfied rules. Optional typed fields that
/// are absent count as satisfied.
pub fn check(schema: Option<&DataSchema>, payload: &Value) -> CheckOutcome {
    let Some(schema) = schema else {
        return CheckOutcome::pass(CheckKind::Schema, NO_SCHEMA_CONFIDENCE);
    };

    let rules = schema.rule_count();
    if rules == 0 {
        return CheckOutcome::pass(CheckKind::Schema, 1.0);
    }

    let violations = schema.violations(payload);
    let confidence = (rules - violations.len().min(rules)) as f64 / rules as f64;
    if violations.is_empty() {
        CheckOutcome::pass(CheckKind::Schema, confidence)
    } else {
        CheckOutcome::fail(CheckKind::Schema, confidence, violations)
    }
}
