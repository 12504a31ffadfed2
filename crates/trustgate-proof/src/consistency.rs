//! Cross-source consistency: how closely a payload agrees with what other
//! sources recently reported about the same entity.

use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use serde_json::Value;
use trustgate_core::{SourceId, TIMESTAMP_FIELDS};

use crate::result::{CheckKind, CheckOutcome};
use crate::VerifyError;

/// Confidence reported when there is nothing to compare against.
pub const NO_COMPARISON_CONFIDENCE: f64 = 0.5;

pub type ComparisonFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<Value>, VerifyError>> + Send + 'a>>;

/// Supplies recent payloads from sources other than `source_id` that
/// describe the same entity as `payload`.
pub trait ComparisonSource: Send + Sync {
    fn recent_payloads<'a>(
        &'a self,
        source_id: &'a SourceId,
        payload: &'a Value,
    ) -> ComparisonFuture<'a>;
}

/// Bounded in-memory store that matches payloads on one entity field.
#[derive(Debug)]
pub struct RecentPayloads {
    entity_field: String,
    capacity: usize,
    entries: Mutex<VecDeque<(SourceId, Value)>>,
}

impl RecentPayloads {
    pub fn new(entity_field: impl Into<String>, capacity: usize) -> Self {
        Self {
            entity_field: entity_field.into(),
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, source_id: SourceId, payload: Value) {
        let mut entries = self.entries.lock().expect("recent payload lock is not poisoned");
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back((source_id, payload));
    }
}

impl ComparisonSource for RecentPayloads {
    fn recent_payloads<'a>(
        &'a self,
        source_id: &'a SourceId,
        payload: &'a Value,
    ) -> ComparisonFuture<'a> {
        Box::pin(async move {
            let Some(entity) = payload.get(&self.entity_field) else {
                return Ok(Vec::new());
            };
            let entries = self.entries.lock().expect("recent payload lock is not poisoned");
            Ok(entries
                .iter()
                .rev()
                .filter(|(other, candidate)| {
                    other != source_id && candidate.get(&self.entity_field) == Some(entity)
                })
                .map(|(_, candidate)| candidate.clone())
                .collect())
        })
    }
}

/// Field-by-field agreement in `[0, 1]`. Numbers score by relative
/// difference, nested objects recursively, anything else by equality.
/// Timestamp fields are ignored; a field present on one side only scores 0.
pub fn similarity(left: &Value, right: &Value) -> f64 {
    match (left, right) {
        (Value::Object(a), Value::Object(b)) => {
            let keys: BTreeSet<&String> = a
                .keys()
                .chain(b.keys())
                .filter(|key| !TIMESTAMP_FIELDS.contains(&key.as_str()))
                .collect();
            if keys.is_empty() {
                return 1.0;
            }
            let total: f64 = keys
                .iter()
                .map(|key| match (a.get(*key), b.get(*key)) {
                    (Some(x), Some(y)) => similarity(x, y),
                    _ => 0.0,
                })
                .sum();
            total / keys.len() as f64
        }
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => numeric_similarity(x, y),
            _ => 0.0,
        },
        (a, b) => f64::from(u8::from(a == b)),
    }
}

fn numeric_similarity(x: f64, y: f64) -> f64 {
    let scale = x.abs().max(y.abs());
    if scale == 0.0 {
        return 1.0;
    }
    (1.0 - (x - y).abs() / scale).clamp(0.0, 1.0)
}

/// Average similarity against `others`, which must reach `threshold`.
pub fn check(payload: &Value, others: &[Value], threshold: f64) -> CheckOutcome {
    if others.is_empty() {
        return CheckOutcome::pass(CheckKind::Consistency, NO_COMPARISON_CONFIDENCE);
    }

    let score = others.iter().map(|other| similarity(payload, other)).sum::<f64>()
        / others.len() as f64;
    if score >= threshold {
        CheckOutcome::pass(CheckKind::Consistency, score)
    } else {
        CheckOutcome::fail(
            CheckKind::Consistency,
            score,
            vec![format!(
                "agreement with {} other source(s) is {score:.3}, below {threshold}",
                others.len()
            )],
        )
    }
}
