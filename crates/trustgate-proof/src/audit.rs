//! Append-only verification audit trail with retention-based pruning.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use trustgate_core::{SourceId, UtcDateTime};
use uuid::Uuid;

use crate::result::{CheckKind, DataVerificationResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: UtcDateTime,
    pub source_id: SourceId,
    pub payload_hash: String,
    pub valid: bool,
    pub confidence: f64,
    pub checks: Vec<CheckKind>,
    pub latency_ms: u64,
    pub cached: bool,
}

impl AuditEntry {
    pub fn from_result(result: &DataVerificationResult) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: UtcDateTime::now(),
            source_id: result.source_id.clone(),
            payload_hash: result.payload_hash.clone(),
            valid: result.valid,
            confidence: result.confidence,
            checks: result.check_kinds(),
            latency_ms: result.latency_ms,
            cached: result.cached,
        }
    }
}

#[derive(Debug)]
pub struct AuditTrail {
    retention: Duration,
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl AuditTrail {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_retention_days(days: u32) -> Self {
        Self::new(Duration::from_secs(u64::from(days) * 86_400))
    }

    /// Appends `entry`, pruning anything past retention first.
    pub fn append(&self, entry: AuditEntry) {
        let mut entries = self.entries();
        prune_locked(&mut entries, self.cutoff());
        entries.push_back(entry);
    }

    /// Drops entries older than the retention window, returning how many.
    pub fn prune(&self) -> usize {
        prune_locked(&mut self.entries(), self.cutoff())
    }

    pub fn all(&self) -> Vec<AuditEntry> {
        self.entries().iter().cloned().collect()
    }

    pub fn for_source(&self, source_id: &SourceId) -> Vec<AuditEntry> {
        self.entries()
            .iter()
            .filter(|entry| &entry.source_id == source_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cutoff(&self) -> UtcDateTime {
        UtcDateTime::now() - self.retention
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<AuditEntry>> {
        self.entries.lock().expect("audit trail lock is not poisoned")
    }
}

fn prune_locked(entries: &mut VecDeque<AuditEntry>, cutoff: UtcDateTime) -> usize {
    let before = entries.len();
    entries.retain(|entry| entry.timestamp >= cutoff);
    before - entries.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source: &str, age: Duration) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            timestamp: UtcDateTime::now() - age,
            source_id: SourceId::parse(source).expect("valid id"),
            payload_hash: String::from("ab"),
            valid: true,
            confidence: 0.9,
            checks: vec![CheckKind::Temporal],
            latency_ms: 1,
            cached: false,
        }
    }

    #[test]
    fn entries_past_retention_are_pruned() {
        let trail = AuditTrail::with_retention_days(1);
        trail.append(entry("pyth", Duration::from_secs(2 * 86_400)));

        assert_eq!(trail.len(), 1);
        assert_eq!(trail.prune(), 1);
        assert!(trail.is_empty());
    }

    #[test]
    fn appending_prunes_expired_entries() {
        let trail = AuditTrail::with_retention_days(1);
        trail.append(entry("pyth", Duration::from_secs(3 * 86_400)));
        trail.append(entry("band", Duration::ZERO));

        assert_eq!(trail.len(), 1);
        assert_eq!(trail.all()[0].source_id.as_str(), "band");
    }

    #[test]
    fn entries_can_be_filtered_by_source() {
        let trail = AuditTrail::with_retention_days(30);
        trail.append(entry("pyth", Duration::ZERO));
        trail.append(entry("band", Duration::ZERO));
        trail.append(entry("pyth", Duration::ZERO));

        let pyth = SourceId::parse("pyth").expect("valid id");
        assert_eq!(trail.for_source(&pyth).len(), 2);
    }
}
