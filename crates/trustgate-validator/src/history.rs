//! Bounded per-feed observation history.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use trustgate_core::{FeedId, UtcDateTime};

use crate::OracleObservation;

pub const HISTORY_CAPACITY: usize = 1_000;

type FeedHistory = Arc<Mutex<VecDeque<OracleObservation>>>;

/// Append-only history with FIFO eviction. Each feed has its own lock, so
/// writers for different feeds never contend.
#[derive(Debug)]
pub struct HistoryStore {
    capacity: usize,
    feeds: RwLock<HashMap<FeedId, FeedHistory>>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            feeds: RwLock::new(HashMap::new()),
        }
    }

    pub fn append(&self, feed_id: &FeedId, observation: OracleObservation) {
        let history = self.feed(feed_id);
        let mut history = history.lock().expect("feed history lock is not poisoned");
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(observation);
    }

    /// Oldest first.
    pub fn snapshot(&self, feed_id: &FeedId) -> Vec<OracleObservation> {
        self.existing(feed_id)
            .map(|history| {
                history
                    .lock()
                    .expect("feed history lock is not poisoned")
                    .iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Observations stamped at or after `cutoff`, oldest first.
    pub fn since(&self, feed_id: &FeedId, cutoff: UtcDateTime) -> Vec<OracleObservation> {
        self.snapshot(feed_id)
            .into_iter()
            .filter(|observation| observation.timestamp >= cutoff)
            .collect()
    }

    pub fn len(&self, feed_id: &FeedId) -> usize {
        self.existing(feed_id)
            .map(|history| {
                history
                    .lock()
                    .expect("feed history lock is not poisoned")
                    .len()
            })
            .unwrap_or(0)
    }

    pub fn remove(&self, feed_id: &FeedId) {
        self.feeds
            .write()
            .expect("history registry lock is not poisoned")
            .remove(feed_id);
    }

    fn existing(&self, feed_id: &FeedId) -> Option<FeedHistory> {
        self.feeds
            .read()
            .expect("history registry lock is not poisoned")
            .get(feed_id)
            .cloned()
    }

    fn feed(&self, feed_id: &FeedId) -> FeedHistory {
        if let Some(history) = self.existing(feed_id) {
            return history;
        }
        let mut feeds = self
            .feeds
            .write()
            .expect("history registry lock is not poisoned");
        Arc::clone(
            feeds
                .entry(feed_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new()))),
        )
    }
}

/// Numeric values of `observations`, in order.
pub fn numeric_values(observations: &[OracleObservation]) -> Vec<f64> {
    observations
        .iter()
        .filter_map(|observation| observation.value.as_f64())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use trustgate_core::SourceId;

    use super::*;

    fn observation(value: f64, age_secs: u64) -> OracleObservation {
        OracleObservation::numeric(
            SourceId::parse("pyth").expect("valid id"),
            value,
            UtcDateTime::now() - Duration::from_secs(age_secs),
        )
    }

    #[test]
    fn oldest_entries_are_evicted_at_capacity() {
        let store = HistoryStore::new(3);
        let feed = FeedId::parse("eth_usd").expect("valid id");
        for value in 1..=5 {
            store.append(&feed, observation(f64::from(value), 0));
        }

        let values = numeric_values(&store.snapshot(&feed));
        assert_eq!(values, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn since_filters_by_timestamp() {
        let store = HistoryStore::default();
        let feed = FeedId::parse("eth_usd").expect("valid id");
        store.append(&feed, observation(1.0, 3_600));
        store.append(&feed, observation(2.0, 10));

        let recent = store.since(&feed, UtcDateTime::now() - Duration::from_secs(60));
        assert_eq!(numeric_values(&recent), vec![2.0]);
        assert_eq!(store.len(&feed), 2);
    }

    #[test]
    fn unknown_feeds_have_empty_history() {
        let store = HistoryStore::default();
        let feed = FeedId::parse("ghost").expect("valid id");
        assert!(store.snapshot(&feed).is_empty());
        assert_eq!(store.len(&feed), 0);
    }
}
