//! Fire-and-forget notifications for observers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{FeedId, SourceCategory, SourceId};

/// Everything the engine announces to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    SourceAdded {
        source_id: SourceId,
        category: SourceCategory,
    },
    SourceRemoved {
        source_id: SourceId,
    },
    FeedValidated {
        feed_id: FeedId,
        score: f64,
        is_valid: bool,
    },
    /// Published by wrappers that validate a whole protocol (for example an
    /// RWA issuer) on top of individual feeds.
    ProtocolValidated {
        protocol: String,
        score: f64,
        is_valid: bool,
    },
    DataVerified {
        source_id: SourceId,
        payload_hash: String,
        valid: bool,
        confidence: f64,
        cached: bool,
    },
    AnomalyDetected {
        feed_id: FeedId,
        score: f64,
        explanation: String,
    },
    MetricsReported {
        online: usize,
        degraded: usize,
        offline: usize,
        total_requests: u64,
    },
}

impl Event {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SourceAdded { .. } => "source_added",
            Self::SourceRemoved { .. } => "source_removed",
            Self::FeedValidated { .. } => "feed_validated",
            Self::ProtocolValidated { .. } => "protocol_validated",
            Self::DataVerified { .. } => "data_verified",
            Self::AnomalyDetected { .. } => "anomaly_detected",
            Self::MetricsReported { .. } => "metrics_reported",
        }
    }
}

/// Broadcast channel shared by the components of one engine instance.
///
/// Cloning yields another handle to the same channel. Publishing never
/// blocks and silently drops events when nobody is subscribed.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: Event) {
        tracing::trace!(event = event.name(), "publishing event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(Event::SourceRemoved {
            source_id: SourceId::parse("pyth").expect("valid id"),
        });

        let event = rx.recv().await.expect("event delivered");
        assert_eq!(event.name(), "source_removed");
    }

    #[test]
    fn emitting_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.emit(Event::ProtocolValidated {
            protocol: String::from("ondo"),
            score: 0.9,
            is_valid: true,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn events_serialize_with_snake_case_tag() {
        let event = Event::MetricsReported {
            online: 2,
            degraded: 0,
            offline: 1,
            total_requests: 10,
        };
        let json = serde_json::to_value(&event).expect("serializable");
        assert_eq!(json["event"], "metrics_reported");
    }
}
