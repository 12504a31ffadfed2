//! Behaviour tests for feed validation on top of the access manager.

use std::sync::Arc;
use std::time::Duration;

use trustgate_core::{Event, EventBus, FeedId, SourceAccessManager};
use trustgate_tests::{manager, oracle_source, price_record, ScriptedConnector};
use trustgate_validator::{
    CheckType, ConsensusInput, FeedConfig, FeedType, FeedValidator, Severity, ValidatorConfig,
};

fn validator(manager: &Arc<SourceAccessManager>) -> FeedValidator {
    FeedValidator::new(ValidatorConfig::default(), manager.clone())
}

/// Registers a scripted source and a one-minute price feed on top of it.
fn price_feed(
    connector: &ScriptedConnector,
    manager: &SourceAccessManager,
    validator: &FeedValidator,
    feed: &str,
    source: &str,
    value: f64,
) -> FeedId {
    connector.set_payload(source, price_record(value, Duration::ZERO));
    manager.register(oracle_source(source)).expect("source registered");
    validator
        .register_feed(FeedConfig::new(feed, source, FeedType::Price, 60))
        .expect("feed registered")
}

// =============================================================================
// Single-feed validation
// =============================================================================

#[tokio::test]
async fn when_a_btc_feed_reports_a_200_second_old_price_it_is_rejected_as_stale() {
    // Given: A one-minute BTC feed with reliability 0.95 whose source lags 200s
    let connector = ScriptedConnector::new();
    connector.set_payload("pyth", price_record(64_000.0, Duration::from_secs(200)));
    let manager = manager(&connector);
    manager.register(oracle_source("pyth")).expect("source registered");
    let validator = validator(&manager);
    let btc_usd = validator
        .register_feed(FeedConfig::new("btc_usd", "pyth", FeedType::Price, 60).with_reliability(0.95))
        .expect("feed registered");

    // When: The feed is validated
    let result = validator.validate_feed(&btc_usd).await.expect("validated");

    // Then: It is invalid because of stale data
    assert!(!result.is_valid);
    assert!(result.has_error("STALE_DATA"));
    let stale = result
        .errors
        .iter()
        .find(|issue| issue.code == "STALE_DATA")
        .expect("stale issue");
    assert_eq!(stale.severity, Severity::Major);

    // And: Reliability moved a tenth of the way toward the low score
    let reliability = validator.feed(&btc_usd).expect("registered").reliability;
    assert!((reliability - (0.9 * 0.95 + 0.1 * result.score)).abs() < 1e-9);
    assert!(reliability < 0.95);
}

#[tokio::test]
async fn when_a_fresh_price_arrives_it_is_valid_and_observers_hear_about_it() {
    // Given: A validator publishing on a shared bus
    let connector = ScriptedConnector::new();
    let manager = manager(&connector);
    let events = EventBus::new(16);
    let mut subscriber = events.subscribe();
    let validator = validator(&manager).with_events(events);
    let eth_usd = price_feed(&connector, &manager, &validator, "eth_usd", "chainlink", 3_000.0);

    // When: The feed is validated
    let result = validator.validate_feed(&eth_usd).await.expect("validated");

    // Then: Every check passes and a feed_validated event is published
    assert!(result.is_valid, "unexpected errors: {:?}", result.errors);
    assert_eq!(result.checks.len(), CheckType::ALL.len());
    match subscriber.try_recv().expect("event published") {
        Event::FeedValidated { feed_id, is_valid, .. } => {
            assert_eq!(feed_id, eth_usd);
            assert!(is_valid);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn when_the_source_is_down_validation_surfaces_the_access_error() {
    // Given: A feed whose source is failing
    let connector = ScriptedConnector::new();
    let manager = manager(&connector);
    let validator = validator(&manager);
    let feed = price_feed(&connector, &manager, &validator, "sol_usd", "band", 150.0);
    connector.set_failing("band", true);

    // When: The feed is validated
    let err = validator.validate_feed(&feed).await.expect_err("source down");

    // Then: The access failure propagates and is retryable
    assert_eq!(err.code(), "access.execution");
    assert!(err.retryable());
}

// =============================================================================
// Cross-oracle consensus
// =============================================================================

#[tokio::test]
async fn when_one_oracle_reports_250_against_100_and_101_it_is_the_only_critical_outlier() {
    // Given: Three oracles describing the same asset
    let connector = ScriptedConnector::new();
    let manager = manager(&connector);
    let validator = validator(&manager);
    let feeds = vec![
        price_feed(&connector, &manager, &validator, "btc_chainlink", "chainlink", 100.0),
        price_feed(&connector, &manager, &validator, "btc_pyth", "pyth", 101.0),
        price_feed(&connector, &manager, &validator, "btc_band", "band", 250.0),
    ];

    // When: Consensus is computed across them
    let result = validator
        .validate_cross_oracle(&feeds, "BTC/USD")
        .await
        .expect("enough participants");

    // Then: The median is 101 and only the 250 reading is critical
    assert_eq!(result.consensus_value, 101.0);
    let critical: Vec<_> = result.critical_outliers().collect();
    assert_eq!(critical.len(), 1);
    assert_eq!(critical[0].participant, "btc_band");
    assert!(!result.is_valid);
    assert_eq!(result.asset_key.as_deref(), Some("BTC/USD"));
}

#[tokio::test]
async fn when_one_oracle_is_unreachable_consensus_proceeds_without_it() {
    // Given: Four oracles, one of which is down
    let connector = ScriptedConnector::new();
    let manager = manager(&connector);
    let validator = validator(&manager);
    let feeds = vec![
        price_feed(&connector, &manager, &validator, "eth_a", "a", 3_000.0),
        price_feed(&connector, &manager, &validator, "eth_b", "b", 3_001.0),
        price_feed(&connector, &manager, &validator, "eth_c", "c", 2_999.0),
        price_feed(&connector, &manager, &validator, "eth_d", "d", 3_000.0),
    ];
    connector.set_failing("d", true);

    // When: Consensus is computed
    let result = validator
        .validate_cross_oracle(&feeds, "ETH/USD")
        .await
        .expect("three participants remain");

    // Then: The unreachable oracle is excluded and the rest agree
    assert_eq!(result.participant_count, 3);
    assert_eq!(result.excluded, vec![String::from("eth_d")]);
    assert!(result.outliers.is_empty());
    assert!(result.is_valid);
}

#[tokio::test]
async fn when_a_batch_is_tightly_clustered_it_has_no_critical_outliers() {
    // Given: A batch of readings within a few basis points of each other
    let connector = ScriptedConnector::new();
    let validator = validator(&manager(&connector));
    let inputs: Vec<_> = [100.0, 100.1, 99.9, 100.05, 99.95]
        .iter()
        .enumerate()
        .map(|(index, value)| ConsensusInput::new(format!("oracle-{index}"), *value))
        .collect();

    // When: Consensus is computed over the batch the caller already holds
    let result = validator.compute_consensus(&inputs).expect("five participants");

    // Then: Nothing is critical and the score clears the accuracy threshold
    assert_eq!(result.critical_outliers().count(), 0);
    assert!(result.score >= validator.config().accuracy_threshold);
    assert!(result.is_valid);
}

#[tokio::test]
async fn when_fewer_oracles_answer_than_required_consensus_is_refused() {
    // Given: Two feeds against a minimum of three
    let connector = ScriptedConnector::new();
    let manager = manager(&connector);
    let validator = validator(&manager);
    let feeds = vec![
        price_feed(&connector, &manager, &validator, "x_a", "a", 1.0),
        price_feed(&connector, &manager, &validator, "x_b", "b", 1.0),
    ];

    // When: Consensus is requested
    let err = validator
        .validate_cross_oracle(&feeds, "X")
        .await
        .expect_err("too few participants");

    // Then: The error says how many were needed
    assert_eq!(err.code(), "feed.insufficient_sources");
}
