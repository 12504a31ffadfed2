//! The feed validator: single-feed pipeline, cross-oracle consensus, and the
//! historical accuracy report.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use futures::future::join_all;
use trustgate_core::{CacheStore, Event, EventBus, FeedId, UtcDateTime};

use crate::anomaly::AnomalyDetector;
use crate::checks;
use crate::history::{numeric_values, HistoryStore};
use crate::source::ObservationSource;
use crate::statistics::{RollingStatsModel, StatisticalModel};
use crate::{
    AggregateValidationResult, AggregationMethod, CheckType, ConsensusInput, ConsensusParams,
    ConsensusResult, FeedConfig, FeedError, HistoricalAccuracyReport, OracleFeed,
    OracleObservation, RawObservation, ValidationResult, ValidatorConfig,
};

/// Points required inside the window for a historical accuracy report.
pub const MIN_HISTORICAL_POINTS: usize = 10;

/// Smoothing factor for feed reliability updates.
pub const RELIABILITY_EMA_ALPHA: f64 = 0.1;

#[derive(Debug, Clone, Copy)]
struct RecentConsensus {
    score: f64,
    at: Instant,
}

pub struct FeedValidator {
    config: ValidatorConfig,
    source: Arc<dyn ObservationSource>,
    feeds: RwLock<HashMap<FeedId, OracleFeed>>,
    history: HistoryStore,
    detectors: RwLock<HashMap<FeedId, Arc<dyn AnomalyDetector>>>,
    default_detector: Option<Arc<dyn AnomalyDetector>>,
    model: Arc<dyn StatisticalModel>,
    results: CacheStore<AggregateValidationResult>,
    recent_consensus: Mutex<HashMap<FeedId, RecentConsensus>>,
    events: EventBus,
}

impl FeedValidator {
    pub fn new(config: ValidatorConfig, source: Arc<dyn ObservationSource>) -> Self {
        let results = if config.enable_caching {
            CacheStore::new(config.cache_ttl())
        } else {
            CacheStore::disabled()
        };
        let model = Arc::new(RollingStatsModel::with_tolerance(config.max_deviation_percent));
        let history = HistoryStore::new(config.history_capacity);

        Self {
            config,
            source,
            feeds: RwLock::new(HashMap::new()),
            history,
            detectors: RwLock::new(HashMap::new()),
            default_detector: None,
            model,
            results,
            recent_consensus: Mutex::new(HashMap::new()),
            events: EventBus::default(),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_model(mut self, model: Arc<dyn StatisticalModel>) -> Self {
        self.model = model;
        self
    }

    /// Detector used for feeds without one of their own.
    pub fn with_default_detector(mut self, detector: Arc<dyn AnomalyDetector>) -> Self {
        self.default_detector = Some(detector);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub const fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn register_feed(&self, config: FeedConfig) -> Result<FeedId, FeedError> {
        let feed = config.validate()?;
        let feed_id = feed.id.clone();

        let mut feeds = self.feeds.write().expect("feed registry lock is not poisoned");
        if feeds.contains_key(&feed_id) {
            return Err(FeedError::Configuration(format!(
                "feed '{feed_id}' is already registered"
            )));
        }
        tracing::info!(
            feed_id = %feed_id,
            source_id = %feed.source_id,
            feed_type = %feed.feed_type,
            "registered feed"
        );
        feeds.insert(feed_id.clone(), feed);
        Ok(feed_id)
    }

    /// Forgets a feed together with its history, detector, and cached
    /// consensus score.
    pub fn deregister_feed(&self, feed_id: &FeedId) -> bool {
        let removed = self
            .feeds
            .write()
            .expect("feed registry lock is not poisoned")
            .remove(feed_id)
            .is_some();
        if removed {
            self.history.remove(feed_id);
            self.detectors
                .write()
                .expect("detector registry lock is not poisoned")
                .remove(feed_id);
            self.recent_consensus
                .lock()
                .expect("consensus cache lock is not poisoned")
                .remove(feed_id);
            tracing::info!(feed_id = %feed_id, "deregistered feed");
        }
        removed
    }

    /// Snapshot including the current reliability.
    pub fn feed(&self, feed_id: &FeedId) -> Option<OracleFeed> {
        self.feeds
            .read()
            .expect("feed registry lock is not poisoned")
            .get(feed_id)
            .cloned()
    }

    pub fn feed_ids(&self) -> Vec<FeedId> {
        let mut ids: Vec<_> = self
            .feeds
            .read()
            .expect("feed registry lock is not poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn set_anomaly_detector(&self, feed_id: FeedId, detector: Arc<dyn AnomalyDetector>) {
        self.detectors
            .write()
            .expect("detector registry lock is not poisoned")
            .insert(feed_id, detector);
    }

    pub fn history(&self, feed_id: &FeedId) -> Vec<OracleObservation> {
        self.history.snapshot(feed_id)
    }

    /// Loads previously stored observations, oldest first, without
    /// validating them.
    pub fn import_history(
        &self,
        feed_id: &FeedId,
        observations: impl IntoIterator<Item = OracleObservation>,
    ) -> Result<usize, FeedError> {
        self.require_feed(feed_id)?;
        let mut count = 0;
        for observation in observations {
            self.history.append(feed_id, observation);
            count += 1;
        }
        Ok(count)
    }

    /// Fetches the feed's latest observation and validates it. Repeated
    /// calls within the same wall-clock minute reuse the first result.
    pub async fn validate_feed(
        &self,
        feed_id: &FeedId,
    ) -> Result<AggregateValidationResult, FeedError> {
        let feed = self.require_feed(feed_id)?;
        let cache_key = format!("{feed_id}:{}", UtcDateTime::now().minute_bucket());

        if let Some(mut hit) = self.results.get(&cache_key).await {
            tracing::debug!(feed_id = %feed_id, "validation cache hit");
            hit.cached = true;
            return Ok(hit);
        }

        let raw = self.source.fetch_observation(&feed).await?;
        let result = self.run_pipeline(&feed, &raw).await;
        self.results.put(cache_key, result.clone(), None).await;
        Ok(result)
    }

    /// Validates an observation the caller already holds. Never cached.
    pub async fn validate_observation(
        &self,
        feed_id: &FeedId,
        raw: RawObservation,
    ) -> Result<AggregateValidationResult, FeedError> {
        let feed = self.require_feed(feed_id)?;
        Ok(self.run_pipeline(&feed, &raw).await)
    }

    /// Fetches one observation per feed and computes consensus over the
    /// ones that arrived. Failing participants are logged and excluded.
    pub async fn validate_cross_oracle(
        &self,
        feed_ids: &[FeedId],
        asset_key: &str,
    ) -> Result<ConsensusResult, FeedError> {
        let mut seen = HashSet::new();
        let feeds = feed_ids
            .iter()
            .filter(|feed_id| seen.insert(*feed_id))
            .map(|feed_id| self.require_feed(feed_id))
            .collect::<Result<Vec<_>, _>>()?;

        let fetched = join_all(feeds.iter().map(|feed| async move {
            (feed, self.source.fetch_observation(feed).await)
        }))
        .await;

        let mut inputs = Vec::with_capacity(fetched.len());
        let mut participants = Vec::with_capacity(fetched.len());
        let mut excluded = Vec::new();
        for (feed, outcome) in fetched {
            let raw = match outcome {
                Ok(raw) => raw,
                Err(error) => {
                    tracing::warn!(
                        feed_id = %feed.id,
                        asset_key,
                        code = error.code(),
                        %error,
                        "consensus participant failed"
                    );
                    excluded.push(feed.id.to_string());
                    continue;
                }
            };

            let input = raw
                .promote(feed.feed_type)
                .and_then(|observation| ConsensusInput::from_observation(feed.id.as_str(), &observation));
            match input {
                Some(input) => {
                    inputs.push(input);
                    participants.push(feed.id.clone());
                }
                None => {
                    tracing::warn!(
                        feed_id = %feed.id,
                        asset_key,
                        "consensus participant reported no usable numeric value"
                    );
                    excluded.push(feed.id.to_string());
                }
            }
        }

        let params = self.consensus_params(&feeds);
        let mut result = crate::consensus::compute_consensus(&inputs, &params)?;
        result.asset_key = Some(asset_key.to_owned());
        result.excluded = excluded;

        {
            let mut recent = self
                .recent_consensus
                .lock()
                .expect("consensus cache lock is not poisoned");
            let at = Instant::now();
            for feed_id in participants {
                recent.insert(
                    feed_id,
                    RecentConsensus {
                        score: result.score,
                        at,
                    },
                );
            }
        }

        tracing::info!(
            asset_key,
            participants = result.participant_count,
            excluded = result.excluded.len(),
            outliers = result.outliers.len(),
            score = result.score,
            is_valid = result.is_valid,
            "computed cross-oracle consensus"
        );
        Ok(result)
    }

    /// Consensus over a batch the caller already holds, with the validator's
    /// thresholds.
    pub fn compute_consensus(&self, inputs: &[ConsensusInput]) -> Result<ConsensusResult, FeedError> {
        crate::consensus::compute_consensus(inputs, &self.consensus_params(&[]))
    }

    /// Scores stored history within the last `days` days (`0` means the
    /// feed's window, or the validator default).
    pub fn validate_historical_accuracy(
        &self,
        feed_id: &FeedId,
        days: u32,
    ) -> Result<HistoricalAccuracyReport, FeedError> {
        let feed = self.require_feed(feed_id)?;
        let window_days = if days == 0 {
            feed.settings
                .historical_window_days
                .unwrap_or(self.config.historical_window_days)
        } else {
            days
        };

        let cutoff = UtcDateTime::now() - Duration::from_secs(u64::from(window_days) * 86_400);
        let points = self.history.since(feed_id, cutoff);
        if points.len() < MIN_HISTORICAL_POINTS {
            return Err(FeedError::InsufficientData {
                required: MIN_HISTORICAL_POINTS,
                available: points.len(),
            });
        }

        let stats = self.model.evaluate(&feed, &points);
        Ok(HistoricalAccuracyReport {
            feed_id: feed.id,
            window_days,
            points: points.len(),
            accuracy: stats.accuracy,
            reliability: stats.reliability,
            consistency: stats.consistency,
            trend: stats.trend,
            anomalies: stats.anomalies,
            generated_at: UtcDateTime::now(),
        })
    }

    async fn run_pipeline(&self, feed: &OracleFeed, raw: &RawObservation) -> AggregateValidationResult {
        let now = UtcDateTime::now();
        let observation = raw.promote(feed.feed_type);
        let prior = self.history.snapshot(&feed.id);
        let prior_values = numeric_values(&prior);
        let value = observation.as_ref().and_then(|o| o.value.as_f64());

        let format = checks::format::check(raw, feed.feed_type);
        let freshness = checks::freshness::check(
            raw.parsed_timestamp(),
            feed.update_frequency(),
            now,
            self.config.future_skew(),
        );
        let range = checks::range::check(value, feed.feed_type, feed.bounds(), &prior_values);
        let historical = checks::historical::check(value, &prior_values);
        let consensus = self.consensus_check(&feed.id);
        let detector = self.detector_for(&feed.id);
        let (anomaly, verdict) =
            checks::anomaly::check(detector.as_deref(), observation.as_ref(), &prior).await;

        let aggregate = AggregateValidationResult::combine(
            feed.id.clone(),
            observation.clone(),
            vec![format, freshness, range, consensus, historical, anomaly],
            self.config.accuracy_threshold,
        );

        if let Some(observation) = observation {
            self.history.append(&feed.id, observation);
        }
        let reliability = self.update_reliability(&feed.id, aggregate.score);

        if let Some(verdict) = verdict.filter(|verdict| verdict.is_anomaly) {
            tracing::warn!(
                feed_id = %feed.id,
                score = verdict.score,
                explanation = %verdict.explanation,
                "anomaly detected"
            );
            self.events.emit(Event::AnomalyDetected {
                feed_id: feed.id.clone(),
                score: verdict.score,
                explanation: verdict.explanation,
            });
        }

        self.events.emit(Event::FeedValidated {
            feed_id: feed.id.clone(),
            score: aggregate.score,
            is_valid: aggregate.is_valid,
        });
        tracing::info!(
            feed_id = %feed.id,
            score = aggregate.score,
            is_valid = aggregate.is_valid,
            errors = aggregate.errors.len(),
            reliability,
            "validated feed observation"
        );
        aggregate
    }

    fn consensus_check(&self, feed_id: &FeedId) -> ValidationResult {
        let recent = self
            .recent_consensus
            .lock()
            .expect("consensus cache lock is not poisoned")
            .get(feed_id)
            .copied();

        match recent {
            Some(recent) if recent.at.elapsed() <= self.config.consensus_reuse() => {
                let mut result = ValidationResult::new(CheckType::Consensus).with_score(recent.score);
                if recent.score < self.config.consensus_threshold {
                    result.push_warning(format!(
                        "latest cross-oracle consensus scored {:.3}",
                        recent.score
                    ));
                }
                result
            }
            _ => ValidationResult::skipped(CheckType::Consensus),
        }
    }

    fn consensus_params(&self, feeds: &[OracleFeed]) -> ConsensusParams {
        let min_participants = feeds
            .iter()
            .map(|feed| feed.settings.min_sources)
            .fold(self.config.min_consensus_size, usize::max);
        let max_deviation_percent = feeds
            .iter()
            .filter_map(|feed| feed.settings.max_deviation_percent)
            .reduce(f64::min)
            .unwrap_or(self.config.max_deviation_percent);
        let method = if !feeds.is_empty()
            && feeds
                .iter()
                .all(|feed| feed.settings.aggregation == AggregationMethod::Mean)
        {
            AggregationMethod::Mean
        } else {
            AggregationMethod::Median
        };

        ConsensusParams {
            max_deviation_percent,
            accuracy_threshold: self.config.accuracy_threshold,
            consensus_threshold: self.config.consensus_threshold,
            min_participants,
            method,
        }
    }

    fn detector_for(&self, feed_id: &FeedId) -> Option<Arc<dyn AnomalyDetector>> {
        self.detectors
            .read()
            .expect("detector registry lock is not poisoned")
            .get(feed_id)
            .cloned()
            .or_else(|| self.default_detector.clone())
    }

    fn update_reliability(&self, feed_id: &FeedId, score: f64) -> f64 {
        let mut feeds = self.feeds.write().expect("feed registry lock is not poisoned");
        match feeds.get_mut(feed_id) {
            Some(feed) => {
                feed.reliability = (1.0 - RELIABILITY_EMA_ALPHA) * feed.reliability
                    + RELIABILITY_EMA_ALPHA * score;
                feed.reliability
            }
            None => score,
        }
    }

    fn require_feed(&self, feed_id: &FeedId) -> Result<OracleFeed, FeedError> {
        self.feed(feed_id)
            .ok_or_else(|| FeedError::not_found(feed_id.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::{json, Map};
    use trustgate_core::{AccessError, SourceId};

    use super::*;
    use crate::source::ObservationFuture;
    use crate::{FeedType, Severity, ZScoreDetector};

    #[derive(Default)]
    struct FixedSource {
        observations: Mutex<HashMap<SourceId, RawObservation>>,
        calls: AtomicUsize,
    }

    impl FixedSource {
        fn set(&self, source: &str, value: f64, age_secs: u64) {
            let source_id = SourceId::parse(source).expect("valid id");
            let raw = RawObservation::new(source_id.clone())
                .with_value(value)
                .with_timestamp(UtcDateTime::now() - Duration::from_secs(age_secs))
                .with_metadata(Map::new());
            self.observations
                .lock()
                .expect("fixture lock")
                .insert(source_id, raw);
        }
    }

    impl ObservationSource for FixedSource {
        fn fetch_observation<'a>(&'a self, feed: &'a OracleFeed) -> ObservationFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.observations
                    .lock()
                    .expect("fixture lock")
                    .get(&feed.source_id)
                    .cloned()
                    .ok_or_else(|| FeedError::from(AccessError::not_found(feed.source_id.as_str())))
            })
        }
    }

    fn validator() -> (FeedValidator, Arc<FixedSource>) {
        let source = Arc::new(FixedSource::default());
        let validator = FeedValidator::new(ValidatorConfig::default(), source.clone());
        (validator, source)
    }

    fn price_feed(validator: &FeedValidator, id: &str, source: &str) -> FeedId {
        validator
            .register_feed(FeedConfig::new(id, source, FeedType::Price, 60))
            .expect("registered")
    }

    fn fresh(source: &str, value: f64) -> RawObservation {
        RawObservation::new(SourceId::parse(source).expect("valid id"))
            .with_value(value)
            .with_timestamp(UtcDateTime::now())
            .with_metadata(Map::new())
    }

    #[tokio::test]
    async fn fresh_observation_is_valid_and_recorded() {
        let (validator, source) = validator();
        let feed_id = price_feed(&validator, "eth_usd", "pyth");
        source.set("pyth", 3_000.0, 0);

        let result = validator.validate_feed(&feed_id).await.expect("validated");

        assert!(result.is_valid, "unexpected errors: {:?}", result.errors);
        assert!(result.score >= 0.95);
        assert_eq!(validator.history(&feed_id).len(), 1);
    }

    #[tokio::test]
    async fn stale_observation_fails_with_stale_data() {
        let (validator, source) = validator();
        let feed_id = price_feed(&validator, "btc_usd", "pyth");
        source.set("pyth", 64_000.0, 200);

        let result = validator.validate_feed(&feed_id).await.expect("validated");

        assert!(!result.is_valid);
        assert!(result.has_error("STALE_DATA"));
        assert_eq!(result.check(CheckType::Freshness).map(|c| c.score), Some(0.0));
    }

    #[tokio::test]
    async fn validate_feed_reuses_results_within_the_minute() {
        let (validator, source) = validator();
        let feed_id = price_feed(&validator, "eth_usd", "pyth");
        source.set("pyth", 3_000.0, 0);

        let first = validator.validate_feed(&feed_id).await.expect("first");
        let second = validator.validate_feed(&feed_id).await.expect("second");

        if first.validated_at.minute_bucket() == second.validated_at.minute_bucket() {
            assert!(second.cached);
            assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        }
        assert!(!first.cached);
    }

    #[tokio::test]
    async fn malformed_observation_is_not_added_to_history() {
        let (validator, _) = validator();
        let feed_id = price_feed(&validator, "eth_usd", "pyth");
        let raw = RawObservation::new(SourceId::parse("pyth").expect("valid id"))
            .with_value("not a number")
            .with_raw_timestamp(json!("later"));

        let result = validator
            .validate_observation(&feed_id, raw)
            .await
            .expect("validated");

        assert!(!result.is_valid);
        assert!(result.has_error("NON_NUMERIC_VALUE"));
        assert!(result.has_error("INVALID_TIMESTAMP"));
        assert!(validator.history(&feed_id).is_empty());
    }

    #[tokio::test]
    async fn unknown_feed_is_not_found() {
        let (validator, _) = validator();
        let err = validator
            .validate_feed(&FeedId::parse("ghost").expect("valid id"))
            .await
            .expect_err("unknown feed");
        assert_eq!(err.code(), "feed.not_found");
    }

    #[tokio::test]
    async fn reliability_moves_toward_the_score() {
        let (validator, source) = validator();
        let feed_id = validator
            .register_feed(
                FeedConfig::new("btc_usd", "pyth", FeedType::Price, 60).with_reliability(0.95),
            )
            .expect("registered");
        source.set("pyth", 64_000.0, 200);

        let result = validator.validate_feed(&feed_id).await.expect("validated");
        let reliability = validator.feed(&feed_id).expect("registered").reliability;

        let expected = 0.9 * 0.95 + 0.1 * result.score;
        assert!((reliability - expected).abs() < 1e-9);
        assert!(reliability < 0.95);
    }

    #[tokio::test]
    async fn cross_oracle_flags_the_far_participant_and_excludes_failures() {
        let (validator, source) = validator();
        let feeds = vec![
            price_feed(&validator, "btc_chainlink", "chainlink"),
            price_feed(&validator, "btc_pyth", "pyth"),
            price_feed(&validator, "btc_band", "band"),
            price_feed(&validator, "btc_dia", "dia"),
        ];
        source.set("chainlink", 100.0, 0);
        source.set("pyth", 101.0, 0);
        source.set("band", 250.0, 0);

        let result = validator
            .validate_cross_oracle(&feeds, "BTC/USD")
            .await
            .expect("three participants");

        assert_eq!(result.participant_count, 3);
        assert_eq!(result.excluded, vec![String::from("btc_dia")]);
        assert_eq!(result.consensus_value, 101.0);
        let critical: Vec<_> = result.critical_outliers().collect();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].participant, "btc_band");
        assert_eq!(critical[0].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn cross_oracle_needs_enough_participants() {
        let (validator, source) = validator();
        let feeds = vec![
            price_feed(&validator, "a_feed", "a"),
            price_feed(&validator, "b_feed", "b"),
            price_feed(&validator, "c_feed", "c"),
        ];
        source.set("a", 1.0, 0);
        source.set("b", 1.0, 0);

        let err = validator
            .validate_cross_oracle(&feeds, "X")
            .await
            .expect_err("one participant missing");
        assert_eq!(
            err,
            FeedError::InsufficientSources {
                required: 3,
                available: 2
            }
        );
    }

    #[tokio::test]
    async fn recent_consensus_feeds_the_consensus_axis() {
        let (validator, source) = validator();
        let feeds = vec![
            price_feed(&validator, "a_feed", "a"),
            price_feed(&validator, "b_feed", "b"),
            price_feed(&validator, "c_feed", "c"),
        ];
        source.set("a", 100.0, 0);
        source.set("b", 101.0, 0);
        source.set("c", 250.0, 0);
        validator
            .validate_cross_oracle(&feeds, "X")
            .await
            .expect("consensus");

        let result = validator
            .validate_observation(&feeds[0], fresh("a", 100.0))
            .await
            .expect("validated");
        let consensus = result.check(CheckType::Consensus).expect("present");

        assert!(!consensus.skipped);
        assert_eq!(consensus.score, 0.0);
        assert_eq!(consensus.warnings.len(), 1);
    }

    #[tokio::test]
    async fn detector_flags_spikes_and_announces_them() {
        let (validator, _) = validator();
        let feed_id = price_feed(&validator, "eth_usd", "pyth");
        validator.set_anomaly_detector(feed_id.clone(), Arc::new(ZScoreDetector::default()));
        let mut events = validator.events().subscribe();

        for offset in 0..12 {
            validator
                .validate_observation(&feed_id, fresh("pyth", 100.0 + f64::from(offset % 2)))
                .await
                .expect("validated");
        }
        let result = validator
            .validate_observation(&feed_id, fresh("pyth", 104.0))
            .await
            .expect("validated");

        let anomaly = result.check(CheckType::Anomaly).expect("present");
        assert!(anomaly.score < 1.0);

        let mut saw_anomaly = false;
        while let Ok(event) = events.try_recv() {
            saw_anomaly |= event.name() == "anomaly_detected";
        }
        assert!(saw_anomaly);
    }

    #[tokio::test]
    async fn historical_report_requires_ten_points() {
        let (validator, _) = validator();
        let feed_id = price_feed(&validator, "eth_usd", "pyth");
        let source = SourceId::parse("pyth").expect("valid id");
        let now = UtcDateTime::now();

        validator
            .import_history(
                &feed_id,
                (0..9).map(|i| OracleObservation::numeric(source.clone(), 100.0, now - Duration::from_secs(60 * (9 - i)))),
            )
            .expect("imported");
        let err = validator
            .validate_historical_accuracy(&feed_id, 7)
            .expect_err("nine points");
        assert!(matches!(err, FeedError::InsufficientData { available: 9, .. }));

        validator
            .import_history(&feed_id, [OracleObservation::numeric(source, 100.0, now)])
            .expect("imported");
        let report = validator
            .validate_historical_accuracy(&feed_id, 7)
            .expect("ten points");
        assert_eq!(report.points, 10);
        assert_eq!(report.accuracy, 1.0);
    }
}
