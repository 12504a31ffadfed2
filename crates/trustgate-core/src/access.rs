//! Source access manager: registration, gated fetches, failover, and health.
//!
//! Every registered source gets its own pool, breaker, limiter, optional
//! cache, and health record. No state is shared across sources, so a slow
//! or failing provider never holds up calls to the others.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backoff::Backoff;
use crate::connector::{FetchResult, Query, SourceConnector};
use crate::events::{Event, EventBus};
use crate::health::{HealthRecord, HealthState, HealthStatus};
use crate::pool::{ConnectionPool, PoolStats};
use crate::throttling::Throttle;
use crate::{
    AccessConfig, AccessError, CacheMode, CacheStore, CircuitBreaker, CircuitSnapshot,
    CircuitState, ConnectorError, Payload, Source, SourceConfig, SourceId, UtcDateTime,
};

/// First wait in [`SourceAccessManager::fetch_with_retry`].
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);
/// Longest single wait between retries.
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// Successful failover call.
#[derive(Debug, Clone)]
pub struct FailoverSuccess {
    pub result: FetchResult,
    pub selected_source: SourceId,
    pub source_chain: Vec<SourceId>,
    pub warnings: Vec<String>,
    pub errors: Vec<AccessError>,
    pub latency_ms: u64,
}

/// Connectivity outcome for one source after [`SourceAccessManager::refresh_all`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub source_id: SourceId,
    pub ok: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// Fleet-wide health counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AccessMetrics {
    pub online: usize,
    pub degraded: usize,
    pub offline: usize,
    pub total_requests: u64,
    pub cache_hits: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RateMode {
    Reject,
    Wait,
}

struct SourceSlot {
    source: Arc<Source>,
    pool: Arc<ConnectionPool>,
    breaker: CircuitBreaker,
    throttle: Throttle,
    cache: Option<CacheStore<FetchResult>>,
    health: Mutex<HealthRecord>,
}

impl SourceSlot {
    fn new(source: Source, connector: Arc<dyn SourceConnector>, poll: Backoff) -> Self {
        let settings = &source.settings;
        let cache = settings.caching.enabled.then(|| {
            if settings.caching.max_size > 0 {
                CacheStore::bounded(
                    settings.caching.ttl(),
                    settings.caching.max_size,
                    settings.caching.strategy,
                )
            } else {
                CacheStore::new(settings.caching.ttl())
            }
        });
        let breaker = CircuitBreaker::new(settings.circuit_breaker);
        let throttle = Throttle::new(settings.rate_limit.window(), settings.rate_limit.requests);
        let health = Mutex::new(HealthRecord::new(source.latency_ms));
        let max_connections = settings.max_concurrent_connections;

        let source = Arc::new(source);
        let pool = Arc::new(ConnectionPool::new(
            Arc::clone(&source),
            connector,
            max_connections,
            poll,
        ));

        Self {
            source,
            pool,
            breaker,
            throttle,
            cache,
            health,
        }
    }

    async fn execute(&self, query: &Query) -> Result<Payload, ConnectorError> {
        let mut connection = self.pool.acquire().await?;
        connection.execute(query).await
    }

    async fn ping(&self) -> Result<(), ConnectorError> {
        let mut connection = self.pool.acquire().await?;
        connection.ping().await
    }

    fn health(&self) -> MutexGuard<'_, HealthRecord> {
        self.health
            .lock()
            .expect("source health lock is not poisoned")
    }

    fn status(&self) -> HealthStatus {
        let circuit = self.breaker.state();
        self.health().status(self.source.id.clone(), circuit)
    }
}

/// Owns every registered source and mediates all calls to them.
pub struct SourceAccessManager {
    config: AccessConfig,
    connector: Arc<dyn SourceConnector>,
    slots: RwLock<HashMap<SourceId, Arc<SourceSlot>>>,
    events: EventBus,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SourceAccessManager {
    /// `connector` is used for every source registered through
    /// [`register`](Self::register).
    pub fn new(config: AccessConfig, connector: Arc<dyn SourceConnector>) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            config,
            connector,
            slots: RwLock::new(HashMap::new()),
            events,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Publishes on an existing bus instead of a private one.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub const fn config(&self) -> &AccessConfig {
        &self.config
    }

    pub fn register(&self, config: SourceConfig) -> Result<SourceId, AccessError> {
        self.register_with_connector(config, Arc::clone(&self.connector))
    }

    /// Registers a source that talks through its own connector.
    pub fn register_with_connector(
        &self,
        config: SourceConfig,
        connector: Arc<dyn SourceConnector>,
    ) -> Result<SourceId, AccessError> {
        let source = config.validate()?;
        let source_id = source.id.clone();
        let category = source.category;

        {
            let mut slots = self.write_slots();
            if slots.contains_key(&source_id) {
                return Err(AccessError::Configuration(format!(
                    "source '{source_id}' is already registered"
                )));
            }
            let poll = Backoff::fixed(self.config.pool_poll_interval());
            slots.insert(
                source_id.clone(),
                Arc::new(SourceSlot::new(source, connector, poll)),
            );
        }

        tracing::info!(source_id = %source_id, %category, "registered source");
        self.events.emit(Event::SourceAdded {
            source_id: source_id.clone(),
            category,
        });
        Ok(source_id)
    }

    /// Removes a source and tears down its pool and cache. Returns whether
    /// anything was registered under `source_id`.
    pub async fn deregister(&self, source_id: &SourceId) -> bool {
        let removed = self.write_slots().remove(source_id);
        let Some(slot) = removed else {
            return false;
        };

        slot.pool.close().await;
        if let Some(cache) = &slot.cache {
            cache.clear().await;
        }

        tracing::info!(source_id = %source_id, "deregistered source");
        self.events.emit(Event::SourceRemoved {
            source_id: source_id.clone(),
        });
        true
    }

    /// Fetches through the breaker, limiter, and cache of one source.
    pub async fn fetch(&self, source_id: &SourceId, query: &Query) -> Result<FetchResult, AccessError> {
        self.fetch_gated(source_id, query, RateMode::Reject).await
    }

    /// Like [`fetch`](Self::fetch) but waits out the rate-limit window
    /// instead of failing with `RateLimited`. Meant for bulk clients.
    pub async fn fetch_waiting(
        &self,
        source_id: &SourceId,
        query: &Query,
    ) -> Result<FetchResult, AccessError> {
        self.fetch_gated(source_id, query, RateMode::Wait).await
    }

    /// Fails with `Timeout` if the whole fetch, including any wait for a
    /// pooled connection, takes longer than `deadline`.
    pub async fn fetch_with_deadline(
        &self,
        source_id: &SourceId,
        query: &Query,
        deadline: Duration,
    ) -> Result<FetchResult, AccessError> {
        tokio::time::timeout(deadline, self.fetch(source_id, query))
            .await
            .map_err(|_| AccessError::Timeout {
                source_id: source_id.clone(),
                timeout_ms: duration_ms(deadline),
            })?
    }

    /// Retries retryable failures up to the source's `retries` budget with
    /// jittered exponential backoff. A breaker or limiter asking for a longer
    /// wait than [`RETRY_MAX_DELAY`] ends the attempts early.
    pub async fn fetch_with_retry(
        &self,
        source_id: &SourceId,
        query: &Query,
    ) -> Result<FetchResult, AccessError> {
        let retries = self.slot(source_id)?.source.settings.retries;
        let backoff = Backoff::retry(RETRY_BASE_DELAY, RETRY_MAX_DELAY);

        let mut attempt = 0;
        loop {
            let error = match self.fetch(source_id, query).await {
                Ok(result) => return Ok(result),
                Err(error) => error,
            };
            let hint = Duration::from_millis(error.retry_after_ms().unwrap_or(0));
            if attempt >= retries || !error.retryable() || hint > RETRY_MAX_DELAY {
                return Err(error);
            }

            let delay = backoff.delay(attempt).max(hint);
            tracing::debug!(
                source_id = %source_id,
                attempt = attempt + 1,
                delay_ms = duration_ms(delay),
                code = error.code(),
                "retrying fetch"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Tries each source in order and returns the first success.
    pub async fn fetch_with_failover(
        &self,
        query: &Query,
        source_ids: &[SourceId],
    ) -> Result<FailoverSuccess, AccessError> {
        let started = Instant::now();
        let chain = dedupe_chain(source_ids);
        let mut source_chain = Vec::with_capacity(chain.len());
        let mut errors: Vec<AccessError> = Vec::new();

        for source_id in chain {
            source_chain.push(source_id.clone());
            match self.fetch(&source_id, query).await {
                Ok(result) => {
                    let mut warnings = Vec::new();
                    if !errors.is_empty() {
                        warnings.push(format!(
                            "source failover succeeded with '{source_id}' after {} failed attempt(s)",
                            errors.len()
                        ));
                    }
                    return Ok(FailoverSuccess {
                        result,
                        selected_source: source_id,
                        source_chain,
                        warnings,
                        errors,
                        latency_ms: elapsed_ms(started),
                    });
                }
                Err(error) => {
                    tracing::warn!(
                        source_id = %source_id,
                        code = error.code(),
                        %error,
                        "failover candidate failed"
                    );
                    errors.push(error);
                }
            }
        }

        match errors.pop() {
            Some(last) => Err(AccessError::AllSourcesFailed {
                attempted: source_chain,
                last: Box::new(last),
            }),
            None => Err(AccessError::Configuration(String::from(
                "failover requires at least one candidate source",
            ))),
        }
    }

    /// Borrows a connection from every pool and pings it, concurrently.
    pub async fn refresh_all(&self) -> Vec<RefreshReport> {
        let slots = self.sorted_slots();
        let reports = join_all(slots.iter().map(|slot| async move {
            let started = Instant::now();
            let timeout = slot.source.settings.timeout();
            let error = match tokio::time::timeout(timeout, slot.ping()).await {
                Ok(Ok(())) => None,
                Ok(Err(error)) => Some(error.to_string()),
                Err(_) => Some(format!("ping timed out after {}ms", duration_ms(timeout))),
            };
            if let Some(error) = &error {
                tracing::warn!(source_id = %slot.source.id, %error, "source refresh failed");
            }
            RefreshReport {
                source_id: slot.source.id.clone(),
                ok: error.is_none(),
                latency_ms: elapsed_ms(started),
                error,
            }
        }))
        .await;

        let failed = reports.iter().filter(|report| !report.ok).count();
        tracing::info!(sources = reports.len(), failed, "refreshed source connectivity");
        reports
    }

    /// One health round: probe every serving source and fold the outcome
    /// into its error rate. Sources with an open breaker or no rate budget
    /// left are skipped for this round.
    pub async fn run_health_checks(&self) -> AccessMetrics {
        let slots = self.sorted_slots();
        join_all(slots.iter().map(|slot| async move {
            if !slot.source.status.is_serving() || slot.breaker.state() == CircuitState::Open {
                return;
            }
            if slot.throttle.check().is_err() {
                tracing::debug!(source_id = %slot.source.id, "skipping health probe, rate limited");
                return;
            }

            let ok = matches!(
                tokio::time::timeout(slot.source.settings.timeout(), slot.ping()).await,
                Ok(Ok(()))
            );
            slot.health().fold_probe(ok);
            if !ok {
                tracing::debug!(source_id = %slot.source.id, "health probe failed");
            }
        }))
        .await;

        let metrics = self.metrics();
        self.events.emit(Event::MetricsReported {
            online: metrics.online,
            degraded: metrics.degraded,
            offline: metrics.offline,
            total_requests: metrics.total_requests,
        });
        metrics
    }

    /// Spawns the periodic health check and cache sweep. Calling it again
    /// while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().expect("task list lock is not poisoned");
        if !tasks.is_empty() {
            return;
        }

        tasks.push(tokio::spawn(health_loop(
            Arc::downgrade(self),
            self.config.health_check_interval(),
        )));
        tasks.push(tokio::spawn(sweep_loop(
            Arc::downgrade(self),
            self.config.cache_sweep_interval(),
        )));
        tracing::info!(
            health_check_interval_ms = self.config.health_check_interval_ms,
            "source access manager started"
        );
    }

    /// Cancels background tasks, drains every pool, and empties every cache.
    pub async fn stop(&self) {
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .expect("task list lock is not poisoned")
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }

        let slots = self.sorted_slots();
        join_all(slots.iter().map(|slot| async move {
            slot.pool.close().await;
            if let Some(cache) = &slot.cache {
                cache.clear().await;
            }
        }))
        .await;
        tracing::info!(sources = slots.len(), "source access manager stopped");
    }

    pub fn is_running(&self) -> bool {
        !self
            .tasks
            .lock()
            .expect("task list lock is not poisoned")
            .is_empty()
    }

    pub fn health(&self, source_id: &SourceId) -> Option<HealthStatus> {
        self.slot(source_id).ok().map(|slot| slot.status())
    }

    pub fn health_all(&self) -> Vec<HealthStatus> {
        self.sorted_slots().iter().map(|slot| slot.status()).collect()
    }

    pub fn source(&self, source_id: &SourceId) -> Option<Source> {
        self.slot(source_id)
            .ok()
            .map(|slot| slot.source.as_ref().clone())
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        self.sorted_slots()
            .iter()
            .map(|slot| slot.source.id.clone())
            .collect()
    }

    pub fn circuit(&self, source_id: &SourceId) -> Option<CircuitSnapshot> {
        self.slot(source_id).ok().map(|slot| slot.breaker.snapshot())
    }

    pub fn pool_stats(&self, source_id: &SourceId) -> Option<PoolStats> {
        self.slot(source_id).ok().map(|slot| slot.pool.stats())
    }

    pub fn metrics(&self) -> AccessMetrics {
        self.sorted_slots()
            .iter()
            .fold(AccessMetrics::default(), |mut metrics, slot| {
                let status = slot.status();
                match status.state {
                    HealthState::Online => metrics.online += 1,
                    HealthState::Degraded => metrics.degraded += 1,
                    HealthState::Offline => metrics.offline += 1,
                }
                metrics.total_requests += status.total_requests;
                metrics.cache_hits += status.cache_hits;
                metrics
            })
    }

    async fn fetch_gated(
        &self,
        source_id: &SourceId,
        query: &Query,
        rate_mode: RateMode,
    ) -> Result<FetchResult, AccessError> {
        let slot = self.slot(source_id)?;
        let source = Arc::clone(&slot.source);

        if !source.status.is_serving() {
            return Err(AccessError::Unavailable {
                source_id: source_id.clone(),
                status: source.status,
            });
        }

        if let Err(cooldown) = slot.breaker.admit() {
            tracing::debug!(source_id = %source_id, "circuit open, request rejected");
            return Err(AccessError::CircuitOpen {
                source_id: source_id.clone(),
                retry_after_ms: duration_ms(cooldown),
            });
        }

        match rate_mode {
            RateMode::Reject => {
                if let Err(retry_after) = slot.throttle.check() {
                    return Err(AccessError::RateLimited {
                        source_id: source_id.clone(),
                        retry_after_ms: duration_ms(retry_after),
                    });
                }
            }
            RateMode::Wait => slot.throttle.acquire_wait().await,
        }

        let cache_key = query.cache_key(source_id);
        if query.cache_mode == CacheMode::Use {
            if let Some(cache) = &slot.cache {
                if let Some(mut hit) = cache.get(&cache_key).await {
                    slot.health().record_cache_hit();
                    tracing::debug!(source_id = %source_id, operation = %query.operation, "cache hit");
                    hit.cached = true;
                    return Ok(hit);
                }
            }
        }

        let started = Instant::now();
        let timeout = source.settings.timeout();
        let payload = match tokio::time::timeout(timeout, slot.execute(query)).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(error)) => {
                self.record_failure(&slot);
                return Err(AccessError::execution(source_id, error.message()));
            }
            Err(_) => {
                self.record_failure(&slot);
                return Err(AccessError::Timeout {
                    source_id: source_id.clone(),
                    timeout_ms: duration_ms(timeout),
                });
            }
        };

        let warnings = match source.settings.validation.apply(&payload) {
            Ok(warnings) => warnings,
            Err(reason) => {
                self.record_failure(&slot);
                return Err(AccessError::InvalidPayload {
                    source_id: source_id.clone(),
                    reason,
                });
            }
        };

        let latency_ms = elapsed_ms(started);
        slot.breaker.record_success();
        slot.health().record_success(latency_ms);

        let result = FetchResult {
            source_id: source_id.clone(),
            payload,
            cached: false,
            latency_ms,
            fetched_at: UtcDateTime::now(),
            warnings,
        };

        if query.cache_mode != CacheMode::Bypass {
            if let Some(cache) = &slot.cache {
                cache.put(cache_key, result.clone(), None).await;
            }
        }

        tracing::debug!(
            source_id = %source_id,
            operation = %query.operation,
            latency_ms,
            "fetched from source"
        );
        Ok(result)
    }

    fn record_failure(&self, slot: &SourceSlot) {
        let state = slot.breaker.record_failure();
        slot.health().record_failure();
        if state == CircuitState::Open {
            tracing::warn!(
                source_id = %slot.source.id,
                failures = slot.breaker.consecutive_failures(),
                "circuit breaker open"
            );
        }
    }

    fn slot(&self, source_id: &SourceId) -> Result<Arc<SourceSlot>, AccessError> {
        self.slots
            .read()
            .expect("source registry lock is not poisoned")
            .get(source_id)
            .cloned()
            .ok_or_else(|| AccessError::not_found(source_id.as_str()))
    }

    fn sorted_slots(&self) -> Vec<Arc<SourceSlot>> {
        let mut slots: Vec<_> = self
            .slots
            .read()
            .expect("source registry lock is not poisoned")
            .values()
            .cloned()
            .collect();
        slots.sort_by(|left, right| left.source.id.cmp(&right.source.id));
        slots
    }

    fn write_slots(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SourceId, Arc<SourceSlot>>> {
        self.slots
            .write()
            .expect("source registry lock is not poisoned")
    }
}

async fn health_loop(manager: Weak<SourceAccessManager>, period: Duration) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(manager) = manager.upgrade() else {
            break;
        };
        let metrics = manager.run_health_checks().await;
        tracing::debug!(
            online = metrics.online,
            degraded = metrics.degraded,
            offline = metrics.offline,
            "health check round finished"
        );
    }
}

async fn sweep_loop(manager: Weak<SourceAccessManager>, period: Duration) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(manager) = manager.upgrade() else {
            break;
        };
        let mut swept = 0;
        for slot in manager.sorted_slots() {
            if let Some(cache) = &slot.cache {
                swept += cache.clear_expired().await;
            }
        }
        if swept > 0 {
            tracing::debug!(swept, "evicted expired cache entries");
        }
    }
}

fn dedupe_chain(chain: &[SourceId]) -> Vec<SourceId> {
    let mut seen = HashSet::new();
    let mut output = Vec::with_capacity(chain.len());

    for source_id in chain {
        if seen.insert(source_id) {
            output.push(source_id.clone());
        }
    }

    output
}

fn elapsed_ms(started: Instant) -> u64 {
    duration_ms(started.elapsed())
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u128::from(u64::MAX)) as u64
}
