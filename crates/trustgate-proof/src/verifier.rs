//! The proof verifier.
//!
//! Each request is hashed, run through the requested checks, combined, cached
//! for a few minutes, and written to the audit trail. Repeating a request
//! inside the cache window returns the stored result tagged `cached`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use trustgate_core::{CacheStore, Event, EventBus, Payload, SourceId, UtcDateTime};

use crate::audit::{AuditEntry, AuditTrail};
use crate::consistency::ComparisonSource;
use crate::crypto::{CryptographicProof, DifficultyPredicate, LeadingZeros};
use crate::result::{CheckKind, CheckOutcome, DataVerificationResult};
use crate::schema::DataSchema;
use crate::{consistency, crypto, schema, temporal, VerifierConfig, VerifyError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub source_id: SourceId,
    pub payload: Payload,
    #[serde(default)]
    pub proof: Option<CryptographicProof>,
    /// Checks to run. The cryptographic check only runs when a proof is
    /// attached.
    #[serde(default = "all_checks")]
    pub checks: Vec<CheckKind>,
}

fn all_checks() -> Vec<CheckKind> {
    CheckKind::ALL.to_vec()
}

impl VerificationRequest {
    pub fn new(source_id: SourceId, payload: Payload) -> Self {
        Self {
            source_id,
            payload,
            proof: None,
            checks: all_checks(),
        }
    }

    pub fn with_proof(mut self, proof: CryptographicProof) -> Self {
        self.proof = Some(proof);
        self
    }

    pub fn with_checks(mut self, checks: impl IntoIterator<Item = CheckKind>) -> Self {
        self.checks = checks.into_iter().collect();
        self.checks.sort();
        self.checks.dedup();
        self
    }

    fn wants(&self, kind: CheckKind) -> bool {
        self.checks.contains(&kind)
    }

    fn cache_key(&self, payload_hash: &str) -> String {
        let proof = self
            .proof
            .as_ref()
            .map(CryptographicProof::fingerprint)
            .unwrap_or_default();
        let checks: Vec<_> = self.checks.iter().map(|kind| kind.as_str()).collect();
        format!(
            "{}:{payload_hash}:{proof}:{}",
            self.source_id,
            checks.join(",")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct VerifierMetrics {
    pub verifications: u64,
    pub cache_hits: u64,
    pub valid: u64,
    pub invalid: u64,
    pub audit_entries: usize,
}

pub struct ProofVerifier {
    config: VerifierConfig,
    schemas: RwLock<HashMap<SourceId, DataSchema>>,
    comparisons: Option<Arc<dyn ComparisonSource>>,
    difficulty: Arc<dyn DifficultyPredicate>,
    results: CacheStore<DataVerificationResult>,
    audit: AuditTrail,
    verifications: AtomicU64,
    cache_hits: AtomicU64,
    valid: AtomicU64,
    invalid: AtomicU64,
    events: EventBus,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProofVerifier {
    pub fn new(config: VerifierConfig) -> Self {
        let difficulty = Arc::new(LeadingZeros(config.chain_difficulty));
        let results = CacheStore::new(config.cache_ttl());
        let audit = AuditTrail::with_retention_days(config.audit_retention_days);

        Self {
            config,
            schemas: RwLock::new(HashMap::new()),
            comparisons: None,
            difficulty,
            results,
            audit,
            verifications: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            valid: AtomicU64::new(0),
            invalid: AtomicU64::new(0),
            events: EventBus::default(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_comparisons(mut self, comparisons: Arc<dyn ComparisonSource>) -> Self {
        self.comparisons = Some(comparisons);
        self
    }

    pub fn with_difficulty(mut self, difficulty: Arc<dyn DifficultyPredicate>) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub const fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Replaces any schema already registered for `source_id`.
    pub fn register_schema(&self, source_id: SourceId, schema: DataSchema) {
        tracing::info!(
            source_id = %source_id,
            required = schema.required_fields.len(),
            typed = schema.field_types.len(),
            "registered payload schema"
        );
        self.schemas
            .write()
            .expect("schema registry lock is not poisoned")
            .insert(source_id, schema);
    }

    pub fn schema(&self, source_id: &SourceId) -> Option<DataSchema> {
        self.schemas
            .read()
            .expect("schema registry lock is not poisoned")
            .get(source_id)
            .cloned()
    }

    /// Content hash the verifier uses for `payload`.
    pub fn payload_hash(&self, payload: &Payload) -> String {
        self.config.algorithm.hash_json(&payload.to_value())
    }

    pub async fn verify(
        &self,
        source_id: SourceId,
        payload: Payload,
        proof: Option<CryptographicProof>,
    ) -> Result<DataVerificationResult, VerifyError> {
        let mut request = VerificationRequest::new(source_id, payload);
        request.proof = proof;
        self.verify_request(&request).await
    }

    pub async fn verify_request(
        &self,
        request: &VerificationRequest,
    ) -> Result<DataVerificationResult, VerifyError> {
        let started = Instant::now();
        let value = request.payload.to_value();
        let payload_hash = self.config.algorithm.hash_json(&value);
        let cache_key = request.cache_key(&payload_hash);

        if let Some(mut hit) = self.results.get(&cache_key).await {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                source_id = %request.source_id,
                payload_hash = %payload_hash,
                "verification cache hit"
            );
            hit.cached = true;
            hit.latency_ms = elapsed_ms(started);
            self.record(&hit);
            return Ok(hit);
        }

        let checks = self.run_checks(request, &value, &payload_hash).await;
        if checks.is_empty() {
            return Err(VerifyError::Configuration(format!(
                "no checks could run for source '{}': requested {:?} without a proof",
                request.source_id, request.checks
            )));
        }

        let result = DataVerificationResult::combine(
            request.source_id.clone(),
            payload_hash,
            checks,
            self.config.validity_threshold,
            elapsed_ms(started),
        );
        self.verifications.fetch_add(1, Ordering::Relaxed);
        if result.valid {
            self.valid.fetch_add(1, Ordering::Relaxed);
        } else {
            self.invalid.fetch_add(1, Ordering::Relaxed);
        }

        self.results.put(cache_key, result.clone(), None).await;
        self.record(&result);
        tracing::info!(
            source_id = %result.source_id,
            payload_hash = %result.payload_hash,
            valid = result.valid,
            confidence = result.confidence,
            latency_ms = result.latency_ms,
            "verified payload"
        );
        Ok(result)
    }

    pub async fn verify_with_deadline(
        &self,
        request: &VerificationRequest,
        deadline: Duration,
    ) -> Result<DataVerificationResult, VerifyError> {
        tokio::time::timeout(deadline, self.verify_request(request))
            .await
            .map_err(|_| VerifyError::Timeout {
                timeout_ms: deadline.as_millis().min(u128::from(u64::MAX)) as u64,
            })?
    }

    /// Verifies every request concurrently. Requests that cannot be evaluated
    /// are logged and left out of the returned list.
    pub async fn verify_batch(&self, requests: &[VerificationRequest]) -> Vec<DataVerificationResult> {
        let outcomes = join_all(requests.iter().map(|request| self.verify_request(request))).await;

        let mut results = Vec::with_capacity(outcomes.len());
        let mut failed = 0usize;
        for (request, outcome) in requests.iter().zip(outcomes) {
            match outcome {
                Ok(result) => results.push(result),
                Err(error) => {
                    failed += 1;
                    tracing::warn!(
                        source_id = %request.source_id,
                        code = error.code(),
                        %error,
                        "batch verification item failed"
                    );
                }
            }
        }

        tracing::info!(
            requested = requests.len(),
            verified = results.len(),
            failed,
            "verified batch"
        );
        results
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.all()
    }

    pub fn audit_for_source(&self, source_id: &SourceId) -> Vec<AuditEntry> {
        self.audit.for_source(source_id)
    }

    pub fn prune_audit(&self) -> usize {
        let pruned = self.audit.prune();
        if pruned > 0 {
            tracing::debug!(pruned, "pruned audit entries past retention");
        }
        pruned
    }

    pub fn metrics(&self) -> VerifierMetrics {
        VerifierMetrics {
            verifications: self.verifications.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            valid: self.valid.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            audit_entries: self.audit.len(),
        }
    }

    /// Spawns the periodic audit prune and cache sweep. Calling it again
    /// while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().expect("task list lock is not poisoned");
        if !tasks.is_empty() {
            return;
        }
        tasks.push(tokio::spawn(maintenance_loop(
            Arc::downgrade(self),
            self.config.audit_prune_interval(),
        )));
        tracing::info!(
            audit_prune_interval_ms = self.config.audit_prune_interval_ms,
            "proof verifier started"
        );
    }

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
        self.results.clear().await;
        tracing::info!("proof verifier stopped");
    }

    pub fn is_running(&self) -> bool {
        !self
            .tasks
            .lock()
            .expect("task list lock is not poisoned")
            .is_empty()
    }

    async fn run_checks(
        &self,
        request: &VerificationRequest,
        value: &Value,
        payload_hash: &str,
    ) -> Vec<CheckOutcome> {
        let mut checks = Vec::with_capacity(CheckKind::ALL.len());

        if request.wants(CheckKind::Cryptographic) {
            if let Some(proof) = &request.proof {
                checks.push(crypto::check(
                    self.config.algorithm,
                    payload_hash,
                    proof,
                    self.difficulty.as_ref(),
                ));
            }
        }

        if request.wants(CheckKind::Temporal) {
            checks.push(temporal::check(
                value,
                self.config.max_data_age(),
                UtcDateTime::now(),
            ));
        }

        if request.wants(CheckKind::Schema) {
            let schema = self.schema(&request.source_id);
            checks.push(schema::check(schema.as_ref(), value));
        }

        if request.wants(CheckKind::Consistency) {
            let others = self.comparison_payloads(&request.source_id, value).await;
            checks.push(consistency::check(
                value,
                &others,
                self.config.min_consistency_threshold,
            ));
        }

        checks
    }

    async fn comparison_payloads(&self, source_id: &SourceId, value: &Value) -> Vec<Value> {
        let Some(comparisons) = &self.comparisons else {
            return Vec::new();
        };
        match comparisons.recent_payloads(source_id, value).await {
            Ok(payloads) => payloads,
            Err(error) => {
                tracing::warn!(
                    source_id = %source_id,
                    %error,
                    "comparison lookup failed, treating as no comparison data"
                );
                Vec::new()
            }
        }
    }

    fn record(&self, result: &DataVerificationResult) {
        if self.config.audit_enabled {
            self.audit.append(AuditEntry::from_result(result));
        }
        self.events.emit(Event::DataVerified {
            source_id: result.source_id.clone(),
            payload_hash: result.payload_hash.clone(),
            valid: result.valid,
            confidence: result.confidence,
            cached: result.cached,
        });
    }
}

async fn maintenance_loop(verifier: Weak<ProofVerifier>, period: Duration) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(verifier) = verifier.upgrade() else {
            break;
        };
        verifier.prune_audit();
        let swept = verifier.results.clear_expired().await;
        if swept > 0 {
            tracing::debug!(swept, "evicted expired verification results");
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use serde_json::{json, Map};
    use trustgate_core::PricePoint;

    use super::*;
    use crate::consistency::RecentPayloads;
    use crate::crypto::{merkle_proof, SignatureProof};
    use crate::schema::FieldType;
    use crate::HashAlgorithm;

    fn source(id: &str) -> SourceId {
        SourceId::parse(id).expect("valid id")
    }

    fn record(value: Value) -> Payload {
        match value {
            Value::Object(map) => Payload::Record(map),
            _ => Payload::Record(Map::new()),
        }
    }

    fn fresh_price(value: f64) -> Payload {
        Payload::Price(PricePoint::new(value, UtcDateTime::now()).with_currency("USD"))
    }

    fn signed(verifier: &ProofVerifier, payload: &Payload) -> CryptographicProof {
        let hash = verifier.payload_hash(payload);
        let key = SigningKey::from_bytes(&[42; 32]);
        CryptographicProof::default()
            .with_signature(SignatureProof::sign(&key, &hash).expect("hex hash"))
    }

    #[tokio::test]
    async fn signed_fresh_payload_is_valid() {
        let verifier = ProofVerifier::new(VerifierConfig::default());
        let payload = fresh_price(3_000.0);
        let proof = signed(&verifier, &payload);

        let result = verifier
            .verify(source("pyth"), payload, Some(proof))
            .await
            .expect("verified");

        assert!(result.valid, "errors: {:?}", result.errors);
        assert_eq!(result.checks.len(), 4);
        assert!(result.confidence >= 0.7);
    }

    #[tokio::test]
    async fn repeated_requests_hit_the_cache() {
        let verifier = ProofVerifier::new(VerifierConfig::default());
        let payload = fresh_price(3_000.0);
        let request =
            VerificationRequest::new(source("pyth"), payload.clone()).with_proof(signed(&verifier, &payload));

        let first = verifier.verify_request(&request).await.expect("first");
        let second = verifier.verify_request(&request).await.expect("second");

        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.valid, second.valid);
        assert_eq!(first.confidence, second.confidence);
        assert_eq!(verifier.metrics().cache_hits, 1);
        assert_eq!(verifier.audit_entries().len(), 2);
    }

    #[tokio::test]
    async fn a_different_proof_is_not_answered_from_cache() {
        let verifier = ProofVerifier::new(VerifierConfig::default());
        let payload = fresh_price(3_000.0);
        let good = VerificationRequest::new(source("pyth"), payload.clone())
            .with_proof(signed(&verifier, &payload));
        let forged = VerificationRequest::new(source("pyth"), payload).with_proof(
            CryptographicProof::default().with_signature(SignatureProof {
                signature: "00".repeat(64),
                public_key: hex::encode(SigningKey::from_bytes(&[42; 32]).verifying_key().as_bytes()),
            }),
        );

        assert!(verifier.verify_request(&good).await.expect("good").valid);
        let result = verifier.verify_request(&forged).await.expect("forged");
        assert!(!result.cached);
        assert!(!result.valid);
    }

    #[tokio::test]
    async fn merkle_proof_against_the_wrong_root_is_invalid() {
        let verifier = ProofVerifier::new(VerifierConfig::default());
        let payload = fresh_price(1.0);
        let leaf = verifier.payload_hash(&payload);
        let leaves = vec![
            leaf,
            HashAlgorithm::Sha256.digest_hex(b"sibling"),
            HashAlgorithm::Sha256.digest_hex(b"cousin"),
        ];
        let proof = merkle_proof(HashAlgorithm::Sha256, &leaves, 0).expect("in range");

        let valid = verifier
            .verify(
                source("pyth"),
                payload.clone(),
                Some(CryptographicProof::default().with_merkle(proof.clone())),
            )
            .await
            .expect("verified");
        assert_eq!(valid.check(CheckKind::Cryptographic).map(|c| c.valid), Some(true));

        let mut wrong = proof;
        wrong.root = HashAlgorithm::Sha256.digest_hex(b"elsewhere");
        let invalid = verifier
            .verify(
                source("pyth"),
                payload,
                Some(CryptographicProof::default().with_merkle(wrong)),
            )
            .await
            .expect("verified");
        assert!(!invalid.valid);
        assert_eq!(invalid.check(CheckKind::Cryptographic).map(|c| c.valid), Some(false));
    }

    #[tokio::test]
    async fn registered_schema_is_enforced() {
        let verifier = ProofVerifier::new(VerifierConfig::default());
        verifier.register_schema(
            source("registry"),
            DataSchema::default()
                .require("issuer")
                .typed("amount", FieldType::Number),
        );

        let result = verifier
            .verify(
                source("registry"),
                record(json!({"amount": "12", "timestamp": UtcDateTime::now().format_rfc3339()})),
                None,
            )
            .await
            .expect("verified");

        assert!(!result.valid);
        let schema = result.check(CheckKind::Schema).expect("schema ran");
        assert_eq!(schema.errors.len(), 2);
        assert!(result.check(CheckKind::Cryptographic).is_none());
    }

    #[tokio::test]
    async fn consistency_uses_other_sources() {
        let comparisons = Arc::new(RecentPayloads::new("symbol", 16));
        comparisons.record(source("band"), json!({"symbol": "ETH", "price": 10.0}));
        let verifier =
            ProofVerifier::new(VerifierConfig::default()).with_comparisons(comparisons);

        let result = verifier
            .verify(
                source("pyth"),
                record(json!({
                    "symbol": "ETH",
                    "price": 3_000.0,
                    "timestamp": UtcDateTime::now().format_rfc3339()
                })),
                None,
            )
            .await
            .expect("verified");

        let consistency = result.check(CheckKind::Consistency).expect("ran");
        assert!(!consistency.valid);
        assert!(!result.valid);
    }

    struct Unreachable;

    impl ComparisonSource for Unreachable {
        fn recent_payloads<'a>(
            &'a self,
            _source_id: &'a SourceId,
            _payload: &'a Value,
        ) -> crate::ComparisonFuture<'a> {
            Box::pin(async { Err(VerifyError::Comparison(String::from("store offline"))) })
        }
    }

    #[tokio::test]
    async fn failed_comparison_lookup_is_neutral() {
        let verifier =
            ProofVerifier::new(VerifierConfig::default()).with_comparisons(Arc::new(Unreachable));

        let result = verifier
            .verify(source("pyth"), fresh_price(1.0), None)
            .await
            .expect("verified");

        let consistency = result.check(CheckKind::Consistency).expect("ran");
        assert!(consistency.valid);
        assert_eq!(consistency.confidence, crate::consistency::NO_COMPARISON_CONFIDENCE);
    }

    #[tokio::test]
    async fn cryptographic_only_request_without_proof_is_rejected() {
        let verifier = ProofVerifier::new(VerifierConfig::default());
        let request = VerificationRequest::new(source("pyth"), fresh_price(1.0))
            .with_checks([CheckKind::Cryptographic]);

        let err = verifier.verify_request(&request).await.expect_err("nothing to run");
        assert_eq!(err.code(), "verify.configuration");
    }

    #[tokio::test]
    async fn batch_skips_failing_items() {
        let verifier = ProofVerifier::new(VerifierConfig::default());
        let requests = vec![
            VerificationRequest::new(source("pyth"), fresh_price(1.0)),
            VerificationRequest::new(source("band"), fresh_price(2.0))
                .with_checks([CheckKind::Cryptographic]),
            VerificationRequest::new(source("dia"), fresh_price(3.0)),
        ];

        let results = verifier.verify_batch(&requests).await;

        assert_eq!(results.len(), 2);
        assert_eq!(verifier.metrics().verifications, 2);
    }

    #[tokio::test]
    async fn every_verification_is_announced() {
        let verifier = ProofVerifier::new(VerifierConfig::default());
        let mut events = verifier.events().subscribe();

        verifier
            .verify(source("pyth"), fresh_price(1.0), None)
            .await
            .expect("verified");

        let event = events.try_recv().expect("event published");
        assert_eq!(event.name(), "data_verified");
    }

    #[tokio::test]
    async fn start_and_stop_manage_the_maintenance_task() {
        let verifier = Arc::new(ProofVerifier::new(VerifierConfig::default()));
        verifier.start();
        assert!(verifier.is_running());
        verifier.stop().await;
        assert!(!verifier.is_running());
    }
}
