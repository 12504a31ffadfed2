//! # Trustgate Core
//!
//! Domain types, resilience primitives, and the source access manager shared
//! by the trustgate validation engine.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`access`] | Source access manager: registration, gated fetches, failover, health loop |
//! | [`backoff`] | Pool poll intervals and fetch retry delays |
//! | [`cache`] | TTL cache with FIFO/LRU eviction |
//! | [`circuit_breaker`] | Closed / open / half-open breaker per source |
//! | [`config`] | JSON config loading and environment lookups |
//! | [`connector`] | Connector traits, queries, and the HTTP connector |
//! | [`domain`] | Identifiers, timestamps, payloads |
//! | [`error`] | Error types |
//! | [`events`] | Broadcast event bus |
//! | [`health`] | Per-source health metrics |
//! | [`http_client`] | Read-only HTTP transport for networked sources |
//! | [`pool`] | Bounded connection pool with RAII borrows |
//! | [`source`] | Source descriptors and per-source settings |
//! | [`throttling`] | Per-source rate limiting |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │ Validator / Verifier │
//! └──────────┬───────────┘
//!            │ fetch(source_id, query)
//!            ▼
//! ┌──────────────────────┐     ┌───────────────────────────────┐
//! │ SourceAccessManager  │────▶│ breaker → limiter → cache     │
//! └──────────┬───────────┘     └───────────────────────────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐     ┌──────────────────┐
//! │ ConnectionPool       │────▶│ SourceConnector  │
//! │ (per source)         │     │ (HTTP / custom)  │
//! └──────────────────────┘     └──────────────────┘
//! ```

pub mod access;
pub mod backoff;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod connector;
pub mod domain;
pub mod error;
pub mod events;
pub mod health;
pub mod http_client;
pub mod pool;
pub mod source;
pub mod throttling;

pub use access::{
    AccessMetrics, FailoverSuccess, RefreshReport, SourceAccessManager, RETRY_BASE_DELAY,
    RETRY_MAX_DELAY,
};
pub use backoff::Backoff;
pub use cache::{CacheMode, CacheStore, EvictionStrategy};
pub use circuit_breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use config::{env_var, from_json_str, load_json_file, require_env, AccessConfig};
pub use connector::{
    ConnectorFuture, FetchResult, HttpConnector, Query, SourceConnection, SourceConnector,
};
pub use domain::{
    extract_timestamp, lookup_path, FeedId, Payload, PricePoint, SourceId, UtcDateTime,
    TIMESTAMP_FIELDS,
};
pub use error::{AccessError, ConfigError, ConnectorError, IdError};
pub use events::{Event, EventBus};
pub use health::{HealthRecord, HealthState, HealthStatus};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpFuture, HttpRequest, HttpResponse, ReqwestHttpClient,
    StaticHttpClient,
};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use source::{
    BreakerPolicy, CachingPolicy, OnFailure, PayloadRule, RateLimitPolicy, Source, SourceAuth,
    SourceCategory, SourceConfig, SourceSettings, SourceStatus, ValidationPolicy,
};
pub use throttling::Throttle;
