//! Source descriptors: what a registered provider is and how it may be called.
//!
//! [`SourceConfig`] is the loosely-typed registration input (it usually comes
//! from a JSON config file). [`SourceConfig::validate`] turns it into a
//! [`Source`], which is what the access manager owns.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::env_var;
use crate::http_client::HttpAuth;
use crate::{AccessError, EvictionStrategy, Payload, SourceId};

/// Kind of external provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    Oracle,
    Api,
    Database,
    Blockchain,
    Regulatory,
    Financial,
    Social,
    News,
}

impl SourceCategory {
    pub const ALL: [Self; 8] = [
        Self::Oracle,
        Self::Api,
        Self::Database,
        Self::Blockchain,
        Self::Regulatory,
        Self::Financial,
        Self::Social,
        Self::News,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Oracle => "oracle",
            Self::Api => "api",
            Self::Database => "database",
            Self::Blockchain => "blockchain",
            Self::Regulatory => "regulatory",
            Self::Financial => "financial",
            Self::Social => "social",
            Self::News => "news",
        }
    }
}

impl Display for SourceCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceCategory {
    type Err = AccessError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
            .ok_or_else(|| {
                AccessError::Configuration(format!(
                    "unknown source category '{value}', expected one of oracle, api, database, \
                     blockchain, regulatory, financial, social, news"
                ))
            })
    }
}

/// Lifecycle status of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    #[default]
    Active,
    Inactive,
    Maintenance,
    Deprecated,
}

impl SourceStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Maintenance => "maintenance",
            Self::Deprecated => "deprecated",
        }
    }

    /// Whether requests may be sent to a source in this status.
    pub const fn is_serving(self) -> bool {
        matches!(self, Self::Active | Self::Deprecated)
    }
}

impl Display for SourceStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How requests to a source authenticate.
///
/// The `Env*` variants keep secrets out of config files; the value is read
/// from the environment when a connection is opened.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceAuth {
    #[default]
    None,
    Bearer {
        token: String,
    },
    EnvBearer {
        env: String,
    },
    Header {
        name: String,
        value: String,
    },
    EnvHeader {
        name: String,
        env: String,
    },
    Cookie {
        value: String,
    },
}

impl SourceAuth {
    /// Resolves the descriptor to a concrete transport credential.
    pub fn resolve(&self) -> Result<HttpAuth, AccessError> {
        let missing = |env: &str| {
            AccessError::Configuration(format!("environment variable '{env}' is not set"))
        };
        Ok(match self {
            Self::None => HttpAuth::None,
            Self::Bearer { token } => HttpAuth::BearerToken(token.clone()),
            Self::EnvBearer { env } => {
                HttpAuth::BearerToken(env_var(env).ok_or_else(|| missing(env))?)
            }
            Self::Header { name, value } => HttpAuth::Header {
                name: name.clone(),
                value: value.clone(),
            },
            Self::EnvHeader { name, env } => HttpAuth::Header {
                name: name.clone(),
                value: env_var(env).ok_or_else(|| missing(env))?,
            },
            Self::Cookie { value } => HttpAuth::Cookie(value.clone()),
        })
    }
}

/// Request budget for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitPolicy {
    pub requests: u32,
    pub window_ms: u64,
}

impl RateLimitPolicy {
    pub const fn per_minute(requests: u32) -> Self {
        Self {
            requests,
            window_ms: 60_000,
        }
    }

    pub const fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

/// Breaker tuning for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerPolicy {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 60_000,
        }
    }
}

/// Response caching for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachingPolicy {
    pub enabled: bool,
    pub ttl_ms: u64,
    pub strategy: EvictionStrategy,
    pub max_size: usize,
}

impl CachingPolicy {
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            ttl_ms: 0,
            strategy: EvictionStrategy::Fifo,
            max_size: 0,
        }
    }

    pub const fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for CachingPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 30_000,
            strategy: EvictionStrategy::Lru,
            max_size: 1_000,
        }
    }
}

/// A structural rule applied to every payload a source returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "field", rename_all = "snake_case")]
pub enum PayloadRule {
    NonEmpty,
    RequireField(String),
    NumericField(String),
}

impl PayloadRule {
    fn check(&self, payload: &Payload) -> Result<(), String> {
        match self {
            Self::NonEmpty => {
                if payload.is_empty() {
                    Err(String::from("payload is empty"))
                } else {
                    Ok(())
                }
            }
            Self::RequireField(field) => match payload.field(field) {
                Some(value) if !value.is_null() => Ok(()),
                _ => Err(format!("required field '{field}' is missing")),
            },
            Self::NumericField(field) => match payload.field(field) {
                Some(value) if value.is_number() => Ok(()),
                Some(_) => Err(format!("field '{field}' is not numeric")),
                None => Err(format!("numeric field '{field}' is missing")),
            },
        }
    }
}

/// What happens when a payload breaks a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    /// Fail the fetch with [`AccessError::InvalidPayload`].
    #[default]
    Reject,
    /// Return the payload with the violations attached as warnings.
    Warn,
    Ignore,
}

/// Payload validation applied by the access manager after each fetch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    pub enabled: bool,
    pub rules: Vec<PayloadRule>,
    pub on_failure: OnFailure,
}

impl ValidationPolicy {
    /// Applies the rules. `Err` carries the reason the payload is rejected,
    /// `Ok` carries warnings to attach to the result.
    pub fn apply(&self, payload: &Payload) -> Result<Vec<String>, String> {
        if !self.enabled {
            return Ok(Vec::new());
        }

        let violations: Vec<String> = self
            .rules
            .iter()
            .filter_map(|rule| rule.check(payload).err())
            .collect();

        if violations.is_empty() {
            return Ok(Vec::new());
        }

        match self.on_failure {
            OnFailure::Reject => Err(violations.join("; ")),
            OnFailure::Warn => Ok(violations),
            OnFailure::Ignore => Ok(Vec::new()),
        }
    }
}

/// Operational settings for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub rate_limit: RateLimitPolicy,
    pub timeout_ms: u64,
    /// Extra attempts granted to [`fetch_with_retry`](crate::SourceAccessManager::fetch_with_retry).
    /// Plain `fetch` never retries.
    pub retries: u32,
    pub max_concurrent_connections: usize,
    pub circuit_breaker: BreakerPolicy,
    pub caching: CachingPolicy,
    pub validation: ValidationPolicy,
}

impl SourceSettings {
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitPolicy::default(),
            timeout_ms: 5_000,
            retries: 3,
            max_concurrent_connections: 4,
            circuit_breaker: BreakerPolicy::default(),
            caching: CachingPolicy::default(),
            validation: ValidationPolicy::default(),
        }
    }
}

/// Registration input for a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub provider: String,
    pub category: String,
    pub endpoint: String,
    #[serde(default)]
    pub auth: SourceAuth,
    #[serde(default = "default_ratio")]
    pub reliability: f64,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default = "default_ratio")]
    pub uptime: f64,
    #[serde(default)]
    pub cost_per_request: f64,
    #[serde(default)]
    pub status: SourceStatus,
    #[serde(default)]
    pub settings: SourceSettings,
}

fn default_ratio() -> f64 {
    0.9
}

impl SourceConfig {
    pub fn new(
        id: impl Into<String>,
        provider: impl Into<String>,
        category: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            category: category.into(),
            endpoint: endpoint.into(),
            auth: SourceAuth::None,
            reliability: default_ratio(),
            latency_ms: 0,
            uptime: default_ratio(),
            cost_per_request: 0.0,
            status: SourceStatus::Active,
            settings: SourceSettings::default(),
        }
    }

    pub fn with_auth(mut self, auth: SourceAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability;
        self
    }

    pub fn with_status(mut self, status: SourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_settings(mut self, settings: SourceSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Checks required fields and ranges, producing the owned [`Source`].
    pub fn validate(self) -> Result<Source, AccessError> {
        let id = SourceId::parse(&self.id)
            .map_err(|error| AccessError::Configuration(error.to_string()))?;

        if self.provider.trim().is_empty() {
            return Err(AccessError::Configuration(format!(
                "source '{id}' is missing a provider name"
            )));
        }
        if self.endpoint.trim().is_empty() {
            return Err(AccessError::Configuration(format!(
                "source '{id}' is missing an endpoint"
            )));
        }
        let category = self.category.parse::<SourceCategory>()?;

        for (field, value) in [("reliability", self.reliability), ("uptime", self.uptime)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(AccessError::Configuration(format!(
                    "source '{id}' {field} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.settings.rate_limit.requests == 0 || self.settings.rate_limit.window_ms == 0 {
            return Err(AccessError::Configuration(format!(
                "source '{id}' rate limit must allow at least one request per non-empty window"
            )));
        }
        if self.settings.timeout_ms == 0 {
            return Err(AccessError::Configuration(format!(
                "source '{id}' timeout must be greater than zero"
            )));
        }
        if self.settings.max_concurrent_connections == 0 {
            return Err(AccessError::Configuration(format!(
                "source '{id}' must allow at least one concurrent connection"
            )));
        }

        Ok(Source {
            id,
            provider: self.provider.trim().to_owned(),
            category,
            endpoint: self.endpoint.trim().to_owned(),
            auth: self.auth,
            reliability: self.reliability,
            latency_ms: self.latency_ms,
            uptime: self.uptime,
            cost_per_request: self.cost_per_request,
            status: self.status,
            settings: self.settings,
        })
    }
}

/// A validated, registered source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub id: SourceId,
    pub provider: String,
    pub category: SourceCategory,
    pub endpoint: String,
    #[serde(skip)]
    pub auth: SourceAuth,
    pub reliability: f64,
    pub latency_ms: u64,
    pub uptime: f64,
    pub cost_per_request: f64,
    pub status: SourceStatus,
    pub settings: SourceSettings,
}
