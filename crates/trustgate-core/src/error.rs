use thiserror::Error;

use crate::{SourceId, SourceStatus};

/// Identifier validation errors exposed by `trustgate-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("{kind} id cannot be empty")]
    Empty { kind: &'static str },
    #[error("{kind} id length {len} exceeds max {max}")]
    TooLong {
        kind: &'static str,
        len: usize,
        max: usize,
    },
    #[error("{kind} id contains invalid character '{ch}' at index {index}")]
    InvalidChar {
        kind: &'static str,
        ch: char,
        index: usize,
    },
}

/// Errors raised by the source access manager.
///
/// `CircuitOpen` and `RateLimited` are backpressure signals rather than
/// failures; callers should back off or fail over when they see them.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AccessError {
    #[error("invalid source configuration: {0}")]
    Configuration(String),

    #[error("source '{source_id}' is not registered")]
    NotFound { source_id: String },

    #[error("circuit breaker for source '{source_id}' is open, retry in {retry_after_ms}ms")]
    CircuitOpen {
        source_id: SourceId,
        retry_after_ms: u64,
    },

    #[error("source '{source_id}' exceeded its rate limit, retry in {retry_after_ms}ms")]
    RateLimited {
        source_id: SourceId,
        retry_after_ms: u64,
    },

    #[error("source '{source_id}' did not answer within {timeout_ms}ms")]
    Timeout { source_id: SourceId, timeout_ms: u64 },

    #[error("source '{source_id}' is not serving requests (status: {status})")]
    Unavailable {
        source_id: SourceId,
        status: SourceStatus,
    },

    #[error("source '{source_id}' returned a payload that failed validation: {reason}")]
    InvalidPayload { source_id: SourceId, reason: String },

    #[error("source '{source_id}' call failed: {message}")]
    Execution { source_id: SourceId, message: String },

    #[error("all candidate sources failed, last error: {last}")]
    AllSourcesFailed {
        attempted: Vec<SourceId>,
        last: Box<AccessError>,
    },
}

impl AccessError {
    pub fn not_found(source_id: impl Into<String>) -> Self {
        Self::NotFound {
            source_id: source_id.into(),
        }
    }

    pub fn execution(source_id: &SourceId, message: impl Into<String>) -> Self {
        Self::Execution {
            source_id: source_id.clone(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "access.configuration",
            Self::NotFound { .. } => "access.not_found",
            Self::CircuitOpen { .. } => "access.circuit_open",
            Self::RateLimited { .. } => "access.rate_limited",
            Self::Timeout { .. } => "access.timeout",
            Self::Unavailable { .. } => "access.unavailable",
            Self::InvalidPayload { .. } => "access.invalid_payload",
            Self::Execution { .. } => "access.execution",
            Self::AllSourcesFailed { .. } => "access.all_sources_failed",
        }
    }

    /// Whether a later attempt (or another source) can reasonably succeed.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Configuration(_) | Self::NotFound { .. } | Self::InvalidPayload { .. } => false,
            Self::CircuitOpen { .. }
            | Self::RateLimited { .. }
            | Self::Timeout { .. }
            | Self::Execution { .. } => true,
            Self::Unavailable { status, .. } => *status == SourceStatus::Maintenance,
            Self::AllSourcesFailed { last, .. } => last.retryable(),
        }
    }

    /// How long a backpressure error asks the caller to wait.
    pub const fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::CircuitOpen { retry_after_ms, .. } | Self::RateLimited { retry_after_ms, .. } => {
                Some(*retry_after_ms)
            }
            _ => None,
        }
    }

    /// True for the breaker/limiter signals that indicate load shedding.
    pub const fn is_backpressure(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. } | Self::RateLimited { .. })
    }
}

/// Failure reported by a connector or one of its connections.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ConnectorError {
    message: String,
}

impl ConnectorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {error}")]
    Io {
        path: String,
        #[source]
        error: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnv(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backpressure_errors_are_retryable() {
        let id = SourceId::parse("chainlink").expect("valid id");
        let open = AccessError::CircuitOpen {
            source_id: id.clone(),
            retry_after_ms: 5_000,
        };
        let limited = AccessError::RateLimited {
            source_id: id.clone(),
            retry_after_ms: 100,
        };

        assert!(open.retryable() && open.is_backpressure());
        assert!(limited.retryable() && limited.is_backpressure());
        assert_eq!(limited.code(), "access.rate_limited");
        assert!(!AccessError::not_found("x").retryable());
    }

    #[test]
    fn all_sources_failed_inherits_retryability_from_last_error() {
        let id = SourceId::parse("pyth").expect("valid id");
        let err = AccessError::AllSourcesFailed {
            attempted: vec![id.clone()],
            last: Box::new(AccessError::InvalidPayload {
                source_id: id,
                reason: String::from("missing field"),
            }),
        };

        assert!(!err.retryable());
        assert!(err.to_string().contains("missing field"));
    }
}
