use thiserror::Error;
use trustgate_core::AccessError;

/// Errors raised by the feed validator.
///
/// Validation findings (stale data, outliers, ...) are not errors: they are
/// reported inside results. These variants are reserved for precondition and
/// infrastructure failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeedError {
    #[error("invalid feed configuration: {0}")]
    Configuration(String),

    #[error("feed '{feed_id}' is not registered")]
    NotFound { feed_id: String },

    #[error("consensus needs at least {required} participants, only {available} reported")]
    InsufficientSources { required: usize, available: usize },

    #[error("need at least {required} historical points, only {available} in window")]
    InsufficientData { required: usize, available: usize },

    #[error(transparent)]
    Access(#[from] AccessError),
}

impl FeedError {
    pub fn not_found(feed_id: impl Into<String>) -> Self {
        Self::NotFound {
            feed_id: feed_id.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "feed.configuration",
            Self::NotFound { .. } => "feed.not_found",
            Self::InsufficientSources { .. } => "feed.insufficient_sources",
            Self::InsufficientData { .. } => "feed.insufficient_data",
            Self::Access(error) => error.code(),
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            Self::Configuration(_) | Self::NotFound { .. } => false,
            Self::InsufficientSources { .. } | Self::InsufficientData { .. } => true,
            Self::Access(error) => error.retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use trustgate_core::SourceId;

    use super::*;

    #[test]
    fn access_errors_keep_their_code_and_retryability() {
        let err = FeedError::from(AccessError::RateLimited {
            source_id: SourceId::parse("pyth").expect("valid id"),
            retry_after_ms: 1_000,
        });

        assert_eq!(err.code(), "access.rate_limited");
        assert!(err.retryable());
    }

    #[test]
    fn insufficient_sources_message_names_counts() {
        let err = FeedError::InsufficientSources {
            required: 3,
            available: 2,
        };
        assert_eq!(
            err.to_string(),
            "consensus needs at least 3 participants, only 2 reported"
        );
    }
}
