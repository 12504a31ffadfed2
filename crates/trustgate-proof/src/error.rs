use thiserror::Error;

/// Errors raised by the proof verifier.
///
/// Failed checks are not errors: they are reported inside the
/// [`DataVerificationResult`](crate::DataVerificationResult). These variants
/// cover requests that could not be evaluated at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("invalid verifier configuration: {0}")]
    Configuration(String),

    #[error("malformed proof: {0}")]
    MalformedProof(String),

    #[error("comparison lookup failed: {0}")]
    Comparison(String),

    #[error("verification did not finish within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl VerifyError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "verify.configuration",
            Self::MalformedProof(_) => "verify.malformed_proof",
            Self::Comparison(_) => "verify.comparison",
            Self::Timeout { .. } => "verify.timeout",
        }
    }

    pub const fn retryable(&self) -> bool {
        matches!(self, Self::Comparison(_) | Self::Timeout { .. })
    }
}
