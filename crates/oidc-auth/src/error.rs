//! Error types for OIDC refresh and usage lookups

use provider::{FailureKind, ProviderFailure};

/// Errors from the token endpoint and usage API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("account suspended: {0}")]
    Suspended(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("usage lookup failed: {0}")]
    UsageLookup(String),

    #[error("response parse error: {0}")]
    Parse(String),
}

impl Error {
    /// Structured failure kind for the refresh pipeline.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Suspended(_) => FailureKind::Suspended,
            Error::InvalidCredentials(_) | Error::AccessDenied(_) => FailureKind::Rejected,
            Error::Http(_) | Error::TokenExchange(_) | Error::UsageLookup(_) => {
                FailureKind::Transient
            }
            Error::Parse(_) => FailureKind::Unclassified,
        }
    }
}

impl From<Error> for ProviderFailure {
    fn from(err: Error) -> Self {
        ProviderFailure::new(err.kind(), err.to_string())
    }
}

/// Result alias for OIDC operations.
pub type Result<T> = std::result::Result<T, Error>;
