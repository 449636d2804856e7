//! Credential provider abstraction
//!
//! Defines the `CredentialProvider` trait that decouples the refresh pipeline
//! from the remote service issuing tokens. A provider takes a refresh token
//! plus client credentials and returns a fresh token grant (optionally with
//! profile and usage data), or a structured failure.
//!
//! Failures carry a `FailureKind` so callers can decide account status without
//! parsing free text. Providers that only have an error string report
//! `FailureKind::Unclassified` and leave classification to the caller.

use std::future::Future;
use std::pin::Pin;

use common::Secret;
use serde::{Deserialize, Serialize};

/// Region used when an account has none recorded.
pub const DEFAULT_REGION: &str = "us-east-1";

/// How the account originally authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMethod {
    #[serde(rename = "IdC")]
    IdC,
    #[serde(rename = "social")]
    Social,
}

/// Input to a refresh-token exchange.
///
/// The refresh token and client secret are wrapped in `Secret` so the request
/// can be logged with `?request` without leaking them.
#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub refresh_token: Secret<String>,
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub region: String,
    pub auth_method: Option<AuthMethod>,
    pub provider: Option<String>,
}

/// Usage numbers reported alongside a grant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub current: f64,
    pub limit: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_reset_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_current: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_trial_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_trial_current: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_trial_expiry: Option<String>,
    /// Opaque billing metadata, stored as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_detail: Option<serde_json::Value>,
}

/// Successful refresh result.
///
/// `expires_in` is a delta in seconds from the response time; the caller
/// converts it to an absolute epoch-millisecond timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub subscription_type: Option<String>,
    #[serde(default)]
    pub subscription_title: Option<String>,
    #[serde(default)]
    pub raw_type: Option<String>,
    #[serde(default)]
    pub days_remaining: Option<u32>,
    #[serde(default)]
    pub usage: Option<UsageReport>,
}

impl TokenGrant {
    /// A grant carrying only the token triple, no profile or usage data.
    pub fn tokens(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: u64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_in: Some(expires_in),
            email: None,
            user_id: None,
            subscription_type: None,
            subscription_title: None,
            raw_type: None,
            days_remaining: None,
            usage: None,
        }
    }
}

/// Structured reason for a failed refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The account is suspended or banned upstream.
    Suspended,
    /// Credentials were refused (revoked refresh token, bad client).
    Rejected,
    /// Network error, timeout or 5xx.
    Transient,
    /// Free-text failure the provider could not categorize.
    Unclassified,
}

/// A failed refresh, with the provider's message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ProviderFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn suspended(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Suspended, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Rejected, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    pub fn unclassified(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unclassified, message)
    }
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderFailure>;

/// Abstraction over the remote service that exchanges refresh tokens.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn CredentialProvider>`).
pub trait CredentialProvider: Send + Sync {
    /// Identifier for logging (e.g. "oidc")
    fn id(&self) -> &str;

    /// Exchange the request's refresh token for a new grant.
    fn refresh<'a>(
        &'a self,
        request: &'a RefreshRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TokenGrant>> + Send + 'a>>;
}
