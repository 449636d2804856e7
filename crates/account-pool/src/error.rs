//! Error types for account refresh operations

use crate::account::AccountStatus;

/// Errors from the account store, settings store and refresh pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("account not found: {0}")]
    NotFound(String),

    #[error("account store error: {0}")]
    Store(String),

    #[error("settings store error: {0}")]
    Settings(String),

    #[error("missing refresh credentials: {0}")]
    MissingCredentials(String),

    /// The provider refused or failed the refresh. `status` is what the
    /// account was set to.
    #[error("refresh failed ({status}): {message}")]
    RefreshFailed {
        status: AccountStatus,
        message: String,
    },

    #[error("refresh already in progress for account {0}")]
    RefreshInProgress(String),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
