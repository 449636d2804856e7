//! Map refresh failures to account status
//!
//! Providers that know why a refresh failed report a `FailureKind`; that is
//! used directly. Free-text failures fall back to matching suspension
//! phrasing in the message. Anything that is not a suspension is an error:
//! the account is frozen either way until an operator acts.

use provider::{FailureKind, ProviderFailure};

use crate::account::AccountStatus;

/// Suspension phrases in provider error messages, lowercase.
const SUSPENSION_PATTERNS: &[&str] = &[
    "suspended",
    "banned",
    "封禁",
    "account is locked",
    "temporarily_suspended",
    "permanently_suspended",
];

pub fn classify(failure: &ProviderFailure) -> AccountStatus {
    match failure.kind {
        FailureKind::Suspended => AccountStatus::Suspended,
        FailureKind::Rejected | FailureKind::Transient => AccountStatus::Error,
        FailureKind::Unclassified => classify_message(&failure.message),
    }
}

/// Case-insensitive substring match against known suspension phrasing.
pub fn classify_message(message: &str) -> AccountStatus {
    let lower = message.to_lowercase();
    if SUSPENSION_PATTERNS.iter().any(|p| lower.contains(p)) {
        AccountStatus::Suspended
    } else {
        AccountStatus::Error
    }
}
