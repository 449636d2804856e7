//! Account records and merge patches
//!
//! An `Account` is persisted in camelCase JSON. Fields this crate does not
//! manage (labels, tags, csrf tokens, bonus grants written by other tools) are
//! kept in an `extra` map at every level and written back untouched.
//!
//! Status transitions driven by refresh outcomes:
//! - Unknown → Active (first successful refresh)
//! - Active → Active (successful cycle)
//! - Active → Expired (derived only, see `Account::effective_status`)
//! - Active/Expired → Error (refresh failure, not a suspension)
//! - Active/Expired → Suspended (suspension detected)
//! - Suspended/Error → Active (manual refresh or credential edit)

use std::fmt;

use provider::AuthMethod;
use serde::{Deserialize, Serialize};

/// Persisted account status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Expired,
    Error,
    Refreshing,
    #[default]
    Unknown,
    Suspended,
}

impl AccountStatus {
    /// Status label for logs, metrics and the admin API.
    pub fn label(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Expired => "expired",
            AccountStatus::Error => "error",
            AccountStatus::Refreshing => "refreshing",
            AccountStatus::Unknown => "unknown",
            AccountStatus::Suspended => "suspended",
        }
    }

    /// Frozen accounts are never refreshed automatically.
    pub fn is_frozen(&self) -> bool {
        matches!(self, AccountStatus::Suspended | AccountStatus::Error)
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Token material and client registration for one account.
///
/// `expires_at` is epoch milliseconds. `None` means the account has never
/// been checked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default)]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<AuthMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Credentials {
    /// Names of the fields a refresh needs that are absent or empty.
    pub fn missing_refresh_fields(&self) -> Vec<&'static str> {
        let blank = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
        let mut missing = Vec::new();
        if blank(&self.refresh_token) {
            missing.push("refreshToken");
        }
        if blank(&self.client_id) {
            missing.push("clientId");
        }
        if blank(&self.client_secret) {
            missing.push("clientSecret");
        }
        missing
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Usage snapshot. `percent_used` is a fraction (0.25 = 25%).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default)]
    pub current: f64,
    #[serde(default)]
    pub limit: f64,
    #[serde(default)]
    pub percent_used: f64,
    #[serde(default)]
    pub last_updated: i64,
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_detail: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_used_at: i64,
    #[serde(default)]
    pub subscription: Subscription,
    #[serde(default)]
    pub usage: Usage,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Account {
    /// Status as shown to operators: an active account whose token has
    /// lapsed reads as expired. Never persisted.
    pub fn effective_status(&self, now_ms: i64) -> AccountStatus {
        match (self.status, self.credentials.expires_at) {
            (AccountStatus::Active, Some(expires_at)) if expires_at <= now_ms => {
                AccountStatus::Expired
            }
            (status, _) => status,
        }
    }
}

/// Operator edit of an account's credentials. Absent fields are kept.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CredentialsEdit {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub region: Option<String>,
    pub expires_at: Option<i64>,
    pub auth_method: Option<AuthMethod>,
    pub provider: Option<String>,
}

impl CredentialsEdit {
    fn apply(&self, creds: &mut Credentials) {
        if let Some(access_token) = &self.access_token {
            creds.access_token = access_token.clone();
        }
        let optional = [
            (&self.refresh_token, &mut creds.refresh_token),
            (&self.client_id, &mut creds.client_id),
            (&self.client_secret, &mut creds.client_secret),
            (&self.region, &mut creds.region),
            (&self.provider, &mut creds.provider),
        ];
        for (edit, field) in optional {
            if let Some(value) = edit {
                *field = Some(value.clone());
            }
        }
        if let Some(expires_at) = self.expires_at {
            creds.expires_at = Some(expires_at);
        }
        if let Some(auth_method) = self.auth_method {
            creds.auth_method = Some(auth_method);
        }
    }
}

/// New token triple written by a successful refresh. Always applied as one
/// unit so the stored tokens never mix generations.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenUpdate {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
}

/// Tri-state update for `last_error`.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum LastError {
    #[default]
    Unchanged,
    Set(String),
    Clear,
}

/// Merge patch for an account. `None` / `Unchanged` leaves a field as is.
///
/// `subscription` and `usage` replace the modelled fields of their targets;
/// keys the target carries in `extra` survive unless the patch sets them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountPatch {
    pub tokens: Option<TokenUpdate>,
    pub credentials: Option<CredentialsEdit>,
    pub email: Option<String>,
    pub user_id: Option<String>,
    pub status: Option<AccountStatus>,
    pub last_error: LastError,
    pub last_used_at: Option<i64>,
    pub subscription: Option<Subscription>,
    pub usage: Option<Usage>,
}

impl AccountPatch {
    /// Patch recording a failed refresh.
    pub fn failure(status: AccountStatus, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            last_error: LastError::Set(message.into()),
            ..Self::default()
        }
    }

    pub fn apply(&self, account: &mut Account) {
        if let Some(edit) = &self.credentials {
            edit.apply(&mut account.credentials);
        }
        if let Some(tokens) = &self.tokens {
            account.credentials.access_token = tokens.access_token.clone();
            account.credentials.refresh_token = Some(tokens.refresh_token.clone());
            account.credentials.expires_at = Some(tokens.expires_at);
        }
        if let Some(email) = &self.email {
            account.email = email.clone();
        }
        if let Some(user_id) = &self.user_id {
            account.user_id = Some(user_id.clone());
        }
        if let Some(status) = self.status {
            account.status = status;
        }
        match &self.last_error {
            LastError::Unchanged => {}
            LastError::Set(message) => account.last_error = Some(message.clone()),
            LastError::Clear => account.last_error = None,
        }
        if let Some(last_used_at) = self.last_used_at {
            account.last_used_at = last_used_at;
        }
        if let Some(subscription) = &self.subscription {
            let kept = std::mem::take(&mut account.subscription.extra);
            account.subscription = subscription.clone();
            merge_extra(&mut account.subscription.extra, kept);
        }
        if let Some(usage) = &self.usage {
            let kept = std::mem::take(&mut account.usage.extra);
            account.usage = usage.clone();
            merge_extra(&mut account.usage.extra, kept);
        }
    }
}

fn merge_extra(
    target: &mut serde_json::Map<String, serde_json::Value>,
    kept: serde_json::Map<String, serde_json::Value>,
) {
    for (key, value) in kept {
        target.entry(key).or_insert(value);
    }
}
