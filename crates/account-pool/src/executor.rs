//! Single-account refresh
//!
//! The executor exchanges one account's refresh token through the
//! `CredentialProvider` and writes the outcome back with exactly one
//! `patch_account` call. It owns the in-flight set shared by scheduled cycles
//! and manual refreshes, so an account never has two refreshes outstanding.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use provider::{CredentialProvider, DEFAULT_REGION, RefreshRequest, TokenGrant};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::account::{
    Account, AccountPatch, AccountStatus, LastError, Subscription, TokenUpdate, Usage,
};
use crate::classify::classify;
use crate::clock::Clock;
use crate::eligibility::{REFRESH_THRESHOLD_MS, is_eligible};
use crate::error::{Error, Result};
use crate::metrics;
use crate::store::AccountPool;

/// Token lifetime assumed when the provider omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// What a successful refresh writes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// Tokens plus profile, subscription and usage.
    Full,
    /// Token triple and status only.
    Token,
}

impl RefreshMode {
    pub fn from_sync_info(sync_info: bool) -> Self {
        if sync_info {
            RefreshMode::Full
        } else {
            RefreshMode::Token
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RefreshMode::Full => "full",
            RefreshMode::Token => "token",
        }
    }
}

pub struct RefreshExecutor {
    pool: Arc<dyn AccountPool>,
    provider: Arc<dyn CredentialProvider>,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashSet<String>>,
}

/// Removes the account from the in-flight set when the attempt ends,
/// including on cancellation.
pub struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.id);
    }
}

impl RefreshExecutor {
    pub fn new(
        pool: Arc<dyn AccountPool>,
        provider: Arc<dyn CredentialProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            provider,
            clock,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn pool(&self) -> &Arc<dyn AccountPool> {
        &self.pool
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Whether a refresh for `id` is currently outstanding.
    pub fn is_in_flight(&self, id: &str) -> bool {
        let set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.contains(id)
    }

    /// Hold `id` against refreshes while an operator edits or removes it.
    pub fn claim(&self, id: &str) -> Result<InFlightGuard<'_>> {
        self.try_begin(id)
            .ok_or_else(|| Error::RefreshInProgress(id.to_string()))
    }

    fn try_begin(&self, id: &str) -> Option<InFlightGuard<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            id: id.to_string(),
        })
    }

    /// Refresh one account on operator request and persist the outcome.
    ///
    /// Runs regardless of eligibility or frozen status. Returns the patch
    /// that was written on success. On failure the account has already been
    /// patched with the classified status and message. `RefreshInProgress`
    /// and `NotFound` write nothing.
    pub async fn refresh(&self, id: &str, mode: RefreshMode) -> Result<AccountPatch> {
        let Some(_guard) = self.try_begin(id) else {
            return Err(self.in_progress(id, mode));
        };
        let account = self
            .pool
            .get_account(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        self.execute(&account, mode).await
    }

    /// Refresh one account for a scheduled cycle.
    ///
    /// The cycle's listing may be stale by the time a worker reaches the
    /// account, so the stored record is re-read after the in-flight claim and
    /// eligibility is checked again. Returns `Ok(None)` when the account was
    /// removed, frozen or refreshed since the listing.
    pub async fn refresh_if_due(&self, id: &str, mode: RefreshMode) -> Result<Option<AccountPatch>> {
        let Some(_guard) = self.try_begin(id) else {
            return Err(self.in_progress(id, mode));
        };
        let Some(account) = self.pool.get_account(id).await? else {
            debug!(account_id = id, "account removed since listing, skipping");
            return Ok(None);
        };
        if !is_eligible(&account, self.clock.now_ms(), REFRESH_THRESHOLD_MS) {
            debug!(account_id = id, status = %account.status, "account no longer due, skipping");
            metrics::record_refresh(mode.label(), "not_due");
            return Ok(None);
        }
        self.execute(&account, mode).await.map(Some)
    }

    fn in_progress(&self, id: &str, mode: RefreshMode) -> Error {
        debug!(account_id = id, "refresh already in flight, not starting another");
        metrics::record_refresh(mode.label(), "in_progress");
        Error::RefreshInProgress(id.to_string())
    }

    /// Caller holds the in-flight claim and passes the freshly read record.
    async fn execute(&self, account: &Account, mode: RefreshMode) -> Result<AccountPatch> {
        let missing = account.credentials.missing_refresh_fields();
        if !missing.is_empty() {
            let fields = missing.join(", ");
            warn!(account_id = %account.id, missing = %fields, "account lacks refresh credentials");
            self.pool
                .patch_account(
                    &account.id,
                    AccountPatch::failure(
                        AccountStatus::Error,
                        format!("missing refresh credentials: {fields}"),
                    ),
                )
                .await?;
            metrics::record_refresh(mode.label(), "missing_credentials");
            return Err(Error::MissingCredentials(fields));
        }

        let request = build_request(account);
        debug!(
            account_id = %account.id,
            provider = self.provider.id(),
            mode = mode.label(),
            region = %request.region,
            "refreshing account"
        );

        match self.provider.refresh(&request).await {
            Ok(grant) => {
                let now = self.clock.now_ms();
                let patch = success_patch(account, grant, mode, now);
                self.pool.patch_account(&account.id, patch.clone()).await?;
                metrics::record_refresh(mode.label(), AccountStatus::Active.label());
                info!(account_id = %account.id, mode = mode.label(), "account refreshed");
                Ok(patch)
            }
            Err(failure) => {
                let status = classify(&failure);
                warn!(
                    account_id = %account.id,
                    status = %status,
                    kind = ?failure.kind,
                    error = %failure.message,
                    "account refresh failed"
                );
                self.pool
                    .patch_account(
                        &account.id,
                        AccountPatch::failure(status, failure.message.clone()),
                    )
                    .await?;
                metrics::record_refresh(mode.label(), status.label());
                Err(Error::RefreshFailed {
                    status,
                    message: failure.message,
                })
            }
        }
    }
}

fn build_request(account: &Account) -> RefreshRequest {
    let creds = &account.credentials;
    RefreshRequest {
        refresh_token: creds.refresh_token.clone().unwrap_or_default().into(),
        client_id: creds.client_id.clone().unwrap_or_default(),
        client_secret: creds.client_secret.clone().unwrap_or_default().into(),
        region: creds
            .region
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string()),
        auth_method: creds.auth_method,
        provider: creds.provider.clone(),
    }
}

/// Absolute expiry in epoch milliseconds. Saturates on absurd lifetimes.
fn expires_at(now: i64, expires_in: Option<u64>) -> i64 {
    let secs = i64::try_from(expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS)).unwrap_or(i64::MAX);
    now.saturating_add(secs.saturating_mul(1000))
}

fn success_patch(account: &Account, grant: TokenGrant, mode: RefreshMode, now: i64) -> AccountPatch {
    let mut patch = AccountPatch {
        tokens: Some(TokenUpdate {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: expires_at(now, grant.expires_in),
        }),
        status: Some(AccountStatus::Active),
        last_error: LastError::Clear,
        ..AccountPatch::default()
    };

    if mode == RefreshMode::Token {
        return patch;
    }

    patch.email = grant.email.filter(|e| !e.is_empty());
    patch.user_id = grant.user_id.filter(|u| !u.is_empty());
    patch.subscription = Some(Subscription {
        subscription_type: grant.subscription_type,
        title: grant.subscription_title,
        raw_type: grant.raw_type,
        days_remaining: grant.days_remaining,
        extra: serde_json::Map::new(),
    });
    patch.usage = grant.usage.map(|report| Usage {
        percent_used: if report.limit > 0.0 {
            report.current / report.limit
        } else {
            0.0
        },
        current: report.current,
        limit: report.limit,
        last_updated: now,
        next_reset_date: report.next_reset_date,
        base_limit: report.base_limit,
        base_current: report.base_current,
        free_trial_limit: report.free_trial_limit,
        free_trial_current: report.free_trial_current,
        free_trial_expiry: report.free_trial_expiry,
        resource_detail: report.resource_detail,
        extra: serde_json::Map::new(),
    });
    patch.last_used_at = Some(now);

    debug!(
        account_id = %account.id,
        usage_before = account.usage.current,
        usage_after = patch.usage.as_ref().map(|u| u.current),
        "full sync collected"
    );
    patch
}
