//! In-memory collaborators for unit tests

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use provider::{CredentialProvider, ProviderFailure, RefreshRequest, TokenGrant, UsageReport};

use crate::account::{Account, AccountPatch, AccountStatus, Credentials};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::store::AccountPool;

/// Active account with complete refresh credentials. The refresh token is
/// `rt_{id}`, which `ScriptedProvider` uses to pick a scripted outcome.
pub fn account_expiring_at(id: &str, expires_at: i64) -> Account {
    Account {
        id: id.into(),
        email: format!("{id}@example.com"),
        credentials: Credentials {
            access_token: format!("at_{id}"),
            refresh_token: Some(format!("rt_{id}")),
            client_id: Some(format!("client_{id}")),
            client_secret: Some(format!("secret_{id}")),
            region: Some("us-east-1".into()),
            expires_at: Some(expires_at),
            ..Credentials::default()
        },
        status: AccountStatus::Active,
        ..Account::default()
    }
}

pub fn grant_with_usage(
    access: &str,
    refresh: &str,
    expires_in: Option<u64>,
    current: f64,
    limit: f64,
) -> TokenGrant {
    TokenGrant {
        expires_in,
        email: Some("fresh@example.com".into()),
        user_id: Some("user-fresh".into()),
        subscription_type: Some("PRO".into()),
        subscription_title: Some("Pro".into()),
        raw_type: Some("PRO".into()),
        days_remaining: Some(12),
        usage: Some(UsageReport {
            current,
            limit,
            next_reset_date: Some("2026-11-01T00:00:00Z".into()),
            ..UsageReport::default()
        }),
        ..TokenGrant::tokens(access, refresh, 0)
    }
}

/// Account pool held in memory, counting patches.
#[derive(Default)]
pub struct MemoryPool {
    accounts: Mutex<Vec<Account>>,
    patched: Mutex<Vec<String>>,
    fail_listing: AtomicBool,
}

impl MemoryPool {
    pub fn new(accounts: Vec<Account>) -> Self {
        Self {
            accounts: Mutex::new(accounts),
            ..Self::default()
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.accounts.lock().unwrap().iter().any(|a| a.id == id)
    }

    pub fn account(&self, id: &str) -> Account {
        self.accounts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .unwrap_or_else(|| panic!("no account {id}"))
    }

    pub fn patch_count(&self) -> usize {
        self.patched.lock().unwrap().len()
    }

    pub fn patched_ids(&self) -> Vec<String> {
        self.patched.lock().unwrap().clone()
    }

    /// Make `list_accounts` fail until reset.
    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }
}

impl AccountPool for MemoryPool {
    fn list_accounts(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Account>>> + Send + '_>> {
        Box::pin(async move {
            if self.fail_listing.load(Ordering::SeqCst) {
                return Err(Error::Store("listing unavailable".into()));
            }
            Ok(self.accounts.lock().unwrap().clone())
        })
    }

    fn get_account<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Account>>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self
                .accounts
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.id == id)
                .cloned())
        })
    }

    fn patch_account<'a>(
        &'a self,
        id: &'a str,
        patch: AccountPatch,
    ) -> Pin<Box<dyn Future<Output = Result<Account>> + Send + 'a>> {
        Box::pin(async move {
            let mut accounts = self.accounts.lock().unwrap();
            let account = accounts
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            patch.apply(account);
            self.patched.lock().unwrap().push(id.to_string());
            Ok(account.clone())
        })
    }

    fn upsert_account(&self, account: Account) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut accounts = self.accounts.lock().unwrap();
            match accounts.iter_mut().find(|a| a.id == account.id) {
                Some(existing) => *existing = account,
                None => accounts.push(account),
            }
            Ok(())
        })
    }

    fn remove_account<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Account>>> + Send + 'a>> {
        Box::pin(async move {
            let mut accounts = self.accounts.lock().unwrap();
            let index = accounts.iter().position(|a| a.id == id);
            Ok(index.map(|i| accounts.remove(i)))
        })
    }
}

/// Provider whose outcome per refresh token is scripted up front.
/// Unscripted tokens succeed with a one-hour token-only grant.
#[derive(Default)]
pub struct ScriptedProvider {
    outcomes: Mutex<HashMap<String, std::result::Result<TokenGrant, ProviderFailure>>>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    call_order: Mutex<Vec<String>>,
    latency: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each call sleeps for `latency` (use with paused time).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn succeed(&self, account_id: &str, grant: TokenGrant) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(format!("rt_{account_id}"), Ok(grant));
    }

    pub fn fail(&self, account_id: &str, failure: ProviderFailure) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(format!("rt_{account_id}"), Err(failure));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of refreshes observed running at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Account ids in the order their refreshes started.
    pub fn call_order(&self) -> Vec<String> {
        self.call_order.lock().unwrap().clone()
    }
}

impl CredentialProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn refresh<'a>(
        &'a self,
        request: &'a RefreshRequest,
    ) -> Pin<Box<dyn Future<Output = provider::Result<TokenGrant>> + Send + 'a>> {
        Box::pin(async move {
            let token = request.refresh_token.expose().clone();
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.call_order
                .lock()
                .unwrap()
                .push(token.trim_start_matches("rt_").to_string());
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);

            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }

            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .get(&token)
                .cloned()
                .unwrap_or_else(|| Ok(TokenGrant::tokens("at_fresh", "rt_fresh", 3600)));
            self.active.fetch_sub(1, Ordering::SeqCst);
            outcome
        })
    }
}

/// Clock set by hand.
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self(AtomicI64::new(now_ms))
    }

    pub fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}
