//! Account pool interface and its JSON file implementation
//!
//! The pool is the only shared mutable resource in the refresh pipeline.
//! `AccountStore` keeps the accounts as a JSON array whose order is the pool
//! order. All writes go through a tokio Mutex and are persisted atomically, so
//! patches from background cycles and manual refreshes never interleave.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::account::{Account, AccountPatch};
use crate::error::{Error, Result};
use crate::persist::write_atomic;

/// Read and merge-patch access to managed accounts.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn AccountPool>`).
pub trait AccountPool: Send + Sync {
    /// All accounts, in pool order.
    fn list_accounts(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Account>>> + Send + '_>>;

    fn get_account<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Account>>> + Send + 'a>>;

    /// Merge `patch` into the account and persist. Returns the updated record,
    /// or `NotFound` when the id is unknown.
    fn patch_account<'a>(
        &'a self,
        id: &'a str,
        patch: AccountPatch,
    ) -> Pin<Box<dyn Future<Output = Result<Account>> + Send + 'a>>;

    /// Add an account at the end of the pool, or replace the record with the
    /// same id in place.
    fn upsert_account(&self, account: Account) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Remove an account. Returns the removed record if it existed.
    fn remove_account<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Account>>> + Send + 'a>>;
}

/// Account pool backed by a JSON file.
pub struct AccountStore {
    path: PathBuf,
    state: Mutex<Vec<Account>>,
}

impl AccountStore {
    /// Load accounts from `path`.
    ///
    /// A missing file is created as `[]`; the pool starts empty until
    /// accounts are added.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Store(format!("reading {}: {e}", path.display())))?;
            let accounts: Vec<Account> = serde_json::from_str(&contents)
                .map_err(|e| Error::Store(format!("parsing {}: {e}", path.display())))?;
            info!(path = %path.display(), accounts = accounts.len(), "loaded accounts");
            accounts
        } else {
            info!(path = %path.display(), "account file not found, starting with empty pool");
            let accounts = Vec::new();
            persist(&path, &accounts).await?;
            accounts
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub async fn list(&self) -> Vec<Account> {
        self.state.lock().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Account> {
        let state = self.state.lock().await;
        state.iter().find(|a| a.id == id).cloned()
    }

    /// Insert a new account at the end of the pool, or replace the record
    /// with the same id in place.
    pub async fn upsert(&self, account: Account) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.iter_mut().find(|a| a.id == account.id) {
            Some(existing) => *existing = account,
            None => state.push(account),
        }
        persist(&self.path, &state).await
    }

    /// Remove an account. Returns the removed record if it existed.
    pub async fn remove(&self, id: &str) -> Result<Option<Account>> {
        let mut state = self.state.lock().await;
        let Some(index) = state.iter().position(|a| a.id == id) else {
            return Ok(None);
        };
        let removed = state.remove(index);
        debug!(account_id = id, "removed account");
        persist(&self.path, &state).await?;
        Ok(Some(removed))
    }

    pub async fn patch(&self, id: &str, patch: AccountPatch) -> Result<Account> {
        let mut state = self.state.lock().await;
        let account = state
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        patch.apply(account);
        let updated = account.clone();
        debug!(account_id = id, status = %updated.status, "patched account");
        persist(&self.path, &state).await?;
        Ok(updated)
    }
}

impl AccountPool for AccountStore {
    fn list_accounts(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Account>>> + Send + '_>> {
        Box::pin(async move { Ok(self.list().await) })
    }

    fn get_account<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Account>>> + Send + 'a>> {
        Box::pin(async move { Ok(self.get(id).await) })
    }

    fn patch_account<'a>(
        &'a self,
        id: &'a str,
        patch: AccountPatch,
    ) -> Pin<Box<dyn Future<Output = Result<Account>> + Send + 'a>> {
        Box::pin(self.patch(id, patch))
    }

    fn upsert_account(&self, account: Account) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.upsert(account))
    }

    fn remove_account<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Account>>> + Send + 'a>> {
        Box::pin(self.remove(id))
    }
}

async fn persist(path: &std::path::Path, accounts: &[Account]) -> Result<()> {
    let json = serde_json::to_vec_pretty(accounts)
        .map_err(|e| Error::Store(format!("serializing accounts: {e}")))?;
    write_atomic(path, &json)
        .await
        .map_err(|e| Error::Store(format!("writing {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountStatus, Credentials, LastError};

    fn test_account(id: &str) -> Account {
        Account {
            id: id.into(),
            email: format!("{id}@example.com"),
            credentials: Credentials {
                access_token: format!("at_{id}"),
                refresh_token: Some(format!("rt_{id}")),
                expires_at: Some(1_735_500_000_000),
                ..Credentials::default()
            },
            status: AccountStatus::Active,
            ..Account::default()
        }
    }

    #[tokio::test]
    async fn cold_start_creates_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");

        let store = AccountStore::load(path.clone()).await.unwrap();
        assert!(store.list().await.is_empty());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: Vec<Account> = serde_json::from_str(&contents).unwrap();
        assert!(parsed.is_empty());
    }

    #[tokio::test]
    async fn roundtrip_preserves_pool_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");

        let store = AccountStore::load(path.clone()).await.unwrap();
        for id in ["c", "a", "b"] {
            store.upsert(test_account(id)).await.unwrap();
        }

        let reloaded = AccountStore::load(path).await.unwrap();
        let ids: Vec<String> = reloaded.list().await.into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn upsert_replaces_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = AccountStore::load(dir.path().join("accounts.json"))
            .await
            .unwrap();
        store.upsert(test_account("a")).await.unwrap();
        store.upsert(test_account("b")).await.unwrap();

        let mut edited = test_account("a");
        edited.email = "renamed@example.com".into();
        store.upsert(edited).await.unwrap();

        let accounts = store.list().await;
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].id, "a");
        assert_eq!(accounts[0].email, "renamed@example.com");
    }

    #[tokio::test]
    async fn remove_returns_record_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = AccountStore::load(dir.path().join("accounts.json"))
            .await
            .unwrap();
        store.upsert(test_account("a")).await.unwrap();

        assert!(store.remove("a").await.unwrap().is_some());
        assert!(store.remove("a").await.unwrap().is_none());
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn patch_merges_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let store = AccountStore::load(path.clone()).await.unwrap();
        store.upsert(test_account("a")).await.unwrap();

        let updated = store
            .patch(
                "a",
                AccountPatch {
                    status: Some(AccountStatus::Error),
                    last_error: LastError::Set("invalid_grant".into()),
                    ..AccountPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, AccountStatus::Error);
        assert_eq!(updated.credentials.access_token, "at_a");

        let reloaded = AccountStore::load(path).await.unwrap();
        let acct = reloaded.get("a").await.unwrap();
        assert_eq!(acct.status, AccountStatus::Error);
        assert_eq!(acct.last_error.as_deref(), Some("invalid_grant"));
    }

    #[tokio::test]
    async fn patch_unknown_account_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = AccountStore::load(dir.path().join("accounts.json"))
            .await
            .unwrap();
        let err = store
            .patch("ghost", AccountPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(ref id) if id == "ghost"));
    }

    #[tokio::test]
    async fn corrupt_file_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let err = AccountStore::load(path).await.err().unwrap();
        assert!(matches!(err, Error::Store(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn concurrent_patches_dont_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let store = std::sync::Arc::new(AccountStore::load(path.clone()).await.unwrap());
        for i in 0..10 {
            store.upsert(test_account(&format!("acct-{i}"))).await.unwrap();
        }

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .patch_account(
                        &format!("acct-{i}"),
                        AccountPatch {
                            last_used_at: Some(i),
                            ..AccountPatch::default()
                        },
                    )
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: Vec<Account> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 10);
        for (i, acct) in parsed.iter().enumerate() {
            assert_eq!(acct.last_used_at, i as i64);
        }
    }

    #[tokio::test]
    async fn patch_keeps_fields_written_by_other_tools() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        tokio::fs::write(
            &path,
            r#"[{
                "id": "a",
                "label": "work",
                "credentials": {"accessToken": "at", "csrfToken": "csrf-1", "startUrl": "https://d-123.awsapps.com/start"},
                "subscription": {"type": "PRO", "expiresAt": 1800000000000},
                "usage": {"current": 1.0, "limit": 50.0, "bonuses": [{"code": "WELCOME"}]},
                "status": "active"
            }]"#,
        )
        .await
        .unwrap();

        let store = AccountStore::load(path.clone()).await.unwrap();
        store
            .patch("a", AccountPatch::failure(AccountStatus::Error, "invalid_grant"))
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let written: serde_json::Value = serde_json::from_str(&contents).unwrap();
        let acct = &written[0];
        assert_eq!(acct["status"], "error");
        assert_eq!(acct["label"], "work");
        assert_eq!(acct["credentials"]["csrfToken"], "csrf-1");
        assert_eq!(acct["credentials"]["startUrl"], "https://d-123.awsapps.com/start");
        assert_eq!(acct["subscription"]["expiresAt"], 1_800_000_000_000i64);
        assert_eq!(acct["usage"]["bonuses"][0]["code"], "WELCOME");
    }
}
