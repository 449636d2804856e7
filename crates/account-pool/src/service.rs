//! Refresh service: the wiring operators talk to
//!
//! Owns the settings, executor, cycle and scheduler for one account pool.
//! Collaborators are injected, so several services can coexist (tests run
//! many side by side). Setters validate, persist, then apply side effects.

use std::sync::{Arc, RwLock};

use provider::CredentialProvider;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::account::{Account, AccountPatch, AccountStatus, CredentialsEdit, LastError};
use crate::clock::Clock;
use crate::config::{
    AUTO_REFRESH_CONFIG_KEY, RefreshConfig, validate_concurrency, validate_interval,
    validate_max_batch_size,
};
use crate::cycle::{CycleOutcome, RefreshCycle};
use crate::error::{Error, Result};
use crate::executor::{RefreshExecutor, RefreshMode};
use crate::scheduler::Scheduler;
use crate::settings::SettingsStore;
use crate::store::AccountPool;

/// Snapshot for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    #[serde(flatten)]
    pub config: RefreshConfig,
    pub running: bool,
    pub cycle_in_progress: bool,
    /// Seconds until the next scheduled cycle, when running.
    pub next_check_in_secs: Option<u64>,
}

pub struct RefreshService {
    settings: SettingsStore,
    config: Arc<RwLock<RefreshConfig>>,
    /// Serializes setters so concurrent updates don't lose writes.
    config_write: Mutex<()>,
    executor: Arc<RefreshExecutor>,
    cycle: Arc<RefreshCycle>,
    scheduler: Scheduler,
}

impl RefreshService {
    /// Build the service and start the scheduler if auto-refresh is enabled.
    pub async fn load(
        pool: Arc<dyn AccountPool>,
        provider: Arc<dyn CredentialProvider>,
        clock: Arc<dyn Clock>,
        settings: SettingsStore,
    ) -> Result<Self> {
        let initial = RefreshConfig::load(&settings).await?;
        let config = Arc::new(RwLock::new(initial));
        let executor = Arc::new(RefreshExecutor::new(pool, provider, clock));
        let cycle = Arc::new(RefreshCycle::new(executor.clone(), config.clone()));
        let scheduler = Scheduler::new(cycle.clone());

        let service = Self {
            settings,
            config,
            config_write: Mutex::new(()),
            executor,
            cycle,
            scheduler,
        };
        if initial.enabled {
            service.scheduler.start(initial.interval_duration());
        }
        info!(enabled = initial.enabled, interval_minutes = initial.interval, "refresh service ready");
        Ok(service)
    }

    pub fn config(&self) -> RefreshConfig {
        *self.config.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `change` to a copy of the config, persist it, then publish it.
    async fn update(&self, change: impl FnOnce(&mut RefreshConfig)) -> Result<RefreshConfig> {
        self.update_then(change, |_| {}).await
    }

    /// Like `update`, running `effect` before the write lock is released so
    /// side effects are applied in the same order as the persisted values.
    async fn update_then(
        &self,
        change: impl FnOnce(&mut RefreshConfig),
        effect: impl FnOnce(&RefreshConfig),
    ) -> Result<RefreshConfig> {
        let _write = self.config_write.lock().await;
        let mut next = self.config();
        change(&mut next);
        self.settings.set(AUTO_REFRESH_CONFIG_KEY, &next).await?;
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = next;
        effect(&next);
        Ok(next)
    }

    /// Turn auto-refresh on or off. Enabling (re)starts the scheduler, so a
    /// new interval takes effect immediately.
    pub async fn set_auto_refresh(
        &self,
        enabled: bool,
        interval: Option<f64>,
    ) -> Result<RefreshConfig> {
        if let Some(minutes) = interval {
            validate_interval(minutes)?;
        }
        let config = self
            .update_then(
                |c| {
                    c.enabled = enabled;
                    if let Some(minutes) = interval {
                        c.interval = minutes;
                    }
                },
                |c| {
                    if c.enabled {
                        self.scheduler.start(c.interval_duration());
                    } else {
                        self.scheduler.stop();
                    }
                },
            )
            .await?;
        info!(enabled, interval_minutes = config.interval, "auto-refresh updated");
        Ok(config)
    }

    /// Takes effect from the next cycle.
    pub async fn set_sync_info(&self, sync_info: bool) -> Result<RefreshConfig> {
        let config = self.update(|c| c.sync_info = sync_info).await?;
        info!(sync_info, "refresh mode updated");
        Ok(config)
    }

    pub async fn set_max_batch_size(&self, size: u32) -> Result<RefreshConfig> {
        validate_max_batch_size(size)?;
        let config = self.update(|c| c.max_batch_size = size).await?;
        info!(max_batch_size = size, "batch size updated");
        Ok(config)
    }

    pub async fn set_concurrency(&self, count: u32) -> Result<RefreshConfig> {
        validate_concurrency(count)?;
        let config = self.update(|c| c.concurrency = count).await?;
        info!(concurrency = count, "refresh concurrency updated");
        Ok(config)
    }

    /// Refresh one account now, regardless of eligibility or frozen status.
    /// `mode` defaults to the configured `syncInfo`.
    pub async fn refresh_account(&self, id: &str, mode: Option<RefreshMode>) -> Result<AccountPatch> {
        let mode = mode.unwrap_or_else(|| self.config().mode());
        info!(account_id = id, mode = mode.label(), "manual refresh requested");
        self.executor.refresh(id, mode).await
    }

    /// Operator edit of an account's credentials and email. Clears a frozen
    /// status back to active. An unknown id creates a new account in the
    /// `unknown` state. Refused with `RefreshInProgress` while the account is
    /// being refreshed.
    pub async fn edit_account(
        &self,
        id: &str,
        email: Option<String>,
        credentials: CredentialsEdit,
    ) -> Result<Account> {
        let _claim = self.executor.claim(id)?;
        let pool = self.executor.pool();
        let patch = AccountPatch {
            email,
            credentials: Some(credentials),
            status: Some(AccountStatus::Active),
            last_error: LastError::Clear,
            ..AccountPatch::default()
        };
        match pool.patch_account(id, patch.clone()).await {
            Ok(account) => {
                info!(account_id = id, "account credentials edited");
                Ok(account)
            }
            Err(Error::NotFound(_)) => {
                let mut account = Account {
                    id: id.to_string(),
                    ..Account::default()
                };
                patch.apply(&mut account);
                account.status = AccountStatus::Unknown;
                pool.upsert_account(account.clone()).await?;
                info!(account_id = id, "account added");
                Ok(account)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove an account from the pool. Refused while it is being refreshed.
    pub async fn remove_account(&self, id: &str) -> Result<Account> {
        let _claim = self.executor.claim(id)?;
        let removed = self
            .executor
            .pool()
            .remove_account(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        info!(account_id = id, "account removed");
        Ok(removed)
    }

    /// Run a cycle now and wait for it. Honors the single-cycle guard and the
    /// enabled flag.
    pub async fn trigger_cycle(&self) -> Result<CycleOutcome> {
        info!("manual refresh cycle requested");
        self.cycle.run().await
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.executor.pool().list_accounts().await
    }

    pub fn now_ms(&self) -> i64 {
        self.executor.clock().now_ms()
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            config: self.config(),
            running: self.scheduler.is_running(),
            cycle_in_progress: self.scheduler.cycle_in_progress(),
            next_check_in_secs: self.scheduler.next_check_in().map(|d| d.as_secs()),
        }
    }

    /// Stop the scheduler. A cycle already executing finishes on its own.
    pub fn shutdown(&self) {
        self.scheduler.stop();
        info!("refresh service stopped");
    }

    /// Wait for the running cycle, if any. Use after `shutdown`.
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }
}
