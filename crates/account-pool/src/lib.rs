//! Credential lifecycle management for a pool of accounts
//!
//! Keeps every account's short-lived access token valid. A scheduler runs
//! periodic cycles; each cycle picks the accounts whose tokens expire within
//! ten minutes and refreshes them through a `CredentialProvider` with bounded
//! concurrency, writing each outcome back to the `AccountPool` in one patch.
//!
//! Refresh lifecycle:
//! 1. `Scheduler` tick (or a manual trigger) runs a `RefreshCycle`
//! 2. `eligibility::partition` selects due accounts, skipping frozen ones
//! 3. `batch::run_batch` truncates to `maxBatchSize` and fans out to workers
//! 4. `RefreshExecutor` calls the provider and patches the account
//! 5. Failures are mapped to `suspended` or `error` by `classify`
//!
//! `RefreshService` wires these together with the persisted `RefreshConfig`.

pub mod account;
pub mod batch;
pub mod classify;
pub mod clock;
pub mod config;
pub mod cycle;
pub mod eligibility;
pub mod error;
pub mod executor;
pub mod metrics;
mod persist;
pub mod scheduler;
pub mod service;
pub mod settings;
pub mod store;

#[cfg(test)]
mod testing;

pub use account::{
    Account, AccountPatch, AccountStatus, Credentials, CredentialsEdit, LastError, Subscription,
    TokenUpdate, Usage,
};
pub use batch::{BatchLimits, BatchSummary, INTER_REQUEST_DELAY};
pub use classify::{classify, classify_message};
pub use clock::{Clock, SystemClock};
pub use config::{AUTO_REFRESH_CONFIG_KEY, RefreshConfig};
pub use cycle::{CycleOutcome, CycleReport};
pub use eligibility::{REFRESH_THRESHOLD, is_eligible};
pub use error::{Error, Result};
pub use executor::{RefreshExecutor, RefreshMode};
pub use service::{RefreshService, ServiceStatus};
pub use settings::SettingsStore;
pub use store::{AccountPool, AccountStore};
