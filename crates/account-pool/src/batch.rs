//! Bounded fan-out of one cycle's refreshes
//!
//! The eligible accounts are truncated to `max_batch_size` (pool order), then
//! `concurrency` worker slots pull from a shared queue. A slot refreshes one
//! account at a time and pauses `inter_request_delay` before taking its next
//! one, which spaces out calls to the token endpoint. Individual failures are
//! counted, never fatal to the batch.
//!
//! Only ids travel through the queue. The executor re-reads each record when
//! a slot reaches it, so an account frozen or refreshed by an operator after
//! the cycle listed the pool is skipped instead of overwritten.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::account::Account;
use crate::error::Error;
use crate::executor::{RefreshExecutor, RefreshMode};

/// Pause a worker slot takes between two accounts.
pub const INTER_REQUEST_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_batch_size: usize,
    pub concurrency: usize,
    pub inter_request_delay: Duration,
}

impl BatchLimits {
    pub fn new(max_batch_size: usize, concurrency: usize) -> Self {
        Self {
            max_batch_size,
            concurrency,
            inter_request_delay: INTER_REQUEST_DELAY,
        }
    }
}

/// Counts for one batch. `skipped_in_flight` are accounts a manual refresh
/// was already handling. `skipped_not_due` were removed, frozen or refreshed
/// between the listing and their turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_in_flight: usize,
    pub skipped_not_due: usize,
}

impl BatchSummary {
    fn merge(&mut self, other: BatchSummary) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped_in_flight += other.skipped_in_flight;
        self.skipped_not_due += other.skipped_not_due;
    }
}

pub async fn run_batch(
    executor: Arc<RefreshExecutor>,
    mut eligible: Vec<Account>,
    mode: RefreshMode,
    limits: BatchLimits,
) -> BatchSummary {
    let max_batch_size = limits.max_batch_size.max(1);
    if eligible.len() > max_batch_size {
        warn!(
            eligible = eligible.len(),
            max_batch_size,
            deferred = eligible.len() - max_batch_size,
            "more accounts due than the batch allows, deferring the rest to later cycles"
        );
        eligible.truncate(max_batch_size);
    }
    if eligible.is_empty() {
        return BatchSummary::default();
    }

    let slots = limits.concurrency.max(1).min(eligible.len());
    debug!(accounts = eligible.len(), slots, mode = mode.label(), "starting batch");

    let ids: VecDeque<String> = eligible.into_iter().map(|a| a.id).collect();
    let queue = Arc::new(Mutex::new(ids));
    let mut workers = JoinSet::new();
    for slot in 0..slots {
        let executor = executor.clone();
        let queue = queue.clone();
        let delay = limits.inter_request_delay;
        workers.spawn(async move { worker(slot, executor, queue, mode, delay).await });
    }

    let mut summary = BatchSummary::default();
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(slot_summary) => summary.merge(slot_summary),
            Err(e) => error!(error = %e, "refresh worker aborted"),
        }
    }
    summary
}

async fn worker(
    slot: usize,
    executor: Arc<RefreshExecutor>,
    queue: Arc<Mutex<VecDeque<String>>>,
    mode: RefreshMode,
    delay: Duration,
) -> BatchSummary {
    let mut summary = BatchSummary::default();
    let mut first = true;

    loop {
        if !first {
            let drained = queue.lock().unwrap_or_else(|e| e.into_inner()).is_empty();
            if drained {
                break;
            }
            tokio::time::sleep(delay).await;
        }
        first = false;

        let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        let Some(id) = next else {
            break;
        };

        match executor.refresh_if_due(&id, mode).await {
            Ok(Some(_)) => {
                summary.attempted += 1;
                summary.succeeded += 1;
            }
            Ok(None) => summary.skipped_not_due += 1,
            Err(Error::RefreshInProgress(_)) => summary.skipped_in_flight += 1,
            Err(e) => {
                debug!(slot, account_id = %id, error = %e, "refresh failed in batch");
                summary.attempted += 1;
                summary.failed += 1;
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountPatch, AccountStatus, LastError, TokenUpdate};
    use crate::store::AccountPool;
    use crate::testing::{MemoryPool, ManualClock, ScriptedProvider, account_expiring_at};
    use provider::ProviderFailure;

    const NOW: i64 = 1_760_000_000_000;

    fn setup(
        ids: &[&str],
        provider: ScriptedProvider,
    ) -> (Arc<MemoryPool>, Arc<ScriptedProvider>, Arc<RefreshExecutor>, Vec<Account>) {
        let accounts: Vec<Account> = ids
            .iter()
            .map(|id| account_expiring_at(id, NOW - 1))
            .collect();
        let pool = Arc::new(MemoryPool::new(accounts.clone()));
        let provider = Arc::new(provider);
        let executor = Arc::new(RefreshExecutor::new(
            pool.clone(),
            provider.clone(),
            Arc::new(ManualClock::new(NOW)),
        ));
        (pool, provider, executor, accounts)
    }

    #[tokio::test(start_paused = true)]
    async fn one_failure_does_not_stop_the_batch() {
        let (pool, provider, executor, accounts) =
            setup(&["a", "b", "c", "d", "e"], ScriptedProvider::new());
        provider.fail("c", ProviderFailure::rejected("invalid_grant"));

        let summary = run_batch(executor, accounts, RefreshMode::Token, BatchLimits::new(20, 3)).await;
        assert_eq!(
            summary,
            BatchSummary {
                attempted: 5,
                succeeded: 4,
                failed: 1,
                skipped_in_flight: 0,
                skipped_not_due: 0,
            }
        );

        for id in ["a", "b", "d", "e"] {
            let acct = pool.account(id);
            assert_eq!(acct.status, AccountStatus::Active);
            assert_eq!(acct.credentials.access_token, "at_fresh");
        }
        assert_eq!(pool.account("c").status, AccountStatus::Error);
        assert_eq!(pool.patch_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn truncates_to_max_batch_size_in_pool_order() {
        let ids: Vec<String> = (0..30).map(|i| format!("acct-{i:02}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let (pool, provider, executor, accounts) = setup(&id_refs, ScriptedProvider::new());

        let summary = run_batch(executor, accounts, RefreshMode::Token, BatchLimits::new(20, 3)).await;
        assert_eq!(summary.attempted, 20);
        assert_eq!(provider.calls(), 20);

        let mut patched = pool.patched_ids();
        patched.sort();
        assert_eq!(patched, ids[..20].to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_slots() {
        let ids: Vec<String> = (0..12).map(|i| format!("acct-{i}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let (_pool, provider, executor, accounts) = setup(
            &id_refs,
            ScriptedProvider::new().with_latency(Duration::from_millis(500)),
        );

        let summary = run_batch(executor, accounts, RefreshMode::Token, BatchLimits::new(100, 3)).await;
        assert_eq!(summary.succeeded, 12);
        assert_eq!(provider.max_concurrent(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn single_slot_spaces_requests_by_delay() {
        let (_pool, provider, executor, accounts) = setup(&["a", "b", "c"], ScriptedProvider::new());

        let started = tokio::time::Instant::now();
        run_batch(executor, accounts, RefreshMode::Token, BatchLimits::new(20, 1)).await;

        // Two pauses between three accounts, none after the last.
        let elapsed = started.elapsed();
        assert!(elapsed >= INTER_REQUEST_DELAY * 2, "elapsed {elapsed:?}");
        assert!(elapsed < INTER_REQUEST_DELAY * 3, "elapsed {elapsed:?}");
        assert_eq!(provider.call_order(), vec!["a", "b", "c"]);
        assert_eq!(provider.max_concurrent(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_batch_is_noop() {
        let (pool, provider, executor, _) = setup(&["a"], ScriptedProvider::new());
        let summary = run_batch(executor, Vec::new(), RefreshMode::Full, BatchLimits::new(20, 3)).await;
        assert_eq!(summary, BatchSummary::default());
        assert_eq!(provider.calls(), 0);
        assert_eq!(pool.patch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_accounts_are_counted_separately() {
        let (pool, provider, executor, accounts) = setup(
            &["a", "b"],
            ScriptedProvider::new().with_latency(Duration::from_secs(5)),
        );

        let manual = {
            let executor = executor.clone();
            let acct = accounts[0].clone();
            tokio::spawn(async move { executor.refresh(&acct.id, RefreshMode::Token).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let summary = run_batch(executor, accounts, RefreshMode::Token, BatchLimits::new(20, 2)).await;
        assert_eq!(summary.skipped_in_flight, 1);
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.succeeded, 1);

        manual.await.unwrap().unwrap();
        assert_eq!(provider.calls(), 2);
        assert_eq!(pool.patch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn account_frozen_after_listing_is_not_refreshed() {
        let (pool, provider, executor, accounts) = setup(
            &["a", "b"],
            ScriptedProvider::new().with_latency(Duration::from_secs(2)),
        );

        let batch = tokio::spawn(run_batch(
            executor,
            accounts,
            RefreshMode::Token,
            BatchLimits::new(20, 1),
        ));
        // `a` is with the provider; an operator freezes `b` meanwhile.
        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.patch_account("b", AccountPatch::failure(AccountStatus::Suspended, "banned"))
            .await
            .unwrap();

        let summary = batch.await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped_not_due, 1);
        assert_eq!(provider.call_order(), vec!["a"]);

        let b = pool.account("b");
        assert_eq!(b.status, AccountStatus::Suspended);
        assert_eq!(b.last_error.as_deref(), Some("banned"));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_uses_token_rotated_after_listing() {
        let (pool, provider, executor, accounts) = setup(
            &["a", "b"],
            ScriptedProvider::new().with_latency(Duration::from_secs(2)),
        );
        // Only the rotated token is accepted for `b`.
        provider.fail("b", ProviderFailure::rejected("invalid_grant"));

        let batch = tokio::spawn(run_batch(
            executor,
            accounts,
            RefreshMode::Token,
            BatchLimits::new(20, 1),
        ));
        tokio::time::sleep(Duration::from_millis(10)).await;
        // A manual refresh rotated `b`, but it is still due.
        pool.patch_account(
            "b",
            AccountPatch {
                tokens: Some(TokenUpdate {
                    access_token: "at_b2".into(),
                    refresh_token: "rt_b2".into(),
                    expires_at: NOW - 1,
                }),
                last_error: LastError::Clear,
                ..AccountPatch::default()
            },
        )
        .await
        .unwrap();

        let summary = batch.await.unwrap();
        assert_eq!(summary.succeeded, 2);
        assert_eq!(provider.call_order(), vec!["a", "b2"]);
        assert_eq!(pool.account("b").status, AccountStatus::Active);
    }
}
