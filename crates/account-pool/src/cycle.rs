//! One scan-and-refresh pass over the pool
//!
//! A cycle snapshots the current settings, lists the pool, partitions it by
//! eligibility and hands the due accounts to the batch controller. Only one
//! cycle runs at a time: a cycle requested while another is executing is
//! skipped, whether it came from the timer or a manual trigger.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{error, info};

use crate::batch::{BatchSummary, run_batch};
use crate::config::RefreshConfig;
use crate::eligibility::{REFRESH_THRESHOLD_MS, partition};
use crate::error::Result;
use crate::executor::{RefreshExecutor, RefreshMode};
use crate::metrics;

/// Statistics for a completed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: u64,
    pub mode: RefreshMode,
    /// Accounts in the pool.
    pub total: usize,
    /// Due for refresh before truncation.
    pub eligible: usize,
    /// Token still valid beyond the threshold.
    pub healthy: usize,
    /// Frozen or never checked.
    pub skipped: usize,
    /// Due but beyond `maxBatchSize`, left for later cycles.
    pub deferred: usize,
    #[serde(flatten)]
    pub batch: BatchSummary,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was still running.
    Skipped,
    /// Auto-refresh is turned off.
    Disabled,
}

/// Clears the running flag when the cycle ends, including on panic, and
/// wakes `wait_idle` callers.
struct RunningGuard<'a> {
    running: &'a AtomicBool,
    idle: &'a Notify,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.idle.notify_waiters();
    }
}

pub struct RefreshCycle {
    executor: Arc<RefreshExecutor>,
    config: Arc<RwLock<RefreshConfig>>,
    running: AtomicBool,
    idle: Notify,
    next_id: AtomicU64,
}

impl RefreshCycle {
    pub fn new(executor: Arc<RefreshExecutor>, config: Arc<RwLock<RefreshConfig>>) -> Self {
        Self {
            executor,
            config,
            running: AtomicBool::new(false),
            idle: Notify::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Resolves once no cycle is executing.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }

    /// Run one cycle unless another is in progress.
    ///
    /// Errors (the pool listing failing) are logged and counted here; the
    /// scheduler drops them, manual triggers return them.
    pub async fn run(&self) -> Result<CycleOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("previous refresh cycle still running, skipping");
            metrics::record_cycle("skipped", None);
            return Ok(CycleOutcome::Skipped);
        }
        let _running = RunningGuard {
            running: &self.running,
            idle: &self.idle,
        };

        let config = *self.config.read().unwrap_or_else(|e| e.into_inner());
        if !config.enabled {
            info!("auto-refresh disabled, skipping cycle");
            metrics::record_cycle("disabled", None);
            return Ok(CycleOutcome::Disabled);
        }

        let cycle_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let started = tokio::time::Instant::now();

        let accounts = match self.executor.pool().list_accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                error!(cycle_id, error = %e, "refresh cycle failed to list accounts");
                metrics::record_cycle_error();
                return Err(e);
            }
        };

        let total = accounts.len();
        let now = self.executor.clock().now_ms();
        let split = partition(accounts, now, REFRESH_THRESHOLD_MS);
        let eligible = split.eligible.len();
        let limits = config.batch_limits();
        let mode = config.mode();

        info!(
            cycle_id,
            total,
            eligible,
            healthy = split.healthy,
            skipped = split.skipped,
            mode = mode.label(),
            concurrency = limits.concurrency,
            "refresh cycle started"
        );

        let batch = run_batch(self.executor.clone(), split.eligible, mode, limits).await;

        let elapsed = started.elapsed();
        let report = CycleReport {
            cycle_id,
            mode,
            total,
            eligible,
            healthy: split.healthy,
            skipped: split.skipped,
            deferred: eligible.saturating_sub(limits.max_batch_size),
            batch,
            duration_ms: elapsed.as_millis() as u64,
        };
        info!(
            cycle_id,
            succeeded = batch.succeeded,
            failed = batch.failed,
            skipped_in_flight = batch.skipped_in_flight,
            skipped_not_due = batch.skipped_not_due,
            healthy = report.healthy,
            skipped = report.skipped,
            duration_ms = report.duration_ms,
            "refresh cycle finished"
        );
        metrics::record_cycle("completed", Some(elapsed.as_secs_f64()));
        Ok(CycleOutcome::Completed(report))
    }
}
