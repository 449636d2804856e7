//! Periodic refresh timer
//!
//! `start` arms a repeating timer whose first tick fires immediately, so a
//! cycle runs right away. Each tick spawns the cycle as its own task: `stop`
//! only aborts the timer, and a cycle already executing runs to completion.
//! Ticks landing while a cycle is still running are skipped by the cycle's
//! own guard. `wait_idle` lets shutdown wait for that cycle before the
//! runtime goes away.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cycle::RefreshCycle;

struct Ticker {
    handle: JoinHandle<()>,
    interval: Duration,
    next_tick: Arc<Mutex<Instant>>,
}

pub struct Scheduler {
    cycle: Arc<RefreshCycle>,
    ticker: Mutex<Option<Ticker>>,
    /// Most recently spawned cycle task.
    last_cycle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn new(cycle: Arc<RefreshCycle>) -> Self {
        Self {
            cycle,
            ticker: Mutex::new(None),
            last_cycle: Arc::new(Mutex::new(None)),
        }
    }

    /// Arm the timer at `interval` and run a cycle now. Calling this while
    /// running disarms the old timer first.
    pub fn start(&self, interval: Duration) {
        let mut ticker = self.ticker.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = ticker.take() {
            info!(previous_interval_secs = old.interval.as_secs_f64(), "restarting refresh scheduler");
            old.handle.abort();
        }

        let next_tick = Arc::new(Mutex::new(Instant::now()));
        let handle = tokio::spawn(tick_loop(
            self.cycle.clone(),
            interval,
            next_tick.clone(),
            self.last_cycle.clone(),
        ));
        info!(interval_secs = interval.as_secs_f64(), "refresh scheduler started");

        *ticker = Some(Ticker {
            handle,
            interval,
            next_tick,
        });
    }

    /// Disarm the timer. Returns whether it was running.
    pub fn stop(&self) -> bool {
        let mut ticker = self.ticker.lock().unwrap_or_else(|e| e.into_inner());
        match ticker.take() {
            Some(old) => {
                old.handle.abort();
                info!("refresh scheduler stopped");
                true
            }
            None => {
                debug!("refresh scheduler not running, nothing to stop");
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Interval the timer was armed with.
    pub fn interval(&self) -> Option<Duration> {
        self.ticker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|t| t.interval)
    }

    /// Time left until the next tick, `None` when stopped.
    pub fn next_check_in(&self) -> Option<Duration> {
        let ticker = self.ticker.lock().unwrap_or_else(|e| e.into_inner());
        ticker.as_ref().map(|t| {
            let next = *t.next_tick.lock().unwrap_or_else(|e| e.into_inner());
            next.saturating_duration_since(Instant::now())
        })
    }

    pub fn cycle_in_progress(&self) -> bool {
        self.cycle.is_running()
    }

    /// Wait for a spawned cycle to finish. Call after `stop` so no new one
    /// starts behind it.
    pub async fn wait_idle(&self) {
        let last = self
            .last_cycle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = last {
            if let Err(e) = handle.await {
                warn!(error = %e, "refresh cycle task failed");
            }
        }
        self.cycle.wait_idle().await;
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let ticker = self.ticker.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(t) = ticker.take() {
            t.handle.abort();
        }
    }
}

async fn tick_loop(
    cycle: Arc<RefreshCycle>,
    period: Duration,
    next_tick: Arc<Mutex<Instant>>,
    last_cycle: Arc<Mutex<Option<JoinHandle<()>>>>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        *next_tick.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now() + period;

        let cycle = cycle.clone();
        let handle = tokio::spawn(async move {
            // Failures are logged and counted inside the cycle.
            let _ = cycle.run().await;
        });
        *last_cycle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }
}
