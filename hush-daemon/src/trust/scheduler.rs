//! Single-flight, cancellable trust check loop.

use super::TrustEngine;
use crate::clock::Clock;
use hush_core::StalenessPolicy;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Outcome of one check cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Identities examined.
    pub checked: usize,
    /// Identities re-verified successfully.
    pub refreshed: usize,
    /// Lookups or refreshes that failed.
    pub failed: usize,
    /// The cycle stopped early because of cancellation.
    pub cancelled: bool,
}

/// Shared by the scheduler and its task.
struct CheckRunner {
    engine: Arc<dyn TrustEngine>,
    clock: Arc<dyn Clock>,
    policy: StalenessPolicy,
    cycle_lock: tokio::sync::Mutex<()>,
}

impl CheckRunner {
    async fn supervise(&self, period: Duration, cancel: CancellationToken) {
        tracing::info!(interval_secs = period.as_secs(), "Trust check started");

        // First tick completes immediately, so unlock triggers a check.
        let mut ticker = interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.run_cycle(&cancel).await;
                    tracing::debug!(?report, "Trust check cycle finished");
                }
            }
        }

        tracing::info!("Trust check stopped");
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport::default();

        // Cycles never overlap.
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                report.cancelled = true;
                return report;
            }
            guard = self.cycle_lock.lock() => guard,
        };

        let ids = match self.engine.identities().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!("Trust check: failed to list identities: {}", e);
                report.failed += 1;
                return report;
            }
        };

        for id in ids {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.checked += 1;

            let record = match self.engine.cached(&id).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(identity = %id, "Trust check: cache lookup failed: {}", e);
                    report.failed += 1;
                    continue;
                }
            };

            if !self.policy.needs_refresh(&record, self.clock.now()) {
                continue;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                result = self.engine.refresh(&id) => match result {
                    Ok(updated) => {
                        tracing::debug!(
                            identity = %id,
                            status = ?updated.status,
                            "Trust refreshed"
                        );
                        report.refreshed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(identity = %id, "Trust check: refresh failed: {}", e);
                        report.failed += 1;
                    }
                },
            }
        }

        report
    }
}

struct SchedulerState {
    checking: bool,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Periodic trust revalidation.
///
/// `start` is a no-op while running. `stop` cancels the task and waits
/// for it to exit, bounded by the stop timeout; on timeout it gives up
/// waiting and reports `false`.
pub struct TrustScheduler {
    runner: Arc<CheckRunner>,
    interval: Duration,
    stop_timeout: Duration,
    state: Mutex<SchedulerState>,
}

impl TrustScheduler {
    /// Create a stopped scheduler.
    pub fn new(
        engine: Arc<dyn TrustEngine>,
        clock: Arc<dyn Clock>,
        policy: StalenessPolicy,
        interval: Duration,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            runner: Arc::new(CheckRunner {
                engine,
                clock,
                policy,
                cycle_lock: tokio::sync::Mutex::new(()),
            }),
            interval,
            stop_timeout,
            state: Mutex::new(SchedulerState {
                checking: false,
                cancel: CancellationToken::new(),
                handle: None,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the check loop. Does nothing if it is already running.
    pub fn start(&self) {
        let mut state = self.lock_state();
        if state.checking {
            return;
        }

        let cancel = CancellationToken::new();
        let runner = Arc::clone(&self.runner);
        let period = self.interval;
        let task_cancel = cancel.clone();
        state.handle = Some(tokio::spawn(async move {
            runner.supervise(period, task_cancel).await;
        }));
        state.cancel = cancel;
        state.checking = true;
    }

    /// Stop the check loop and wait (bounded) for it to exit.
    ///
    /// Returns `false` if the task did not exit within the stop timeout.
    /// Stopping a stopped scheduler returns `true`.
    pub async fn stop(&self) -> bool {
        let handle = {
            let mut state = self.lock_state();
            if !state.checking {
                return true;
            }
            state.cancel.cancel();
            state.checking = false;
            state.handle.take()
        };

        let Some(handle) = handle else {
            return true;
        };

        match timeout(self.stop_timeout, handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!("Trust check task ended abnormally: {}", e);
                true
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.stop_timeout.as_millis() as u64,
                    "Trust check did not stop in time"
                );
                false
            }
        }
    }

    /// Whether the check loop is running.
    pub fn is_checking(&self) -> bool {
        self.lock_state().checking
    }

    /// Run one cycle now, outside the timer.
    ///
    /// Waits for an in-flight cycle to finish first. Observes the current
    /// cancellation token, so it returns early while stopping.
    pub async fn check_now(&self) -> CycleReport {
        let cancel = self.lock_state().cancel.clone();
        self.runner.run_cycle(&cancel).await
    }
}
