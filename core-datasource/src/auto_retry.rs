//! Auto-Retry Coordinator
//!
//! When polling settles with failed jobs left, the coordinator sends each of
//! them back to the pipeline: one at a time, in the order they were
//! snapshotted, waiting for each retry call before starting the next. A
//! failing call is logged and recorded, and the batch carries on.
//!
//! Only one batch runs at a time per store. Each job is retried
//! automatically at most `max_attempts` times; after that it is skipped and
//! reported once with [`DataSourceEvent::RetryExhausted`]. Counters are
//! reset when a job completes, is deleted, is retried by hand, or drops out
//! of the visible page.
//!
//! [`AutoRetryCoordinator::cancel`] is final: a running batch stops before
//! its next retry call and no new batch starts.

use crate::emit;
use crate::job::JobId;
use crate::Result;
use async_trait::async_trait;
use core_async::sync::CancellationToken;
use core_runtime::events::{DataSourceEvent, EventBus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, instrument, warn};

/// Sends one job back to the pipeline.
#[async_trait]
pub trait RetryExecutor: Send + Sync {
    async fn retry_job(&self, id: &JobId) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryItemResult {
    pub job_id: JobId,
    pub result: std::result::Result<(), String>,
}

impl RetryItemResult {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-item outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryBatchReport {
    pub results: Vec<RetryItemResult>,
    /// Jobs left alone because they reached the attempt cap
    pub skipped: Vec<JobId>,
}

impl RetryBatchReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoRetryOutcome {
    Disabled,
    /// Another batch is running.
    AlreadyRunning,
    /// No failed job left under the attempt cap.
    NothingToRetry { skipped: Vec<JobId> },
    Completed(RetryBatchReport),
    /// Stopped by teardown; holds the calls made before it.
    Cancelled(RetryBatchReport),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPlan {
    pub to_retry: Vec<JobId>,
    pub exhausted: Vec<JobId>,
}

#[derive(Debug, Default)]
struct AttemptState {
    count: u32,
    /// `RetryExhausted` already emitted
    reported: bool,
}

pub struct AutoRetryCoordinator {
    enabled: AtomicBool,
    max_attempts: u32,
    running: AtomicBool,
    attempts: Mutex<HashMap<JobId, AttemptState>>,
    cancel: CancellationToken,
    events: EventBus,
}

/// Clears the running flag when the batch ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl AutoRetryCoordinator {
    pub fn new(enabled: bool, max_attempts: u32, events: EventBus) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            max_attempts,
            running: AtomicBool::new(false),
            attempts: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            events,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Stops the running batch before its next call and refuses new ones.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!("Auto-retry cancelled");
        }
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn attempts_lock(&self) -> MutexGuard<'_, HashMap<JobId, AttemptState>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Automatic attempts made so far for `id`.
    pub fn attempts(&self, id: &JobId) -> u32 {
        self.attempts_lock().get(id).map_or(0, |state| state.count)
    }

    pub fn reset(&self, id: &JobId) {
        self.attempts_lock().remove(id);
    }

    pub fn reset_many<'a>(&self, ids: impl IntoIterator<Item = &'a JobId>) {
        let mut attempts = self.attempts_lock();
        for id in ids {
            attempts.remove(id);
        }
    }

    /// Splits failed ids into those still under the cap and those that
    /// reached it. Order is kept.
    pub fn plan(&self, failed: &[JobId]) -> RetryPlan {
        let attempts = self.attempts_lock();
        let (to_retry, exhausted): (Vec<JobId>, Vec<JobId>) = failed.iter().cloned().partition(|id| {
            attempts
                .get(id)
                .map_or(true, |state| state.count < self.max_attempts)
        });
        RetryPlan {
            to_retry,
            exhausted,
        }
    }

    /// Runs one batch over `failed`, the failed ids at the moment of the
    /// call.
    #[instrument(skip(self, failed, executor), fields(failed = failed.len()))]
    pub async fn run(&self, failed: Vec<JobId>, executor: &dyn RetryExecutor) -> AutoRetryOutcome {
        if self.is_cancelled() {
            return AutoRetryOutcome::Cancelled(RetryBatchReport::default());
        }
        if !self.is_enabled() {
            return AutoRetryOutcome::Disabled;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Auto-retry batch already running");
            return AutoRetryOutcome::AlreadyRunning;
        }
        let _running = RunningGuard(&self.running);

        let plan = self.plan(&failed);
        self.report_exhausted(&plan.exhausted);

        if plan.to_retry.is_empty() {
            return AutoRetryOutcome::NothingToRetry {
                skipped: plan.exhausted,
            };
        }

        info!(jobs = plan.to_retry.len(), skipped = plan.exhausted.len(), "Starting auto-retry batch");
        emit(
            &self.events,
            DataSourceEvent::AutoRetryStarted {
                job_ids: plan.to_retry.iter().map(ToString::to_string).collect(),
            },
        );

        let mut report = RetryBatchReport {
            results: Vec::with_capacity(plan.to_retry.len()),
            skipped: plan.exhausted,
        };

        for id in plan.to_retry {
            if self.is_cancelled() {
                info!(
                    done = report.results.len(),
                    "Auto-retry batch cancelled"
                );
                return AutoRetryOutcome::Cancelled(report);
            }

            // Counted before the call: an attempt that errors still used up
            // one try.
            let attempt = {
                let mut attempts = self.attempts_lock();
                let state = attempts.entry(id.clone()).or_default();
                state.count += 1;
                state.count
            };

            let result = executor.retry_job(&id).await;
            if let Err(error) = &result {
                warn!(job_id = %id, attempt, error = %error, "Auto-retry failed");
            } else {
                info!(job_id = %id, attempt, "Auto-retry submitted");
            }

            report.results.push(RetryItemResult {
                job_id: id,
                result: result.map_err(|e| e.to_string()),
            });
        }

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped.len(),
            "Auto-retry batch completed"
        );
        emit(
            &self.events,
            DataSourceEvent::AutoRetryCompleted {
                succeeded: report.succeeded(),
                failed: report.failed(),
                skipped: report.skipped.len(),
            },
        );

        AutoRetryOutcome::Completed(report)
    }

    fn report_exhausted(&self, exhausted: &[JobId]) {
        let newly_exhausted: Vec<(JobId, u32)> = {
            let mut attempts = self.attempts_lock();
            exhausted
                .iter()
                .filter_map(|id| {
                    let state = attempts.get_mut(id)?;
                    if state.reported {
                        return None;
                    }
                    state.reported = true;
                    Some((id.clone(), state.count))
                })
                .collect()
        };

        for (job_id, attempts) in newly_exhausted {
            warn!(job_id = %job_id, attempts, "Auto-retry attempts exhausted");
            emit(
                &self.events,
                DataSourceEvent::RetryExhausted {
                    job_id: job_id.to_string(),
                    attempts,
                },
            );
        }
    }
}
