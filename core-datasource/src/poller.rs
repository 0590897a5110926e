//! Status Poller
//!
//! Two states, **Idle** and **Polling**. While polling, every `interval` the
//! poller asks its [`PollTarget`] to refresh and report whether any job is
//! still in flight. The first tick that reports [`PollDecision::Settled`]
//! moves the poller back to Idle and hands off to
//! [`PollTarget::on_settled`].
//!
//! Only one timer exists per poller: starting while already polling is a
//! no-op. [`Poller::stop`] cancels the timer deterministically; dropping the
//! poller does the same.

use crate::emit;
use crate::job::JobStatus;
use crate::state::DataSourceState;
use async_trait::async_trait;
use core_async::schedule::{Reschedule, ScheduledTask};
use core_async::time::Duration;
use core_runtime::events::{DataSourceEvent, EventBus};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Jobs are still in flight; tick again.
    Continue,
    /// Nothing in flight.
    Settled,
}

/// What the poller drives.
#[async_trait]
pub trait PollTarget: Send + Sync {
    /// Refreshes, then reports from the store as it is after the refresh.
    async fn poll_tick(&self) -> PollDecision;

    /// Called once per polling run, after the poller went idle.
    async fn on_settled(&self);
}

#[derive(Debug, Default)]
struct PollerInner {
    /// Bumped on every start and stop so a settling tick from a cancelled
    /// run cannot touch a newer one.
    generation: u64,
    task: Option<ScheduledTask>,
}

pub struct Poller {
    interval: Duration,
    state: Arc<DataSourceState>,
    events: EventBus,
    inner: Mutex<PollerInner>,
}

impl Poller {
    pub fn new(interval: Duration, state: Arc<DataSourceState>, events: EventBus) -> Self {
        Self {
            interval,
            state,
            events,
            inner: Mutex::new(PollerInner::default()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_polling(&self) -> bool {
        self.lock().task.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PollerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves Idle → Polling. Returns `false` when already polling.
    ///
    /// The target is held weakly; once it is gone the loop ends on its next
    /// tick.
    pub fn start(self: &Arc<Self>, target: Weak<dyn PollTarget>) -> bool {
        let mut inner = self.lock();
        if inner.task.is_some() {
            debug!("Poller already running");
            return false;
        }

        inner.generation += 1;
        let generation = inner.generation;
        let poller = Arc::downgrade(self);

        let task = ScheduledTask::spawn(self.interval, move |token| {
            let poller = poller.clone();
            let target = target.clone();
            async move {
                let Some(poller) = poller.upgrade() else {
                    return Reschedule::Stop;
                };
                let Some(target) = target.upgrade() else {
                    poller.release(generation);
                    return Reschedule::Stop;
                };

                match target.poll_tick().await {
                    PollDecision::Continue => Reschedule::Again,
                    PollDecision::Settled => {
                        if !token.is_cancelled() && poller.finish(generation) {
                            target.on_settled().await;
                        }
                        Reschedule::Stop
                    }
                }
            }
        });

        inner.task = Some(task);
        self.state.mutate(|state| state.polling = true);
        drop(inner);

        info!(interval_ms = self.interval.as_millis() as u64, "Status polling started");
        emit(
            &self.events,
            DataSourceEvent::PollingStarted {
                interval_ms: self.interval.as_millis() as u64,
            },
        );
        true
    }

    /// Polling → Idle because the run settled.
    fn finish(&self, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation || inner.task.take().is_none() {
            return false;
        }

        let failed = self.state.mutate(|state| {
            state.polling = false;
            state.store.count_by_status(JobStatus::Failed)
        });
        drop(inner);

        info!(failed, "Status polling settled");
        emit(&self.events, DataSourceEvent::PollingSettled { failed });
        true
    }

    /// Polling → Idle because the target is gone. Silent.
    fn release(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.task.take().is_some() {
            self.state.mutate(|state| state.polling = false);
        }
    }

    /// Cancels the running timer. Returns `false` when idle.
    pub fn stop(&self) -> bool {
        let mut inner = self.lock();
        let Some(task) = inner.task.take() else {
            return false;
        };

        task.cancel();
        inner.generation += 1;
        self.state.mutate(|state| state.polling = false);
        drop(inner);

        info!("Status polling stopped");
        emit(&self.events, DataSourceEvent::PollingStopped);
        true
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(task) = self.lock().task.take() {
            task.cancel();
        }
    }
}
