//! Cancellable self-rescheduling tasks.
//!
//! A [`ScheduledTask`] waits a fixed delay, runs one tick, and then decides
//! from the tick's result whether to wait again. Ticks never overlap: the
//! next delay only starts once the previous tick has returned, so a slow tick
//! pushes the schedule back instead of stacking work.
//!
//! The returned handle owns a [`CancellationToken`]. Cancelling it stops the
//! loop at the next await point (during the delay, or right after the
//! in-progress tick returns), which lets the owner tear the loop down
//! deterministically instead of waiting for it to finish on its own.

use crate::sync::CancellationToken;
use crate::task::{self, JoinHandle};
use crate::time::{sleep, Duration};
use std::future::Future;
use tracing::trace;

/// What a tick wants the scheduler to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reschedule {
    /// Wait another period, then tick again.
    Again,
    /// Exit the loop.
    Stop,
}

/// Handle to a spawned delay-then-tick loop.
///
/// Dropping the handle detaches the loop; call [`ScheduledTask::cancel`] to
/// stop it.
#[derive(Debug)]
pub struct ScheduledTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Spawns a loop that sleeps for `period` before every call to `tick`.
    ///
    /// The tick receives a clone of the task's cancellation token so long
    /// running ticks can bail out early.
    pub fn spawn<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Reschedule> + Send + 'static,
    {
        let token = CancellationToken::new();
        let loop_token = token.clone();

        let handle = task::spawn(async move {
            let mut ticks: u64 = 0;
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => {
                        trace!(ticks, "Scheduled task cancelled while waiting");
                        break;
                    }
                    _ = sleep(period) => {}
                }

                ticks += 1;
                let next = tick(loop_token.clone()).await;

                if loop_token.is_cancelled() {
                    trace!(ticks, "Scheduled task cancelled during tick");
                    break;
                }
                if next == Reschedule::Stop {
                    trace!(ticks, "Scheduled task finished");
                    break;
                }
            }
        });

        Self { token, handle }
    }

    /// Requests the loop to stop. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the loop has exited, either by cancellation or by a tick
    /// returning [`Reschedule::Stop`].
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// A clone of the loop's cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Waits for the loop to exit.
    pub async fn join(self) -> Result<(), task::JoinError> {
        self.handle.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_runs_until_stop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        let task = ScheduledTask::spawn(Duration::from_secs(5), move |_| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) + 1 >= 3 {
                    Reschedule::Stop
                } else {
                    Reschedule::Again
                }
            }
        });

        task.join().await.unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_waits_for_period() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        let task = ScheduledTask::spawn(Duration::from_secs(5), move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Reschedule::Again
            }
        });

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        task.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_waiting_loop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        let task = ScheduledTask::spawn(Duration::from_secs(5), move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Reschedule::Again
            }
        });

        task.cancel();
        assert!(task.is_cancelled());
        task.join().await.unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_tick_prevents_reschedule() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        let task = ScheduledTask::spawn(Duration::from_secs(1), move |token| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                token.cancel();
                Reschedule::Again
            }
        });

        task.join().await.unwrap();
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }
}
