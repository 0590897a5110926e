//! Async runtime layer for the feedback console core.
//!
//! Every other crate in the workspace reaches Tokio through this crate so the
//! executor choice stays in one place.
//!
//! # Modules
//!
//! - `task`: Task spawning and join handles
//! - `time`: Sleep, timeout, durations
//! - `sync`: Async locks, channels and cancellation tokens
//! - `schedule`: Self-rescheduling delayed tasks with a cancellation handle
//! - `runtime`: Runtime handles and a blocking bridge for synchronous callers
//!
//! # Examples
//!
//! ```rust
//! use core_async::schedule::{Reschedule, ScheduledTask};
//! use core_async::time::Duration;
//!
//! # async fn example() {
//! let task = ScheduledTask::spawn(Duration::from_secs(5), |_token| async {
//!     // re-check some state here
//!     Reschedule::Stop
//! });
//!
//! // Teardown stops the timer deterministically.
//! task.cancel();
//! # }
//! ```

pub mod runtime;
pub mod schedule;
pub mod sync;
pub mod task;
pub mod time;

pub use schedule::{Reschedule, ScheduledTask};
pub use task::spawn;
pub use time::{sleep, Duration, Instant};
