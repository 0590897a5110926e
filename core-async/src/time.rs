//! Time-related operations.

pub use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
pub use tokio::time::{sleep, timeout, Sleep, Timeout};

/// Error returned by [`timeout`] when the deadline elapses first.
pub use tokio::time::error::Elapsed;
