//! Runtime handles.
//!
//! Lets synchronous code (tracing layers, `Drop` impls) find the ambient Tokio
//! runtime, or drive a short future to completion when there is none.

pub use tokio::runtime::{Builder, Handle, Runtime};

/// Drives `future` to completion on the calling thread.
///
/// Uses a plain executor rather than a Tokio runtime, so the future must not
/// depend on Tokio timers or IO. Intended for forwarding log entries to a
/// host sink from outside any runtime.
///
/// # Examples
///
/// ```rust
/// assert_eq!(core_async::runtime::block_on(async { 1 + 1 }), 2);
/// ```
pub fn block_on<F>(future: F) -> F::Output
where
    F: std::future::Future,
{
    futures::executor::block_on(future)
}

/// Whether the caller is running inside a Tokio runtime.
pub fn in_runtime() -> bool {
    Handle::try_current().is_ok()
}
