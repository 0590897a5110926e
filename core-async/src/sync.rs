//! Synchronization primitives.
//!
//! Async-aware locks and channels from `tokio::sync`, plus the
//! `CancellationToken` used to tear down background loops.
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::Mutex;
//!
//! # async fn example() {
//! let gate = Mutex::new(());
//! let _permit = gate.lock().await;
//! assert!(gate.try_lock().is_err());
//! # }
//! ```

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Mutex, MutexGuard, Notify, OwnedMutexGuard, RwLock,
    RwLockReadGuard, RwLockWriteGuard, Semaphore, TryLockError,
};
pub use tokio_util::sync::CancellationToken;
