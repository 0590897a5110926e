//! Workspace placeholder crate.
//!
//! Re-exports the client core so host applications can depend on a single
//! crate and pick the bridge set through features (`desktop-shims` wires the
//! reqwest-backed HTTP client).

#[cfg(feature = "desktop-shims")]
pub use core_datasource as datasource;
#[cfg(feature = "desktop-shims")]
pub use core_service::{CoreError, CoreService};
