//! # Host Bridge Traits
//!
//! Contracts between the feedback console core and the host it runs in.
//!
//! ## Overview
//!
//! The core never talks to the network or the host logger directly. It is
//! handed trait objects implementing the capabilities below, which keeps the
//! job-tracking logic testable against in-memory fakes and lets each host
//! ship its own adapters.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Async HTTP with query strings, JSON
//!   and multipart bodies, retry policies
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Implementations
//!
//! | Host    | Implementation Crate | Status |
//! |---------|----------------------|--------|
//! | Desktop | `bridge-desktop`     | ✅ |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should classify failures where no response was obtained as
//! [`BridgeError::Timeout`] or [`BridgeError::Connection`] so callers can
//! tell transport failures apart from backend rejections.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared across the
//! core's background tasks behind an `Arc`.

pub mod error;
pub mod http;
pub mod time;

pub use error::BridgeError;

pub use http::{
    HttpClient, HttpMethod, HttpRequest, HttpResponse, MultipartFile, MultipartForm, RetryPolicy,
};
pub use time::{Clock, ConsoleLogger, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
