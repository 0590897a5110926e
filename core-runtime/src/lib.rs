//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the feedback console core:
//! - Logging and tracing infrastructure
//! - Client configuration
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the data-source core depends on.
//! It establishes the logging conventions, the configuration surface handed
//! to the composition root, and the event broadcasting used to notify hosts
//! about job-status changes.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
