//! # promptly-core
//!
//! Shared foundation of the promptly invocation core.
//!
//! - [`config`]: `promptly.toml` settings with environment overrides
//! - [`cache`]: content-addressed result cache (LRU + 15-minute TTL)
//! - [`telemetry`]: publish/subscribe bus for invocation outcomes
//! - [`metrics`]: atomic counters that ride on the bus
//! - [`types`]: providers and the error taxonomy
//! - [`logging`]: `tracing` subscriber setup
//!
//! The cache and bus are process-wide singletons ([`cache::global`],
//! [`telemetry::global`]) with no teardown; both also have plain
//! constructors for isolated use.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod telemetry;
pub mod types;

pub use cache::{CacheKey, ResultCache};
pub use config::{PromptlyConfig, RetrySettings};
pub use error::PromptlyError;
pub use telemetry::{TelemetryBus, TelemetryEvent};
pub use types::{ErrorCode, Provider};
