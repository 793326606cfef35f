//! Pitstop Admission - tiered, per-hour request admission control.
//!
//! This crate decides whether an incoming request may proceed. Each request
//! is charged against an ordered list of quota tiers (per user, per address,
//! per API key, ...) whose counters live in a shared store with one-hour
//! expiry, so every server instance sees the same counts.
//!
//! The HTTP adapter (`pitstop-http`) depends on this crate and maps its
//! outcomes to headers and status codes.
//!
//! **Zero transport dependencies**: no axum, no HTTP types.

pub mod config;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod store;
pub mod tier;
pub mod window;

pub use config::{AdmissionConfig, TierPolicy};
pub use controller::{Admission, AdmissionController, QuotaSnapshot, RequestIdentity, TierUsage};
pub use error::{AdmissionError, ConfigError, StoreError};
pub use metrics::{AdmissionMetrics, Outcome};
pub use store::{CounterStore, Increment, MemoryCounterStore};
#[cfg(feature = "redis")]
pub use store::RedisCounterStore;
pub use window::{Clock, ManualClock, SystemClock, Window};
