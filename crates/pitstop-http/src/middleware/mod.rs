//! HTTP middleware: admission control and request ID tracking.

pub mod admission;
pub mod request_id;
