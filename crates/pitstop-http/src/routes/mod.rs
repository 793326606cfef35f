//! HTTP route handlers.

pub mod quota;
pub mod system;
