//! HTTP application state: wraps the `AdmissionController` with
//! HTTP-specific fields.
//!
//! `AppState` gives transparent access to every controller method via
//! `Deref`, and adds transport config like CORS origins and proxy trust.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use pitstop_admission::AdmissionController;
use tokio_util::sync::CancellationToken;

/// Shared HTTP application state, cloneable across handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppInner>,
}

struct AppInner {
    controller: AdmissionController,
    cors_origins: Vec<String>,
    trust_forwarded_for: bool,
    shutdown: CancellationToken,
    start_time: Instant,
}

impl Deref for AppState {
    type Target = AdmissionController;

    fn deref(&self) -> &AdmissionController {
        &self.inner.controller
    }
}

impl AppState {
    /// Creates a new HTTP application state.
    ///
    /// `shutdown` is cancelled when the server stops; in-flight admission
    /// checks observe it.
    pub fn new(
        controller: AdmissionController,
        cors_origins: Vec<String>,
        trust_forwarded_for: bool,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(AppInner {
                controller,
                cors_origins,
                trust_forwarded_for,
                shutdown,
                start_time: Instant::now(),
            }),
        }
    }

    /// Returns the configured CORS allowed origins.
    pub fn cors_origins(&self) -> &[String] {
        &self.inner.cors_origins
    }

    /// Whether the client address is taken from `X-Forwarded-For`.
    pub fn trust_forwarded_for(&self) -> bool {
        self.inner.trust_forwarded_for
    }

    /// Server-wide shutdown token.
    pub fn shutdown(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    pub fn uptime_secs(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }
}
