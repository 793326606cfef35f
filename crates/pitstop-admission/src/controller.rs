//! The admission controller: decides, per request, whether it may proceed.
//!
//! For each applicable tier, in priority order, the controller bumps the
//! tier's counter in the store, attaches a one-hour TTL if the counter is
//! new, and compares the post-increment count against the tier's ceiling.
//! The first tier over its ceiling rejects the request and later tiers are
//! not evaluated (and therefore not charged). Tiers that passed before the
//! rejecting one keep their increment.
//!
//! Store failures and timeouts block the request. An increment that was
//! already issued when the request is cancelled is not rolled back, so a
//! cancelled request may still consume quota.

use std::net::IpAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{AdmissionConfig, TierPolicy};
use crate::error::{AdmissionError, ConfigError, StoreError};
use crate::metrics::{AdmissionMetrics, Outcome};
use crate::store::{CounterStore, Increment};
use crate::tier::TierTable;
use crate::window::{Clock, SystemClock, Window};

/// Identity signals extracted from one incoming request.
#[derive(Debug, Clone, Default)]
pub struct RequestIdentity {
    pub path: String,
    pub method: String,
    /// Caller's network address as resolved by the transport.
    pub address: Option<IpAddr>,
    /// Set by an upstream authentication step.
    pub user_id: Option<String>,
    pub api_key: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
}

/// Quota numbers of one evaluated tier, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub limit: u64,
    /// `max(limit - count, 0)`.
    pub remaining: u64,
    /// Unix timestamp of the next window boundary.
    pub reset: i64,
    pub label: &'static str,
}

/// An admitted request.
///
/// `quota` holds the numbers of the last tier evaluated; each tier
/// overwrites the previous one's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub quota: Option<QuotaSnapshot>,
}

/// Read-only usage of one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TierUsage {
    pub label: String,
    pub limit: u64,
    pub used: u64,
    pub remaining: u64,
    pub reset: i64,
}

/// Per-request admission control over a shared counter store.
///
/// Cheap to clone; configuration is immutable after construction.
#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Inner>,
}

struct Inner {
    config: AdmissionConfig,
    tiers: TierTable,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    metrics: AdmissionMetrics,
}

impl AdmissionController {
    /// Creates a controller. Fails if `config` does not validate.
    pub fn new(
        config: AdmissionConfig,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                tiers: TierTable::from_config(&config),
                config,
                store,
                clock,
                metrics: AdmissionMetrics::new(),
            }),
        })
    }

    /// Creates a controller on the wall clock.
    pub fn with_system_clock(
        config: AdmissionConfig,
        store: Arc<dyn CounterStore>,
    ) -> Result<Self, ConfigError> {
        Self::new(config, store, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &AdmissionMetrics {
        &self.inner.metrics
    }

    /// Decides whether `identity`'s request may proceed.
    pub async fn admit(
        &self,
        identity: &RequestIdentity,
        cancel: &CancellationToken,
    ) -> Result<Admission, AdmissionError> {
        let result = self.evaluate(identity, cancel).await;
        let metrics = &self.inner.metrics;
        match &result {
            Ok(_) => metrics.record(Outcome::Admitted),
            Err(AdmissionError::QuotaExceeded(q)) => metrics.record_rejection(q.label),
            Err(AdmissionError::MissingIdentity(_)) => metrics.record(Outcome::InputError),
            Err(AdmissionError::Store { .. }) => metrics.record(Outcome::StoreError),
        }
        result
    }

    async fn evaluate(
        &self,
        identity: &RequestIdentity,
        cancel: &CancellationToken,
    ) -> Result<Admission, AdmissionError> {
        let public = self.inner.config.is_public(&identity.path);
        self.check_identity(identity, public)?;

        let window = Window::containing(self.inner.clock.now());
        let tiers = self.inner.tiers.resolve(identity, public, &window);

        let mut quota = None;
        for tier in tiers.iter().filter(|t| t.applies) {
            let inc = self.increment(&tier.counter_key, identity, cancel).await?;

            if let Some(e) = &inc.expiry_error {
                tracing::error!(
                    event = "rate_limit.expiry_failed",
                    request_id = identity.request_id.as_deref(),
                    key = %tier.counter_key,
                    error = %e,
                    "Failed to set expiration on rate limit key",
                );
                self.inner.metrics.record_expiry_failure();
            }

            let snapshot = QuotaSnapshot {
                limit: tier.ceiling,
                remaining: tier.ceiling.saturating_sub(inc.count),
                reset: window.reset_at(),
                label: tier.label,
            };

            if inc.count > tier.ceiling {
                tracing::warn!(
                    event = "request.rate_limited",
                    request_id = identity.request_id.as_deref(),
                    path = %identity.path,
                    method = %identity.method,
                    ip = ?identity.address,
                    user_agent = identity.user_agent.as_deref(),
                    key = %tier.counter_key,
                    tier = tier.label,
                    count = inc.count,
                    limit = tier.ceiling,
                    "Request rate limit exceeded",
                );
                return Err(AdmissionError::QuotaExceeded(snapshot));
            }

            quota = Some(snapshot);
        }

        Ok(Admission { quota })
    }

    fn check_identity(&self, identity: &RequestIdentity, public: bool) -> Result<(), AdmissionError> {
        let missing = if identity.address.is_none() {
            Some("client address")
        } else if !public
            && self.inner.config.policy == TierPolicy::ApiKeyScoped
            && identity.api_key.as_deref().is_none_or(str::is_empty)
        {
            Some("API key")
        } else {
            None
        };

        match missing {
            Some(what) => {
                tracing::info!(
                    event = "request.invalid_identity",
                    request_id = identity.request_id.as_deref(),
                    path = %identity.path,
                    method = %identity.method,
                    ip = ?identity.address,
                    user_agent = identity.user_agent.as_deref(),
                    missing = what,
                    "Request rejected before admission check",
                );
                Err(AdmissionError::MissingIdentity(what))
            }
            None => Ok(()),
        }
    }

    /// Bumps one counter. The store applies the deadline to each of its
    /// round-trips; `cancel` covers the whole operation.
    async fn increment(
        &self,
        key: &str,
        identity: &RequestIdentity,
        cancel: &CancellationToken,
    ) -> Result<Increment, AdmissionError> {
        let call =
            self.inner
                .store
                .incr_with_expiry(key, Window::TTL, self.inner.config.store_timeout);
        cancellable(call, cancel).await.map_err(|source| {
            tracing::error!(
                event = "rate_limit.store_error",
                request_id = identity.request_id.as_deref(),
                path = %identity.path,
                method = %identity.method,
                ip = ?identity.address,
                user_agent = identity.user_agent.as_deref(),
                key = %key,
                error = %source,
                "Rate limit counter update failed",
            );
            AdmissionError::Store {
                key: key.to_string(),
                source,
            }
        })
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
        cancel: &CancellationToken,
    ) -> Result<T, StoreError> {
        let timeout = self.inner.config.store_timeout;
        let call = async move {
            tokio::time::timeout(timeout, call)
                .await
                .unwrap_or_else(|_| Err(StoreError::Timeout(timeout)))
        };
        cancellable(call, cancel).await
    }

    /// Current usage of every applicable tier, without charging any of them.
    pub async fn status(
        &self,
        identity: &RequestIdentity,
        cancel: &CancellationToken,
    ) -> Result<Vec<TierUsage>, AdmissionError> {
        let public = self.inner.config.is_public(&identity.path);
        self.check_identity(identity, public)?;

        let window = Window::containing(self.inner.clock.now());
        let mut usage = Vec::new();
        for tier in self.inner.tiers.resolve(identity, public, &window) {
            if !tier.applies {
                continue;
            }
            let used = self
                .bounded(self.inner.store.get(&tier.counter_key), cancel)
                .await
                .map_err(|source| AdmissionError::Store {
                    key: tier.counter_key.clone(),
                    source,
                })?
                .unwrap_or(0);
            usage.push(TierUsage {
                label: tier.label.to_string(),
                limit: tier.ceiling,
                used,
                remaining: tier.ceiling.saturating_sub(used),
                reset: window.reset_at(),
            });
        }
        Ok(usage)
    }

    /// Pings the store under the configured deadline.
    pub async fn store_health(&self) -> Result<(), StoreError> {
        self.bounded(self.inner.store.ping(), &CancellationToken::new())
            .await
    }
}

async fn cancellable<T>(
    call: impl Future<Output = Result<T, StoreError>>,
    cancel: &CancellationToken,
) -> Result<T, StoreError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(StoreError::Cancelled),
        res = call => res,
    }
}
