//! Static admission configuration.
//!
//! Built once at startup and handed to `AdmissionController::new`. Nothing
//! here changes afterwards, so it is shared across requests without locking.

use std::time::Duration;

use crate::error::ConfigError;

/// Which tier list an authenticated-class route gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TierPolicy {
    /// Per-user tier (when a user is known), then per-address tier.
    #[default]
    Standard,
    /// Every request carries an API key; tiers nest inside the key namespace:
    /// per-user-under-key, per-address-under-key, per-key.
    ApiKeyScoped,
}

/// Route prefixes that skip the authenticated tiers in the default deployment.
pub const DEFAULT_PUBLIC_PREFIXES: &[&str] = &[
    "/api/v1/auth/google",
    "/api/v1/auth/google/callback",
    "/api/v1/auth/exchange",
    "/api/v1/auth/refresh",
    "/api/v1/docs",
    "/health",
    "/docs",
];

/// Ceilings and scope rules for every tier.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub policy: TierPolicy,
    pub public_prefixes: Vec<String>,
    /// Per-address ceiling on public routes.
    pub public_ceiling: u64,
    /// Per-user ceiling on authenticated routes (tightest).
    pub user_ceiling: u64,
    /// Per-address ceiling on authenticated routes.
    pub address_ceiling: u64,
    pub key_user_ceiling: u64,
    pub key_address_ceiling: u64,
    /// Ceiling shared by every caller of one API key.
    pub key_ceiling: u64,
    /// Deadline for each counter store call. Expiry counts as a store error.
    pub store_timeout: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            policy: TierPolicy::Standard,
            public_prefixes: DEFAULT_PUBLIC_PREFIXES
                .iter()
                .map(|p| (*p).to_string())
                .collect(),
            public_ceiling: 10_000,
            user_ceiling: 500,
            address_ceiling: 1_000,
            key_user_ceiling: 500,
            key_address_ceiling: 1_000,
            key_ceiling: 5_000,
            store_timeout: Duration::from_millis(500),
        }
    }
}

impl AdmissionConfig {
    /// Returns true if `path` starts with one of the public prefixes.
    pub fn is_public(&self, path: &str) -> bool {
        self.public_prefixes.iter().any(|p| path.starts_with(p))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ceilings = [
            ("public", self.public_ceiling),
            ("user", self.user_ceiling),
            ("address", self.address_ceiling),
            ("key-user", self.key_user_ceiling),
            ("key-address", self.key_address_ceiling),
            ("key", self.key_ceiling),
        ];
        if let Some(&(name, _)) = ceilings.iter().find(|(_, c)| *c == 0) {
            return Err(ConfigError::ZeroCeiling(name));
        }

        if self.store_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        if let Some(bad) = self.public_prefixes.iter().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::InvalidPrefix(bad.clone()));
        }

        // Narrower scopes must exhaust before broader ones mask them.
        let order = match self.policy {
            TierPolicy::Standard => vec![
                ("user", self.user_ceiling),
                ("address", self.address_ceiling),
            ],
            TierPolicy::ApiKeyScoped => vec![
                ("key-user", self.key_user_ceiling),
                ("key-address", self.key_address_ceiling),
                ("key", self.key_ceiling),
            ],
        };
        for pair in order.windows(2) {
            let (narrow, narrow_value) = pair[0];
            let (broad, broad_value) = pair[1];
            if narrow_value >= broad_value {
                return Err(ConfigError::CeilingOrder {
                    narrow,
                    narrow_value,
                    broad,
                    broad_value,
                });
            }
        }

        Ok(())
    }
}
