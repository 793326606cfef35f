//! Server configuration via CLI args and environment variables.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use pitstop_admission::config::DEFAULT_PUBLIC_PREFIXES;
use pitstop_admission::{AdmissionConfig, TierPolicy};

/// Where quota counters live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CounterBackend {
    /// Shared Redis/Valkey server (required with more than one instance).
    Redis,
    /// Process-local counters, for development and tests.
    Memory,
}

/// Tier policy for authenticated routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    /// Per-user, then per-address.
    Standard,
    /// Per-user, per-address and per-key, all inside the API key's namespace.
    ApiKey,
}

impl From<PolicyArg> for TierPolicy {
    fn from(p: PolicyArg) -> Self {
        match p {
            PolicyArg::Standard => TierPolicy::Standard,
            PolicyArg::ApiKey => TierPolicy::ApiKeyScoped,
        }
    }
}

fn default_public_routes() -> Vec<String> {
    DEFAULT_PUBLIC_PREFIXES.iter().map(|p| (*p).to_string()).collect()
}

/// Admission-control front for the Pitstop API.
#[derive(Parser, Debug, Clone)]
#[command(name = "pitstop-server", version, about)]
pub struct Config {
    /// Bind address.
    #[arg(long, default_value = "0.0.0.0", env = "PITSTOP_HOST")]
    pub host: String,

    /// Bind port.
    #[arg(long, default_value_t = 8080, env = "PORT")]
    pub port: u16,

    /// Log level.
    #[arg(long, default_value = "info", env = "PITSTOP_LOG_LEVEL")]
    pub log_level: String,

    /// Log format: "text" or "json".
    #[arg(long, default_value = "text", env = "PITSTOP_LOG_FORMAT")]
    pub log_format: String,

    /// Counter store backend.
    #[arg(long, value_enum, default_value_t = CounterBackend::Redis, env = "PITSTOP_COUNTER_STORE")]
    pub counter_store: CounterBackend,

    /// Redis connection URL.
    #[arg(long, default_value = "redis://127.0.0.1:6379", env = "REDIS_URL")]
    pub redis_url: String,

    /// Deadline for each counter store call, in milliseconds.
    #[arg(long, default_value_t = 500, env = "PITSTOP_STORE_TIMEOUT_MS")]
    pub store_timeout_ms: u64,

    /// Tier policy for authenticated routes.
    #[arg(long, value_enum, default_value_t = PolicyArg::Standard, env = "PITSTOP_POLICY")]
    pub policy: PolicyArg,

    /// Path prefixes treated as public routes (comma-separated).
    #[arg(
        long,
        env = "PITSTOP_PUBLIC_ROUTES",
        value_delimiter = ',',
        default_values_t = default_public_routes()
    )]
    pub public_routes: Vec<String>,

    /// Per-address hourly ceiling on public routes.
    #[arg(long, default_value_t = 10_000, env = "PITSTOP_PUBLIC_LIMIT")]
    pub public_limit: u64,

    /// Per-user hourly ceiling on authenticated routes.
    #[arg(long, default_value_t = 500, env = "PITSTOP_USER_LIMIT")]
    pub user_limit: u64,

    /// Per-address hourly ceiling on authenticated routes.
    #[arg(long, default_value_t = 1_000, env = "PITSTOP_ADDRESS_LIMIT")]
    pub address_limit: u64,

    /// Per-user-under-key hourly ceiling (api-key policy).
    #[arg(long, default_value_t = 500, env = "PITSTOP_KEY_USER_LIMIT")]
    pub key_user_limit: u64,

    /// Per-address-under-key hourly ceiling (api-key policy).
    #[arg(long, default_value_t = 1_000, env = "PITSTOP_KEY_ADDRESS_LIMIT")]
    pub key_address_limit: u64,

    /// Per-key hourly ceiling (api-key policy).
    #[arg(long, default_value_t = 5_000, env = "PITSTOP_KEY_LIMIT")]
    pub key_limit: u64,

    /// Take the client address from `X-Forwarded-For`. Only enable behind a
    /// proxy that overwrites the header.
    #[arg(long, env = "PITSTOP_TRUST_FORWARDED_FOR")]
    pub trust_forwarded_for: bool,

    /// CORS allowed origins (comma-separated). Empty for no CORS.
    #[arg(long, env = "PITSTOP_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,
}

impl Config {
    /// Parses configuration from CLI args and env vars.
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Admission settings derived from this configuration.
    ///
    /// Not validated here; `AdmissionController::new` does that.
    pub fn admission_config(&self) -> AdmissionConfig {
        AdmissionConfig {
            policy: self.policy.into(),
            public_prefixes: self.public_routes.clone(),
            public_ceiling: self.public_limit,
            user_ceiling: self.user_limit,
            address_ceiling: self.address_limit,
            key_user_ceiling: self.key_user_limit,
            key_address_ceiling: self.key_address_limit,
            key_ceiling: self.key_limit,
            store_timeout: Duration::from_millis(self.store_timeout_ms),
        }
    }
}
