//! Startup errors of the server binary.

use pitstop_admission::{ConfigError, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid admission configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("counter store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("invalid bind address {0:?}")]
    InvalidHost(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error("this build has no Redis support; use --counter-store memory")]
    RedisDisabled,
}
