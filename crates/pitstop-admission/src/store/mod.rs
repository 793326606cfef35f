//! Counter store: the shared, expiring counters admission decisions read.
//!
//! The store is the only shared mutable state. The controller never
//! read-modify-writes a counter itself; every mutation goes through the
//! store's atomic primitives, so no local locking is needed.

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

pub use memory::MemoryCounterStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisCounterStore;

/// Result of one `incr_with_expiry` call.
#[derive(Debug)]
pub struct Increment {
    /// Post-increment value. `1` means this call created the counter.
    pub count: u64,
    /// Set when the counter was created but attaching its TTL failed.
    /// The increment itself still happened.
    pub expiry_error: Option<StoreError>,
}

/// Atomic, expiring counters shared by every server instance.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increments `key` by one, creating it at 1.
    async fn incr(&self, key: &str) -> Result<u64, StoreError>;

    /// Attaches a time-to-live to `key`.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Reads the current value without changing it.
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Increments `key` and, if that created it, attaches `ttl`.
    ///
    /// Each store round-trip must finish within `deadline`. A timed-out
    /// increment is an error; a timed-out `expire` lands in
    /// `Increment::expiry_error`, since the count itself is already settled.
    ///
    /// The default is two separate calls, so a crash between them leaves a
    /// counter without expiry. Stores with server-side scripting override
    /// this with a single atomic operation.
    async fn incr_with_expiry(
        &self,
        key: &str,
        ttl: Duration,
        deadline: Duration,
    ) -> Result<Increment, StoreError> {
        let count = tokio::time::timeout(deadline, self.incr(key))
            .await
            .unwrap_or(Err(StoreError::Timeout(deadline)))?;
        let expiry_error = if count == 1 {
            tokio::time::timeout(deadline, self.expire(key, ttl))
                .await
                .unwrap_or(Err(StoreError::Timeout(deadline)))
                .err()
        } else {
            None
        };
        Ok(Increment {
            count,
            expiry_error,
        })
    }

    /// Liveness check.
    async fn ping(&self) -> Result<(), StoreError>;
}
