//! In-process counter store with clock-driven expiry.
//!
//! Counts are only visible to this process, so this store is for
//! single-instance development and tests. Production deployments share a
//! Redis store across replicas.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;

use super::{CounterStore, Increment};
use crate::error::StoreError;
use crate::window::{Clock, SystemClock};

#[derive(Debug, Clone, Copy, Default)]
struct Counter {
    count: u64,
    expires_at: Option<DateTime<Utc>>,
}

impl Counter {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// `DashMap`-backed counters. Increments on one key are serialized by the
/// map's entry lock, which makes them linearizable.
#[derive(Clone)]
pub struct MemoryCounterStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    counters: DashMap<String, Counter>,
    clock: Arc<dyn Clock>,
    calls: AtomicU64,
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a store whose expiry follows `clock` (e.g. a `ManualClock`).
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                counters: DashMap::new(),
                clock,
                calls: AtomicU64::new(0),
            }),
        }
    }

    /// Number of store operations served so far.
    pub fn calls(&self) -> u64 {
        self.inner.calls.load(Ordering::Relaxed)
    }

    /// Expiry attached to a live counter, if any.
    #[cfg(test)]
    fn expires_at(&self, key: &str) -> Option<DateTime<Utc>> {
        let now = self.inner.clock.now();
        self.inner
            .counters
            .get(key)
            .filter(|c| !c.is_expired(now))
            .and_then(|c| c.expires_at)
    }

    /// Number of counters held, expired or not.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.counters.len()
    }

    /// Removes expired counters (background cleanup).
    pub fn cleanup(&self) -> usize {
        let now = self.inner.clock.now();
        let before = self.inner.counters.len();
        self.inner.counters.retain(|_, c| !c.is_expired(now));
        before.saturating_sub(self.inner.counters.len())
    }

    fn record_call(&self) {
        self.inner.calls.fetch_add(1, Ordering::Relaxed);
    }

    fn bump(&self, key: &str, ttl: Option<Duration>) -> u64 {
        let now = self.inner.clock.now();
        let mut entry = self.inner.counters.entry(key.to_owned()).or_default();
        if entry.is_expired(now) {
            *entry = Counter::default();
        }
        entry.count += 1;
        if entry.count == 1
            && let Some(ttl) = ttl
        {
            entry.expires_at = Some(now + to_delta(ttl));
        }
        entry.count
    }
}

fn to_delta(ttl: Duration) -> TimeDelta {
    TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX)
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        self.record_call();
        Ok(self.bump(key, None))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.record_call();
        let now = self.inner.clock.now();
        if let Some(mut entry) = self.inner.counters.get_mut(key)
            && !entry.is_expired(now)
        {
            entry.expires_at = Some(now + to_delta(ttl));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        self.record_call();
        let now = self.inner.clock.now();
        Ok(self
            .inner
            .counters
            .get(key)
            .filter(|c| !c.is_expired(now))
            .map(|c| c.count))
    }

    /// Increment and expiry happen under one entry lock, without I/O, so
    /// `deadline` never applies.
    async fn incr_with_expiry(
        &self,
        key: &str,
        ttl: Duration,
        _deadline: Duration,
    ) -> Result<Increment, StoreError> {
        self.record_call();
        Ok(Increment {
            count: self.bump(key, Some(ttl)),
            expiry_error: None,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.record_call();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::ManualClock;
    use chrono::TimeZone;

    const HOUR: Duration = Duration::from_secs(3600);
    const SECOND: Duration = Duration::from_secs(1);

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 16, 14, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn incr_creates_then_counts() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.incr("a").await.unwrap(), 1);
        assert_eq!(store.incr("a").await.unwrap(), 2);
        assert_eq!(store.incr("b").await.unwrap(), 1);
        assert_eq!(store.get("a").await.unwrap(), Some(2));
        assert_eq!(store.get("missing").await.unwrap(), None);
        assert_eq!(store.calls(), 5);
    }

    #[tokio::test]
    async fn expiry_set_only_on_creation() {
        let clock = clock();
        let store = MemoryCounterStore::with_clock(Arc::new(clock.clone()));
        let first = store.incr_with_expiry("k", HOUR, SECOND).await.unwrap();
        assert_eq!(first.count, 1);
        let deadline = store.expires_at("k").unwrap();

        clock.advance(Duration::from_secs(600));
        let second = store.incr_with_expiry("k", HOUR, SECOND).await.unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(store.expires_at("k"), Some(deadline));
    }

    #[tokio::test]
    async fn expired_counter_restarts() {
        let clock = clock();
        let store = MemoryCounterStore::with_clock(Arc::new(clock.clone()));
        for _ in 0..3 {
            store.incr_with_expiry("k", HOUR, SECOND).await.unwrap();
        }
        clock.advance(HOUR);
        assert_eq!(store.get("k").await.unwrap(), None);
        let inc = store.incr_with_expiry("k", HOUR, SECOND).await.unwrap();
        assert_eq!(inc.count, 1);
    }

    #[tokio::test]
    async fn counter_without_expiry_never_resets() {
        let clock = clock();
        let store = MemoryCounterStore::with_clock(Arc::new(clock.clone()));
        store.incr("k").await.unwrap();
        clock.advance(HOUR * 5);
        assert_eq!(store.incr("k").await.unwrap(), 2);
        assert_eq!(store.expires_at("k"), None);
    }

    #[tokio::test]
    async fn default_two_step_path_attaches_expiry() {
        let clock = clock();
        let store = MemoryCounterStore::with_clock(Arc::new(clock.clone()));
        store.incr("k").await.unwrap();
        store.expire("k", HOUR).await.unwrap();
        clock.advance(HOUR);
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cleanup_drops_expired() {
        let clock = clock();
        let store = MemoryCounterStore::with_clock(Arc::new(clock.clone()));
        store.incr_with_expiry("old", HOUR, SECOND).await.unwrap();
        clock.advance(Duration::from_secs(1800));
        store.incr_with_expiry("new", HOUR, SECOND).await.unwrap();
        clock.advance(Duration::from_secs(1800));

        assert_eq!(store.cleanup(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("new").await.unwrap(), Some(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let store = MemoryCounterStore::new();
        let mut handles = Vec::new();
        for _ in 0..64 {
            let s = store.clone();
            handles.push(tokio::spawn(async move {
                s.incr_with_expiry("hot", HOUR, SECOND).await.unwrap().count
            }));
        }
        let mut seen = Vec::new();
        for h in handles {
            seen.push(h.await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=64).collect::<Vec<u64>>());
        assert_eq!(store.get("hot").await.unwrap(), Some(64));
    }
}
