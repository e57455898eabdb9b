//! Shared Counter Store
//!
//! Abstraction over the external key-value store that holds every piece of
//! gateway state (rate windows, budget ledgers, circuit breaker status).
//! The gateway keeps no authoritative in-memory copy, so any number of
//! processes can share one logical limit, budget and breaker.
//!
//! ## Backends
//!
//! - [`MemoryStore`]: single-process store with clock-driven expiry
//! - `RedisStore` (feature `redis-store`): shared Redis instance
//!
//! Correctness under concurrency relies only on the per-command atomicity of
//! `incr_by`, `incr_by_float` and the sorted-set operations.

mod memory;
#[cfg(feature = "redis-store")]
mod redis_store;

pub use memory::MemoryStore;
#[cfg(feature = "redis-store")]
pub use redis_store::RedisStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::constants::store as store_constants;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unexpected value at '{key}': {message}")]
    Corrupt { key: String, message: String },
}

impl StoreError {
    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            message: message.into(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Remaining lifetime of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    Missing,
    Persistent,
    Expires(Duration),
}

/// Key-value operations the gateway needs from its shared store.
///
/// Each method must be atomic on its own; the gateway never relies on a
/// read followed by a write being atomic.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a value; `ttl = None` makes the key persistent
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Atomically add to an integer counter (missing keys start at 0)
    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64>;

    /// Atomically add to a float counter (missing keys start at 0.0)
    async fn incr_by_float(&self, key: &str, delta: f64) -> StoreResult<f64>;

    /// Set a TTL on an existing key; returns `false` if the key is missing
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Add (or re-score) a member of a sorted set
    async fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<()>;

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Remove members with `min <= score <= max`; infinities are allowed
    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<u64>;

    async fn zcard(&self, key: &str) -> StoreResult<u64>;

    async fn del(&self, key: &str) -> StoreResult<bool>;

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl>;

    /// Round-trip check used by health reporting
    async fn ping(&self) -> StoreResult<()>;
}

pub type SharedStore = Arc<dyn CounterStore>;

// =============================================================================
// Key Layout
// =============================================================================

/// Builds every key the gateway writes, under one prefix
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(store_constants::KEY_PREFIX)
    }
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn circuit_state(&self, name: &str) -> String {
        format!("{}:circuit:{}:state", self.prefix, name)
    }

    pub fn circuit_failures(&self, name: &str) -> String {
        format!("{}:circuit:{}:failures", self.prefix, name)
    }

    /// Probe counter for one half-open episode, identified by when it began
    pub fn circuit_probes(&self, name: &str, epoch_ms: i64) -> String {
        format!("{}:circuit:{}:probes:{}", self.prefix, name, epoch_ms)
    }

    pub fn rate_window(&self, scope: &str) -> String {
        format!("{}:rate:{}", self.prefix, scope)
    }

    pub fn budget_day(&self, day: NaiveDate) -> String {
        format!("{}:budget:{}", self.prefix, day.format("%Y-%m-%d"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = KeySpace::new("fg");
        assert_eq!(keys.circuit_state("anthropic"), "fg:circuit:anthropic:state");
        assert_eq!(keys.rate_window("global"), "fg:rate:global");
        assert_eq!(
            keys.circuit_probes("anthropic", 42),
            "fg:circuit:anthropic:probes:42"
        );

        let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(keys.budget_day(day), "fg:budget:2026-03-01");
    }

    #[test]
    fn test_default_prefix() {
        assert_eq!(KeySpace::default().prefix(), "fundgate");
    }
}
