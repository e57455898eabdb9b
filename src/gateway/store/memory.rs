//! In-process counter store
//!
//! Mirrors the Redis semantics the gateway relies on (TTL preserved across
//! increments, `SET` clearing TTL, sorted-set scoring) behind a single mutex.
//! Expiry is evaluated lazily against the injected [`Clock`], which makes
//! window and ledger rollover deterministic in tests. Keys that are never
//! touched again are dropped by a periodic sweep on access.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{CounterStore, KeyTtl, StoreError, StoreResult};
use crate::constants::store as store_constants;
use crate::gateway::clock::{SharedClock, SystemClock};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Sorted(HashMap<String, f64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at_ms: Option<i64>,
}

impl Entry {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now_ms)
    }
}

pub struct MemoryStore {
    clock: SharedClock,
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
    next_sweep_ms: AtomicI64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(std::sync::Arc::new(SystemClock))
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
            next_sweep_ms: AtomicI64::new(i64::MIN),
        }
    }

    /// Simulate an outage: every operation fails with `Unavailable` until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = self.clock.now_ms();
        self.lock()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            tracing::error!("MemoryStore mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Lock after checking availability and purging `key` if it has expired
    fn live(&self, key: &str) -> StoreResult<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        let now = self.clock.now_ms();
        let mut entries = self.lock();
        if now >= self.next_sweep_ms.load(Ordering::Relaxed) {
            self.sweep(&mut entries, now);
        } else if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        Ok(entries)
    }

    /// Drop every expired key; runs at most once per sweep interval
    fn sweep(&self, entries: &mut HashMap<String, Entry>, now_ms: i64) {
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now_ms));
        self.next_sweep_ms.store(
            now_ms.saturating_add(store_constants::MEMORY_SWEEP_INTERVAL_MS),
            Ordering::Relaxed,
        );
        let swept = before - entries.len();
        if swept > 0 {
            tracing::debug!(swept, remaining = entries.len(), "Swept expired keys");
        }
    }

    #[cfg(test)]
    fn stored_keys(&self) -> usize {
        self.lock().len()
    }

    fn ttl_deadline(&self, ttl: Duration) -> i64 {
        self.clock.now_ms() + ttl.as_millis() as i64
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::corrupt(key, "operation against a key holding the wrong kind of value")
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self.live(key)?;
        match entries.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(Value::Sorted(_)) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let expires_at_ms = ttl.map(|t| self.ttl_deadline(t));
        let mut entries = self.live(key)?;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let mut entries = self.live(key)?;
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Str("0".to_string()),
            expires_at_ms: None,
        });
        let Value::Str(raw) = &entry.value else {
            return Err(wrong_type(key));
        };
        let current: i64 = raw
            .parse()
            .map_err(|_| StoreError::corrupt(key, format!("not an integer: {raw}")))?;
        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::corrupt(key, "increment would overflow"))?;
        entry.value = Value::Str(next.to_string());
        Ok(next)
    }

    async fn incr_by_float(&self, key: &str, delta: f64) -> StoreResult<f64> {
        let mut entries = self.live(key)?;
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Str("0".to_string()),
            expires_at_ms: None,
        });
        let Value::Str(raw) = &entry.value else {
            return Err(wrong_type(key));
        };
        let current: f64 = raw
            .parse()
            .map_err(|_| StoreError::corrupt(key, format!("not a float: {raw}")))?;
        let next = current + delta;
        entry.value = Value::Str(next.to_string());
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let deadline = self.ttl_deadline(ttl);
        let mut entries = self.live(key)?;
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at_ms = Some(deadline);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> StoreResult<()> {
        let mut entries = self.live(key)?;
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Sorted(HashMap::new()),
            expires_at_ms: None,
        });
        let Value::Sorted(set) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        set.insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut entries = self.live(key)?;
        let Some(entry) = entries.get_mut(key) else {
            return Ok(false);
        };
        let Value::Sorted(set) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        let removed = set.remove(member).is_some();
        if set.is_empty() {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<u64> {
        let mut entries = self.live(key)?;
        let Some(entry) = entries.get_mut(key) else {
            return Ok(0);
        };
        let Value::Sorted(set) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        let before = set.len();
        set.retain(|_, score| *score < min || *score > max);
        let removed = (before - set.len()) as u64;
        if set.is_empty() {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let entries = self.live(key)?;
        match entries.get(key).map(|e| &e.value) {
            None => Ok(0),
            Some(Value::Sorted(set)) => Ok(set.len() as u64),
            Some(Value::Str(_)) => Err(wrong_type(key)),
        }
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.live(key)?;
        Ok(entries.remove(key).is_some())
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let now = self.clock.now_ms();
        let entries = self.live(key)?;
        Ok(match entries.get(key) {
            None => KeyTtl::Missing,
            Some(Entry {
                expires_at_ms: None,
                ..
            }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at_ms: Some(at),
                ..
            }) => KeyTtl::Expires(Duration::from_millis((at - now).max(0) as u64)),
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}
