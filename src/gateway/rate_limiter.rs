//! Sliding-Window Rate Limiter
//!
//! Bounds admitted requests per rolling window. Each admitted request leaves
//! one timestamped member in a sorted set; members older than the window are
//! pruned before counting.
//!
//! Admission is optimistic: the member is added first, then the window is
//! recounted and the member rolled back if a concurrent caller won the last
//! slot. Concurrent callers can therefore be under-admitted but never
//! over-admitted.
//!
//! The limiter fails open: if the store cannot be reached, the request is
//! allowed and a warning is logged.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::constants::rate_limit as rl_constants;
use crate::gateway::clock::SharedClock;
use crate::gateway::store::{KeySpace, SharedStore, StoreResult};
use crate::types::ConversationId;

/// Configuration for one limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Requests admitted per window
    pub max_requests: u32,
    /// Rolling window length
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: rl_constants::MAX_REQUESTS,
            window: Duration::from_millis(rl_constants::WINDOW_MS),
        }
    }
}

/// What a window counts against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateScope {
    /// One window shared by every caller
    Global,
    /// One window per conversation
    Conversation(ConversationId),
}

impl RateScope {
    fn key_fragment(&self) -> String {
        match self {
            Self::Global => "global".to_string(),
            Self::Conversation(id) => format!("conversation:{}", id),
        }
    }
}

impl std::fmt::Display for RateScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Conversation(id) => write!(f, "conversation {}", id),
        }
    }
}

/// Current window usage
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    pub window_ms: u64,
}

impl RateLimitStatus {
    pub fn utilization(&self) -> f64 {
        if self.limit == 0 {
            return 1.0;
        }
        self.used as f64 / self.limit as f64
    }
}

/// Outcome of [`RateLimiter::acquire`]
///
/// Carries the window entry taken by an admitted request so it can be handed
/// back with [`RateLimiter::release`] when a later check rejects the request.
#[must_use]
#[derive(Debug)]
pub struct RateGrant {
    pub admitted: bool,
    member: Option<String>,
}

impl RateGrant {
    fn rejected() -> Self {
        Self {
            admitted: false,
            member: None,
        }
    }

    /// Admitted without an entry (store unreachable)
    fn unrecorded() -> Self {
        Self {
            admitted: true,
            member: None,
        }
    }
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    store: SharedStore,
    clock: SharedClock,
    keys: KeySpace,
}

impl RateLimiter {
    pub fn new(
        config: RateLimiterConfig,
        store: SharedStore,
        clock: SharedClock,
        keys: KeySpace,
    ) -> Self {
        Self {
            config,
            store,
            clock,
            keys,
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Admit or reject one request for `scope`, failing open on store errors
    pub async fn allow(&self, scope: &RateScope) -> bool {
        self.acquire(scope).await.admitted
    }

    /// Like [`allow`](Self::allow), keeping the window entry for a later release
    pub async fn acquire(&self, scope: &RateScope) -> RateGrant {
        match self.try_acquire(scope).await {
            Ok(grant) => grant,
            Err(err) => {
                warn!(%scope, error = %err, "Rate limiter store unavailable, failing open");
                RateGrant::unrecorded()
            }
        }
    }

    /// Hand back the entry of a request rejected after admission
    pub async fn release(&self, scope: &RateScope, grant: RateGrant) {
        let Some(member) = grant.member else {
            return;
        };
        let key = self.keys.rate_window(&scope.key_fragment());
        if let Err(err) = self.store.zrem(&key, &member).await {
            warn!(%scope, error = %err, "Failed to release rate window entry");
        }
    }

    /// Admission decision without the fail-open policy applied
    pub async fn try_acquire(&self, scope: &RateScope) -> StoreResult<RateGrant> {
        let key = self.keys.rate_window(&scope.key_fragment());
        let now = self.clock.now_ms();
        let limit = u64::from(self.config.max_requests);

        let used = self.prune_and_count(&key, now).await?;
        if used >= limit {
            debug!(%scope, used, limit, "Rate limit reached");
            return Ok(RateGrant::rejected());
        }

        let member = format!("{}-{}", now, Uuid::new_v4());
        self.store.zadd(&key, now as f64, &member).await?;
        self.store.expire(&key, self.config.window).await?;

        // A concurrent caller may have taken the last slot between count and add
        let after = self.store.zcard(&key).await?;
        if after > limit {
            self.store.zrem(&key, &member).await?;
            debug!(%scope, used = after - 1, limit, "Rate limit reached (lost race)");
            return Ok(RateGrant::rejected());
        }

        Ok(RateGrant {
            admitted: true,
            member: Some(member),
        })
    }

    /// Window usage for `scope` (read-only apart from pruning)
    pub async fn status(&self, scope: &RateScope) -> StoreResult<RateLimitStatus> {
        let key = self.keys.rate_window(&scope.key_fragment());
        let used = self.prune_and_count(&key, self.clock.now_ms()).await?;
        let used = u32::try_from(used).unwrap_or(u32::MAX);

        Ok(RateLimitStatus {
            used,
            limit: self.config.max_requests,
            remaining: self.config.max_requests.saturating_sub(used),
            window_ms: self.config.window.as_millis() as u64,
        })
    }

    async fn prune_and_count(&self, key: &str, now_ms: i64) -> StoreResult<u64> {
        let cutoff = now_ms - self.config.window.as_millis() as i64;
        self.store
            .zrem_range_by_score(key, f64::NEG_INFINITY, cutoff as f64)
            .await?;
        self.store.zcard(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::clock::ManualClock;
    use crate::gateway::store::MemoryStore;
    use std::sync::Arc;

    fn limiter(max_requests: u32, window_secs: u64) -> (Arc<ManualClock>, Arc<MemoryStore>, RateLimiter) {
        let clock = Arc::new(ManualClock::fixed());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = RateLimiter::new(
            RateLimiterConfig {
                max_requests,
                window: Duration::from_secs(window_secs),
            },
            store.clone(),
            clock.clone(),
            KeySpace::default(),
        );
        (clock, store, limiter)
    }

    #[tokio::test]
    async fn test_admits_up_to_limit_then_rejects() {
        let (clock, _, limiter) = limiter(50, 60);
        let mut admitted = 0;
        for _ in 0..51 {
            if limiter.allow(&RateScope::Global).await {
                admitted += 1;
            }
            clock.advance(Duration::from_millis(10));
        }
        assert_eq!(admitted, 50);
        assert!(!limiter.allow(&RateScope::Global).await);
    }

    #[tokio::test]
    async fn test_rejection_has_no_side_effect() {
        let (_, _, limiter) = limiter(2, 60);
        assert!(limiter.allow(&RateScope::Global).await);
        assert!(limiter.allow(&RateScope::Global).await);
        for _ in 0..5 {
            assert!(!limiter.allow(&RateScope::Global).await);
        }
        let status = limiter.status(&RateScope::Global).await.unwrap();
        assert_eq!(status.used, 2);
        assert_eq!(status.remaining, 0);
    }

    #[tokio::test]
    async fn test_window_slides() {
        let (clock, _, limiter) = limiter(3, 60);
        assert!(limiter.allow(&RateScope::Global).await);
        clock.advance(Duration::from_secs(20));
        assert!(limiter.allow(&RateScope::Global).await);
        assert!(limiter.allow(&RateScope::Global).await);
        assert!(!limiter.allow(&RateScope::Global).await);

        // first entry leaves the window, freeing exactly one slot
        clock.advance(Duration::from_secs(40));
        assert!(limiter.allow(&RateScope::Global).await);
        assert!(!limiter.allow(&RateScope::Global).await);
    }

    #[tokio::test]
    async fn test_scopes_are_independent() {
        let (_, _, limiter) = limiter(1, 60);
        let a = RateScope::Conversation(ConversationId::new("a"));
        let b = RateScope::Conversation(ConversationId::new("b"));
        assert!(limiter.allow(&a).await);
        assert!(!limiter.allow(&a).await);
        assert!(limiter.allow(&b).await);
        assert!(limiter.allow(&RateScope::Global).await);
    }

    #[tokio::test]
    async fn test_fails_open_when_store_down() {
        let (_, store, limiter) = limiter(1, 60);
        assert!(limiter.allow(&RateScope::Global).await);
        store.set_unavailable(true);
        assert!(limiter.allow(&RateScope::Global).await);
        assert!(limiter.try_acquire(&RateScope::Global).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_callers_never_over_admit() {
        let (_, _, limiter) = limiter(10, 60);
        let limiter = Arc::new(limiter);
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..40 {
            let limiter = Arc::clone(&limiter);
            tasks.spawn(async move { limiter.allow(&RateScope::Global).await });
        }
        let mut admitted = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap() {
                admitted += 1;
            }
        }
        assert!(admitted <= 10);
        assert!(limiter.status(&RateScope::Global).await.unwrap().used <= 10);
    }

    #[tokio::test]
    async fn test_release_returns_the_slot() {
        let (_, _, limiter) = limiter(1, 60);
        let grant = limiter.acquire(&RateScope::Global).await;
        assert!(grant.admitted);
        assert!(!limiter.allow(&RateScope::Global).await);

        limiter.release(&RateScope::Global, grant).await;
        assert_eq!(limiter.status(&RateScope::Global).await.unwrap().used, 0);
        assert!(limiter.allow(&RateScope::Global).await);
    }

    #[tokio::test]
    async fn test_status_utilization() {
        let (_, _, limiter) = limiter(4, 60);
        limiter.allow(&RateScope::Global).await;
        let status = limiter.status(&RateScope::Global).await.unwrap();
        assert_eq!(status.used, 1);
        assert_eq!(status.limit, 4);
        assert_eq!(status.remaining, 3);
        assert!((status.utilization() - 0.25).abs() < 1e-9);
    }
}
