//! Shared Circuit Breaker
//!
//! Stops calling a provider that keeps failing, then probes for recovery.
//! All state lives in the shared store so every gateway process sees the
//! same breaker.
//!
//! ## States
//!
//! - **Closed**: Normal operation, requests flow through
//! - **Open**: Provider is failing, requests are rejected immediately
//! - **HalfOpen**: Testing if provider has recovered
//!
//! ## Transitions
//!
//! ```text
//! Closed   --[failure_threshold failures within failure_window]--> Open
//! Open     --[open_timeout elapsed, on allow()]-------------------> HalfOpen
//! HalfOpen --[success]--------------------------------------------> Closed
//! HalfOpen --[failure]--------------------------------------------> Open
//! ```
//!
//! ## Store layout
//!
//! - `circuit:{name}:state`: JSON record (state, opened_at, last_failure_at)
//! - `circuit:{name}:failures`: counter whose TTL is the failure window, so a
//!   failure after a quiet period starts again from 1
//! - `circuit:{name}:probes:{epoch}`: sorted set of the probe permits in
//!   flight during one half-open episode, scored by issue time
//!
//! Every store failure fails open: the request is admitted and a warning logged.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::constants::circuit_breaker as cb_constants;
use crate::gateway::clock::SharedClock;
use crate::gateway::store::{KeySpace, SharedStore, StoreError, StoreResult};
use crate::types::{ErrorClass, GatewayError, Result};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - requests flow through
    #[default]
    Closed,
    /// Provider is failing - requests rejected immediately
    Open,
    /// Testing recovery - limited requests allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that open the circuit
    pub failure_threshold: u32,
    /// Failures further apart than this do not accumulate
    pub failure_window: Duration,
    /// Duration to wait before transitioning from open to half-open
    pub open_timeout: Duration,
    /// Maximum probe requests in flight while half-open
    pub half_open_max_concurrent: u32,
    /// Error classes that count as failures
    pub trip_on: Vec<ErrorClass>,
    /// Longest a single probe request can stay unresolved, retries included.
    /// Probe slots are held at least this long.
    pub max_probe_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: cb_constants::FAILURE_THRESHOLD,
            failure_window: Duration::from_millis(cb_constants::FAILURE_WINDOW_MS),
            open_timeout: Duration::from_millis(cb_constants::OPEN_TIMEOUT_MS),
            half_open_max_concurrent: cb_constants::HALF_OPEN_MAX_CONCURRENT,
            trip_on: ErrorClass::default_trip_classes(),
            max_probe_duration: Duration::ZERO,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn counts_as_failure(&self, class: ErrorClass) -> bool {
        self.trip_on.contains(&class)
    }
}

/// Persisted breaker record. `opened_at` is set exactly when the state is Open.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredCircuit {
    state: CircuitState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    opened_at: Option<i64>,
    /// Start of the current half-open episode; keys its probe counter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    half_open_since: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_failure_at: Option<i64>,
}

/// Admission slot handed out by [`CircuitBreaker::allow`].
///
/// A permit taken while half-open holds one probe slot. Hand it back with
/// [`CircuitBreaker::release`] when the request ends without a success or a
/// counted failure, otherwise the slot stays taken until it ages out.
#[must_use]
#[derive(Debug)]
pub struct CircuitPermit {
    probe: Option<ProbeSlot>,
}

#[derive(Debug)]
struct ProbeSlot {
    key: String,
    member: String,
}

impl CircuitPermit {
    fn normal() -> Self {
        Self { probe: None }
    }

    fn probe(key: String, member: String) -> Self {
        Self {
            probe: Some(ProbeSlot { key, member }),
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }
}

/// Result of an admission check
#[derive(Debug)]
pub struct CircuitDecision {
    pub allowed: bool,
    /// Why the request was rejected
    pub reason: Option<String>,
    /// Remaining cooldown when rejected while open
    pub retry_after: Option<Duration>,
    /// State the decision was made in
    pub state: CircuitState,
    /// Present exactly when `allowed`
    pub permit: Option<CircuitPermit>,
}

impl CircuitDecision {
    fn admit(state: CircuitState, permit: CircuitPermit) -> Self {
        Self {
            allowed: true,
            reason: None,
            retry_after: None,
            state,
            permit: Some(permit),
        }
    }

    fn reject(state: CircuitState, reason: String, retry_after: Option<Duration>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            retry_after,
            state,
            permit: None,
        }
    }

    /// Convert into the permit, or the caller-facing rejection
    pub fn into_result(self) -> Result<CircuitPermit> {
        match self.permit {
            Some(permit) if self.allowed => Ok(permit),
            _ => Err(GatewayError::CircuitOpen {
                reason: self.reason.unwrap_or_else(|| format!("circuit {}", self.state)),
                retry_after: self.retry_after,
            }),
        }
    }
}

/// Snapshot for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStatus {
    pub name: String,
    pub state: CircuitState,
    /// Failures within the current failure window
    pub failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub half_open_probes_issued: u32,
    /// Cooldown left before a probe is admitted (open only)
    pub cooldown_remaining_ms: Option<u64>,
}

impl CircuitBreakerStatus {
    /// Format as human-readable summary
    pub fn summary(&self) -> String {
        let cooldown = self
            .cooldown_remaining_ms
            .map(|ms| format!(" retry in {:.1}s", ms as f64 / 1000.0))
            .unwrap_or_default();

        format!(
            "[{}] {} | failures={} probes={}{}",
            self.name, self.state, self.failures, self.half_open_probes_issued, cooldown
        )
    }
}

/// Store-backed circuit breaker shared across gateway processes
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    store: SharedStore,
    clock: SharedClock,
    keys: KeySpace,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        store: SharedStore,
        clock: SharedClock,
        keys: KeySpace,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            store,
            clock,
            keys,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check if a request should be allowed.
    ///
    /// Performs the Open -> HalfOpen transition once the cooldown elapsed and
    /// hands out at most `half_open_max_concurrent` probe permits.
    pub async fn allow(&self) -> CircuitDecision {
        match self.try_allow().await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(
                    breaker = %self.name,
                    error = %err,
                    "Circuit breaker store unavailable, failing open"
                );
                CircuitDecision::admit(CircuitState::Closed, CircuitPermit::normal())
            }
        }
    }

    async fn try_allow(&self) -> StoreResult<CircuitDecision> {
        let now = self.clock.now_ms();
        let record = self.load().await?;

        match record.state {
            CircuitState::Closed => Ok(CircuitDecision::admit(
                CircuitState::Closed,
                CircuitPermit::normal(),
            )),
            CircuitState::Open => {
                // A record missing opened_at violates the invariant; let it probe
                let opened_at = record.opened_at.unwrap_or(i64::MIN / 2);
                if let Some(remaining) = self.cooldown_remaining(opened_at, now) {
                    debug!(breaker = %self.name, "Request blocked (circuit OPEN)");
                    return Ok(CircuitDecision::reject(
                        CircuitState::Open,
                        format!(
                            "circuit open, retry in {} seconds",
                            remaining.as_secs_f64().ceil() as u64
                        ),
                        Some(remaining),
                    ));
                }

                // Every process derives the same epoch, so racing transitions share one probe counter
                let epoch = opened_at.saturating_add(self.open_timeout_ms());
                let half_open = StoredCircuit {
                    state: CircuitState::HalfOpen,
                    opened_at: None,
                    half_open_since: Some(epoch),
                    last_failure_at: record.last_failure_at,
                };
                self.save(&half_open).await?;
                info!(
                    breaker = %self.name,
                    "Circuit breaker transitioning to HALF_OPEN (testing recovery)"
                );
                self.acquire_probe(epoch).await
            }
            CircuitState::HalfOpen => self.acquire_probe(record.half_open_since.unwrap_or(0)).await,
        }
    }

    async fn acquire_probe(&self, epoch: i64) -> StoreResult<CircuitDecision> {
        let key = self.keys.circuit_probes(&self.name, epoch);
        let now = self.clock.now_ms();
        let max = u64::from(self.config.half_open_max_concurrent);

        let in_flight = self.probes_in_flight(&key, now).await?;
        if in_flight < max {
            let member = format!("{}-{}", now, Uuid::new_v4());
            self.store.zadd(&key, now as f64, &member).await?;
            self.store.expire(&key, self.probe_ttl()).await?;

            // Another process may have taken the last slot between count and add
            let issued = self.store.zcard(&key).await?;
            if issued <= max {
                debug!(breaker = %self.name, issued, max, "Allowing probe request");
                return Ok(CircuitDecision::admit(
                    CircuitState::HalfOpen,
                    CircuitPermit::probe(key, member),
                ));
            }
            self.store.zrem(&key, &member).await?;
        }

        debug!(breaker = %self.name, max, "Half-open probe limit reached");
        Ok(CircuitDecision::reject(
            CircuitState::HalfOpen,
            "circuit half-open, recovery probe in progress".to_string(),
            None,
        ))
    }

    /// Drop permits older than the longest possible probe, then count the rest
    async fn probes_in_flight(&self, key: &str, now_ms: i64) -> StoreResult<u64> {
        let cutoff = now_ms - self.probe_ttl().as_millis() as i64;
        self.store
            .zrem_range_by_score(key, f64::NEG_INFINITY, cutoff as f64)
            .await?;
        self.store.zcard(key).await
    }

    /// Record a successful request
    pub async fn record_success(&self) {
        if let Err(err) = self.try_record_success().await {
            warn!(breaker = %self.name, error = %err, "Failed to record success");
        }
    }

    async fn try_record_success(&self) -> StoreResult<()> {
        let record = self.load().await?;

        // Reset failure count on any success
        self.store.del(&self.failures_key()).await?;

        if record.state == CircuitState::HalfOpen {
            self.save(&StoredCircuit {
                last_failure_at: record.last_failure_at,
                ..StoredCircuit::default()
            })
            .await?;
            info!(breaker = %self.name, "Circuit breaker closed (provider recovered)");
        }
        Ok(())
    }

    /// Record a terminal failure of class `class`.
    ///
    /// Classes outside `trip_on` are ignored. Returns the state entered when
    /// this failure caused a transition.
    pub async fn record_failure(&self, class: ErrorClass) -> Option<CircuitState> {
        if !self.config.counts_as_failure(class) {
            debug!(breaker = %self.name, %class, "Failure class does not count toward opening");
            return None;
        }

        match self.try_record_failure().await {
            Ok(transition) => transition,
            Err(err) => {
                warn!(breaker = %self.name, error = %err, "Failed to record failure");
                None
            }
        }
    }

    async fn try_record_failure(&self) -> StoreResult<Option<CircuitState>> {
        let now = self.clock.now_ms();
        let mut record = self.load().await?;

        match record.state {
            CircuitState::Closed => {
                let key = self.failures_key();
                let failures = self.store.incr_by(&key, 1).await?;
                self.store.expire(&key, self.config.failure_window).await?;
                record.last_failure_at = Some(now);

                if failures >= i64::from(self.config.failure_threshold) {
                    record.state = CircuitState::Open;
                    record.opened_at = Some(now);
                    self.save(&record).await?;
                    warn!(
                        breaker = %self.name,
                        failures,
                        timeout = ?self.config.open_timeout,
                        "Circuit breaker opened"
                    );
                    return Ok(Some(CircuitState::Open));
                }

                self.save(&record).await?;
                debug!(
                    breaker = %self.name,
                    failures,
                    threshold = self.config.failure_threshold,
                    "Failure recorded"
                );
                Ok(None)
            }
            CircuitState::HalfOpen => {
                // Any failure in half-open immediately opens the circuit
                self.store.del(&self.failures_key()).await?;
                self.save(&StoredCircuit {
                    state: CircuitState::Open,
                    opened_at: Some(now),
                    half_open_since: None,
                    last_failure_at: Some(now),
                })
                .await?;
                warn!(
                    breaker = %self.name,
                    "Circuit breaker re-opened after failure in half-open state"
                );
                Ok(Some(CircuitState::Open))
            }
            // Already open, nothing to do
            CircuitState::Open => Ok(None),
        }
    }

    /// Return a permit whose request ended without a success or counted failure
    pub async fn release(&self, permit: CircuitPermit) {
        let Some(slot) = permit.probe else {
            return;
        };

        // An expired slot is already gone; removing it again frees nothing else
        match self.store.zrem(&slot.key, &slot.member).await {
            Ok(true) => debug!(breaker = %self.name, "Probe slot released"),
            Ok(false) => debug!(breaker = %self.name, "Probe slot had already expired"),
            Err(err) => {
                warn!(breaker = %self.name, error = %err, "Failed to release probe slot");
            }
        }
    }

    /// Remaining cooldown if the circuit is open right now.
    ///
    /// Read-only: performs no transition and takes no probe slot. Store
    /// errors read as "not open".
    pub async fn open_cooldown(&self) -> Option<Duration> {
        let record = match self.load().await {
            Ok(record) => record,
            Err(err) => {
                warn!(breaker = %self.name, error = %err, "Circuit breaker store unavailable, failing open");
                return None;
            }
        };

        match (record.state, record.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                self.cooldown_remaining(opened_at, self.clock.now_ms())
            }
            _ => None,
        }
    }

    /// Current status as stored
    pub async fn status(&self) -> StoreResult<CircuitBreakerStatus> {
        let now = self.clock.now_ms();
        let record = self.load().await?;
        let failures = self.read_counter(&self.failures_key()).await?;

        let half_open_probes_issued = match (record.state, record.half_open_since) {
            (CircuitState::HalfOpen, Some(epoch)) => {
                let key = self.keys.circuit_probes(&self.name, epoch);
                let in_flight = self.probes_in_flight(&key, now).await?;
                u32::try_from(in_flight).unwrap_or(u32::MAX)
            }
            _ => 0,
        };

        let cooldown_remaining_ms = match (record.state, record.opened_at) {
            (CircuitState::Open, Some(opened_at)) => self
                .cooldown_remaining(opened_at, now)
                .map(|d| d.as_millis() as u64),
            _ => None,
        };

        Ok(CircuitBreakerStatus {
            name: self.name.clone(),
            state: record.state,
            failures,
            last_failure_at: record.last_failure_at.and_then(to_datetime),
            opened_at: record.opened_at.and_then(to_datetime),
            half_open_probes_issued,
            cooldown_remaining_ms,
        })
    }

    /// Force reset to closed state (for manual intervention)
    pub async fn reset(&self) -> StoreResult<()> {
        self.store.del(&self.failures_key()).await?;
        self.save(&StoredCircuit::default()).await?;
        info!(breaker = %self.name, "Circuit breaker manually reset to CLOSED");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Store helpers
    // -------------------------------------------------------------------------

    fn failures_key(&self) -> String {
        self.keys.circuit_failures(&self.name)
    }

    async fn load(&self) -> StoreResult<StoredCircuit> {
        let key = self.keys.circuit_state(&self.name);
        match self.store.get(&key).await? {
            None => Ok(StoredCircuit::default()),
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| StoreError::corrupt(key, e.to_string()))
            }
        }
    }

    async fn save(&self, record: &StoredCircuit) -> StoreResult<()> {
        let key = self.keys.circuit_state(&self.name);
        let raw = serde_json::to_string(record)
            .map_err(|e| StoreError::corrupt(key.as_str(), e.to_string()))?;
        self.store.set(&key, &raw, Some(self.state_ttl())).await
    }

    async fn read_counter(&self, key: &str) -> StoreResult<u32> {
        match self.store.get(key).await? {
            None => Ok(0),
            Some(raw) => raw
                .parse::<i64>()
                .map(|n| n.clamp(0, i64::from(u32::MAX)) as u32)
                .map_err(|e| StoreError::corrupt(key, e.to_string())),
        }
    }

    fn open_timeout_ms(&self) -> i64 {
        self.config.open_timeout.as_millis() as i64
    }

    fn cooldown_remaining(&self, opened_at: i64, now: i64) -> Option<Duration> {
        let remaining = opened_at.saturating_add(self.open_timeout_ms()) - now;
        (remaining > 0).then(|| Duration::from_millis(remaining as u64))
    }

    fn state_ttl(&self) -> Duration {
        Duration::from_secs(cb_constants::STATE_TTL_SECS).max(self.config.open_timeout * 2)
    }

    fn probe_ttl(&self) -> Duration {
        self.config
            .open_timeout
            .max(self.config.max_probe_duration)
            .max(Duration::from_secs(1))
    }
}

fn to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::clock::{Clock, ManualClock};
    use crate::gateway::store::MemoryStore;
    use std::sync::Arc;

    struct Harness {
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        breaker: CircuitBreaker,
    }

    impl Harness {
        fn new(config: CircuitBreakerConfig) -> Self {
            let clock = Arc::new(ManualClock::fixed());
            let store = Arc::new(MemoryStore::with_clock(clock.clone()));
            let breaker = Self::breaker_on(&clock, &store, config);
            Self {
                clock,
                store,
                breaker,
            }
        }

        fn breaker_on(
            clock: &Arc<ManualClock>,
            store: &Arc<MemoryStore>,
            config: CircuitBreakerConfig,
        ) -> CircuitBreaker {
            CircuitBreaker::new(
                "test",
                config,
                store.clone(),
                clock.clone(),
                KeySpace::default(),
            )
        }

        async fn state(&self) -> CircuitState {
            self.breaker.status().await.unwrap().state
        }

        async fn open(&self) {
            for _ in 0..self.breaker.config().failure_threshold {
                self.breaker.record_failure(ErrorClass::ServerError).await;
            }
            assert_eq!(self.state().await, CircuitState::Open);
        }
    }

    fn config(threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            failure_window: Duration::from_secs(60),
            open_timeout: Duration::from_secs(30),
            half_open_max_concurrent: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_initial_state_is_closed() {
        let h = Harness::new(config(5));
        assert_eq!(h.state().await, CircuitState::Closed);
        let decision = h.breaker.allow().await;
        assert!(decision.allowed);
        assert!(!decision.permit.unwrap().is_probe());
    }

    #[tokio::test]
    async fn test_opens_after_threshold_failures() {
        let h = Harness::new(config(5));

        for _ in 0..4 {
            assert_eq!(h.breaker.record_failure(ErrorClass::ServerError).await, None);
            h.clock.advance(Duration::from_secs(2));
        }
        assert_eq!(h.state().await, CircuitState::Closed);
        assert_eq!(h.breaker.status().await.unwrap().failures, 4);

        assert_eq!(
            h.breaker.record_failure(ErrorClass::Timeout).await,
            Some(CircuitState::Open)
        );
        let decision = h.breaker.allow().await;
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("30 seconds"));
        assert_eq!(decision.retry_after, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_stale_failure_resets_count_to_one() {
        let h = Harness::new(config(3));
        h.breaker.record_failure(ErrorClass::ServerError).await;
        h.breaker.record_failure(ErrorClass::ServerError).await;

        h.clock.advance(Duration::from_secs(61));
        h.breaker.record_failure(ErrorClass::ServerError).await;

        let status = h.breaker.status().await.unwrap();
        assert_eq!(status.failures, 1);
        assert_eq!(status.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_failures_within_window_accumulate() {
        let h = Harness::new(config(3));
        for _ in 0..3 {
            h.clock.advance(Duration::from_secs(50));
            h.breaker.record_failure(ErrorClass::Unavailable).await;
        }
        assert_eq!(h.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_client_errors_never_trip() {
        let h = Harness::new(config(1));
        for class in [
            ErrorClass::Authentication,
            ErrorClass::InvalidRequest,
            ErrorClass::RateLimited,
        ] {
            assert_eq!(h.breaker.record_failure(class).await, None);
        }
        let status = h.breaker.status().await.unwrap();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failures, 0);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let h = Harness::new(config(3));
        h.breaker.record_failure(ErrorClass::ServerError).await;
        h.breaker.record_failure(ErrorClass::ServerError).await;
        h.breaker.record_success().await;

        h.breaker.record_failure(ErrorClass::ServerError).await;
        h.breaker.record_failure(ErrorClass::ServerError).await;
        // Still closed because success reset the count
        assert_eq!(h.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_after_timeout_admits_one_probe() {
        let h = Harness::new(config(1));
        h.open().await;

        h.clock.advance(Duration::from_secs(29));
        assert!(!h.breaker.allow().await.allowed);

        h.clock.advance(Duration::from_secs(1));
        let probe = h.breaker.allow().await;
        assert!(probe.allowed);
        assert_eq!(probe.state, CircuitState::HalfOpen);
        assert!(probe.permit.as_ref().unwrap().is_probe());

        let excess = h.breaker.allow().await;
        assert!(!excess.allowed);
        assert_eq!(excess.state, CircuitState::HalfOpen);

        let status = h.breaker.status().await.unwrap();
        assert_eq!(status.state, CircuitState::HalfOpen);
        assert_eq!(status.half_open_probes_issued, 1);
        assert!(status.opened_at.is_none());
    }

    #[tokio::test]
    async fn test_half_open_concurrency_cap() {
        let h = Harness::new(CircuitBreakerConfig {
            half_open_max_concurrent: 2,
            ..config(1)
        });
        h.open().await;
        h.clock.advance(Duration::from_secs(30));

        assert!(h.breaker.allow().await.allowed);
        assert!(h.breaker.allow().await.allowed);
        assert!(!h.breaker.allow().await.allowed);
    }

    #[tokio::test]
    async fn test_probe_slot_held_while_probe_in_flight() {
        let h = Harness::new(CircuitBreakerConfig {
            max_probe_duration: Duration::from_secs(487),
            ..config(1)
        });
        h.open().await;
        h.clock.advance(Duration::from_secs(30));

        let first = h.breaker.allow().await.into_result().unwrap();
        assert!(first.is_probe());

        // slow probe still running well past open_timeout
        h.clock.advance(Duration::from_secs(31));
        assert!(!h.breaker.allow().await.allowed);
        h.clock.advance(Duration::from_secs(400));
        assert!(!h.breaker.allow().await.allowed);

        h.breaker.release(first).await;
        assert_eq!(h.breaker.status().await.unwrap().half_open_probes_issued, 0);
        assert!(h.breaker.allow().await.allowed);
    }

    #[tokio::test]
    async fn test_probe_slot_expires_after_max_probe_duration() {
        let h = Harness::new(CircuitBreakerConfig {
            max_probe_duration: Duration::from_secs(60),
            ..config(1)
        });
        h.open().await;
        h.clock.advance(Duration::from_secs(30));
        let abandoned = h.breaker.allow().await.into_result().unwrap();

        h.clock.advance(Duration::from_secs(61));
        let next = h.breaker.allow().await.into_result().unwrap();
        assert!(next.is_probe());

        // a late release of the abandoned permit must not free the live slot
        h.breaker.release(abandoned).await;
        assert!(!h.breaker.allow().await.allowed);
        h.breaker.release(next).await;
    }

    #[tokio::test]
    async fn test_half_open_closes_on_success() {
        let h = Harness::new(config(1));
        h.open().await;
        h.clock.advance(Duration::from_secs(30));
        let _permit = h.breaker.allow().await.into_result().unwrap();

        h.breaker.record_success().await;
        let status = h.breaker.status().await.unwrap();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failures, 0);
        assert!(h.breaker.allow().await.allowed);
    }

    #[tokio::test]
    async fn test_half_open_opens_on_failure() {
        let h = Harness::new(config(1));
        h.open().await;
        h.clock.advance(Duration::from_secs(30));
        let _permit = h.breaker.allow().await.into_result().unwrap();

        assert_eq!(
            h.breaker.record_failure(ErrorClass::Overloaded).await,
            Some(CircuitState::Open)
        );
        let status = h.breaker.status().await.unwrap();
        assert_eq!(status.state, CircuitState::Open);
        assert_eq!(status.opened_at, Some(h.clock.now()));
        assert_eq!(status.cooldown_remaining_ms, Some(30_000));
    }

    #[tokio::test]
    async fn test_release_frees_probe_slot() {
        let h = Harness::new(config(1));
        h.open().await;
        h.clock.advance(Duration::from_secs(30));

        let permit = h.breaker.allow().await.into_result().unwrap();
        assert!(!h.breaker.allow().await.allowed);

        h.breaker.release(permit).await;
        assert!(h.breaker.allow().await.allowed);
    }

    #[tokio::test]
    async fn test_open_cooldown_is_read_only() {
        let h = Harness::new(config(1));
        assert_eq!(h.breaker.open_cooldown().await, None);

        h.open().await;
        h.clock.advance(Duration::from_secs(10));
        assert_eq!(
            h.breaker.open_cooldown().await,
            Some(Duration::from_secs(20))
        );

        h.clock.advance(Duration::from_secs(20));
        assert_eq!(h.breaker.open_cooldown().await, None);
        // no transition was performed
        assert_eq!(h.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_iff_opened_at() {
        let h = Harness::new(config(2));
        let status = h.breaker.status().await.unwrap();
        assert!(status.opened_at.is_none());

        h.breaker.record_failure(ErrorClass::ServerError).await;
        assert!(h.breaker.status().await.unwrap().opened_at.is_none());

        h.breaker.record_failure(ErrorClass::ServerError).await;
        let status = h.breaker.status().await.unwrap();
        assert_eq!(status.state, CircuitState::Open);
        assert!(status.opened_at.is_some());
        assert!(status.last_failure_at.is_some());
    }

    #[tokio::test]
    async fn test_manual_reset() {
        let h = Harness::new(config(1));
        h.open().await;

        h.breaker.reset().await.unwrap();
        assert_eq!(h.state().await, CircuitState::Closed);
        assert!(h.breaker.allow().await.allowed);
    }

    #[tokio::test]
    async fn test_state_is_shared_across_instances() {
        let h = Harness::new(config(2));
        let other = Harness::breaker_on(&h.clock, &h.store, config(2));

        h.breaker.record_failure(ErrorClass::ServerError).await;
        other.record_failure(ErrorClass::ServerError).await;

        assert!(!h.breaker.allow().await.allowed);
        assert!(!other.allow().await.allowed);
    }

    #[tokio::test]
    async fn test_fails_open_when_store_down() {
        let h = Harness::new(config(1));
        h.open().await;

        h.store.set_unavailable(true);
        assert!(h.breaker.allow().await.allowed);
        assert_eq!(h.breaker.record_failure(ErrorClass::ServerError).await, None);
        h.breaker.record_success().await;
        assert!(h.breaker.status().await.is_err());

        h.store.set_unavailable(false);
        assert_eq!(h.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_rejection_maps_to_circuit_open_error() {
        let h = Harness::new(config(1));
        h.open().await;
        let err = h.breaker.allow().await.into_result().unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
        assert!(err.user_message().contains("30 seconds"));
    }

    #[test]
    fn test_status_summary() {
        let status = CircuitBreakerStatus {
            name: "anthropic".into(),
            state: CircuitState::Open,
            failures: 5,
            last_failure_at: None,
            opened_at: None,
            half_open_probes_issued: 0,
            cooldown_remaining_ms: Some(12_500),
        };
        assert_eq!(
            status.summary(),
            "[anthropic] OPEN | failures=5 probes=0 retry in 12.5s"
        );
    }
}
