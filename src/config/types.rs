//! Configuration Types
//!
//! File-facing configuration with sensible defaults. Durations are written
//! in milliseconds so they round-trip through TOML and env vars; they are
//! converted to runtime types by [`Config::gateway_config`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::constants::{
    budget as budget_constants, circuit_breaker as cb_constants, rate_limit as rl_constants,
    retry as retry_constants, store as store_constants,
};
use crate::gateway::{
    BudgetConfig, CircuitBreakerConfig, CostCalculator, GatewayConfig, MemoryStore,
    ProviderConfig, RateLimiterConfig, RetryPolicy, SharedClock, SharedStore,
};
use crate::types::{ErrorClass, GatewayError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Inference provider settings
    pub provider: ProviderConfig,

    pub rate_limit: RateLimitSettings,

    pub budget: BudgetSettings,

    pub circuit_breaker: CircuitBreakerSettings,

    pub retry: RetrySettings,

    /// Per-thousand-token pricing
    pub cost: CostCalculator,

    /// Shared state backend
    pub store: StoreSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            provider: ProviderConfig::default(),
            rate_limit: RateLimitSettings::default(),
            budget: BudgetSettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            retry: RetrySettings::default(),
            cost: CostCalculator::default(),
            store: StoreSettings::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `GatewayError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if let Some(temperature) = self.provider.temperature
            && !(0.0..=1.0).contains(&temperature)
        {
            return Err(GatewayError::Config(format!(
                "provider.temperature must be between 0.0 and 1.0, got {}",
                temperature
            )));
        }

        if self.provider.max_tokens == 0 {
            return Err(GatewayError::Config(
                "provider.max_tokens must be greater than 0".to_string(),
            ));
        }

        if self.store.backend == StoreBackend::Redis && self.store.url.is_none() {
            return Err(GatewayError::Config(
                "store.url is required when store.backend = \"redis\"".to_string(),
            ));
        }

        self.gateway_config().validate()
    }

    /// Runtime gateway settings derived from this configuration
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            breaker_name: self.provider.provider.clone(),
            rate_limit: RateLimiterConfig {
                max_requests: self.rate_limit.max_requests,
                window: Duration::from_millis(self.rate_limit.window_ms),
            },
            per_conversation: self.rate_limit.per_conversation.map(|limit| RateLimiterConfig {
                max_requests: limit.max_requests,
                window: Duration::from_millis(limit.window_ms),
            }),
            budget: BudgetConfig {
                daily_cap: self.budget.daily_cap,
                warning_ratio: self.budget.warning_ratio,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: self.circuit_breaker.failure_threshold,
                failure_window: Duration::from_millis(self.circuit_breaker.failure_window_ms),
                open_timeout: Duration::from_millis(self.circuit_breaker.open_timeout_ms),
                half_open_max_concurrent: self.circuit_breaker.half_open_max_concurrent,
                trip_on: self.circuit_breaker.trip_on.clone(),
                ..CircuitBreakerConfig::default()
            },
            retry: RetryPolicy {
                max_retries: self.retry.max_retries,
                base_delay: Duration::from_millis(self.retry.base_delay_ms),
            },
            cost: self.cost,
            attempt_timeout: Duration::from_secs(self.provider.timeout_secs),
            default_max_tokens: self.provider.max_tokens,
            key_prefix: self.store.key_prefix.clone(),
        }
    }
}

// =============================================================================
// Rate Limit
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Requests admitted per window across all callers
    pub max_requests: u32,
    pub window_ms: u64,
    /// Optional extra limit per conversation id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_conversation: Option<WindowLimit>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: rl_constants::MAX_REQUESTS,
            window_ms: rl_constants::WINDOW_MS,
            per_conversation: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowLimit {
    pub max_requests: u32,
    pub window_ms: u64,
}

// =============================================================================
// Budget
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSettings {
    /// Spend allowed per UTC day, in currency units
    pub daily_cap: f64,
    pub warning_ratio: f64,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            daily_cap: budget_constants::DAILY_CAP,
            warning_ratio: budget_constants::WARNING_RATIO,
        }
    }
}

// =============================================================================
// Circuit Breaker
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub failure_window_ms: u64,
    pub open_timeout_ms: u64,
    pub half_open_max_concurrent: u32,
    /// Error classes counted as breaker failures
    pub trip_on: Vec<ErrorClass>,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: cb_constants::FAILURE_THRESHOLD,
            failure_window_ms: cb_constants::FAILURE_WINDOW_MS,
            open_timeout_ms: cb_constants::OPEN_TIMEOUT_MS,
            half_open_max_concurrent: cb_constants::HALF_OPEN_MAX_CONCURRENT,
            trip_on: ErrorClass::default_trip_classes(),
        }
    }
}

// =============================================================================
// Retry
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: retry_constants::MAX_RETRIES,
            base_delay_ms: retry_constants::BASE_DELAY_MS,
        }
    }
}

// =============================================================================
// Store
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process; state is not shared between processes
    #[default]
    Memory,
    /// Shared Redis instance (requires the `redis-store` feature)
    Redis,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Memory => write!(f, "memory"),
            StoreBackend::Redis => write!(f, "redis"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// Connection URL, e.g. `redis://127.0.0.1:6379`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Prefix for every key the gateway writes
    pub key_prefix: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: None,
            key_prefix: store_constants::KEY_PREFIX.to_string(),
        }
    }
}

impl StoreSettings {
    /// Open the configured backend
    pub fn open(&self, clock: SharedClock) -> Result<SharedStore> {
        match self.backend {
            StoreBackend::Memory => Ok(Arc::new(MemoryStore::with_clock(clock))),
            StoreBackend::Redis => self.open_redis(),
        }
    }

    #[cfg(feature = "redis-store")]
    fn open_redis(&self) -> Result<SharedStore> {
        let url = self.url.as_deref().ok_or_else(|| {
            GatewayError::Config("store.url is required for the redis backend".to_string())
        })?;
        Ok(Arc::new(crate::gateway::store::RedisStore::new(url)?))
    }

    #[cfg(not(feature = "redis-store"))]
    fn open_redis(&self) -> Result<SharedStore> {
        Err(GatewayError::Config(
            "store.backend = \"redis\" requires building with the `redis-store` feature"
                .to_string(),
        ))
    }
}
