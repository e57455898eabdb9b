//! Global Constants
//!
//! Centralized defaults and tuning values for the gateway.
//! All magic numbers should be defined here with documentation.

/// Sliding-window rate limiter constants
pub mod rate_limit {
    /// Requests admitted per window (global scope)
    pub const MAX_REQUESTS: u32 = 50;

    /// Window length (milliseconds)
    pub const WINDOW_MS: u64 = 60_000;
}

/// Daily budget constants
pub mod budget {
    /// Default daily spend cap (currency units)
    pub const DAILY_CAP: f64 = 50_000.0;

    /// Fraction of the cap at which a warning alert is emitted
    pub const WARNING_RATIO: f64 = 0.8;

    /// Ledger entries outlive their day by a margin so late reads still resolve
    pub const LEDGER_TTL_SECS: u64 = 48 * 60 * 60;
}

/// Circuit breaker constants
pub mod circuit_breaker {
    /// Number of failures before opening circuit
    pub const FAILURE_THRESHOLD: u32 = 5;

    /// Failures further apart than this reset the counter (milliseconds)
    pub const FAILURE_WINDOW_MS: u64 = 60_000;

    /// Duration to wait before attempting recovery (milliseconds)
    pub const OPEN_TIMEOUT_MS: u64 = 30_000;

    /// Maximum probe requests admitted in half-open state
    pub const HALF_OPEN_MAX_CONCURRENT: u32 = 1;

    /// Safety-net TTL on persisted breaker state (seconds)
    pub const STATE_TTL_SECS: u64 = 60 * 60;
}

/// Retry constants
pub mod retry {
    /// Default maximum retries after the first attempt
    pub const MAX_RETRIES: u32 = 3;

    /// First backoff delay; doubles on every retry (milliseconds)
    pub const BASE_DELAY_MS: u64 = 1_000;
}

/// Cost constants (currency units per 1K tokens)
pub mod cost {
    pub const INPUT_PER_THOUSAND: f64 = 4.5;
    pub const OUTPUT_PER_THOUSAND: f64 = 22.5;
}

/// Provider/network constants
pub mod network {
    /// Per-attempt provider timeout (seconds)
    pub const PROVIDER_TIMEOUT_SECS: u64 = 120;

    /// Default completion budget per request
    pub const DEFAULT_MAX_TOKENS: u32 = 4096;
}

/// Shared store constants
pub mod store {
    /// Prefix applied to every key written by the gateway
    pub const KEY_PREFIX: &str = "fundgate";

    /// How often the in-memory store drops expired keys nobody touched again (milliseconds)
    pub const MEMORY_SWEEP_INTERVAL_MS: i64 = 60_000;
}

/// Health thresholds
pub mod health {
    /// Usage ratio (budget or rate window) above which the gateway reports degraded
    pub const DEGRADED_USAGE_RATIO: f64 = 0.8;
}
