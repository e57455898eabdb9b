//! Request Metrics
//!
//! Every request that reaches the gateway produces one [`RequestOutcome`],
//! handed to the configured [`MetricsSink`]s. Sinks are best-effort: a
//! failing sink is logged and never fails the request.
//!
//! ## Usage
//!
//! ```ignore
//! let metrics = Arc::new(MetricsCollector::new("worker-1"));
//! let gateway = RequestGateway::builder(config)
//!     .metrics_sink(metrics.clone())
//!     .build()?;
//! // ...
//! println!("{}", metrics.summary().display());
//! ```

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::gateway::circuit_breaker::CircuitState;
use crate::types::{ErrorClass, ErrorKind};

/// Failure inside an external sink
#[derive(Debug, Error)]
#[error("sink '{sink}' failed: {message}")]
pub struct SinkError {
    pub sink: String,
    pub message: String,
}

impl SinkError {
    pub fn new(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            message: message.into(),
        }
    }
}

/// What happened to one request, successful or not
#[derive(Debug, Clone, Serialize)]
pub struct RequestOutcome {
    pub completed_at: DateTime<Utc>,
    pub model: String,
    pub conversation_id: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost: f64,
    pub duration_ms: u64,
    pub success: bool,
    /// More than one provider attempt was made
    pub retried: bool,
    pub attempts: u32,
    pub circuit_state_at_completion: CircuitState,
    pub error_kind: Option<ErrorKind>,
    pub error_class: Option<ErrorClass>,
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record(&self, outcome: &RequestOutcome) -> Result<(), SinkError>;
}

// =============================================================================
// Tracing Sink
// =============================================================================

/// Writes each outcome as a structured log event
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl MetricsSink for TracingSink {
    async fn record(&self, outcome: &RequestOutcome) -> Result<(), SinkError> {
        info!(
            target: "fundgate::outcome",
            model = %outcome.model,
            conversation = outcome.conversation_id.as_deref().unwrap_or("-"),
            success = outcome.success,
            input_tokens = outcome.input_tokens,
            output_tokens = outcome.output_tokens,
            cost = outcome.cost,
            duration_ms = outcome.duration_ms,
            retried = outcome.retried,
            attempts = outcome.attempts,
            circuit = %outcome.circuit_state_at_completion,
            error_kind = outcome.error_kind.map(|k| k.to_string()).as_deref().unwrap_or("-"),
            "Request completed"
        );
        Ok(())
    }
}

// =============================================================================
// Metrics Collector
// =============================================================================

/// Thread-safe in-process aggregation of request outcomes.
///
/// Uses atomic counters only, so concurrent requests never contend on a lock.
pub struct MetricsCollector {
    /// Collector identifier
    name: String,
    /// Collection start time
    start_time: Instant,
    requests: AtomicU32,
    successes: AtomicU32,
    provider_failures: AtomicU32,
    retried: AtomicU32,
    rate_limited: AtomicU32,
    budget_rejected: AtomicU32,
    circuit_rejected: AtomicU32,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    /// Latency of requests that reached the provider
    total_latency_ms: AtomicU64,
    /// Total cost (stored as micro-units for atomic ops)
    total_cost_micros: AtomicU64,
}

/// Summary statistics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub name: String,
    pub uptime_ms: u64,
    pub requests: u32,
    pub successes: u32,
    pub provider_failures: u32,
    pub retried: u32,
    pub rate_limited: u32,
    pub budget_rejected: u32,
    pub circuit_rejected: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub avg_latency_ms: f64,
    pub total_cost: f64,
}

impl MetricsCollector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_time: Instant::now(),
            requests: AtomicU32::new(0),
            successes: AtomicU32::new(0),
            provider_failures: AtomicU32::new(0),
            retried: AtomicU32::new(0),
            rate_limited: AtomicU32::new(0),
            budget_rejected: AtomicU32::new(0),
            circuit_rejected: AtomicU32::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            total_cost_micros: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, outcome: &RequestOutcome) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if outcome.retried {
            self.retried.fetch_add(1, Ordering::Relaxed);
        }

        match outcome.error_kind {
            None => {
                self.successes.fetch_add(1, Ordering::Relaxed);
            }
            Some(ErrorKind::RateLimitExceeded) => {
                self.rate_limited.fetch_add(1, Ordering::Relaxed);
            }
            Some(ErrorKind::BudgetExceeded) => {
                self.budget_rejected.fetch_add(1, Ordering::Relaxed);
            }
            Some(ErrorKind::CircuitOpen) => {
                self.circuit_rejected.fetch_add(1, Ordering::Relaxed);
            }
            Some(_) => {
                self.provider_failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        if outcome.attempts > 0 {
            self.total_latency_ms
                .fetch_add(outcome.duration_ms, Ordering::Relaxed);
        }
        self.input_tokens
            .fetch_add(u64::from(outcome.input_tokens), Ordering::Relaxed);
        self.output_tokens
            .fetch_add(u64::from(outcome.output_tokens), Ordering::Relaxed);

        let cost_micros = (outcome.cost.max(0.0) * 1_000_000.0) as u64;
        self.total_cost_micros
            .fetch_add(cost_micros, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn summary(&self) -> MetricsSummary {
        let successes = self.successes.load(Ordering::Relaxed);
        let provider_failures = self.provider_failures.load(Ordering::Relaxed);
        let reached_provider = successes + provider_failures;
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);

        let avg_latency_ms = if reached_provider > 0 {
            total_latency as f64 / reached_provider as f64
        } else {
            0.0
        };

        MetricsSummary {
            name: self.name.clone(),
            uptime_ms: self.start_time.elapsed().as_millis() as u64,
            requests: self.requests.load(Ordering::Relaxed),
            successes,
            provider_failures,
            retried: self.retried.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            budget_rejected: self.budget_rejected.load(Ordering::Relaxed),
            circuit_rejected: self.circuit_rejected.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            avg_latency_ms,
            total_cost: self.total_cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

#[async_trait]
impl MetricsSink for MetricsCollector {
    async fn record(&self, outcome: &RequestOutcome) -> Result<(), SinkError> {
        self.observe(outcome);
        Ok(())
    }
}

impl MetricsSummary {
    /// Format summary for display
    pub fn display(&self) -> String {
        format!(
            "Collector: {}\n\
             Requests: {} (ok: {}, failed: {}, retried: {})\n\
             Rejected: rate {} / budget {} / circuit {}\n\
             Tokens: {} (input: {}, output: {})\n\
             Avg Latency: {:.0}ms\n\
             Cost: {:.4}",
            self.name,
            self.requests,
            self.successes,
            self.provider_failures,
            self.retried,
            self.rate_limited,
            self.budget_rejected,
            self.circuit_rejected,
            self.input_tokens + self.output_tokens,
            self.input_tokens,
            self.output_tokens,
            self.avg_latency_ms,
            self.total_cost
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(error_kind: Option<ErrorKind>) -> RequestOutcome {
        let reached = !matches!(
            error_kind,
            Some(ErrorKind::RateLimitExceeded | ErrorKind::BudgetExceeded | ErrorKind::CircuitOpen)
        );
        RequestOutcome {
            completed_at: Utc::now(),
            model: "test-model".into(),
            conversation_id: None,
            input_tokens: if error_kind.is_none() { 1000 } else { 0 },
            output_tokens: if error_kind.is_none() { 500 } else { 0 },
            cost: if error_kind.is_none() { 15.75 } else { 0.0 },
            duration_ms: if reached { 200 } else { 0 },
            success: error_kind.is_none(),
            retried: false,
            attempts: u32::from(reached),
            circuit_state_at_completion: CircuitState::Closed,
            error_kind,
            error_class: None,
        }
    }

    #[tokio::test]
    async fn test_collector_aggregates() {
        let metrics = MetricsCollector::new("test");
        metrics.record(&outcome(None)).await.unwrap();
        metrics.record(&outcome(None)).await.unwrap();
        metrics
            .record(&outcome(Some(ErrorKind::TransientProvider)))
            .await
            .unwrap();
        metrics
            .record(&outcome(Some(ErrorKind::RateLimitExceeded)))
            .await
            .unwrap();
        metrics
            .record(&outcome(Some(ErrorKind::CircuitOpen)))
            .await
            .unwrap();

        let summary = metrics.summary();
        assert_eq!(summary.requests, 5);
        assert_eq!(summary.successes, 2);
        assert_eq!(summary.provider_failures, 1);
        assert_eq!(summary.rate_limited, 1);
        assert_eq!(summary.circuit_rejected, 1);
        assert_eq!(summary.input_tokens, 2000);
        assert_eq!(summary.output_tokens, 1000);
        assert!((summary.total_cost - 31.5).abs() < 1e-6);
        assert!((summary.avg_latency_ms - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_summary() {
        let summary = MetricsCollector::new("empty").summary();
        assert_eq!(summary.requests, 0);
        assert_eq!(summary.avg_latency_ms, 0.0);
        assert!(summary.display().contains("Requests: 0"));
    }

    #[tokio::test]
    async fn test_tracing_sink_never_fails() {
        assert!(TracingSink.record(&outcome(None)).await.is_ok());
    }
}
