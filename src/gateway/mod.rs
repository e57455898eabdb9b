//! Resilient Request Gateway
//!
//! Mediates every call to the inference provider. Each request passes
//! admission control before the provider is contacted:
//!
//! ```text
//! send(request)
//!   -> CircuitBreaker::allow        (CircuitOpen)
//!   -> RateLimiter::allow           (RateLimitExceeded, global then per conversation)
//!   -> BudgetGuard::check_and_reserve (BudgetExceeded)
//!   -> RetryExecutor::execute(provider.complete)
//!   -> success: cost, budget commit, breaker success, metrics
//!   -> failure: breaker failure (tripping classes only), metrics, classified error
//! ```
//!
//! All state lives in the shared [`store::CounterStore`], so any number of
//! gateway processes can share one limit, one budget and one breaker. Store
//! outages fail open. Metrics and alert sinks are best-effort.

pub mod alerts;
pub mod budget;
pub mod circuit_breaker;
pub mod clock;
pub mod cost;
pub mod metrics;
pub mod provider;
pub mod rate_limiter;
pub mod retry;
pub mod store;
pub mod timeout;

pub use alerts::{Alert, AlertSeverity, AlertSink, TracingAlertSink};
pub use budget::{BudgetCheck, BudgetConfig, BudgetGuard, BudgetStatus};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus, CircuitDecision, CircuitPermit,
    CircuitState,
};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use cost::CostCalculator;
pub use metrics::{
    MetricsCollector, MetricsSink, MetricsSummary, RequestOutcome, SinkError, TracingSink,
};
pub use provider::{
    CompletionProvider, CompletionRequest, CompletionResponse, Message, ProviderConfig, Role,
    SharedProvider, TokenUsage, create_provider,
};
pub use rate_limiter::{RateGrant, RateLimitStatus, RateLimiter, RateLimiterConfig, RateScope};
pub use retry::{RetryError, RetryExecutor, RetryPolicy};
pub use store::{CounterStore, KeySpace, MemoryStore, SharedStore, StoreError};

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::constants::{health as health_constants, network as net_constants};
use crate::types::{ConversationId, ErrorClass, GatewayError, ProviderError, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Runtime configuration of one gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Name of the protected provider; scopes the breaker's keys
    pub breaker_name: String,
    pub rate_limit: RateLimiterConfig,
    /// Additional limit per conversation, checked after the global one
    pub per_conversation: Option<RateLimiterConfig>,
    pub budget: BudgetConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryPolicy,
    pub cost: CostCalculator,
    /// Per-attempt provider timeout
    pub attempt_timeout: Duration,
    /// Used when a request does not set `max_tokens`
    pub default_max_tokens: u32,
    pub key_prefix: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            breaker_name: "anthropic".to_string(),
            rate_limit: RateLimiterConfig::default(),
            per_conversation: None,
            budget: BudgetConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            cost: CostCalculator::default(),
            attempt_timeout: Duration::from_secs(net_constants::PROVIDER_TIMEOUT_SECS),
            default_max_tokens: net_constants::DEFAULT_MAX_TOKENS,
            key_prefix: crate::constants::store::KEY_PREFIX.to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.max_requests == 0 || self.rate_limit.window.is_zero() {
            return Err(GatewayError::Config(
                "rate_limit.max_requests and rate_limit.window_ms must be greater than 0"
                    .to_string(),
            ));
        }
        if let Some(per_conversation) = &self.per_conversation
            && (per_conversation.max_requests == 0 || per_conversation.window.is_zero())
        {
            return Err(GatewayError::Config(
                "rate_limit.per_conversation limits must be greater than 0".to_string(),
            ));
        }
        if !self.budget.daily_cap.is_finite() || self.budget.daily_cap < 0.0 {
            return Err(GatewayError::Config(
                "budget.daily_cap must be a non-negative number".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.budget.warning_ratio) {
            return Err(GatewayError::Config(
                "budget.warning_ratio must be between 0.0 and 1.0".to_string(),
            ));
        }
        let cb = &self.circuit_breaker;
        if cb.failure_threshold == 0 || cb.half_open_max_concurrent == 0 {
            return Err(GatewayError::Config(
                "circuit_breaker.failure_threshold and half_open_max_concurrent must be at least 1"
                    .to_string(),
            ));
        }
        if cb.failure_window.is_zero() {
            return Err(GatewayError::Config(
                "circuit_breaker.failure_window_ms must be greater than 0".to_string(),
            ));
        }
        if self.attempt_timeout.is_zero() {
            return Err(GatewayError::Config(
                "provider.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.key_prefix.is_empty() {
            return Err(GatewayError::Config(
                "store.key_prefix must not be empty".to_string(),
            ));
        }
        self.cost.validate()
    }
}

// =============================================================================
// Request / Response
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Scope for the per-conversation rate limit
    pub conversation_id: Option<ConversationId>,
}

impl GatewayRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            system_prompt: None,
            messages,
            max_tokens: None,
            temperature: None,
            conversation_id: None,
        }
    }

    /// Single user turn
    pub fn prompt(content: impl Into<String>) -> Self {
        Self::new(vec![Message::user(content)])
    }

    pub fn system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn conversation(mut self, id: impl Into<ConversationId>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }
}

/// Normalized successful response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub cost: f64,
    pub model: String,
    pub stop_reason: Option<String>,
}

// =============================================================================
// Health
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub store_reachable: bool,
    pub circuit: Option<CircuitBreakerStatus>,
    pub budget: Option<BudgetStatus>,
    pub rate_limit: Option<RateLimitStatus>,
    /// Why the status is not healthy
    pub details: Vec<String>,
}

impl HealthReport {
    fn worsen(&mut self, status: HealthStatus, detail: impl Into<String>) {
        self.status = self.status.max(status);
        self.details.push(detail.into());
    }
}

// =============================================================================
// Gateway
// =============================================================================

pub struct RequestGateway {
    breaker: CircuitBreaker,
    rate_limiter: RateLimiter,
    conversation_limiter: Option<RateLimiter>,
    budget: BudgetGuard,
    retry: RetryExecutor,
    cost: CostCalculator,
    default_max_tokens: u32,
    provider: SharedProvider,
    store: SharedStore,
    clock: SharedClock,
    metrics_sinks: Vec<Arc<dyn MetricsSink>>,
    alert_sinks: Vec<Arc<dyn AlertSink>>,
}

/// Wires a [`RequestGateway`] from injected handles
pub struct GatewayBuilder {
    config: GatewayConfig,
    provider: Option<SharedProvider>,
    store: Option<SharedStore>,
    clock: Option<SharedClock>,
    metrics_sinks: Vec<Arc<dyn MetricsSink>>,
    alert_sinks: Vec<Arc<dyn AlertSink>>,
}

impl GatewayBuilder {
    pub fn provider(mut self, provider: SharedProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Shared state backend; defaults to an in-process [`MemoryStore`]
    pub fn store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Time source; defaults to [`SystemClock`]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sinks.push(sink);
        self
    }

    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sinks.push(sink);
        self
    }

    pub fn build(self) -> Result<RequestGateway> {
        self.config.validate()?;

        let provider = self.provider.ok_or_else(|| {
            GatewayError::Config("RequestGateway requires a provider".to_string())
        })?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::with_clock(clock.clone())));
        let keys = KeySpace::new(self.config.key_prefix.clone());

        // A probe holds its slot for as long as its retried call can run
        let mut breaker_config = self.config.circuit_breaker.clone();
        breaker_config.max_probe_duration = breaker_config.max_probe_duration.max(
            self.config
                .retry
                .max_call_duration(self.config.attempt_timeout),
        );
        let breaker = CircuitBreaker::new(
            self.config.breaker_name.clone(),
            breaker_config,
            store.clone(),
            clock.clone(),
            keys.clone(),
        );
        let rate_limiter = RateLimiter::new(
            self.config.rate_limit,
            store.clone(),
            clock.clone(),
            keys.clone(),
        );
        let conversation_limiter = self
            .config
            .per_conversation
            .map(|config| RateLimiter::new(config, store.clone(), clock.clone(), keys.clone()));
        let budget = BudgetGuard::new(self.config.budget, store.clone(), clock.clone(), keys);

        Ok(RequestGateway {
            breaker,
            rate_limiter,
            conversation_limiter,
            budget,
            retry: RetryExecutor::new(self.config.retry, self.config.attempt_timeout),
            cost: self.config.cost,
            default_max_tokens: self.config.default_max_tokens,
            provider,
            store,
            clock,
            metrics_sinks: self.metrics_sinks,
            alert_sinks: self.alert_sinks,
        })
    }
}

/// Provider-side facts about one send, for the outcome record
#[derive(Debug, Default)]
struct CallReport {
    attempts: u32,
    usage: TokenUsage,
    cost: f64,
    error_class: Option<ErrorClass>,
}

impl RequestGateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder {
            config,
            provider: None,
            store: None,
            clock: None,
            metrics_sinks: Vec::new(),
            alert_sinks: Vec::new(),
        }
    }

    pub fn provider(&self) -> &SharedProvider {
        &self.provider
    }

    /// Send one request through admission control and the retrying provider call
    #[instrument(
        name = "gateway_send",
        skip_all,
        fields(conversation = ?request.conversation_id, model = %self.provider.model())
    )]
    pub async fn send(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        let started = Instant::now();
        let mut report = CallReport::default();

        let result = self.execute(&request, &mut report).await;

        match &result {
            Ok(response) => info!(
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                cost = response.cost,
                attempts = report.attempts,
                "Request succeeded"
            ),
            Err(err) => warn!(kind = %err.kind(), attempts = report.attempts, "Request failed: {}", err),
        }

        self.emit_outcome(&request, &result, &report, started.elapsed())
            .await;
        result
    }

    async fn execute(
        &self,
        request: &GatewayRequest,
        report: &mut CallReport,
    ) -> Result<GatewayResponse> {
        if request.messages.is_empty() {
            return Err(ProviderError::new(
                ErrorClass::InvalidRequest,
                "request contains no messages",
            )
            .into());
        }

        let permit = self.admit(request).await?;

        let completion = CompletionRequest {
            system_prompt: request.system_prompt.clone(),
            messages: request.messages.clone(),
            max_tokens: request.max_tokens.unwrap_or(self.default_max_tokens),
            temperature: request.temperature,
        };

        let outcome = self
            .retry
            .execute(Some(&self.breaker), || self.provider.complete(&completion))
            .await;
        report.attempts = outcome.attempts;

        match outcome.result {
            Ok(response) => {
                let cost = self
                    .cost
                    .cost(response.usage.input_tokens, response.usage.output_tokens);
                report.usage = response.usage;
                report.cost = cost;

                if let Some(commit) = self.budget.commit(cost).await {
                    let config = self.budget.config();
                    if commit.crossed_warning {
                        self.alert(Alert::BudgetWarning {
                            spent: commit.spent_after,
                            cap: config.daily_cap,
                            ratio: config.warning_ratio,
                        })
                        .await;
                    }
                    if commit.crossed_cap {
                        self.alert(Alert::BudgetExhausted {
                            spent: commit.spent_after,
                            cap: config.daily_cap,
                            resets_at: self.budget.resets_at(),
                        })
                        .await;
                    }
                }

                // A successful probe closes the circuit; its slot no longer matters
                drop(permit);
                self.breaker.record_success().await;

                Ok(GatewayResponse {
                    content: response.content,
                    usage: response.usage,
                    cost,
                    model: response.model,
                    stop_reason: response.stop_reason,
                })
            }
            Err(RetryError::Provider(err)) => {
                report.error_class = Some(err.class);
                error!(
                    class = %err.class,
                    status = ?err.status,
                    code = ?err.code,
                    "Provider call failed: {}",
                    err.message
                );

                if self.breaker.config().counts_as_failure(err.class) {
                    drop(permit);
                    if self.breaker.record_failure(err.class).await == Some(CircuitState::Open) {
                        self.alert(Alert::CircuitOpened {
                            breaker: self.breaker.name().to_string(),
                            cooldown: self.breaker.config().open_timeout,
                        })
                        .await;
                    }
                } else {
                    self.breaker.release(permit).await;
                }

                Err(GatewayError::Provider(err))
            }
            Err(RetryError::CircuitOpen { retry_after }) => {
                self.breaker.release(permit).await;
                Err(GatewayError::CircuitOpen {
                    reason: "circuit opened while retrying".to_string(),
                    retry_after: Some(retry_after),
                })
            }
        }
    }

    /// Circuit, then rate limits, then budget; later rejections hand back the circuit permit
    async fn admit(&self, request: &GatewayRequest) -> Result<CircuitPermit> {
        let permit = self.breaker.allow().await.into_result()?;

        if let Err(err) = self.check_rate_limits(request).await {
            self.breaker.release(permit).await;
            return Err(err);
        }

        if let Err(err) = self.budget.check_and_reserve().await.into_result() {
            self.breaker.release(permit).await;
            return Err(err);
        }

        Ok(permit)
    }

    /// Global window first; a conversation rejection hands the global slot back
    async fn check_rate_limits(&self, request: &GatewayRequest) -> Result<()> {
        let global = self.rate_limiter.acquire(&RateScope::Global).await;
        if !global.admitted {
            let config = self.rate_limiter.config();
            return Err(GatewayError::RateLimitExceeded {
                scope: RateScope::Global.to_string(),
                limit: config.max_requests,
                window: config.window,
            });
        }

        if let (Some(limiter), Some(id)) = (&self.conversation_limiter, &request.conversation_id) {
            let scope = RateScope::Conversation(id.clone());
            if !limiter.allow(&scope).await {
                self.rate_limiter.release(&RateScope::Global, global).await;
                let config = limiter.config();
                return Err(GatewayError::RateLimitExceeded {
                    scope: scope.to_string(),
                    limit: config.max_requests,
                    window: config.window,
                });
            }
        }

        Ok(())
    }

    async fn emit_outcome(
        &self,
        request: &GatewayRequest,
        result: &Result<GatewayResponse>,
        report: &CallReport,
        elapsed: Duration,
    ) {
        if self.metrics_sinks.is_empty() {
            return;
        }

        let circuit_state = match self.breaker.status().await {
            Ok(status) => status.state,
            Err(err) => {
                debug!(error = %err, "Circuit state unavailable for outcome record");
                CircuitState::Closed
            }
        };

        let outcome = RequestOutcome {
            completed_at: self.clock.now(),
            model: match result {
                Ok(response) => response.model.clone(),
                Err(_) => self.provider.model().to_string(),
            },
            conversation_id: request
                .conversation_id
                .as_ref()
                .map(|id| id.as_str().to_string()),
            input_tokens: report.usage.input_tokens,
            output_tokens: report.usage.output_tokens,
            cost: report.cost,
            duration_ms: elapsed.as_millis() as u64,
            success: result.is_ok(),
            retried: report.attempts > 1,
            attempts: report.attempts,
            circuit_state_at_completion: circuit_state,
            error_kind: result.as_ref().err().map(GatewayError::kind),
            error_class: report.error_class,
        };

        for sink in &self.metrics_sinks {
            if let Err(err) = sink.record(&outcome).await {
                warn!(error = %err, "Metrics sink failed, continuing");
            }
        }
    }

    async fn alert(&self, alert: Alert) {
        for sink in &self.alert_sinks {
            if let Err(err) = sink.send(&alert).await {
                warn!(error = %err, "Alert sink failed, continuing");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    pub async fn budget_status(&self) -> Result<BudgetStatus> {
        Ok(self.budget.status().await?)
    }

    /// Global window usage
    pub async fn rate_limit_status(&self) -> Result<RateLimitStatus> {
        Ok(self.rate_limiter.status(&RateScope::Global).await?)
    }

    /// Window usage for one conversation, when per-conversation limiting is on
    pub async fn conversation_rate_limit_status(
        &self,
        id: &ConversationId,
    ) -> Result<Option<RateLimitStatus>> {
        match &self.conversation_limiter {
            Some(limiter) => Ok(Some(
                limiter
                    .status(&RateScope::Conversation(id.clone()))
                    .await?,
            )),
            None => Ok(None),
        }
    }

    pub async fn circuit_breaker_status(&self) -> Result<CircuitBreakerStatus> {
        Ok(self.breaker.status().await?)
    }

    /// Force the breaker to CLOSED (manual intervention)
    pub async fn reset_circuit_breaker(&self) -> Result<()> {
        Ok(self.breaker.reset().await?)
    }

    /// Summarize gateway health.
    ///
    /// Unhealthy when the circuit is open or the budget is exhausted.
    /// Degraded when the store is unreachable (protection is failing open),
    /// the circuit is half-open, or budget or rate usage is above 80%.
    pub async fn health_check(&self) -> HealthReport {
        let mut report = HealthReport {
            status: HealthStatus::Healthy,
            checked_at: self.clock.now(),
            store_reachable: true,
            circuit: None,
            budget: None,
            rate_limit: None,
            details: Vec::new(),
        };

        if let Err(err) = self.store.ping().await {
            report.store_reachable = false;
            report.worsen(
                HealthStatus::Degraded,
                format!("state store unreachable, admission control failing open: {}", err),
            );
            return report;
        }

        match self.breaker.status().await {
            Ok(status) => {
                match status.state {
                    CircuitState::Open => report.worsen(
                        HealthStatus::Unhealthy,
                        format!("circuit '{}' is open", status.name),
                    ),
                    CircuitState::HalfOpen => report.worsen(
                        HealthStatus::Degraded,
                        format!("circuit '{}' is half-open (testing recovery)", status.name),
                    ),
                    CircuitState::Closed => {}
                }
                report.circuit = Some(status);
            }
            Err(err) => report.worsen(HealthStatus::Degraded, format!("circuit state unreadable: {}", err)),
        }

        match self.budget.status().await {
            Ok(status) => {
                if status.spent >= status.cap {
                    report.worsen(
                        HealthStatus::Unhealthy,
                        format!("daily budget exhausted ({:.2} of {:.2})", status.spent, status.cap),
                    );
                } else if status.percentage > health_constants::DEGRADED_USAGE_RATIO * 100.0 {
                    report.worsen(
                        HealthStatus::Degraded,
                        format!("daily budget at {:.1}%", status.percentage),
                    );
                }
                report.budget = Some(status);
            }
            Err(err) => report.worsen(HealthStatus::Degraded, format!("budget ledger unreadable: {}", err)),
        }

        match self.rate_limiter.status(&RateScope::Global).await {
            Ok(status) => {
                if status.utilization() > health_constants::DEGRADED_USAGE_RATIO {
                    report.worsen(
                        HealthStatus::Degraded,
                        format!("rate limit window at {}/{}", status.used, status.limit),
                    );
                }
                report.rate_limit = Some(status);
            }
            Err(err) => report.worsen(HealthStatus::Degraded, format!("rate window unreadable: {}", err)),
        }

        report
    }
}
