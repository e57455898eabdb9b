//! fundgate - Resilient Gateway for Inference Provider Calls
//!
//! Every request to the paid, rate-limited provider passes through one
//! [`RequestGateway`], which enforces:
//!
//! - **Circuit Breaker**: stop calling a failing provider, probe for recovery
//! - **Sliding-Window Rate Limit**: global and per-conversation admission
//! - **Daily Budget**: hard spend cap per UTC day with warning alerts
//! - **Retry with Backoff**: transient failures retried at 1s, 2s, 4s
//!
//! All state lives in a shared counter store (in-memory or Redis), so many
//! processes enforce one limit, one budget and one breaker together.
//!
//! ## Quick Start
//!
//! ```ignore
//! use fundgate::{ConfigLoader, RequestGateway, GatewayRequest, create_provider};
//!
//! let config = ConfigLoader::load()?;
//! let gateway = RequestGateway::builder(config.gateway_config())
//!     .provider(create_provider(&config.provider)?)
//!     .build()?;
//!
//! let response = gateway.send(GatewayRequest::prompt("Hello")).await?;
//! println!("{} (cost {:.2})", response.content, response.cost);
//! ```
//!
//! ## Modules
//!
//! - [`gateway`]: admission control, retry, provider abstraction, sinks
//! - [`config`]: layered configuration
//! - [`types`]: error taxonomy and domain newtypes

pub mod cli;
pub mod config;
pub mod constants;
pub mod gateway;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader};

// Error Types
pub use types::{
    ConversationId, ErrorClass, ErrorClassifier, ErrorKind, GatewayError, ProviderError, Result,
};

// =============================================================================
// Gateway Re-exports
// =============================================================================

pub use gateway::{
    Alert, AlertSink, CircuitState, CompletionProvider, GatewayConfig, GatewayRequest,
    GatewayResponse, HealthReport, HealthStatus, Message, MetricsCollector, MetricsSink,
    RequestGateway, RequestOutcome, create_provider,
};
