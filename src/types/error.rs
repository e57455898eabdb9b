//! Unified Error Type System
//!
//! Centralized error types for the gateway.
//! Provides provider error classification for retry and circuit breaker decisions.
//!
//! ## Error Classes
//!
//! - **Transient** (server error, unavailable, overloaded, connection, timeout):
//!   retried with backoff and counted toward circuit breaker failures
//! - **RateLimited**: provider-side throttling, retried but not counted
//! - **Fatal** (authentication, invalid request): fail fast, never counted
//!
//! Admission rejections (rate limit, budget, circuit open) are surfaced
//! without ever contacting the provider.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gateway::store::StoreError;

// =============================================================================
// Error Classes
// =============================================================================

/// Provider failure classes used for retry and circuit breaker routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// 500 / internal provider failure
    ServerError,
    /// 502 / 503 - provider not serving
    Unavailable,
    /// Provider overloaded (529 / overloaded_error)
    Overloaded,
    /// Provider throttled this caller (429)
    RateLimited,
    /// Connection refused / reset before a response arrived
    Connection,
    /// No response within the per-attempt timeout
    Timeout,
    /// Bad or missing credentials (401 / 403)
    Authentication,
    /// Malformed request (400 / 404 / 413 / 422)
    InvalidRequest,
    /// Anything not recognized
    Unknown,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServerError => write!(f, "SERVER_ERROR"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::Overloaded => write!(f, "OVERLOADED"),
            Self::RateLimited => write!(f, "RATE_LIMITED"),
            Self::Connection => write!(f, "CONNECTION"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Authentication => write!(f, "AUTHENTICATION"),
            Self::InvalidRequest => write!(f, "INVALID_REQUEST"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl ErrorClass {
    /// Check if this class may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ServerError
                | Self::Unavailable
                | Self::Overloaded
                | Self::RateLimited
                | Self::Connection
                | Self::Timeout
        )
    }

    /// Caller-side bugs: retrying or tripping the breaker would not help
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }

    /// Classes that indicate provider instability and count toward opening the circuit
    pub fn default_trip_classes() -> Vec<ErrorClass> {
        vec![
            Self::ServerError,
            Self::Unavailable,
            Self::Overloaded,
            Self::Connection,
            Self::Timeout,
        ]
    }
}

// =============================================================================
// Provider Error
// =============================================================================

/// Classified provider failure with the raw status and code kept for logging
#[derive(Debug, Clone)]
pub struct ProviderError {
    /// Failure class for routing decisions
    pub class: ErrorClass,
    /// HTTP-style status, when the provider answered
    pub status: Option<u16>,
    /// Provider error code (e.g. `overloaded_error`)
    pub code: Option<String>,
    /// Detailed error message (internal, never shown to end users)
    pub message: String,
    /// Provider that produced the error
    pub provider: Option<String>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.provider, self.status) {
            (Some(provider), Some(status)) => {
                write!(f, "[{}:{}:{}] {}", provider, self.class, status, self.message)
            }
            (Some(provider), None) => write!(f, "[{}:{}] {}", provider, self.class, self.message),
            (None, Some(status)) => write!(f, "[{}:{}] {}", self.class, status, self.message),
            (None, None) => write!(f, "[{}] {}", self.class, self.message),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            status: None,
            code: None,
            message: message.into(),
            provider: None,
        }
    }

    pub fn timeout(duration: Duration) -> Self {
        Self::new(
            ErrorClass::Timeout,
            format!("no response within {:.1}s", duration.as_secs_f64()),
        )
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.class.is_retryable()
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Maps raw provider failures onto [`ErrorClass`]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an HTTP failure; the provider error code wins over the status
    /// when it is recognized.
    pub fn classify_http_status(status: u16, code: Option<&str>, message: &str) -> ProviderError {
        let class = code
            .and_then(Self::classify_code)
            .unwrap_or_else(|| Self::class_for_status(status));

        let mut err = ProviderError::new(class, message).status(status);
        if let Some(code) = code {
            err = err.code(code);
        }
        err
    }

    /// Status-only classification
    pub fn class_for_status(status: u16) -> ErrorClass {
        match status {
            400 | 404 | 409 | 413 | 422 => ErrorClass::InvalidRequest,
            401 | 403 => ErrorClass::Authentication,
            408 | 504 => ErrorClass::Timeout,
            429 => ErrorClass::RateLimited,
            500 => ErrorClass::ServerError,
            502 | 503 => ErrorClass::Unavailable,
            529 => ErrorClass::Overloaded,
            s if (500..600).contains(&s) => ErrorClass::ServerError,
            _ => ErrorClass::Unknown,
        }
    }

    /// Provider error-type codes as they appear in error bodies
    pub fn classify_code(code: &str) -> Option<ErrorClass> {
        match code {
            "invalid_request_error" | "not_found_error" | "request_too_large" => {
                Some(ErrorClass::InvalidRequest)
            }
            "authentication_error" | "permission_error" => Some(ErrorClass::Authentication),
            "rate_limit_error" => Some(ErrorClass::RateLimited),
            "api_error" => Some(ErrorClass::ServerError),
            "overloaded_error" => Some(ErrorClass::Overloaded),
            "timeout_error" => Some(ErrorClass::Timeout),
            _ => None,
        }
    }

    /// Best-effort classification from a free-form message
    pub fn classify_message(message: &str) -> ErrorClass {
        let lower = message.to_lowercase();

        if lower.contains("timed out") || lower.contains("timeout") {
            ErrorClass::Timeout
        } else if lower.contains("connection reset")
            || lower.contains("connection refused")
            || lower.contains("broken pipe")
            || lower.contains("dns")
        {
            ErrorClass::Connection
        } else if lower.contains("overloaded") {
            ErrorClass::Overloaded
        } else if lower.contains("service unavailable") || lower.contains("bad gateway") {
            ErrorClass::Unavailable
        } else if lower.contains("rate limit") || lower.contains("too many requests") {
            ErrorClass::RateLimited
        } else if lower.contains("api key") || lower.contains("unauthorized") {
            ErrorClass::Authentication
        } else if lower.contains("internal server error") {
            ErrorClass::ServerError
        } else if lower.contains("malformed") || lower.contains("bad request") {
            ErrorClass::InvalidRequest
        } else {
            ErrorClass::Unknown
        }
    }
}

// =============================================================================
// Error Kind (caller-facing taxonomy)
// =============================================================================

/// Coarse error taxonomy exposed to gateway callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimitExceeded,
    BudgetExceeded,
    CircuitOpen,
    TransientProvider,
    FatalProvider,
    StoreUnavailable,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimitExceeded => write!(f, "RATE_LIMIT_EXCEEDED"),
            Self::BudgetExceeded => write!(f, "BUDGET_EXCEEDED"),
            Self::CircuitOpen => write!(f, "CIRCUIT_OPEN"),
            Self::TransientProvider => write!(f, "TRANSIENT_PROVIDER_ERROR"),
            Self::FatalProvider => write!(f, "FATAL_PROVIDER_ERROR"),
            Self::StoreUnavailable => write!(f, "STORE_UNAVAILABLE"),
            Self::Internal => write!(f, "INTERNAL"),
        }
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum GatewayError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Admission Errors
    // -------------------------------------------------------------------------
    #[error("Circuit breaker open: {reason}")]
    CircuitOpen {
        reason: String,
        retry_after: Option<Duration>,
    },

    #[error("Rate limit exceeded for {scope}: {limit} requests per {window:?}")]
    RateLimitExceeded {
        scope: String,
        limit: u32,
        window: Duration,
    },

    #[error("Daily budget exceeded: spent {spent:.2} of {cap:.2}")]
    BudgetExceeded {
        spent: f64,
        cap: f64,
        resets_at: DateTime<Utc>,
        /// Wait until `resets_at`, taken when the check ran
        resets_in: Duration,
    },

    // -------------------------------------------------------------------------
    // Provider Errors
    // -------------------------------------------------------------------------
    /// Terminal provider failure after retries were exhausted or skipped
    #[error("Provider error: {0}")]
    Provider(ProviderError),
}

impl From<ProviderError> for GatewayError {
    fn from(err: ProviderError) -> Self {
        GatewayError::Provider(err)
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Caller-facing taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            Self::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Provider(e) if e.is_retryable() => ErrorKind::TransientProvider,
            Self::Provider(_) => ErrorKind::FatalProvider,
            Self::Store(_) => ErrorKind::StoreUnavailable,
            Self::Io(_) | Self::Json(_) | Self::Config(_) => ErrorKind::Internal,
        }
    }

    /// Provider class, when this is a provider failure
    pub fn provider_class(&self) -> Option<ErrorClass> {
        match self {
            Self::Provider(e) => Some(e.class),
            _ => None,
        }
    }

    /// Human-readable message safe to show end users.
    ///
    /// Never contains status codes, provider payloads or internal detail;
    /// those go to the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::CircuitOpen {
                retry_after: Some(wait),
                ..
            } => format!(
                "The AI service is temporarily unavailable. Please try again in {} seconds.",
                wait.as_secs().max(1)
            ),
            Self::CircuitOpen {
                retry_after: None, ..
            } => "The AI service is recovering from an outage. Please try again shortly."
                .to_string(),
            Self::RateLimitExceeded { .. } => {
                "Too many requests right now. Please try again shortly.".to_string()
            }
            Self::BudgetExceeded { resets_at, .. } => format!(
                "The daily AI usage limit has been reached. Service resumes at {} UTC.",
                resets_at.format("%Y-%m-%d %H:%M")
            ),
            Self::Provider(e) => match e.class {
                ErrorClass::Authentication => {
                    "The AI service could not be reached with the configured credentials. Please contact support."
                        .to_string()
                }
                ErrorClass::InvalidRequest => {
                    "The request could not be processed. Please adjust your input and try again."
                        .to_string()
                }
                ErrorClass::RateLimited => {
                    "The AI service is busy. Please try again shortly.".to_string()
                }
                ErrorClass::Timeout => {
                    "The AI service took too long to respond. Please try again.".to_string()
                }
                ErrorClass::ServerError
                | ErrorClass::Unavailable
                | ErrorClass::Overloaded
                | ErrorClass::Connection => {
                    "The AI service is temporarily unavailable. Please try again in a moment."
                        .to_string()
                }
                ErrorClass::Unknown => {
                    "An unexpected error occurred while contacting the AI service.".to_string()
                }
            },
            Self::Store(_) | Self::Io(_) | Self::Json(_) | Self::Config(_) => {
                "An internal error occurred. Please try again later.".to_string()
            }
        }
    }

    /// Suggested wait before the caller retries, if one is known
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => *retry_after,
            Self::RateLimitExceeded { window, .. } => Some(*window),
            Self::BudgetExceeded { resets_in, .. } => Some(*resets_in),
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_class_display() {
        assert_eq!(ErrorClass::ServerError.to_string(), "SERVER_ERROR");
        assert_eq!(ErrorClass::Authentication.to_string(), "AUTHENTICATION");
        assert_eq!(ErrorClass::RateLimited.to_string(), "RATE_LIMITED");
    }

    #[test]
    fn test_error_class_retryable() {
        assert!(ErrorClass::ServerError.is_retryable());
        assert!(ErrorClass::Unavailable.is_retryable());
        assert!(ErrorClass::Connection.is_retryable());
        assert!(ErrorClass::Timeout.is_retryable());
        assert!(ErrorClass::RateLimited.is_retryable());
        assert!(!ErrorClass::Authentication.is_retryable());
        assert!(!ErrorClass::InvalidRequest.is_retryable());
        assert!(ErrorClass::InvalidRequest.is_fatal());
    }

    #[test]
    fn test_default_trip_classes_exclude_client_errors() {
        let classes = ErrorClass::default_trip_classes();
        assert!(classes.contains(&ErrorClass::ServerError));
        assert!(classes.contains(&ErrorClass::Timeout));
        assert!(!classes.contains(&ErrorClass::Authentication));
        assert!(!classes.contains(&ErrorClass::InvalidRequest));
        assert!(!classes.contains(&ErrorClass::RateLimited));
    }

    #[test]
    fn test_classify_http_status() {
        let err = ErrorClassifier::classify_http_status(401, None, "bad key");
        assert_eq!(err.class, ErrorClass::Authentication);
        assert_eq!(err.status, Some(401));

        let err = ErrorClassifier::classify_http_status(503, None, "down");
        assert_eq!(err.class, ErrorClass::Unavailable);

        let err = ErrorClassifier::classify_http_status(599, None, "odd");
        assert_eq!(err.class, ErrorClass::ServerError);

        let err = ErrorClassifier::classify_http_status(418, None, "teapot");
        assert_eq!(err.class, ErrorClass::Unknown);
    }

    #[test]
    fn test_error_code_wins_over_status() {
        let err = ErrorClassifier::classify_http_status(
            500,
            Some("overloaded_error"),
            "Overloaded",
        );
        assert_eq!(err.class, ErrorClass::Overloaded);
        assert_eq!(err.code.as_deref(), Some("overloaded_error"));

        let err = ErrorClassifier::classify_http_status(400, Some("something_new"), "x");
        assert_eq!(err.class, ErrorClass::InvalidRequest);
    }

    #[test]
    fn test_classify_message() {
        assert_eq!(
            ErrorClassifier::classify_message("operation timed out"),
            ErrorClass::Timeout
        );
        assert_eq!(
            ErrorClassifier::classify_message("Connection reset by peer"),
            ErrorClass::Connection
        );
        assert_eq!(
            ErrorClassifier::classify_message("Invalid API key"),
            ErrorClass::Authentication
        );
        assert_eq!(
            ErrorClassifier::classify_message("something weird"),
            ErrorClass::Unknown
        );
    }

    #[test]
    fn test_kind_mapping() {
        let transient = GatewayError::from(ProviderError::new(ErrorClass::ServerError, "boom"));
        assert_eq!(transient.kind(), ErrorKind::TransientProvider);

        let fatal = GatewayError::from(ProviderError::new(ErrorClass::Authentication, "nope"));
        assert_eq!(fatal.kind(), ErrorKind::FatalProvider);

        let store = GatewayError::from(StoreError::Unavailable("down".into()));
        assert_eq!(store.kind(), ErrorKind::StoreUnavailable);
    }

    #[test]
    fn test_user_messages_hide_internal_detail() {
        let err = GatewayError::from(
            ProviderError::new(ErrorClass::ServerError, "upstream stack trace")
                .status(500)
                .provider("anthropic"),
        );
        let msg = err.user_message();
        assert!(!msg.contains("500"));
        assert!(!msg.contains("stack trace"));
        assert!(!msg.contains("anthropic"));
    }

    #[test]
    fn test_user_messages_are_actionable() {
        let open = GatewayError::CircuitOpen {
            reason: "open".into(),
            retry_after: Some(Duration::from_secs(17)),
        };
        assert!(open.user_message().contains("17 seconds"));

        let resets_at = DateTime::parse_from_rfc3339("2026-03-02T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let budget = GatewayError::BudgetExceeded {
            spent: 50_000.0,
            cap: 50_000.0,
            resets_at,
            resets_in: Duration::from_secs(3600),
        };
        assert!(budget.user_message().contains("2026-03-02 00:00"));
        assert_eq!(budget.retry_after(), Some(Duration::from_secs(3600)));

        let rate = GatewayError::RateLimitExceeded {
            scope: "global".into(),
            limit: 50,
            window: Duration::from_secs(60),
        };
        assert!(rate.user_message().contains("try again shortly"));
        assert_ne!(rate.user_message(), budget.user_message());
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::new(ErrorClass::Overloaded, "busy")
            .status(529)
            .provider("anthropic");
        assert_eq!(err.to_string(), "[anthropic:OVERLOADED:529] busy");

        let bare = ProviderError::new(ErrorClass::Connection, "reset");
        assert_eq!(bare.to_string(), "[CONNECTION] reset");
    }
}
