//! Inference Provider Abstraction
//!
//! Defines the [`CompletionProvider`] trait the gateway calls through. The
//! provider performs one wire call per invocation; retries, timeouts and
//! admission control all live in the gateway.

mod anthropic;

pub use anthropic::AnthropicProvider;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::constants::network as net_constants;
use crate::types::{GatewayError, ProviderError, Result};

// =============================================================================
// Request / Response
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One completion call; the prompt content is opaque to the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

/// Token usage metrics for cost tracking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input tokens (prompt)
    pub input_tokens: u32,
    /// Output tokens (response)
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Total tokens used (input + output)
    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub stop_reason: Option<String>,
    /// Model that served the request
    pub model: String,
}

// =============================================================================
// Provider Configuration
// =============================================================================

/// Configuration for the inference provider
///
/// Note: the API key is never serialized and is redacted in debug output.
/// Providers convert it to `SecretString` for runtime protection.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider type; only "anthropic" is supported
    pub provider: String,
    /// Model name (provider-specific)
    pub model: String,
    /// API base URL (for proxies and test servers)
    pub api_base: Option<String>,
    /// API key; falls back to the provider's standard env var
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Default completion budget when a request does not set one
    pub max_tokens: u32,
    pub temperature: Option<f32>,
    /// Per-attempt timeout in seconds
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: anthropic::DEFAULT_MODEL.to_string(),
            api_base: None,
            api_key: None,
            max_tokens: net_constants::DEFAULT_MAX_TOKENS,
            temperature: None,
            timeout_secs: net_constants::PROVIDER_TIMEOUT_SECS,
        }
    }
}

// =============================================================================
// Provider Trait
// =============================================================================

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Perform exactly one completion call.
    ///
    /// Failures must be classified; the gateway routes retries and circuit
    /// breaker accounting on [`ProviderError::class`].
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError>;

    /// Provider name for logging
    fn name(&self) -> &str;

    /// Model name currently in use
    fn model(&self) -> &str;
}

/// Shared provider handle, constructed once at startup
pub type SharedProvider = Arc<dyn CompletionProvider>;

/// Create a shared provider from configuration
pub fn create_provider(config: &ProviderConfig) -> Result<SharedProvider> {
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(config.clone())?)),
        other => Err(GatewayError::Config(format!(
            "Unknown provider: {}. Supported: anthropic",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_api_key() {
        let config = ProviderConfig {
            api_key: Some("sk-secret".into()),
            ..Default::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_api_key_never_serialized() {
        let config = ProviderConfig {
            api_key: Some("sk-secret".into()),
            ..Default::default()
        };
        let toml = toml::to_string(&config).unwrap();
        assert!(!toml.contains("sk-secret"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = ProviderConfig {
            provider: "carrier-pigeon".into(),
            ..Default::default()
        };
        assert!(matches!(
            create_provider(&config),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage {
            input_tokens: 1200,
            output_tokens: 300,
        };
        assert_eq!(usage.total(), 1500);
    }
}
