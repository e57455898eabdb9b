//! Anthropic Messages API Provider
//!
//! One `POST /v1/messages` per call. HTTP failures are classified from the
//! status and the `error.type` field of the error body.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    CompletionProvider, CompletionRequest, CompletionResponse, Message, ProviderConfig,
    TokenUsage,
};
use crate::types::{ErrorClass, ErrorClassifier, GatewayError, ProviderError, Result};

const PROVIDER_NAME: &str = "anthropic";
const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
pub(super) const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

/// Error bodies can be large HTML pages from intermediaries
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Anthropic API provider with secure API key handling
pub struct AnthropicProvider {
    /// API key stored securely - never exposed in logs or debug output
    api_key: SecretString,
    api_base: String,
    model: String,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("api_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let api_key_str = config
            .api_key
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                GatewayError::Config(
                    "Anthropic API key not found. Set ANTHROPIC_API_KEY env var or provider.api_key in config"
                        .to_string(),
                )
            })?;

        let api_base = config
            .api_base
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        // The gateway bounds each attempt; this only guards against a stuck connect
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs.clamp(1, 30)))
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key: SecretString::from(api_key_str),
            api_base,
            model: config.model,
            temperature: config.temperature,
            client,
        })
    }

    fn build_request<'a>(&'a self, request: &'a CompletionRequest) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens,
            system: request.system_prompt.as_deref(),
            messages: &request.messages,
            temperature: request.temperature.or(self.temperature),
        }
    }

    fn transport_error(&self, err: reqwest::Error) -> ProviderError {
        let class = if err.is_timeout() {
            ErrorClass::Timeout
        } else if err.is_connect() {
            ErrorClass::Connection
        } else {
            match ErrorClassifier::classify_message(&err.to_string()) {
                ErrorClass::Unknown => ErrorClass::Connection,
                class => class,
            }
        };
        ProviderError::new(class, format!("request failed: {}", err)).provider(PROVIDER_NAME)
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError> {
        let start_time = Instant::now();
        let url = format!("{}/v1/messages", self.api_base);

        debug!(model = %self.model, messages = request.messages.len(), "Sending request to Anthropic API");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&self.build_request(request))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_error_body(status.as_u16(), &body));
        }

        let body: MessagesResponse = response.json().await.map_err(|e| {
            ProviderError::new(
                ErrorClass::Unknown,
                format!("failed to parse response: {}", e),
            )
            .provider(PROVIDER_NAME)
        })?;

        debug!(
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            input_tokens = body.usage.input_tokens,
            output_tokens = body.usage.output_tokens,
            "Received response from Anthropic"
        );

        Ok(body.into_response())
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Classify a non-success response from its status and error body
fn parse_error_body(status: u16, body: &str) -> ProviderError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let (code, message) = match &parsed {
        Some(envelope) => (
            Some(envelope.error.error_type.as_str()),
            envelope.error.message.clone(),
        ),
        None => (None, truncate(body, MAX_ERROR_MESSAGE_LEN)),
    };

    ErrorClassifier::classify_http_status(status, code, &message).provider(PROVIDER_NAME)
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: ApiUsage,
}

impl MessagesResponse {
    fn into_response(self) -> CompletionResponse {
        let content = self
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        CompletionResponse {
            content,
            usage: TokenUsage {
                input_tokens: self.usage.input_tokens,
                output_tokens: self.usage.output_tokens,
            },
            stop_reason: self.stop_reason,
            model: self.model,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    #[serde(default)]
    message: String,
}
