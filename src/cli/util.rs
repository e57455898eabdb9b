//! CLI Common Utilities
//!
//! Shared initialization and context management for CLI commands.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Config, ConfigLoader, StoreBackend};
use crate::gateway::{
    CompletionProvider, CompletionRequest, CompletionResponse, MetricsSink, RequestGateway,
    SharedClock, SharedProvider, SystemClock, TracingAlertSink, TracingSink, create_provider,
};
use crate::types::{ErrorClass, ProviderError, Result};

/// Command execution context
///
/// Loaded config plus a gateway wired to the configured store.
pub struct CommandContext {
    pub config: Config,
    pub gateway: RequestGateway,
}

impl CommandContext {
    /// Load context for commands that only read or reset shared state.
    ///
    /// No credentials are needed; the provider is never called.
    pub fn load_inspect(config_path: Option<&Path>) -> Result<Self> {
        let config = load_config(config_path)?;
        let provider = Arc::new(InspectOnlyProvider {
            model: config.provider.model.clone(),
        });
        Self::build(config, provider, &[])
    }

    /// Load context for commands that call the provider, with extra metrics sinks.
    ///
    /// Fails when provider credentials are missing.
    pub fn load(
        config_path: Option<&Path>,
        sinks: &[Arc<dyn MetricsSink>],
    ) -> Result<Self> {
        let config = load_config(config_path)?;
        let provider = create_provider(&config.provider)?;
        Self::build(config, provider, sinks)
    }

    fn build(
        config: Config,
        provider: SharedProvider,
        sinks: &[Arc<dyn MetricsSink>],
    ) -> Result<Self> {
        let clock: SharedClock = Arc::new(SystemClock);
        let store = config.store.open(clock.clone())?;

        let mut builder = RequestGateway::builder(config.gateway_config())
            .provider(provider)
            .store(store)
            .clock(clock)
            .metrics_sink(Arc::new(TracingSink))
            .alert_sink(Arc::new(TracingAlertSink));
        for sink in sinks {
            builder = builder.metrics_sink(sink.clone());
        }

        Ok(Self {
            gateway: builder.build()?,
            config,
        })
    }

    /// State kept in process memory disappears when the command exits
    pub fn is_ephemeral(&self) -> bool {
        self.config.store.backend == StoreBackend::Memory
    }
}

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => ConfigLoader::load_with_file(path),
        None => ConfigLoader::load(),
    }
}

/// Stands in for the provider in read-only commands
struct InspectOnlyProvider {
    model: String,
}

#[async_trait]
impl CompletionProvider for InspectOnlyProvider {
    async fn complete(
        &self,
        _request: &CompletionRequest,
    ) -> std::result::Result<CompletionResponse, ProviderError> {
        Err(ProviderError::new(
            ErrorClass::InvalidRequest,
            "provider calls are disabled in inspection commands",
        ))
    }

    fn name(&self) -> &str {
        "inspect"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
