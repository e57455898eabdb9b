//! Send Command
//!
//! Push one request through the full gateway pipeline.
//!
//! Usage:
//!   fundgate send --prompt "..." [--system "..."] [--max-tokens N] [--conversation ID]

use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::gateway::{GatewayRequest, MetricsCollector, MetricsSink};
use crate::types::Result;

/// Options for the send command
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub config: Option<PathBuf>,
    pub prompt: String,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub conversation: Option<String>,
    /// Print usage, cost and the request summary after the response
    pub stats: bool,
}

impl SendOptions {
    fn request(&self) -> GatewayRequest {
        let mut request = GatewayRequest::prompt(&self.prompt);
        if let Some(system) = &self.system {
            request = request.system(system);
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.max_tokens(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            request = request.temperature(temperature);
        }
        if let Some(conversation) = &self.conversation {
            request = request.conversation(conversation.as_str());
        }
        request
    }
}

pub async fn run(options: SendOptions) -> Result<()> {
    let metrics = Arc::new(MetricsCollector::new("cli"));
    let sinks: Vec<Arc<dyn MetricsSink>> = vec![metrics.clone()];
    let ctx = CommandContext::load(options.config.as_deref(), &sinks)?;
    let out = Output::new();

    match ctx.gateway.send(options.request()).await {
        Ok(response) => {
            println!("{}", response.content);
            if options.stats {
                out.section("Usage");
                out.field("Model", &response.model);
                out.field("Input tokens", response.usage.input_tokens);
                out.field("Output tokens", response.usage.output_tokens);
                out.field("Cost", format!("{:.4}", response.cost));
                if let Some(reason) = &response.stop_reason {
                    out.field("Stop reason", reason);
                }
                println!();
                println!("{}", metrics.summary().display());
            }
            Ok(())
        }
        Err(err) => {
            out.error(&err.user_message());
            if let Some(wait) = err.retry_after() {
                out.info(&format!("Retry after {}s", wait.as_secs().max(1)));
            }
            Err(err)
        }
    }
}
