//! Circuit Command
//!
//! Manual circuit breaker intervention.
//!
//! Usage:
//!   fundgate circuit reset

use std::path::Path;

use tracing::warn;

use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::types::Result;

/// Force the breaker to CLOSED and clear its failure count
pub async fn reset(config_path: Option<&Path>) -> Result<()> {
    let ctx = CommandContext::load_inspect(config_path)?;
    let before = ctx.gateway.circuit_breaker_status().await?;

    ctx.gateway.reset_circuit_breaker().await?;
    warn!(previous = %before.state, failures = before.failures, "Circuit breaker manually reset");

    let out = Output::new();
    out.success(&format!(
        "Circuit '{}' reset ({} -> {})",
        before.name,
        out.circuit_state(before.state),
        out.circuit_state(crate::gateway::CircuitState::Closed)
    ));
    if ctx.is_ephemeral() {
        out.info("store.backend = \"memory\": nothing is shared with other processes");
    }
    Ok(())
}
