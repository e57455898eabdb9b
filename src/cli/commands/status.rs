//! Status Command
//!
//! Display budget, rate limit and circuit breaker state.

use std::path::Path;

use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::types::Result;

pub async fn run(config_path: Option<&Path>, format: &str) -> Result<()> {
    let ctx = CommandContext::load_inspect(config_path)?;
    let gateway = &ctx.gateway;

    let budget = gateway.budget_status().await?;
    let rate_limit = gateway.rate_limit_status().await?;
    let circuit = gateway.circuit_breaker_status().await?;

    if format == "json" {
        let status = serde_json::json!({
            "store": ctx.config.store.backend.to_string(),
            "budget": budget,
            "rate_limit": rate_limit,
            "circuit_breaker": circuit,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let out = Output::new();
    println!("fundgate Status");
    println!("══════════════════════════════════════");
    out.field("Store", &ctx.config.store.backend);
    out.field("Model", &ctx.config.provider.model);

    out.section("Daily Budget");
    out.field("Day", budget.day);
    out.field("Spent", format!("{:.2} / {:.2}", budget.spent, budget.cap));
    out.field("Used", format!("{:.1}%", budget.percentage));
    out.field("Remaining", format!("{:.2}", budget.remaining));
    out.field("Resets at", budget.resets_at.format("%Y-%m-%d %H:%M UTC"));

    out.section("Rate Limit (global)");
    out.field("Window", format!("{}s", rate_limit.window_ms / 1000));
    out.field(
        "Used",
        format!("{} / {}", rate_limit.used, rate_limit.limit),
    );
    out.field("Remaining", rate_limit.remaining);

    out.section("Circuit Breaker");
    out.field("Name", &circuit.name);
    out.field("State", out.circuit_state(circuit.state));
    out.field("Failures", circuit.failures);
    if let Some(remaining) = circuit.cooldown_remaining_ms {
        out.field("Retry in", format!("{:.1}s", remaining as f64 / 1000.0));
    }
    if let Some(last) = circuit.last_failure_at {
        out.field("Last failure", last.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    if ctx.is_ephemeral() {
        println!();
        out.info("store.backend = \"memory\": state is local to this process");
    }

    Ok(())
}
