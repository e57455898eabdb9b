//! Health Command
//!
//! Report gateway health. The caller maps `Unhealthy` to a non-zero exit code.

use std::path::Path;

use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::gateway::HealthStatus;
use crate::types::Result;

pub async fn run(config_path: Option<&Path>, format: &str) -> Result<HealthStatus> {
    let ctx = CommandContext::load_inspect(config_path)?;
    let report = ctx.gateway.health_check().await;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(report.status);
    }

    let out = Output::new();
    println!("fundgate Health: {}", out.health_status(report.status));
    println!("══════════════════════════════════════");
    out.field(
        "Store",
        if report.store_reachable {
            "reachable"
        } else {
            "unreachable"
        },
    );
    if let Some(circuit) = &report.circuit {
        out.field("Circuit", circuit.summary());
    }
    if let Some(budget) = &report.budget {
        out.field("Budget", format!("{:.1}% of daily cap", budget.percentage));
    }
    if let Some(rate_limit) = &report.rate_limit {
        out.field(
            "Rate window",
            format!("{} / {}", rate_limit.used, rate_limit.limit),
        );
    }

    if !report.details.is_empty() {
        println!();
        for detail in &report.details {
            match report.status {
                HealthStatus::Unhealthy => out.error(detail),
                _ => out.warning(detail),
            }
        }
    }

    Ok(report.status)
}
