use console::style;

use crate::gateway::{CircuitState, HealthStatus};

pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", style("⚠").yellow(), message);
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", style("ℹ").blue(), message);
    }

    pub fn section(&self, message: &str) {
        println!("\n{}", style(message).bold());
        println!("{}", "─".repeat(40));
    }

    /// Aligned `label: value` line inside a section
    pub fn field(&self, label: &str, value: impl std::fmt::Display) {
        println!("  {:<14} {}", style(format!("{}:", label)).dim(), value);
    }

    pub fn circuit_state(&self, state: CircuitState) -> String {
        match state {
            CircuitState::Closed => style(state).green().to_string(),
            CircuitState::HalfOpen => style(state).yellow().to_string(),
            CircuitState::Open => style(state).red().bold().to_string(),
        }
    }

    pub fn health_status(&self, status: HealthStatus) -> String {
        match status {
            HealthStatus::Healthy => style(status).green().to_string(),
            HealthStatus::Degraded => style(status).yellow().to_string(),
            HealthStatus::Unhealthy => style(status).red().bold().to_string(),
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}
