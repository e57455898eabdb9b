//! Operational alerts
//!
//! Raised on budget threshold crossings and when the circuit opens. Delivery
//! is best-effort, like metrics.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, warn};

use crate::gateway::metrics::SinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Alert {
    /// Daily spend passed the warning ratio
    BudgetWarning { spent: f64, cap: f64, ratio: f64 },
    /// Daily spend reached the cap; admission blocked until reset
    BudgetExhausted {
        spent: f64,
        cap: f64,
        resets_at: DateTime<Utc>,
    },
    /// Breaker opened (from closed or after a failed probe)
    CircuitOpened { breaker: String, cooldown: Duration },
}

impl Alert {
    pub fn severity(&self) -> AlertSeverity {
        match self {
            Self::BudgetWarning { .. } => AlertSeverity::Warning,
            Self::BudgetExhausted { .. } | Self::CircuitOpened { .. } => AlertSeverity::Critical,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::BudgetWarning { spent, cap, ratio } => format!(
                "Daily budget at {:.0}% ({:.2} of {:.2}), warning threshold {:.0}%",
                spent / cap * 100.0,
                spent,
                cap,
                ratio * 100.0
            ),
            Self::BudgetExhausted {
                spent,
                cap,
                resets_at,
            } => format!(
                "Daily budget exhausted ({:.2} of {:.2}); requests blocked until {}",
                spent,
                cap,
                resets_at.format("%Y-%m-%d %H:%M UTC")
            ),
            Self::CircuitOpened { breaker, cooldown } => format!(
                "Circuit '{}' opened; probing again in {}s",
                breaker,
                cooldown.as_secs()
            ),
        }
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<(), SinkError>;
}

/// Logs alerts at `warn` or `error` depending on severity
#[derive(Debug, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn send(&self, alert: &Alert) -> Result<(), SinkError> {
        match alert.severity() {
            AlertSeverity::Warning => warn!(target: "fundgate::alert", "{}", alert.message()),
            AlertSeverity::Critical => error!(target: "fundgate::alert", "{}", alert.message()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_messages() {
        let warning = Alert::BudgetWarning {
            spent: 40_500.0,
            cap: 50_000.0,
            ratio: 0.8,
        };
        assert_eq!(warning.severity(), AlertSeverity::Warning);
        assert!(warning.message().contains("81%"));

        let opened = Alert::CircuitOpened {
            breaker: "anthropic".into(),
            cooldown: Duration::from_secs(30),
        };
        assert_eq!(opened.severity(), AlertSeverity::Critical);
        assert!(opened.message().contains("30s"));
    }

    #[test]
    fn test_alert_serializes_with_type_tag() {
        let alert = Alert::BudgetWarning {
            spent: 1.0,
            cap: 2.0,
            ratio: 0.5,
        };
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["type"], "budget_warning");
    }
}
