//! Token cost calculation
//!
//! Converts provider token usage into spend using fixed per-thousand-token
//! rates. Pure and stateless.

use serde::{Deserialize, Serialize};

use crate::constants::cost as cost_constants;
use crate::types::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostCalculator {
    /// Currency units per 1K input tokens
    pub input_per_thousand: f64,
    /// Currency units per 1K output tokens
    pub output_per_thousand: f64,
}

impl Default for CostCalculator {
    fn default() -> Self {
        Self {
            input_per_thousand: cost_constants::INPUT_PER_THOUSAND,
            output_per_thousand: cost_constants::OUTPUT_PER_THOUSAND,
        }
    }
}

impl CostCalculator {
    pub fn new(input_per_thousand: f64, output_per_thousand: f64) -> Result<Self> {
        let calc = Self {
            input_per_thousand,
            output_per_thousand,
        };
        calc.validate()?;
        Ok(calc)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("input", self.input_per_thousand),
            ("output", self.output_per_thousand),
        ] {
            if !rate.is_finite() || rate < 0.0 {
                return Err(GatewayError::Config(format!(
                    "Cost per thousand {name} tokens must be a non-negative number, got {rate}"
                )));
            }
        }
        Ok(())
    }

    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_per_thousand
            + (output_tokens as f64 / 1000.0) * self.output_per_thousand
    }
}
