//! Cost - per-task USD estimate from token usage
//!
//! Fixed per-tier rates, USD per 1M tokens. A model identifier resolves to
//! the first tier whose name it equals or contains; unknown models cost 0.

use crate::task::TokenUsage;
use serde::{Deserialize, Serialize};

/// Tier pricing (USD per 1M tokens)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub tier: String,
    pub input_price: f64,
    pub output_price: f64,
}

impl ModelPricing {
    pub fn new(tier: &str, input: f64, output: f64) -> Self {
        Self {
            tier: tier.to_string(),
            input_price: input,
            output_price: output,
        }
    }

    pub fn calculate(&self, usage: &TokenUsage) -> f64 {
        let input_cost = (usage.input_tokens as f64 / 1_000_000.0) * self.input_price;
        let output_cost = (usage.output_tokens as f64 / 1_000_000.0) * self.output_price;
        input_cost + output_cost
    }
}

/// Ordered tier table
#[derive(Debug, Clone)]
pub struct PricingTable {
    tiers: Vec<ModelPricing>,
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl PricingTable {
    pub fn new(tiers: Vec<ModelPricing>) -> Self {
        Self { tiers }
    }

    /// Built-in Claude tiers
    pub fn standard() -> Self {
        Self::new(vec![
            ModelPricing::new("opus", 15.0, 75.0),
            ModelPricing::new("sonnet", 3.0, 15.0),
            ModelPricing::new("haiku", 0.80, 4.0),
        ])
    }

    pub fn tiers(&self) -> &[ModelPricing] {
        &self.tiers
    }

    /// Exact tier name first, then containment in table order
    pub fn resolve(&self, model: &str) -> Option<&ModelPricing> {
        let model = model.to_lowercase();
        self.tiers
            .iter()
            .find(|p| p.tier == model)
            .or_else(|| self.tiers.iter().find(|p| model.contains(p.tier.as_str())))
    }

    pub fn cost(&self, model: &str, usage: &TokenUsage) -> f64 {
        self.resolve(model)
            .map(|p| p.calculate(usage))
            .unwrap_or(0.0)
    }
}
