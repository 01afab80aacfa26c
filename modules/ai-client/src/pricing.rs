//! Per-model token pricing, used to attribute a dollar cost to every call.
//!
//! Prices are USD per million tokens. Models are matched by prefix so dated
//! snapshots (`claude-sonnet-4-5-20250929`) resolve to their family.

use tracing::warn;

use crate::claude::Usage;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

const PRICING: &[(&str, ModelPricing)] = &[
    (
        "claude-opus-4-5",
        ModelPricing {
            input_per_mtok: 5.0,
            output_per_mtok: 25.0,
        },
    ),
    (
        "claude-opus-4",
        ModelPricing {
            input_per_mtok: 15.0,
            output_per_mtok: 75.0,
        },
    ),
    (
        "claude-sonnet-4",
        ModelPricing {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
        },
    ),
    (
        "claude-3-7-sonnet",
        ModelPricing {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
        },
    ),
    (
        "claude-haiku-4-5",
        ModelPricing {
            input_per_mtok: 1.0,
            output_per_mtok: 5.0,
        },
    ),
    (
        "claude-3-5-haiku",
        ModelPricing {
            input_per_mtok: 0.8,
            output_per_mtok: 4.0,
        },
    ),
];

/// Fallback when a model is not in the table: price it as Sonnet so cost
/// totals err high rather than reporting a free call.
const DEFAULT_PRICING: ModelPricing = ModelPricing {
    input_per_mtok: 3.0,
    output_per_mtok: 15.0,
};

impl ModelPricing {
    pub fn for_model(model: &str) -> Self {
        PRICING
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix))
            .map(|(_, pricing)| *pricing)
            .unwrap_or_else(|| {
                warn!(model, "No pricing entry for model, using default");
                DEFAULT_PRICING
            })
    }
}

/// Dollar cost of one call.
pub fn cost_usd(model: &str, usage: &Usage) -> f64 {
    let pricing = ModelPricing::for_model(model);
    (usage.input_tokens as f64 * pricing.input_per_mtok
        + usage.output_tokens as f64 * pricing.output_per_mtok)
        / 1_000_000.0
}
