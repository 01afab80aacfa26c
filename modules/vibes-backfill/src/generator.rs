//! Claude-backed vibes generation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use ai_client::{Claude, Extraction, StructuredOutput};

use crate::context::{GenerationContext, NeighborhoodContext, PropertyContext};
use crate::traits::{Generation, VibesGenerator};

// ---------------------------------------------------------------------------
// Output shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PropertyVibes {
    /// One line, under 80 characters, no exclamation marks.
    pub tagline: String,
    /// Two or three sentences on what living here feels like.
    pub vibe_summary: String,
    /// Three to six short lowercase tags, e.g. "sun-drenched", "walkable".
    pub lifestyle_tags: Vec<String>,
    /// Who this home suits best.
    pub ideal_for: Vec<String>,
    /// Concrete features drawn only from the listing facts.
    pub standout_features: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NeighborhoodVibes {
    pub tagline: String,
    /// A short narrative of the neighborhood's character.
    pub narrative: String,
    pub lifestyle_tags: Vec<String>,
    /// Typical homes, grounded in the sampled listings.
    pub housing_character: String,
    pub best_for: Vec<String>,
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

const PROPERTY_SYSTEM: &str = "\
You write short, warm, specific descriptions of homes for a swipe-to-match \
home browsing app. Use only the facts provided. Never invent amenities, views, \
school names or renovations. Avoid fair-housing violations: describe the home \
and lifestyle, never the kind of people who should or should not live there \
by protected characteristics.";

const NEIGHBORHOOD_SYSTEM: &str = "\
You write short neighborhood narratives for a home browsing app. Ground every \
claim in the neighborhood facts, sampled listings and statistics provided. \
When statistics are absent, do not guess prices. Avoid fair-housing violations.";

fn property_prompt(ctx: &PropertyContext) -> Result<String> {
    Ok(format!(
        "Write the vibes for this listing.\n\nListing facts (JSON):\n{}",
        serde_json::to_string_pretty(ctx)?
    ))
}

fn neighborhood_prompt(ctx: &NeighborhoodContext) -> Result<String> {
    let stats_note = if ctx.stats.is_some() {
        "Aggregate statistics are included."
    } else {
        "No aggregate statistics are available."
    };
    Ok(format!(
        "Write the vibes for this neighborhood. {stats_note}\n\nNeighborhood facts (JSON):\n{}",
        serde_json::to_string_pretty(ctx)?
    ))
}

// ---------------------------------------------------------------------------
// ClaudeVibesGenerator
// ---------------------------------------------------------------------------

pub struct ClaudeVibesGenerator {
    claude: Claude,
}

impl ClaudeVibesGenerator {
    pub fn new(claude: Claude) -> Self {
        Self { claude }
    }

    async fn extract<T: StructuredOutput + Serialize>(
        &self,
        system: &str,
        user: String,
    ) -> Result<Generation> {
        let Extraction {
            value,
            raw,
            model,
            cost_usd,
            ..
        } = self.claude.extract::<T>(system, user).await?;

        Ok(Generation {
            output: serde_json::to_value(&value)?,
            model_used: model,
            cost_usd,
            raw_text: raw.to_string(),
        })
    }
}

#[async_trait]
impl VibesGenerator for ClaudeVibesGenerator {
    async fn generate(&self, context: &GenerationContext) -> Result<Generation> {
        match context {
            GenerationContext::Property(ctx) => self
                .extract::<PropertyVibes>(PROPERTY_SYSTEM, property_prompt(ctx)?)
                .await
                .with_context(|| format!("property vibes for {}", ctx.address)),
            GenerationContext::Neighborhood(ctx) => self
                .extract::<NeighborhoodVibes>(NEIGHBORHOOD_SYSTEM, neighborhood_prompt(ctx)?)
                .await
                .with_context(|| format!("neighborhood vibes for {}", ctx.name)),
        }
    }
}
