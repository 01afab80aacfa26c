//! Per-entity enrichment: refresh gate, context, generation, persistence.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use regex::Regex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::{GenerationContext, NeighborhoodContext, PropertyContext, NEIGHBORHOOD_SAMPLE_SIZE};
use crate::image_refresh::{refresh_property_images, ImageRefreshOptions};
use crate::traits::{EntityStore, ImageSource, VibesGenerator};
use crate::types::{Entity, Neighborhood, NeighborhoodStats, Property, VibesRecord};

pub const DEFAULT_STATS_ERROR_CODES: &[&str] = &["42702"];
pub const DEFAULT_STATS_ERROR_PATTERN: &str = r"column reference .* is ambiguous";

// ---------------------------------------------------------------------------
// Stats degradation
// ---------------------------------------------------------------------------

/// Recognizes statistics-query failures that will recur for every
/// neighborhood, so the query can be switched off for the rest of the run.
#[derive(Debug, Clone)]
pub struct StatsErrorClassifier {
    sqlstates: Vec<String>,
    message: Option<Regex>,
}

impl StatsErrorClassifier {
    pub fn new(sqlstates: Vec<String>, message_pattern: Option<&str>) -> Result<Self, regex::Error> {
        let message = message_pattern.map(Regex::new).transpose()?;
        Ok(Self { sqlstates, message })
    }

    pub fn matches(&self, err: &anyhow::Error) -> bool {
        let sqlstate_hit = err.chain().any(|cause| {
            cause
                .downcast_ref::<sqlx::Error>()
                .and_then(|e| e.as_database_error())
                .and_then(|db| db.code())
                .is_some_and(|code| self.sqlstates.iter().any(|s| *s == *code))
        });
        if sqlstate_hit {
            return true;
        }
        match &self.message {
            Some(re) => re.is_match(&format!("{err:#}")),
            None => false,
        }
    }
}

impl Default for StatsErrorClassifier {
    fn default() -> Self {
        Self {
            sqlstates: DEFAULT_STATS_ERROR_CODES.iter().map(|s| s.to_string()).collect(),
            message: Some(Regex::new(DEFAULT_STATS_ERROR_PATTERN).expect("valid regex")),
        }
    }
}

// ---------------------------------------------------------------------------
// VibesEnricher
// ---------------------------------------------------------------------------

/// What the batch controller learns about a successful enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub cost_usd: f64,
    pub source_data_hash: String,
    pub model_used: String,
}

pub struct VibesEnricher {
    store: Arc<dyn EntityStore>,
    generator: Arc<dyn VibesGenerator>,
    image_source: Option<Arc<dyn ImageSource>>,
    image_options: ImageRefreshOptions,
    stats_classifier: StatsErrorClassifier,
    stats_enabled: bool,
}

impl VibesEnricher {
    pub fn new(store: Arc<dyn EntityStore>, generator: Arc<dyn VibesGenerator>) -> Self {
        Self {
            store,
            generator,
            image_source: None,
            image_options: ImageRefreshOptions::default(),
            stats_classifier: StatsErrorClassifier::default(),
            stats_enabled: true,
        }
    }

    pub fn with_image_refresh(
        mut self,
        source: Arc<dyn ImageSource>,
        options: ImageRefreshOptions,
    ) -> Self {
        self.image_source = Some(source);
        self.image_options = options;
        self
    }

    pub fn with_stats_classifier(mut self, classifier: StatsErrorClassifier) -> Self {
        self.stats_classifier = classifier;
        self
    }

    /// False once a recurring statistics failure has been seen.
    pub fn stats_enabled(&self) -> bool {
        self.stats_enabled
    }

    /// Enrich one entity. Properties may have their gallery refreshed in
    /// place first; the content row is written only after generation succeeds.
    pub async fn enrich(&mut self, entity: &mut Entity) -> Result<Enrichment> {
        let context = match &mut *entity {
            Entity::Property(property) => {
                self.refresh_images(property).await;
                GenerationContext::Property(PropertyContext::from_property(property))
            }
            Entity::Neighborhood(neighborhood) => {
                GenerationContext::Neighborhood(self.neighborhood_context(neighborhood).await?)
            }
        };

        // Hash after the refresh gate so a new gallery is part of the record.
        let source_data_hash = entity.source_hash();

        let generation = self.generator.generate(&context).await?;
        debug!(
            entity_id = %entity.id(),
            model = %generation.model_used,
            cost_usd = generation.cost_usd,
            "Vibes generated"
        );

        let record = VibesRecord {
            entity_id: entity.id(),
            kind: entity.kind(),
            output: generation.output,
            model_used: generation.model_used.clone(),
            source_data_hash: source_data_hash.clone(),
            raw_text: generation.raw_text,
            cost_usd: generation.cost_usd,
            generated_at: Utc::now(),
        };
        self.store.upsert_vibes(&record).await?;

        Ok(Enrichment {
            cost_usd: generation.cost_usd,
            source_data_hash,
            model_used: generation.model_used,
        })
    }

    async fn refresh_images(&self, property: &mut Property) {
        let Some(source) = &self.image_source else {
            return;
        };
        let outcome =
            refresh_property_images(property, &self.image_options, source.as_ref(), self.store.as_ref())
                .await;
        debug!(property_id = %property.id, ?outcome, "Image refresh gate");
    }

    async fn neighborhood_context(&mut self, neighborhood: &Neighborhood) -> Result<NeighborhoodContext> {
        let sample = self
            .store
            .neighborhood_sample(neighborhood.id, NEIGHBORHOOD_SAMPLE_SIZE)
            .await?;
        let stats = self.load_stats(neighborhood.id).await;
        Ok(NeighborhoodContext::build(neighborhood, &sample, stats))
    }

    async fn load_stats(&mut self, neighborhood_id: Uuid) -> Option<NeighborhoodStats> {
        if !self.stats_enabled {
            return None;
        }
        match self.store.neighborhood_stats(neighborhood_id).await {
            Ok(stats) => Some(stats),
            Err(e) if self.stats_classifier.matches(&e) => {
                self.stats_enabled = false;
                warn!(
                    %neighborhood_id,
                    error = %format!("{e:#}"),
                    "Neighborhood stats query is failing structurally, continuing without stats for this run"
                );
                None
            }
            Err(e) => {
                warn!(
                    %neighborhood_id,
                    error = %format!("{e:#}"),
                    "Neighborhood stats unavailable, generating without them"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_classifier_matches_ambiguous_column_message() {
        let classifier = StatsErrorClassifier::default();
        let err = anyhow::anyhow!("error returned from database: column reference \"price\" is ambiguous");
        assert!(classifier.matches(&err));
    }

    #[test]
    fn classifier_ignores_unrelated_errors() {
        let classifier = StatsErrorClassifier::default();
        assert!(!classifier.matches(&anyhow::anyhow!("connection reset by peer")));
    }

    #[test]
    fn classifier_without_pattern_only_checks_sqlstate() {
        let classifier = StatsErrorClassifier::new(vec!["42702".into()], None).unwrap();
        let err = anyhow::anyhow!("column reference \"price\" is ambiguous");
        assert!(!classifier.matches(&err));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(StatsErrorClassifier::new(vec![], Some("(unclosed")).is_err());
    }
}
