// Trait boundaries for the backfill's collaborators.
//
// EntityStore — property/neighborhood reads, content upserts, gallery writes.
// VibesGenerator — one LLM call per generation context.
// ImageSource — external listing photo lookup.
// CursorStore — durable scan position between invocations.
//
// Production implementations live in store.rs, generator.rs, image_refresh.rs
// and cursor.rs; in-memory mocks live in testing.rs.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::context::GenerationContext;
use crate::cursor::PersistedCursor;
use crate::types::{
    Entity, EntityKind, ImageRefreshUpdate, NeighborhoodStats, Property, VibesRecord,
};

// ---------------------------------------------------------------------------
// EntityStore
// ---------------------------------------------------------------------------

/// Secondary filters for an ordered scan.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScanFilter {
    /// Properties only: minimum list price in dollars.
    pub min_price: Option<i64>,
    /// Two-letter state codes; empty means all.
    pub state_codes: Vec<String>,
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch exactly these entities. Order of the result is unspecified.
    async fn fetch_by_ids(&self, kind: EntityKind, ids: &[Uuid]) -> Result<Vec<Entity>>;

    /// One page of the deterministic scan (`created_at DESC, id DESC`).
    async fn fetch_page(
        &self,
        kind: EntityKind,
        filter: &ScanFilter,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<Entity>>;

    /// Stored `source_data_hash` per entity id, for ids that have content.
    async fn existing_hashes(
        &self,
        kind: EntityKind,
        ids: &[Uuid],
    ) -> Result<HashMap<Uuid, String>>;

    /// Insert or replace the single content row for `record.entity_id`.
    async fn upsert_vibes(&self, record: &VibesRecord) -> Result<()>;

    /// Write the outcome of an image refresh attempt.
    async fn update_property_images(&self, id: Uuid, update: &ImageRefreshUpdate) -> Result<()>;

    /// Up to `limit` properties in a neighborhood, most recent first.
    async fn neighborhood_sample(&self, neighborhood_id: Uuid, limit: u32)
        -> Result<Vec<Property>>;

    /// Aggregate price statistics for a neighborhood.
    async fn neighborhood_stats(&self, neighborhood_id: Uuid) -> Result<NeighborhoodStats>;
}

// ---------------------------------------------------------------------------
// VibesGenerator
// ---------------------------------------------------------------------------

/// Output of one successful generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub output: serde_json::Value,
    pub model_used: String,
    pub cost_usd: f64,
    pub raw_text: String,
}

#[async_trait]
pub trait VibesGenerator: Send + Sync {
    /// Generate vibes for one context. No retries happen above this call.
    async fn generate(&self, context: &GenerationContext) -> Result<Generation>;
}

// ---------------------------------------------------------------------------
// ImageSource
// ---------------------------------------------------------------------------

/// What the image source needs to locate a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageQuery {
    pub property_id: Uuid,
    pub address: String,
    pub city: Option<String>,
    pub state_code: Option<String>,
    pub zip_code: Option<String>,
    pub listing_url: Option<String>,
}

impl ImageQuery {
    pub fn for_property(property: &Property) -> Self {
        Self {
            property_id: property.id,
            address: property.address.clone(),
            city: property.city.clone(),
            state_code: property.state_code.clone(),
            zip_code: property.zip_code.clone(),
            listing_url: property.listing_url.clone(),
        }
    }

    /// Single-line address for sources that geocode free text.
    pub fn full_address(&self) -> String {
        let mut parts = vec![self.address.clone()];
        parts.extend(self.city.clone());
        let state_zip = [self.state_code.as_deref(), self.zip_code.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if !state_zip.is_empty() {
            parts.push(state_zip);
        }
        parts.join(", ")
    }
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Raw photo URLs for a listing. May include placeholders or foreign hosts.
    async fn fetch_image_urls(&self, query: &ImageQuery) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// CursorStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self) -> Result<Option<PersistedCursor>>;
    async fn save(&self, cursor: &PersistedCursor) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_address_joins_present_parts() {
        let query = ImageQuery {
            property_id: Uuid::nil(),
            address: "1 Main St".into(),
            city: Some("Austin".into()),
            state_code: Some("TX".into()),
            zip_code: Some("78701".into()),
            listing_url: None,
        };
        assert_eq!(query.full_address(), "1 Main St, Austin, TX 78701");

        let bare = ImageQuery {
            city: None,
            state_code: None,
            zip_code: None,
            ..query
        };
        assert_eq!(bare.full_address(), "1 Main St");
    }
}
