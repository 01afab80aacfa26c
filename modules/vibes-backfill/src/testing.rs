// Test mocks for the backfill pipeline.
//
// Four mocks matching the four trait boundaries:
// - MockStore (EntityStore) — stateful in-memory properties, neighborhoods, vibes
// - MockGenerator (VibesGenerator) — fixed output, per-entity failures, call log
// - MockImageSource (ImageSource) — per-property photo lists or a failing source
// - MemoryCursorStore (CursorStore) — cursor held in memory
//
// Plus helpers for constructing properties and neighborhoods.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::context::GenerationContext;
use crate::cursor::PersistedCursor;
use crate::traits::{
    CursorStore, EntityStore, Generation, ImageQuery, ImageSource, ScanFilter, VibesGenerator,
};
use crate::types::{
    Entity, EntityKind, ImageRefreshUpdate, Neighborhood, NeighborhoodStats, Property, VibesRecord,
};

// ---------------------------------------------------------------------------
// Entity helpers
// ---------------------------------------------------------------------------

/// A listed property with a fixed set of facts and no images.
pub fn property(address: &str) -> Property {
    Property {
        id: Uuid::new_v4(),
        address: address.to_string(),
        city: Some("Portland".into()),
        state_code: Some("OR".into()),
        zip_code: Some("97214".into()),
        price: Some(615_000),
        bedrooms: Some(3),
        bathrooms: Some(2.0),
        square_feet: Some(1_850),
        lot_size_sqft: Some(5_000),
        year_built: Some(1924),
        property_type: Some("single_family".into()),
        description: Some("Craftsman bungalow with a deep front porch.".into()),
        images: Vec::new(),
        listing_url: Some(format!(
            "https://www.zillow.com/homedetails/{}",
            address.replace(' ', "-")
        )),
        neighborhood_id: None,
        images_refreshed_at: None,
        images_refresh_status: None,
        created_at: Utc::now(),
    }
}

/// A property created `minutes_ago`, for deterministic scan order.
pub fn property_at(address: &str, minutes_ago: i64) -> Property {
    Property {
        created_at: fixed_now() - Duration::minutes(minutes_ago),
        ..property(address)
    }
}

pub fn neighborhood(name: &str) -> Neighborhood {
    Neighborhood {
        id: Uuid::new_v4(),
        name: name.to_string(),
        city: Some("Portland".into()),
        state_code: Some("OR".into()),
        description: Some("Tree-lined streets and corner cafes.".into()),
        created_at: Utc::now(),
    }
}

pub fn neighborhood_at(name: &str, minutes_ago: i64) -> Neighborhood {
    Neighborhood {
        created_at: fixed_now() - Duration::minutes(minutes_ago),
        ..neighborhood(name)
    }
}

/// `n` distinct photo URLs on the default allowed host.
pub fn photo_urls(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("https://photos.zillowstatic.com/fp/{}-{i}.jpg", Uuid::new_v4()))
        .collect()
}

fn fixed_now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_760_000_000, 0).unwrap_or_else(Utc::now)
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// In-memory entity store. Scans follow `created_at DESC, id DESC`.
pub struct MockStore {
    properties: Mutex<Vec<Property>>,
    neighborhoods: Mutex<Vec<Neighborhood>>,
    vibes: Mutex<HashMap<Uuid, VibesRecord>>,
    image_updates: Mutex<Vec<(Uuid, ImageRefreshUpdate)>>,
    stats_error: Option<String>,
    fail_image_writes: bool,
    fail_pages_from: Option<u64>,
    fail_hashes: bool,
    stats_calls: AtomicU32,
    page_calls: AtomicU32,
    hash_calls: AtomicU32,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            properties: Mutex::new(Vec::new()),
            neighborhoods: Mutex::new(Vec::new()),
            vibes: Mutex::new(HashMap::new()),
            image_updates: Mutex::new(Vec::new()),
            stats_error: None,
            fail_image_writes: false,
            fail_pages_from: None,
            fail_hashes: false,
            stats_calls: AtomicU32::new(0),
            page_calls: AtomicU32::new(0),
            hash_calls: AtomicU32::new(0),
        }
    }

    pub fn with_property(self, property: Property) -> Self {
        self.properties.lock().unwrap().push(property);
        self
    }

    pub fn with_properties(self, properties: impl IntoIterator<Item = Property>) -> Self {
        self.properties.lock().unwrap().extend(properties);
        self
    }

    pub fn with_neighborhood(self, neighborhood: Neighborhood) -> Self {
        self.neighborhoods.lock().unwrap().push(neighborhood);
        self
    }

    /// Pretend content already exists for `entity` with its current hash.
    pub fn with_current_vibes(self, entity: &Entity) -> Self {
        let record = VibesRecord {
            entity_id: entity.id(),
            kind: entity.kind(),
            output: json!({ "tagline": "existing" }),
            model_used: "previous-model".into(),
            source_data_hash: entity.source_hash(),
            raw_text: "{}".into(),
            cost_usd: 0.0,
            generated_at: Utc::now(),
        };
        self.vibes.lock().unwrap().insert(record.entity_id, record);
        self
    }

    /// Every stats query fails with this message.
    pub fn failing_stats(mut self, message: &str) -> Self {
        self.stats_error = Some(message.to_string());
        self
    }

    pub fn failing_image_writes(mut self) -> Self {
        self.fail_image_writes = true;
        self
    }

    pub fn failing_pages(self) -> Self {
        self.failing_pages_from(0)
    }

    /// Page fetches at or beyond `offset` fail; earlier pages succeed.
    pub fn failing_pages_from(mut self, offset: u64) -> Self {
        self.fail_pages_from = Some(offset);
        self
    }

    pub fn failing_hashes(mut self) -> Self {
        self.fail_hashes = true;
        self
    }

    pub fn insert_property(&self, property: Property) {
        self.properties.lock().unwrap().push(property);
    }

    pub fn property(&self, id: Uuid) -> Option<Property> {
        self.properties
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub fn vibes_for(&self, id: Uuid) -> Option<VibesRecord> {
        self.vibes.lock().unwrap().get(&id).cloned()
    }

    pub fn vibes_count(&self) -> usize {
        self.vibes.lock().unwrap().len()
    }

    pub fn image_updates(&self) -> Vec<(Uuid, ImageRefreshUpdate)> {
        self.image_updates.lock().unwrap().clone()
    }

    pub fn stats_calls(&self) -> u32 {
        self.stats_calls.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> u32 {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn hash_calls(&self) -> u32 {
        self.hash_calls.load(Ordering::SeqCst)
    }

    fn matches_states(state: &Option<String>, filter: &ScanFilter) -> bool {
        filter.state_codes.is_empty()
            || state
                .as_deref()
                .is_some_and(|s| filter.state_codes.iter().any(|c| c.eq_ignore_ascii_case(s)))
    }
}

#[async_trait]
impl EntityStore for MockStore {
    async fn fetch_by_ids(&self, kind: EntityKind, ids: &[Uuid]) -> Result<Vec<Entity>> {
        let wanted: HashSet<&Uuid> = ids.iter().collect();
        Ok(match kind {
            EntityKind::Property => self
                .properties
                .lock()
                .unwrap()
                .iter()
                .filter(|p| wanted.contains(&p.id))
                .cloned()
                .map(Entity::Property)
                .collect(),
            EntityKind::Neighborhood => self
                .neighborhoods
                .lock()
                .unwrap()
                .iter()
                .filter(|n| wanted.contains(&n.id))
                .cloned()
                .map(Entity::Neighborhood)
                .collect(),
        })
    }

    async fn fetch_page(
        &self,
        kind: EntityKind,
        filter: &ScanFilter,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<Entity>> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_pages_from.is_some_and(|from| offset >= from) {
            bail!("MockStore: page fetch failed");
        }

        let mut rows: Vec<(DateTime<Utc>, Uuid, Entity)> = match kind {
            EntityKind::Property => self
                .properties
                .lock()
                .unwrap()
                .iter()
                .filter(|p| filter.min_price.map_or(true, |min| p.price.unwrap_or(0) >= min))
                .filter(|p| Self::matches_states(&p.state_code, filter))
                .map(|p| (p.created_at, p.id, Entity::Property(p.clone())))
                .collect(),
            EntityKind::Neighborhood => self
                .neighborhoods
                .lock()
                .unwrap()
                .iter()
                .filter(|n| Self::matches_states(&n.state_code, filter))
                .map(|n| (n.created_at, n.id, Entity::Neighborhood(n.clone())))
                .collect(),
        };
        rows.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));

        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|(_, _, e)| e)
            .collect())
    }

    async fn existing_hashes(
        &self,
        kind: EntityKind,
        ids: &[Uuid],
    ) -> Result<HashMap<Uuid, String>> {
        self.hash_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_hashes {
            bail!("MockStore: hash lookup failed");
        }
        let vibes = self.vibes.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| vibes.get(id))
            .filter(|r| r.kind == kind)
            .map(|r| (r.entity_id, r.source_data_hash.clone()))
            .collect())
    }

    async fn upsert_vibes(&self, record: &VibesRecord) -> Result<()> {
        self.vibes
            .lock()
            .unwrap()
            .insert(record.entity_id, record.clone());
        Ok(())
    }

    async fn update_property_images(&self, id: Uuid, update: &ImageRefreshUpdate) -> Result<()> {
        if self.fail_image_writes {
            bail!("MockStore: image write failed for {id}");
        }
        self.image_updates.lock().unwrap().push((id, update.clone()));

        let mut properties = self.properties.lock().unwrap();
        if let Some(p) = properties.iter_mut().find(|p| p.id == id) {
            p.images_refresh_status = Some(update.status.as_str().to_string());
            if let Some(images) = &update.images {
                p.images = images.clone();
                p.images_refreshed_at = update.refreshed_at;
            }
        }
        Ok(())
    }

    async fn neighborhood_sample(
        &self,
        neighborhood_id: Uuid,
        limit: u32,
    ) -> Result<Vec<Property>> {
        let mut sample: Vec<Property> = self
            .properties
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.neighborhood_id == Some(neighborhood_id))
            .cloned()
            .collect();
        sample.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        sample.truncate(limit as usize);
        Ok(sample)
    }

    async fn neighborhood_stats(&self, neighborhood_id: Uuid) -> Result<NeighborhoodStats> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.stats_error {
            bail!("{message}");
        }

        let prices: Vec<i64> = self
            .properties
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.neighborhood_id == Some(neighborhood_id))
            .filter_map(|p| p.price)
            .collect();
        Ok(NeighborhoodStats {
            property_count: prices.len() as i64,
            median_price: None,
            min_price: prices.iter().min().copied(),
            max_price: prices.iter().max().copied(),
            avg_price_per_sqft: None,
        })
    }
}

// ---------------------------------------------------------------------------
// MockGenerator
// ---------------------------------------------------------------------------

/// Returns a fixed structured output. Fails for registered entity ids, or for
/// everything after `.failing_all()`.
pub struct MockGenerator {
    cost_per_call: f64,
    fail_for: HashSet<Uuid>,
    fail_all: bool,
    contexts: Mutex<Vec<GenerationContext>>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            cost_per_call: 0.002,
            fail_for: HashSet::new(),
            fail_all: false,
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_per_call = cost_usd;
        self
    }

    pub fn failing_for(mut self, id: Uuid) -> Self {
        self.fail_for.insert(id);
        self
    }

    pub fn failing_all(mut self) -> Self {
        self.fail_all = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }

    pub fn called_ids(&self) -> Vec<Uuid> {
        self.contexts
            .lock()
            .unwrap()
            .iter()
            .map(GenerationContext::entity_id)
            .collect()
    }

    pub fn contexts(&self) -> Vec<GenerationContext> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl VibesGenerator for MockGenerator {
    async fn generate(&self, context: &GenerationContext) -> Result<Generation> {
        self.contexts.lock().unwrap().push(context.clone());

        let id = context.entity_id();
        if self.fail_all || self.fail_for.contains(&id) {
            bail!("MockGenerator: generation failed for {id}");
        }

        let output = json!({
            "tagline": format!("Vibes for {id}"),
            "lifestyle_tags": ["mock"],
        });
        Ok(Generation {
            raw_text: output.to_string(),
            output,
            model_used: "mock-model".into(),
            cost_usd: self.cost_per_call,
        })
    }
}

// ---------------------------------------------------------------------------
// MockImageSource
// ---------------------------------------------------------------------------

pub struct MockImageSource {
    responses: HashMap<Uuid, Vec<String>>,
    fallback: Vec<String>,
    failing: bool,
    calls: Mutex<Vec<Uuid>>,
}

impl Default for MockImageSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockImageSource {
    /// Returns no photos unless configured.
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            fallback: Vec::new(),
            failing: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on_property(mut self, id: Uuid, urls: Vec<String>) -> Self {
        self.responses.insert(id, urls);
        self
    }

    pub fn with_fallback(mut self, urls: Vec<String>) -> Self {
        self.fallback = urls;
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageSource for MockImageSource {
    async fn fetch_image_urls(&self, query: &ImageQuery) -> Result<Vec<String>> {
        self.calls.lock().unwrap().push(query.property_id);
        if self.failing {
            bail!("MockImageSource: actor run failed for {}", query.address);
        }
        Ok(self
            .responses
            .get(&query.property_id)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

// ---------------------------------------------------------------------------
// MemoryCursorStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCursorStore {
    cursor: Mutex<Option<PersistedCursor>>,
    saves: AtomicU32,
    clears: AtomicU32,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cursor(cursor: PersistedCursor) -> Self {
        Self {
            cursor: Mutex::new(Some(cursor)),
            ..Self::default()
        }
    }

    pub fn current(&self) -> Option<PersistedCursor> {
        self.cursor.lock().unwrap().clone()
    }

    pub fn saves(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn clears(&self) -> u32 {
        self.clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<Option<PersistedCursor>> {
        Ok(self.current())
    }

    async fn save(&self, cursor: &PersistedCursor) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.cursor.lock().unwrap() = Some(cursor.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        *self.cursor.lock().unwrap() = None;
        Ok(())
    }
}
