//! Postgres implementation of [`EntityStore`].

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::traits::{EntityStore, ScanFilter};
use crate::types::{
    Entity, EntityKind, ImageRefreshUpdate, Neighborhood, NeighborhoodStats, Property, VibesRecord,
};

const PROPERTY_COLUMNS: &str = "\
    p.id, p.address, p.city, p.state_code, p.zip_code, \
    p.price::int8 AS price, p.bedrooms::int4 AS bedrooms, p.bathrooms::float8 AS bathrooms, \
    p.square_feet::int4 AS square_feet, p.lot_size_sqft::int4 AS lot_size_sqft, \
    p.year_built::int4 AS year_built, p.property_type, p.description, \
    COALESCE(p.images, '{}'::text[]) AS images, p.listing_url, p.neighborhood_id, \
    p.images_refreshed_at, p.images_refresh_status, p.created_at";

const NEIGHBORHOOD_COLUMNS: &str = "n.id, n.name, n.city, n.state_code, n.description, n.created_at";

/// Open a small pool; the backfill issues one query at a time.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn vibes_table(kind: EntityKind) -> (&'static str, &'static str) {
        match kind {
            EntityKind::Property => ("property_vibes", "property_id"),
            EntityKind::Neighborhood => ("neighborhood_vibes", "neighborhood_id"),
        }
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn fetch_by_ids(&self, kind: EntityKind, ids: &[Uuid]) -> Result<Vec<Entity>> {
        let entities = match kind {
            EntityKind::Property => {
                let sql = format!("SELECT {PROPERTY_COLUMNS} FROM properties p WHERE p.id = ANY($1)");
                sqlx::query_as::<_, Property>(&sql)
                    .bind(ids)
                    .fetch_all(&self.pool)
                    .await?
                    .into_iter()
                    .map(Entity::Property)
                    .collect()
            }
            EntityKind::Neighborhood => {
                let sql =
                    format!("SELECT {NEIGHBORHOOD_COLUMNS} FROM neighborhoods n WHERE n.id = ANY($1)");
                sqlx::query_as::<_, Neighborhood>(&sql)
                    .bind(ids)
                    .fetch_all(&self.pool)
                    .await?
                    .into_iter()
                    .map(Entity::Neighborhood)
                    .collect()
            }
        };
        Ok(entities)
    }

    async fn fetch_page(
        &self,
        kind: EntityKind,
        filter: &ScanFilter,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<Entity>> {
        let offset = i64::try_from(offset)?;
        let limit = i64::from(limit);

        let entities = match kind {
            EntityKind::Property => {
                let sql = format!(
                    "SELECT {PROPERTY_COLUMNS} FROM properties p
                     WHERE ($1::int8 IS NULL OR p.price >= $1)
                       AND (cardinality($2::text[]) = 0 OR upper(p.state_code) = ANY($2))
                     ORDER BY p.created_at DESC, p.id DESC
                     OFFSET $3 LIMIT $4"
                );
                sqlx::query_as::<_, Property>(&sql)
                    .bind(filter.min_price)
                    .bind(&filter.state_codes)
                    .bind(offset)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
                    .into_iter()
                    .map(Entity::Property)
                    .collect()
            }
            EntityKind::Neighborhood => {
                let sql = format!(
                    "SELECT {NEIGHBORHOOD_COLUMNS} FROM neighborhoods n
                     WHERE (cardinality($1::text[]) = 0 OR upper(n.state_code) = ANY($1))
                     ORDER BY n.created_at DESC, n.id DESC
                     OFFSET $2 LIMIT $3"
                );
                sqlx::query_as::<_, Neighborhood>(&sql)
                    .bind(&filter.state_codes)
                    .bind(offset)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
                    .into_iter()
                    .map(Entity::Neighborhood)
                    .collect()
            }
        };
        Ok(entities)
    }

    async fn existing_hashes(
        &self,
        kind: EntityKind,
        ids: &[Uuid],
    ) -> Result<HashMap<Uuid, String>> {
        let (table, key) = Self::vibes_table(kind);
        let sql = format!(
            "SELECT {key}, source_data_hash FROM {table}
             WHERE {key} = ANY($1) AND source_data_hash IS NOT NULL"
        );
        let rows = sqlx::query_as::<_, (Uuid, String)>(&sql)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn upsert_vibes(&self, record: &VibesRecord) -> Result<()> {
        let (table, key) = Self::vibes_table(record.kind);
        let sql = format!(
            "INSERT INTO {table}
                 ({key}, vibes, model_used, source_data_hash, raw_output, cost_usd, generated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT ({key}) DO UPDATE SET
                 vibes = EXCLUDED.vibes,
                 model_used = EXCLUDED.model_used,
                 source_data_hash = EXCLUDED.source_data_hash,
                 raw_output = EXCLUDED.raw_output,
                 cost_usd = EXCLUDED.cost_usd,
                 generated_at = EXCLUDED.generated_at"
        );
        sqlx::query(&sql)
            .bind(record.entity_id)
            .bind(&record.output)
            .bind(&record.model_used)
            .bind(&record.source_data_hash)
            .bind(&record.raw_text)
            .bind(record.cost_usd)
            .bind(record.generated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_property_images(&self, id: Uuid, update: &ImageRefreshUpdate) -> Result<()> {
        match &update.images {
            Some(images) => {
                sqlx::query(
                    "UPDATE properties SET
                         images = $2,
                         image_count = $3,
                         images_refreshed_at = $4,
                         images_refresh_status = $5,
                         images_refresh_attempted_at = $6
                     WHERE id = $1",
                )
                .bind(id)
                .bind(images)
                .bind(update.image_count)
                .bind(update.refreshed_at)
                .bind(update.status.as_str())
                .bind(update.attempted_at)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    "UPDATE properties SET
                         images_refresh_status = $2,
                         images_refresh_attempted_at = $3
                     WHERE id = $1",
                )
                .bind(id)
                .bind(update.status.as_str())
                .bind(update.attempted_at)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    async fn neighborhood_sample(
        &self,
        neighborhood_id: Uuid,
        limit: u32,
    ) -> Result<Vec<Property>> {
        let sql = format!(
            "SELECT {PROPERTY_COLUMNS} FROM properties p
             WHERE p.neighborhood_id = $1
             ORDER BY p.created_at DESC, p.id DESC
             LIMIT $2"
        );
        let rows = sqlx::query_as::<_, Property>(&sql)
            .bind(neighborhood_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn neighborhood_stats(&self, neighborhood_id: Uuid) -> Result<NeighborhoodStats> {
        let stats = sqlx::query_as::<_, NeighborhoodStats>(
            "SELECT
                 COUNT(*)::int8 AS property_count,
                 percentile_cont(0.5) WITHIN GROUP (ORDER BY p.price)::float8 AS median_price,
                 MIN(p.price)::int8 AS min_price,
                 MAX(p.price)::int8 AS max_price,
                 AVG(p.price::float8 / NULLIF(p.square_feet, 0))::float8 AS avg_price_per_sqft
             FROM properties p
             WHERE p.neighborhood_id = $1",
        )
        .bind(neighborhood_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }
}
