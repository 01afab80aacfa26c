//! Entities, generated-content records and run bookkeeping types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::source_hash;

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Property,
    Neighborhood,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Property => "property",
            EntityKind::Neighborhood => "neighborhood",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "property" | "properties" => Ok(EntityKind::Property),
            "neighborhood" | "neighborhoods" => Ok(EntityKind::Neighborhood),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Property {
    pub id: Uuid,
    pub address: String,
    pub city: Option<String>,
    pub state_code: Option<String>,
    pub zip_code: Option<String>,
    pub price: Option<i64>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<f64>,
    pub square_feet: Option<i32>,
    pub lot_size_sqft: Option<i32>,
    pub year_built: Option<i32>,
    pub property_type: Option<String>,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub listing_url: Option<String>,
    pub neighborhood_id: Option<Uuid>,
    /// Set only by a successful image refresh; its presence is the refresh marker.
    pub images_refreshed_at: Option<DateTime<Utc>>,
    pub images_refresh_status: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Neighborhood {
    pub id: Uuid,
    pub name: String,
    pub city: Option<String>,
    pub state_code: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A record eligible for vibes generation.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Property(Property),
    Neighborhood(Neighborhood),
}

impl Entity {
    pub fn id(&self) -> Uuid {
        match self {
            Entity::Property(p) => p.id,
            Entity::Neighborhood(n) => n.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Property(_) => EntityKind::Property,
            Entity::Neighborhood(_) => EntityKind::Neighborhood,
        }
    }

    /// Human-readable identification for logs and failure records.
    pub fn label(&self) -> String {
        match self {
            Entity::Property(p) => match (&p.city, &p.state_code) {
                (Some(city), Some(state)) => format!("{}, {city}, {state}", p.address),
                _ => p.address.clone(),
            },
            Entity::Neighborhood(n) => match &n.city {
                Some(city) => format!("{} ({city})", n.name),
                None => n.name.clone(),
            },
        }
    }

    pub fn source_hash(&self) -> String {
        match self {
            Entity::Property(p) => source_hash::property_source_hash(p),
            Entity::Neighborhood(n) => source_hash::neighborhood_source_hash(n),
        }
    }
}

/// Aggregates from the secondary statistics query for a neighborhood.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NeighborhoodStats {
    pub property_count: i64,
    pub median_price: Option<f64>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub avg_price_per_sqft: Option<f64>,
}

// ---------------------------------------------------------------------------
// Generated content
// ---------------------------------------------------------------------------

/// The single generated-content row for an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibesRecord {
    pub entity_id: Uuid,
    pub kind: EntityKind,
    pub output: serde_json::Value,
    pub model_used: String,
    pub source_data_hash: String,
    pub raw_text: String,
    pub cost_usd: f64,
    pub generated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Image refresh
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    Ok,
    Empty,
    Failed,
}

impl RefreshStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshStatus::Ok => "ok",
            RefreshStatus::Empty => "empty",
            RefreshStatus::Failed => "failed",
        }
    }
}

/// Result of one refresh attempt as written back to the store.
///
/// `images` and `refreshed_at` are only present for `RefreshStatus::Ok`; the
/// other statuses never touch the existing gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRefreshUpdate {
    pub images: Option<Vec<String>>,
    pub status: RefreshStatus,
    pub image_count: i32,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub attempted_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

/// One entity that could not be enriched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub entity_id: Uuid,
    pub kind: EntityKind,
    pub label: String,
    pub error_message: String,
    pub error_code: Option<String>,
}

/// In-memory progress of a scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchCursor {
    pub offset: u64,
    pub last_entity_id: Option<Uuid>,
    pub attempted: u32,
    pub skipped: u32,
    pub success: u32,
    pub failed: u32,
    pub total_cost_usd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_plural_and_case() {
        assert_eq!("Properties".parse::<EntityKind>(), Ok(EntityKind::Property));
        assert_eq!(
            "neighborhood".parse::<EntityKind>(),
            Ok(EntityKind::Neighborhood)
        );
        assert!("condo".parse::<EntityKind>().is_err());
    }

    #[test]
    fn neighborhood_label_includes_city() {
        let n = Neighborhood {
            id: Uuid::new_v4(),
            name: "Mission".into(),
            city: Some("San Francisco".into()),
            state_code: Some("CA".into()),
            description: None,
            created_at: Utc::now(),
        };
        assert_eq!(Entity::Neighborhood(n).label(), "Mission (San Francisco)");
    }
}
