//! Image refresh gate for properties.
//!
//! Before a property's vibes are generated its gallery may be re-fetched from
//! the listing photo source. The source is slow and rate limited, so a refresh
//! only happens when forced, when the gallery is below the minimum size, or
//! when the property has never been refreshed. A failed or empty refresh
//! never touches the existing gallery.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use apify_client::ApifyClient;

use crate::traits::{EntityStore, ImageQuery, ImageSource};
use crate::types::{ImageRefreshUpdate, Property, RefreshStatus};

pub const DEFAULT_MIN_IMAGES: usize = 10;
pub const DEFAULT_MAX_IMAGES: usize = 40;
pub const DEFAULT_IMAGE_HOST: &str = "photos.zillowstatic.com";

// ---------------------------------------------------------------------------
// Options & decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRefreshOptions {
    pub enabled: bool,
    pub force_refresh: bool,
    pub min_images: usize,
    pub max_images: usize,
    /// Photos must be served from this host or one of its subdomains.
    pub allowed_host: String,
    /// Substrings marking placeholder images (street view renders, "no photo" tiles).
    pub placeholder_patterns: Vec<String>,
}

impl Default for ImageRefreshOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            force_refresh: false,
            min_images: DEFAULT_MIN_IMAGES,
            max_images: DEFAULT_MAX_IMAGES,
            allowed_host: DEFAULT_IMAGE_HOST.to_string(),
            placeholder_patterns: default_placeholder_patterns(),
        }
    }
}

pub fn default_placeholder_patterns() -> Vec<String> {
    vec![
        "maps.googleapis.com/maps/api/streetview".to_string(),
        "streetview".to_string(),
        "no-photo".to_string(),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    Forced,
    BelowMinimum,
    NeverRefreshed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    Satisfied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    Refresh(RefreshReason),
    Skip(SkipReason),
}

pub fn refresh_decision(property: &Property, options: &ImageRefreshOptions) -> RefreshDecision {
    if !options.enabled {
        return RefreshDecision::Skip(SkipReason::Disabled);
    }
    if options.force_refresh {
        return RefreshDecision::Refresh(RefreshReason::Forced);
    }
    if property.images.len() < options.min_images {
        return RefreshDecision::Refresh(RefreshReason::BelowMinimum);
    }
    if property.images_refreshed_at.is_none() {
        return RefreshDecision::Refresh(RefreshReason::NeverRefreshed);
    }
    RefreshDecision::Skip(SkipReason::Satisfied)
}

// ---------------------------------------------------------------------------
// URL filtering
// ---------------------------------------------------------------------------

/// Keep well-formed http(s) photo URLs on the allowed host, drop placeholders
/// and duplicates, preserve gallery order, cap at `max_images`.
pub fn filter_image_urls(raw: &[String], options: &ImageRefreshOptions) -> Vec<String> {
    let allowed = options.allowed_host.to_ascii_lowercase();
    let suffix = format!(".{allowed}");
    let mut seen = HashSet::new();

    raw.iter()
        .map(|u| u.trim())
        .filter(|u| {
            let Ok(parsed) = url::Url::parse(u) else {
                return false;
            };
            if !matches!(parsed.scheme(), "http" | "https") {
                return false;
            }
            let Some(host) = parsed.host_str().map(str::to_ascii_lowercase) else {
                return false;
            };
            host == allowed || host.ends_with(&suffix)
        })
        .filter(|u| {
            let lower = u.to_ascii_lowercase();
            !options
                .placeholder_patterns
                .iter()
                .any(|p| lower.contains(&p.to_ascii_lowercase()))
        })
        .filter(|u| seen.insert(u.to_string()))
        .take(options.max_images)
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Refresh
// ---------------------------------------------------------------------------

/// What happened to a property's gallery before generation.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Skipped(SkipReason),
    Refreshed { previous: usize, current: usize },
    Empty,
    Failed(String),
}

/// Run the gate for one property, mutating `property.images` only when a
/// non-empty gallery was fetched and written.
pub async fn refresh_property_images(
    property: &mut Property,
    options: &ImageRefreshOptions,
    source: &dyn ImageSource,
    store: &dyn EntityStore,
) -> RefreshOutcome {
    let reason = match refresh_decision(property, options) {
        RefreshDecision::Skip(skip) => return RefreshOutcome::Skipped(skip),
        RefreshDecision::Refresh(reason) => reason,
    };

    info!(
        property_id = %property.id,
        address = %property.address,
        current_images = property.images.len(),
        ?reason,
        "Refreshing property images"
    );

    let attempted_at = Utc::now();
    let fetched = source
        .fetch_image_urls(&ImageQuery::for_property(property))
        .await;

    let (update, outcome) = match fetched {
        Err(e) => {
            warn!(property_id = %property.id, error = %e, "Image source failed, keeping existing images");
            (
                ImageRefreshUpdate {
                    images: None,
                    status: RefreshStatus::Failed,
                    image_count: property.images.len() as i32,
                    refreshed_at: None,
                    attempted_at,
                },
                RefreshOutcome::Failed(format!("{e:#}")),
            )
        }
        Ok(raw) => {
            let filtered = filter_image_urls(&raw, options);
            if filtered.is_empty() {
                warn!(
                    property_id = %property.id,
                    raw_count = raw.len(),
                    "Image source returned no usable images, keeping existing images"
                );
                (
                    ImageRefreshUpdate {
                        images: None,
                        status: RefreshStatus::Empty,
                        image_count: property.images.len() as i32,
                        refreshed_at: None,
                        attempted_at,
                    },
                    RefreshOutcome::Empty,
                )
            } else {
                let previous = property.images.len();
                let current = filtered.len();
                (
                    ImageRefreshUpdate {
                        image_count: current as i32,
                        images: Some(filtered),
                        status: RefreshStatus::Ok,
                        refreshed_at: Some(attempted_at),
                        attempted_at,
                    },
                    RefreshOutcome::Refreshed { previous, current },
                )
            }
        }
    };

    if let Err(e) = store.update_property_images(property.id, &update).await {
        warn!(
            property_id = %property.id,
            status = update.status.as_str(),
            error = %e,
            "Failed to record image refresh"
        );
        // The gallery was not persisted, so generation uses what is stored.
        return match outcome {
            RefreshOutcome::Refreshed { .. } => {
                RefreshOutcome::Failed(format!("image write failed: {e:#}"))
            }
            other => other,
        };
    }

    property.images_refresh_status = Some(update.status.as_str().to_string());
    if let Some(images) = update.images {
        property.images = images;
        property.images_refreshed_at = update.refreshed_at;
        info!(
            property_id = %property.id,
            image_count = property.images.len(),
            "Property images refreshed"
        );
    }

    outcome
}

// ---------------------------------------------------------------------------
// ApifyImageSource
// ---------------------------------------------------------------------------

pub struct ApifyImageSource {
    client: ApifyClient,
}

impl ApifyImageSource {
    pub fn new(client: ApifyClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageSource for ApifyImageSource {
    async fn fetch_image_urls(&self, query: &ImageQuery) -> Result<Vec<String>> {
        let address = query.full_address();
        Ok(self
            .client
            .listing_photo_urls(query.listing_url.as_deref(), &address)
            .await?)
    }
}
