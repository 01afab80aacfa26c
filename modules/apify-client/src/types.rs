use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wrapper for Apify API responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

/// Metadata for an actor run.
#[derive(Debug, Clone, Deserialize)]
pub struct RunData {
    pub id: String,
    pub status: String,
    #[serde(rename = "defaultDatasetId")]
    pub default_dataset_id: String,
    #[serde(rename = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "finishedAt")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartUrl {
    pub url: String,
}

// --- Listing detail scraper types ---

/// Input for the listing detail scraper actor.
///
/// The actor accepts either listing URLs or free-form addresses; a listing
/// URL is preferred because address lookup can resolve to a neighbouring lot.
#[derive(Debug, Clone, Serialize)]
pub struct ListingDetailInput {
    #[serde(rename = "startUrls", skip_serializing_if = "Vec::is_empty")]
    pub start_urls: Vec<StartUrl>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
    #[serde(rename = "extractBuildingUnits")]
    pub extract_building_units: bool,
}

impl ListingDetailInput {
    pub fn for_listing(listing_url: Option<&str>, address: &str) -> Self {
        match listing_url {
            Some(url) => Self {
                start_urls: vec![StartUrl {
                    url: url.to_string(),
                }],
                addresses: Vec::new(),
                extract_building_units: false,
            },
            None => Self {
                start_urls: Vec::new(),
                addresses: vec![address.to_string()],
                extract_building_units: false,
            },
        }
    }
}

/// One listing from the detail scraper dataset. Only photo fields are modelled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingDetail {
    #[serde(rename = "hiResImageLink")]
    pub hi_res_image_link: Option<String>,
    #[serde(rename = "originalPhotos", default)]
    pub original_photos: Vec<OriginalPhoto>,
    /// Rendered when the listing has no photos of its own.
    #[serde(rename = "streetViewImageUrl")]
    pub street_view_image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OriginalPhoto {
    #[serde(rename = "mixedSources")]
    pub mixed_sources: Option<MixedSources>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MixedSources {
    #[serde(default)]
    pub jpeg: Vec<PhotoSource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSource {
    pub url: String,
    pub width: Option<u32>,
}

impl ListingDetail {
    /// Every photo URL in gallery order, widest rendition per photo.
    ///
    /// The street-view fallback is included as-is; callers decide whether
    /// it counts as a real photo.
    pub fn photo_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        if let Some(ref link) = self.hi_res_image_link {
            urls.push(link.clone());
        }
        for photo in &self.original_photos {
            let widest = photo
                .mixed_sources
                .as_ref()
                .and_then(|s| s.jpeg.iter().max_by_key(|p| p.width.unwrap_or(0)));
            if let Some(source) = widest {
                urls.push(source.url.clone());
            }
        }
        if let Some(ref street_view) = self.street_view_image_url {
            urls.push(street_view.clone());
        }
        urls
    }
}
