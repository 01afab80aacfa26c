//! Generation contexts: the facts handed to the model for one entity.

use chrono::{Datelike, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::types::{Neighborhood, NeighborhoodStats, Property};

/// Maximum number of listings sampled into a neighborhood context.
pub const NEIGHBORHOOD_SAMPLE_SIZE: u32 = 12;

/// Listing descriptions are clipped to keep prompts bounded.
const MAX_DESCRIPTION_BYTES: usize = 2_000;

/// Image URLs are not useful to the model beyond a handful.
const MAX_CONTEXT_IMAGES: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationContext {
    Property(PropertyContext),
    Neighborhood(NeighborhoodContext),
}

impl GenerationContext {
    pub fn entity_id(&self) -> Uuid {
        match self {
            GenerationContext::Property(p) => p.property_id,
            GenerationContext::Neighborhood(n) => n.neighborhood_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyContext {
    pub property_id: Uuid,
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
    pub image_count: usize,
    pub sample_images: Vec<String>,
    // Denormalized figures the model otherwise gets wrong.
    pub price_per_sqft: Option<f64>,
    pub home_age_years: Option<i32>,
}

impl PropertyContext {
    pub fn from_property(property: &Property) -> Self {
        let price_per_sqft = match (property.price, property.square_feet) {
            (Some(price), Some(sqft)) if sqft > 0 => {
                Some((price as f64 / sqft as f64 * 100.0).round() / 100.0)
            }
            _ => None,
        };
        let home_age_years = property
            .year_built
            .map(|year| (Utc::now().year() - year).max(0));

        Self {
            property_id: property.id,
            address: property.address.clone(),
            city: property.city.clone(),
            state_code: property.state_code.clone(),
            zip_code: property.zip_code.clone(),
            price: property.price,
            bedrooms: property.bedrooms,
            bathrooms: property.bathrooms,
            square_feet: property.square_feet,
            lot_size_sqft: property.lot_size_sqft,
            year_built: property.year_built,
            property_type: property.property_type.clone(),
            description: property.description.as_deref().map(clip_description),
            image_count: property.images.len(),
            sample_images: property
                .images
                .iter()
                .take(MAX_CONTEXT_IMAGES)
                .cloned()
                .collect(),
            price_per_sqft,
            home_age_years,
        }
    }
}

/// Compact listing summary used inside a neighborhood context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingSummary {
    pub address: String,
    pub price: Option<i64>,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<f64>,
    pub square_feet: Option<i32>,
    pub property_type: Option<String>,
    pub year_built: Option<i32>,
}

impl From<&Property> for ListingSummary {
    fn from(p: &Property) -> Self {
        Self {
            address: p.address.clone(),
            price: p.price,
            bedrooms: p.bedrooms,
            bathrooms: p.bathrooms,
            square_feet: p.square_feet,
            property_type: p.property_type.clone(),
            year_built: p.year_built,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NeighborhoodContext {
    pub neighborhood_id: Uuid,
    pub name: String,
    pub city: Option<String>,
    pub state_code: Option<String>,
    pub description: Option<String>,
    pub sample_listings: Vec<ListingSummary>,
    pub stats: Option<NeighborhoodStats>,
}

impl NeighborhoodContext {
    pub fn build(
        neighborhood: &Neighborhood,
        sample: &[Property],
        stats: Option<NeighborhoodStats>,
    ) -> Self {
        Self {
            neighborhood_id: neighborhood.id,
            name: neighborhood.name.clone(),
            city: neighborhood.city.clone(),
            state_code: neighborhood.state_code.clone(),
            description: neighborhood.description.as_deref().map(clip_description),
            sample_listings: sample
                .iter()
                .take(NEIGHBORHOOD_SAMPLE_SIZE as usize)
                .map(ListingSummary::from)
                .collect(),
            stats,
        }
    }
}

fn clip_description(text: &str) -> String {
    if text.len() <= MAX_DESCRIPTION_BYTES {
        return text.to_string();
    }
    let mut end = MAX_DESCRIPTION_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{neighborhood, property};

    #[test]
    fn price_per_sqft_is_rounded_to_cents() {
        let mut p = property("1 Main St");
        p.price = Some(500_000);
        p.square_feet = Some(3_000);
        let ctx = PropertyContext::from_property(&p);
        assert_eq!(ctx.price_per_sqft, Some(166.67));
    }

    #[test]
    fn zero_square_feet_has_no_price_per_sqft() {
        let mut p = property("1 Main St");
        p.square_feet = Some(0);
        assert_eq!(PropertyContext::from_property(&p).price_per_sqft, None);
    }

    #[test]
    fn sample_is_bounded() {
        let n = neighborhood("Fremont");
        let listings: Vec<Property> = (0..30).map(|i| property(&format!("{i} Elm St"))).collect();
        let ctx = NeighborhoodContext::build(&n, &listings, None);
        assert_eq!(ctx.sample_listings.len(), NEIGHBORHOOD_SAMPLE_SIZE as usize);
    }

    #[test]
    fn long_description_is_clipped_on_char_boundary() {
        let text = "é".repeat(MAX_DESCRIPTION_BYTES);
        let clipped = clip_description(&text);
        assert!(clipped.len() <= MAX_DESCRIPTION_BYTES + "…".len());
        assert!(clipped.ends_with('…'));
    }

    #[test]
    fn context_serializes_with_type_tag() {
        let ctx = GenerationContext::Property(PropertyContext::from_property(&property("9 Oak")));
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["type"], "property");
        assert_eq!(json["address"], "9 Oak");
    }
}
