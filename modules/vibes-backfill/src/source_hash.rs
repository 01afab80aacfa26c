//! Content fingerprints for generated vibes.
//!
//! A source hash covers only the fields that shape the generated text. Ids,
//! timestamps and refresh markers are left out, so two entities with the same
//! content hash identically. Fields go through a `BTreeMap`, which fixes the
//! key order of the serialized form regardless of struct layout.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::types::{Neighborhood, Property};

pub fn property_source_hash(property: &Property) -> String {
    let mut fields: BTreeMap<&str, Value> = BTreeMap::new();
    fields.insert("address", json!(property.address));
    fields.insert("city", json!(property.city));
    fields.insert("state_code", json!(property.state_code));
    fields.insert("zip_code", json!(property.zip_code));
    fields.insert("price", json!(property.price));
    fields.insert("bedrooms", json!(property.bedrooms));
    fields.insert("bathrooms", json!(property.bathrooms));
    fields.insert("square_feet", json!(property.square_feet));
    fields.insert("lot_size_sqft", json!(property.lot_size_sqft));
    fields.insert("year_built", json!(property.year_built));
    fields.insert("property_type", json!(property.property_type));
    fields.insert("description", json!(property.description));
    fields.insert("image_count", json!(property.images.len()));
    fields.insert("images", json!(property.images));
    digest(&fields)
}

pub fn neighborhood_source_hash(neighborhood: &Neighborhood) -> String {
    let mut fields: BTreeMap<&str, Value> = BTreeMap::new();
    fields.insert("name", json!(neighborhood.name));
    fields.insert("city", json!(neighborhood.city));
    fields.insert("state_code", json!(neighborhood.state_code));
    fields.insert("description", json!(neighborhood.description));
    digest(&fields)
}

/// Existing content is reused only when not forced and the stored hash
/// matches the fresh one.
pub fn should_skip(force: bool, stored_hash: Option<&str>, fresh_hash: &str) -> bool {
    !force && stored_hash == Some(fresh_hash)
}

fn digest(fields: &BTreeMap<&str, Value>) -> String {
    // Serializing a map of JSON values cannot fail.
    let canonical = serde_json::to_vec(fields).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}
