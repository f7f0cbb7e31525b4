//! Persisted record types
//!
//! Countries, cities and locations form the discovery hierarchy; leaf items
//! are the content records found inside a location. Offset and cache records
//! are per-location bookkeeping.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A record with a stable identity inside its table
pub trait Entity: Serialize + DeserializeOwned + Clone + PartialEq + std::fmt::Debug {
    /// The identity field; unique within the record's scope
    fn identity(&self) -> &str;
}

/// A country tag, identified by its code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Country {
    pub code: String,
    pub name: String,
    #[serde(rename = "sourceURL")]
    pub source_url: String,
}

impl Entity for Country {
    fn identity(&self) -> &str {
        &self.code
    }
}

/// A city discovered under a country
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct City {
    pub id: String,
    pub name: String,
    pub country_code: String,
    #[serde(rename = "sourceURL")]
    pub source_url: String,
}

impl Entity for City {
    fn identity(&self) -> &str {
        &self.id
    }
}

/// A location (leaf container) discovered under a city
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: String,
    pub name: String,
    pub city_id: String,
    #[serde(rename = "sourceURL")]
    pub source_url: String,
}

impl Entity for Location {
    fn identity(&self) -> &str {
        &self.id
    }
}

/// A content record found inside a location
///
/// The identity is the externally visible handle. Platforms that allow
/// handle reuse can make two distinct accounts collapse into one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafItem {
    pub external_id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub discovered_in_location_id: String,
}

impl Entity for LeafItem {
    fn identity(&self) -> &str {
        &self.external_id
    }
}

/// Resumption cursor for one leaf container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffsetRecord {
    pub entity_id: String,
    pub last_position: u64,
    pub cumulative_count: u64,
    pub last_updated_at: DateTime<Utc>,
}

/// Cached leaf results for one leaf container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub entity_id: String,
    pub payload: Vec<LeafItem>,
    pub cached_at: DateTime<Utc>,
}
