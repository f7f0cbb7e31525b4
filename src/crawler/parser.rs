//! Structured extraction from listing pages
//!
//! This module turns rendered listing markup into raw records:
//! - One record per element matching the level's `item` selector
//! - Named fields read from text or attributes, relative to the item
//! - Optional capture regex to cut an identifier out of a URL or label
//!
//! Raw records are then mapped onto the typed entities of each level.

use crate::config::{ExtractSpec, FieldSpec};
use crate::crawler::fetcher::FetchError;
use crate::storage::{City, Country, LeafItem, Location};
use crate::url::resolve_link;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use url::Url;

/// Field name to extracted value
pub type RawRecord = BTreeMap<String, String>;

/// Optional field holding an entity's own page
pub const URL_FIELD: &str = "url";

/// Extracts every record described by `spec` from an HTML document
///
/// Attributes named `href` or `src` are resolved against `base_url`. Fields
/// whose element, attribute or capture is missing are left out of the record;
/// items yielding no fields at all are dropped.
///
/// # Arguments
///
/// * `html` - The rendered page content
/// * `spec` - Item and field selectors for this level
/// * `base_url` - The page URL, for resolving relative links
///
/// # Returns
///
/// * `Ok(Vec<RawRecord>)` - Records in document order
/// * `Err(FetchError::Extraction)` - A selector or regex failed to compile
pub fn extract_records(
    html: &str,
    spec: &ExtractSpec,
    base_url: &Url,
) -> Result<Vec<RawRecord>, FetchError> {
    let document = Html::parse_document(html);
    let item_selector = parse_selector(&spec.item)?;

    let fields = spec
        .fields
        .iter()
        .map(|(name, field)| CompiledField::compile(name, field))
        .collect::<Result<Vec<_>, _>>()?;

    let records = document
        .select(&item_selector)
        .map(|item| {
            fields
                .iter()
                .filter_map(|field| {
                    field
                        .read(item, base_url)
                        .map(|value| (field.name.clone(), value))
                })
                .collect::<RawRecord>()
        })
        .filter(|record| !record.is_empty())
        .collect();

    Ok(records)
}

fn parse_selector(selector: &str) -> Result<Selector, FetchError> {
    Selector::parse(selector)
        .map_err(|e| FetchError::Extraction(format!("invalid selector '{}': {}", selector, e)))
}

struct CompiledField {
    name: String,
    selector: Option<Selector>,
    attribute: Option<String>,
    capture: Option<Regex>,
}

impl CompiledField {
    fn compile(name: &str, spec: &FieldSpec) -> Result<Self, FetchError> {
        let selector = if spec.selector.trim().is_empty() {
            None
        } else {
            Some(parse_selector(&spec.selector)?)
        };

        let capture = spec
            .capture
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    FetchError::Extraction(format!("invalid capture for {}: {}", name, e))
                })
            })
            .transpose()?;

        Ok(Self {
            name: name.to_string(),
            selector,
            attribute: spec.attribute.clone(),
            capture,
        })
    }

    fn read(&self, item: ElementRef<'_>, base_url: &Url) -> Option<String> {
        let element = match &self.selector {
            Some(selector) => item.select(selector).next()?,
            None => item,
        };

        let raw = match self.attribute.as_deref() {
            Some(attr @ ("href" | "src")) => {
                let href = element.value().attr(attr)?;
                resolve_link(href, base_url).unwrap_or_else(|| href.trim().to_string())
            }
            Some(attr) => element.value().attr(attr)?.trim().to_string(),
            None => collapse_whitespace(&element.text().collect::<String>()),
        };

        let value = match &self.capture {
            Some(regex) => regex.captures(&raw)?.get(1)?.as_str().to_string(),
            None => raw,
        };

        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn source_url(record: &RawRecord, page_url: &str) -> String {
    record
        .get(URL_FIELD)
        .cloned()
        .unwrap_or_else(|| page_url.to_string())
}

/// Maps a raw record onto a country (needs `code` and `name`)
pub fn to_country(record: &RawRecord, page_url: &str) -> Option<Country> {
    Some(Country {
        code: record.get("code")?.clone(),
        name: record.get("name")?.clone(),
        source_url: source_url(record, page_url),
    })
}

/// Maps a raw record onto a city of `country_code` (needs `id` and `name`)
pub fn to_city(record: &RawRecord, country_code: &str, page_url: &str) -> Option<City> {
    Some(City {
        id: record.get("id")?.clone(),
        name: record.get("name")?.clone(),
        country_code: country_code.to_string(),
        source_url: source_url(record, page_url),
    })
}

/// Maps a raw record onto a location of `city_id` (needs `id` and `name`)
pub fn to_location(record: &RawRecord, city_id: &str, page_url: &str) -> Option<Location> {
    Some(Location {
        id: record.get("id")?.clone(),
        name: record.get("name")?.clone(),
        city_id: city_id.to_string(),
        source_url: source_url(record, page_url),
    })
}

/// Maps a raw record onto a leaf item; every field but `external_id` becomes an attribute
pub fn to_leaf_item(record: &RawRecord, location_id: &str) -> Option<LeafItem> {
    let external_id = record.get("external_id")?.clone();
    let attributes = record
        .iter()
        .filter(|(key, _)| key.as_str() != "external_id")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Some(LeafItem {
        external_id,
        attributes,
        discovered_in_location_id: location_id.to_string(),
    })
}
