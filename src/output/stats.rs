//! Statistics generation from harvest storage
//!
//! This module provides the read-only administrative queries (unprocessed
//! entities per scope, parsing completion, cache health) and formats them
//! for `--stats`. Nothing here writes to storage.

use crate::state::RunReport;
use crate::storage::{
    CacheStats, City, Country, Entity, EntityStore, LeafItem, Location, OffsetTracker, ResultCache,
    Scope, StorageResult, TableStore,
};
use std::sync::Arc;

/// Completion of one hierarchy level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelProgress {
    /// Entities known at this level
    pub total: usize,

    /// Entities with at least one persisted child
    pub processed: usize,
}

impl LevelProgress {
    pub fn percent(&self) -> f64 {
        percent(self.processed, self.total)
    }

    pub fn unprocessed(&self) -> usize {
        self.total - self.processed
    }
}

/// Completion across the whole hierarchy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsingProgress {
    pub countries: LevelProgress,
    pub cities: LevelProgress,
    pub locations: LevelProgress,

    /// Leaf items persisted across every location
    pub leaf_items: usize,

    /// Locations with a committed offset
    pub locations_with_offset: usize,
}

impl ParsingProgress {
    /// Processed share over the three listing levels combined
    pub fn overall_percent(&self) -> f64 {
        let processed = self.countries.processed + self.cities.processed + self.locations.processed;
        let total = self.countries.total + self.cities.total + self.locations.total;
        percent(processed, total)
    }
}

/// Everything `--stats` prints
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    pub progress: ParsingProgress,
    pub cache: CacheStats,
    pub last_run: Option<RunReport>,
    pub storage: String,
}

/// Read-only view over the persisted harvest state
pub struct StatsReader {
    store: Arc<dyn TableStore>,
    entities: EntityStore,
    offsets: OffsetTracker,
    cache: ResultCache,
}

impl StatsReader {
    pub fn new(store: Arc<dyn TableStore>, cache_max_age_days: u32) -> Self {
        Self {
            entities: EntityStore::new(Arc::clone(&store)),
            offsets: OffsetTracker::new(Arc::clone(&store)),
            cache: ResultCache::with_max_age_days(Arc::clone(&store), cache_max_age_days),
            store,
        }
    }

    /// Countries without a single persisted city, including ones visited empty
    pub fn unprocessed_countries(&self) -> StorageResult<Vec<Country>> {
        let mut pending = Vec::new();
        for country in self.entities.load::<Country>(&Scope::Countries)? {
            if !self.has_children::<City>(&cities_scope(&country))? {
                pending.push(country);
            }
        }
        Ok(pending)
    }

    /// Cities of a country without a single persisted location
    pub fn unprocessed_cities(&self, country_code: &str) -> StorageResult<Vec<City>> {
        let scope = Scope::Cities {
            country_code: country_code.to_string(),
        };
        let mut pending = Vec::new();
        for city in self.entities.load::<City>(&scope)? {
            if !self.has_children::<Location>(&locations_scope(&city))? {
                pending.push(city);
            }
        }
        Ok(pending)
    }

    /// Locations of a city without a single persisted leaf item
    pub fn unprocessed_locations(&self, city: &City) -> StorageResult<Vec<Location>> {
        let mut pending = Vec::new();
        for location in self.entities.load::<Location>(&locations_scope(city))? {
            if !self.has_children::<LeafItem>(&leaf_scope(&location))? {
                pending.push(location);
            }
        }
        Ok(pending)
    }

    /// Walks the persisted hierarchy and counts processed entities per level
    pub fn parsing_progress(&self) -> StorageResult<ParsingProgress> {
        let mut progress = ParsingProgress::default();

        for country in self.entities.load::<Country>(&Scope::Countries)? {
            progress.countries.total += 1;
            let scope = cities_scope(&country);
            if !self.has_children::<City>(&scope)? {
                continue;
            }
            progress.countries.processed += 1;

            for city in self.entities.load::<City>(&scope)? {
                progress.cities.total += 1;
                let scope = locations_scope(&city);
                if !self.has_children::<Location>(&scope)? {
                    continue;
                }
                progress.cities.processed += 1;

                for location in self.entities.load::<Location>(&scope)? {
                    progress.locations.total += 1;
                    let items = self.entities.count::<LeafItem>(&leaf_scope(&location))?;
                    if items > 0 {
                        progress.locations.processed += 1;
                        progress.leaf_items += items;
                    }
                }
            }
        }

        progress.locations_with_offset = self.offsets.all()?.len();
        Ok(progress)
    }

    pub fn cache_stats(&self) -> StorageResult<CacheStats> {
        self.cache.stats()
    }

    /// Same rule the crawler resumes by: a visited-but-empty scope is pending
    fn has_children<E: Entity>(&self, scope: &Scope) -> StorageResult<bool> {
        Ok(self.entities.count::<E>(scope)? > 0)
    }
}

fn cities_scope(country: &Country) -> Scope {
    Scope::Cities {
        country_code: country.code.clone(),
    }
}

fn locations_scope(city: &City) -> Scope {
    Scope::Locations {
        city_id: city.id.clone(),
        city_name: city.name.clone(),
    }
}

fn leaf_scope(location: &Location) -> Scope {
    Scope::LeafItems {
        location_id: location.id.clone(),
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64) * 100.0
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `reader` - The read-only view to query
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(StorageError)` - Failed to read a table
pub fn load_statistics(reader: &StatsReader) -> StorageResult<HarvestStatistics> {
    Ok(HarvestStatistics {
        progress: reader.parsing_progress()?,
        cache: reader.cache_stats()?,
        last_run: RunReport::load_last(reader.store.as_ref())?,
        storage: reader.store.describe(),
    })
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");
    println!("Storage: {}\n", stats.storage);

    let progress = &stats.progress;
    println!("Parsing Progress:");
    for (name, level) in [
        ("Countries", progress.countries),
        ("Cities", progress.cities),
        ("Locations", progress.locations),
    ] {
        println!(
            "  {:<10} {:>6} / {:<6} processed ({:.1}%), {} pending",
            name,
            level.processed,
            level.total,
            level.percent(),
            level.unprocessed()
        );
    }
    println!("  Leaf items: {}", progress.leaf_items);
    println!("  Locations with a saved offset: {}", progress.locations_with_offset);
    println!("  Overall: {:.1}%", progress.overall_percent());
    println!();

    let cache = &stats.cache;
    println!("Result Cache:");
    println!(
        "  Records: {} ({} fresh, {} stale, {} unreadable)",
        cache.total(),
        cache.fresh,
        cache.stale,
        cache.unreadable
    );
    println!("  Cached leaf items: {}", cache.fresh_items);
    if let Some(oldest) = cache.oldest_fresh {
        println!("  Oldest fresh record: {}", oldest.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!();

    match &stats.last_run {
        Some(run) => {
            println!("Last Run:");
            println!("  Started: {}", run.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
            if let Some(finished) = run.finished_at {
                let duration = finished - run.started_at;
                println!("  Duration: {}s", duration.num_seconds());
            }
            println!("  Status: {}", run.status);
            println!(
                "  Mode: {}",
                if run.authenticated { "authenticated" } else { "guest" }
            );
            if let Some(halt) = &run.halt {
                println!("  Halted: {}", halt);
            }
            println!(
                "  Added: {} countries, {} cities, {} locations, {} leaf items",
                run.countries.added, run.cities.added, run.locations.added, run.leaf_items.added
            );
            println!(
                "  Requests: {} ({} cooldowns, {} emergency breaks, {} cache hits)",
                run.requests, run.cooldowns, run.emergency_breaks, run.cache_hits
            );
            if !run.issues.is_empty() {
                println!("  Branch issues ({}):", run.issues.len());
                for issue in &run.issues {
                    match issue.page {
                        Some(page) => println!(
                            "    - {:?} at {} page {}: {}",
                            issue.kind, issue.scope, page, issue.detail
                        ),
                        None => {
                            println!("    - {:?} at {}: {}", issue.kind, issue.scope, issue.detail)
                        }
                    }
                }
            }
        }
        None => println!("No run recorded yet."),
    }
}
