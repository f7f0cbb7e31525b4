//! Hierarchy crawler - main traversal orchestration
//!
//! This module drives the country → city → location → leaf item traversal:
//! - Deciding the session mode through the session gate
//! - Paginating each listing level until a page adds nothing new
//! - Gating every fetch on the throttle governor and the pacing simulator
//! - Merging results, committing leaf offsets, and refreshing the cache
//! - Applying the failure policy and producing a run report
//!
//! Everything the crawler learns is merged before it moves on, so a run can
//! be killed at any suspension point and resumed by the next one.

use crate::config::{Config, LevelConfig};
use crate::crawler::classify::{MarkerClassifier, ResponseClass, ResponseClassifier};
use crate::crawler::fetcher::FetchSession;
use crate::crawler::pacing::PacingSimulator;
use crate::crawler::parser::{to_city, to_country, to_leaf_item, to_location, RawRecord};
use crate::crawler::suspend::Suspender;
use crate::crawler::throttle::ThrottleGovernor;
use crate::session::{SessionError, SessionGate, SessionMode};
use crate::state::{CrawlPhase, HaltReason, IssueKind, LevelTally, RunReport};
use crate::storage::{
    City, Country, Entity, EntityStore, LeafItem, Location, OffsetTracker, ResultCache, Scope,
    TableStore,
};
use crate::url::expand_template;
use crate::{HarvestError, Result};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Per-run traversal options
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    /// Re-enumerate every parent even if it already has persisted children
    pub fresh: bool,

    /// Restrict the run to these country codes (all when empty)
    pub countries: Vec<String>,
}

impl CrawlOptions {
    fn includes(&self, code: &str) -> bool {
        self.countries.is_empty() || self.countries.iter().any(|c| c.eq_ignore_ascii_case(code))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Countries,
    Cities,
    Locations,
    LeafItems,
}

/// What one page fetch produced
enum PageOutcome {
    Records {
        records: Vec<RawRecord>,
        page_url: String,
    },
    EndOfData,
    Blocked,
    Skipped,
}

/// Resumable hierarchical crawler
pub struct HierarchyCrawler {
    config: Arc<Config>,
    config_hash: String,
    store: Arc<dyn TableStore>,
    entities: EntityStore,
    offsets: OffsetTracker,
    cache: ResultCache,
    gate: SessionGate,
    governor: ThrottleGovernor,
    pacing: PacingSimulator,
    pacing_seed: Option<u64>,
    suspender: Suspender,
    classifier: Box<dyn ResponseClassifier>,
    phase: CrawlPhase,
    report: RunReport,
    consecutive_blocks: u32,
    mode: SessionMode,
}

impl HierarchyCrawler {
    /// Creates a crawler over an opened table backend
    ///
    /// # Arguments
    ///
    /// * `config` - The validated configuration
    /// * `config_hash` - Hash of the configuration file, recorded in reports
    /// * `store` - Table backend shared by the entity store, offsets and cache
    pub fn new(config: Config, config_hash: &str, store: Arc<dyn TableStore>) -> Self {
        let cache =
            ResultCache::with_max_age_days(Arc::clone(&store), config.storage.cache_max_age_days);
        let gate = SessionGate::new(&config.session, config.crawler.allow_guest);
        let classifier = Box::new(MarkerClassifier::new(&config.platform));

        Self {
            governor: ThrottleGovernor::new(&config.throttle),
            pacing: PacingSimulator::new(&config.pacing),
            pacing_seed: None,
            entities: EntityStore::new(Arc::clone(&store)),
            offsets: OffsetTracker::new(Arc::clone(&store)),
            cache,
            gate,
            store,
            suspender: Suspender::default(),
            classifier,
            phase: CrawlPhase::Idle,
            report: RunReport::new(config_hash),
            consecutive_blocks: 0,
            mode: SessionMode::Guest,
            config_hash: config_hash.to_string(),
            config: Arc::new(config),
        }
    }

    /// Uses a suspender whose token the caller can cancel
    pub fn with_suspender(mut self, suspender: Suspender) -> Self {
        self.suspender = suspender;
        self
    }

    /// Replaces the block/auth detection strategy
    pub fn with_classifier(mut self, classifier: Box<dyn ResponseClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Makes pacing delays reproducible
    pub fn with_pacing_seed(mut self, seed: u64) -> Self {
        self.pacing_seed = Some(seed);
        self
    }

    pub fn phase(&self) -> &CrawlPhase {
        &self.phase
    }

    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    pub fn offsets(&self) -> &OffsetTracker {
        &self.offsets
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn session_gate(&self) -> &SessionGate {
        &self.gate
    }

    /// Runs one traversal and returns its report
    ///
    /// Branch-level problems (blocks, transient failures, auth walls) are
    /// recorded in the report and never fail the call. Cancellation, a closed
    /// transport, and persistent blocking end the run early with a halt
    /// reason. Only storage and URL errors are returned as `Err`.
    pub async fn run(
        &mut self,
        session: &mut dyn FetchSession,
        options: &CrawlOptions,
    ) -> Result<RunReport> {
        self.reset_run_state();
        tracing::info!("Starting harvest run (config {})", short_hash(&self.config_hash));

        match self.gate.ensure_session(session).await {
            Ok(status) => {
                self.mode = status.mode;
                self.report.authenticated = status.authenticated;
                tracing::info!("Traversing in {} mode", status.mode.as_str());
            }
            Err(SessionError::ManualAuthRequired) => {
                tracing::warn!("No usable session and guest traversal is disabled");
                return self.conclude(Some(HaltReason::AuthRequired));
            }
            Err(SessionError::Fetch(e)) if e.is_fatal() => {
                tracing::error!("Fetch session closed during session validation: {}", e);
                return self.conclude(Some(HaltReason::TransportClosed(e.to_string())));
            }
            Err(e) => return Err(e.into()),
        }

        let halt = match self.traverse(session, options).await {
            Ok(()) => None,
            Err(HarvestError::Cancelled) => Some(HaltReason::Cancelled),
            Err(HarvestError::TransportClosed(message)) => {
                tracing::error!("Fetch session closed, ending run: {}", message);
                Some(HaltReason::TransportClosed(message))
            }
            Err(HarvestError::PersistentBlock { scope }) => {
                tracing::error!("Blocking persisted through {}, abandoning run", scope);
                Some(HaltReason::PersistentBlock)
            }
            Err(e) => {
                self.phase = CrawlPhase::Error(e.to_string());
                return Err(e);
            }
        };

        let transport_lost = matches!(halt, Some(HaltReason::TransportClosed(_)));
        if self.mode == SessionMode::Authenticated && !transport_lost {
            if let Err(e) = self.gate.refresh(session) {
                tracing::warn!("Failed to refresh stored session: {}", e);
            }
        }

        self.conclude(halt)
    }

    /// URLs the next run would start from, without fetching anything
    pub fn planned_urls(&self, options: &CrawlOptions) -> Result<Vec<String>> {
        let levels = &self.config.levels;
        let mut urls = vec![page_url(&levels.countries, &[], 1)?.to_string()];

        for country in self.entities.load::<Country>(&Scope::Countries)? {
            if !options.includes(&country.code) {
                continue;
            }
            let cities_url = page_url(&levels.cities, &[("country", country.code.clone())], 1)?;
            urls.push(cities_url.to_string());

            let cities_scope = Scope::Cities {
                country_code: country.code.clone(),
            };
            for city in self.entities.load::<City>(&cities_scope)? {
                let locations_url = page_url(&levels.locations, &[("city", city.id.clone())], 1)?;
                urls.push(locations_url.to_string());

                let locations_scope = Scope::Locations {
                    city_id: city.id.clone(),
                    city_name: city.name.clone(),
                };
                for location in self.entities.load::<Location>(&locations_scope)? {
                    let offset = self.offsets.get_offset(&location.id)?;
                    let url = expand_template(
                        &levels.leaf_items.url,
                        &[("location", location.id.clone()), ("offset", offset.to_string())],
                    )?;
                    urls.push(url.to_string());
                }
            }
        }

        Ok(urls)
    }

    fn reset_run_state(&mut self) {
        self.governor = ThrottleGovernor::new(&self.config.throttle);
        self.pacing = match self.pacing_seed {
            Some(seed) => PacingSimulator::with_seed(&self.config.pacing, seed),
            None => PacingSimulator::new(&self.config.pacing),
        };
        self.report = RunReport::new(&self.config_hash);
        self.consecutive_blocks = 0;
        self.mode = SessionMode::Guest;
        self.phase = CrawlPhase::Idle;
    }

    fn conclude(&mut self, halt: Option<HaltReason>) -> Result<RunReport> {
        let stats = self.governor.stats();
        self.report.requests = stats.total;
        self.report.cooldowns = stats.cooldowns_triggered;
        self.report.emergency_breaks = self.pacing.emergency_breaks();
        self.report.halt = halt;
        self.report.finish();

        self.phase = match &self.report.halt {
            Some(reason @ HaltReason::TransportClosed(_)) => CrawlPhase::Error(reason.to_string()),
            _ => CrawlPhase::Idle,
        };

        self.report.save(self.store.as_ref())?;
        tracing::info!(
            "Run {}: {} new record(s), {} request(s), {} cache hit(s), {} branch issue(s)",
            self.report.status,
            self.report.total_added(),
            self.report.requests,
            self.report.cache_hits,
            self.report.issues.len()
        );
        Ok(self.report.clone())
    }

    async fn traverse(
        &mut self,
        session: &mut dyn FetchSession,
        options: &CrawlOptions,
    ) -> Result<()> {
        let config = Arc::clone(&self.config);

        self.phase = CrawlPhase::DiscoveringCountries;
        let countries_scope = Scope::Countries;
        if self.needs_enumeration::<Country>(&countries_scope, options.fresh)? {
            self.discover(
                session,
                Level::Countries,
                &config.levels.countries,
                &countries_scope,
                &[],
                |record, url| to_country(record, url),
            )
            .await?;
        } else {
            tracing::info!("Countries already enumerated, resuming below them");
        }

        let countries: Vec<Country> = self
            .entities
            .load::<Country>(&countries_scope)?
            .into_iter()
            .filter(|c| options.includes(&c.code))
            .collect();
        tracing::info!("{} country(ies) to traverse", countries.len());

        for (i, country) in countries.iter().enumerate() {
            if i > 0 {
                self.pacing.sibling_pause(&self.suspender).await?;
            }
            let result = self.crawl_country(session, country, options).await;
            self.contain_branch(result, &country.code)?;
        }

        self.phase = CrawlPhase::Idle;
        Ok(())
    }

    async fn crawl_country(
        &mut self,
        session: &mut dyn FetchSession,
        country: &Country,
        options: &CrawlOptions,
    ) -> Result<()> {
        let config = Arc::clone(&self.config);
        self.phase = CrawlPhase::DiscoveringCities {
            country: country.code.clone(),
        };

        let scope = Scope::Cities {
            country_code: country.code.clone(),
        };
        if self.needs_enumeration::<City>(&scope, options.fresh)? {
            let code = country.code.clone();
            self.discover(
                session,
                Level::Cities,
                &config.levels.cities,
                &scope,
                &[("country", country.code.clone())],
                move |record, url| to_city(record, &code, url),
            )
            .await?;
        }

        let cities = self.entities.load::<City>(&scope)?;
        for (i, city) in cities.iter().enumerate() {
            if i > 0 {
                self.pacing.sibling_pause(&self.suspender).await?;
            }
            let result = self.crawl_city(session, city, options).await;
            self.contain_branch(result, &city.id)?;
        }
        Ok(())
    }

    async fn crawl_city(
        &mut self,
        session: &mut dyn FetchSession,
        city: &City,
        options: &CrawlOptions,
    ) -> Result<()> {
        let config = Arc::clone(&self.config);
        self.phase = CrawlPhase::DiscoveringLocations {
            city: city.id.clone(),
        };

        let scope = Scope::Locations {
            city_id: city.id.clone(),
            city_name: city.name.clone(),
        };
        if self.needs_enumeration::<Location>(&scope, options.fresh)? {
            let city_id = city.id.clone();
            self.discover(
                session,
                Level::Locations,
                &config.levels.locations,
                &scope,
                &[("city", city.id.clone())],
                move |record, url| to_location(record, &city_id, url),
            )
            .await?;
        }

        let locations = self.entities.load::<Location>(&scope)?;
        for (i, location) in locations.iter().enumerate() {
            if i > 0 {
                self.pacing.sibling_pause(&self.suspender).await?;
            }
            let result = self.crawl_location(session, location).await;
            self.contain_branch(result, &location.id)?;
        }
        Ok(())
    }

    /// Leaf level: cache first, then offset-driven batches
    async fn crawl_location(
        &mut self,
        session: &mut dyn FetchSession,
        location: &Location,
    ) -> Result<()> {
        let config = Arc::clone(&self.config);
        let level = &config.levels.leaf_items;
        self.phase = CrawlPhase::FetchingLeafItems {
            location: location.id.clone(),
        };

        let scope = Scope::LeafItems {
            location_id: location.id.clone(),
        };

        if let Some(items) = self.cache.get(&location.id)? {
            tracing::debug!("Cache hit for location {} ({} items)", location.id, items.len());
            self.report.cache_hits += 1;
            let outcome = self.entities.merge(&scope, items)?;
            self.tally(Level::LeafItems).added += outcome.added;
            return Ok(());
        }

        if !self.level_allowed(level, &scope) {
            return Ok(());
        }

        let mut offset = self.offsets.get_offset(&location.id)?;
        let mut cumulative = match self.offsets.get_stats(&location.id)? {
            Some((count, _)) => count,
            None => offset,
        };
        let mut exhausted = false;

        for batch in 1..=config.crawler.leaf_batch_limit {
            let url = expand_template(
                &level.url,
                &[("location", location.id.clone()), ("offset", offset.to_string())],
            )?;

            let records = match self.fetch_page(session, &url, &scope, batch).await? {
                PageOutcome::Records { records, .. } => records,
                PageOutcome::EndOfData => {
                    exhausted = true;
                    break;
                }
                PageOutcome::Blocked | PageOutcome::Skipped => break,
            };
            self.tally(Level::LeafItems).pages_fetched += 1;

            let items: Vec<LeafItem> = records
                .iter()
                .filter_map(|r| to_leaf_item(r, &location.id))
                .collect();
            let outcome = self.entities.merge(&scope, items)?;
            self.tally(Level::LeafItems).added += outcome.added;

            if outcome.added == 0 {
                exhausted = true;
                break;
            }

            // Merge is durable; only now does the cursor move
            offset += outcome.added as u64;
            cumulative += outcome.added as u64;
            self.offsets.save_offset(&location.id, offset, cumulative)?;
            tracing::debug!(
                "Location {} batch {}: +{} item(s), offset now {}",
                location.id,
                batch,
                outcome.added,
                offset
            );
        }

        if exhausted {
            let items = self.entities.load::<LeafItem>(&scope)?;
            if items.is_empty() {
                // An empty page may have been a soft block; retry next run
                tracing::info!("Location {} returned no items, leaving it uncached", location.id);
            } else {
                tracing::info!("Location {} exhausted with {} item(s)", location.id, items.len());
                self.cache.put(&location.id, items)?;
            }
        }

        Ok(())
    }

    /// Records a branch-local failure so the caller moves on to the next sibling
    fn contain_branch(&mut self, result: Result<()>, branch: &str) -> Result<()> {
        match result {
            Err(e) if e.is_branch_local() => {
                tracing::warn!("{}, moving to the next sibling", e);
                let scope = match e {
                    HarvestError::AuthRequired { scope } => scope,
                    _ => branch.to_string(),
                };
                self.report
                    .record_issue(IssueKind::AuthRequired, &scope, None, "login wall");
                Ok(())
            }
            other => other,
        }
    }

    /// Pages through one listing until a page adds nothing or the cap is hit
    async fn discover<E, F>(
        &mut self,
        session: &mut dyn FetchSession,
        level_kind: Level,
        level: &LevelConfig,
        scope: &Scope,
        params: &[(&str, String)],
        map: F,
    ) -> Result<()>
    where
        E: Entity,
        F: Fn(&RawRecord, &str) -> Option<E>,
    {
        if !self.level_allowed(level, scope) {
            return Ok(());
        }

        let mut visited = false;
        for page in 1..=self.config.crawler.page_cap {
            let url = page_url(level, params, page)?;
            let (records, listing_url) = match self.fetch_page(session, &url, scope, page).await? {
                PageOutcome::Records { records, page_url } => (records, page_url),
                PageOutcome::EndOfData => break,
                PageOutcome::Blocked | PageOutcome::Skipped => return Ok(()),
            };
            self.tally(level_kind).pages_fetched += 1;

            let candidates: Vec<E> = records.iter().filter_map(|r| map(r, &listing_url)).collect();
            if candidates.len() < records.len() {
                tracing::debug!(
                    "{} page {}: {} record(s) lacked identity fields",
                    scope.label(),
                    page,
                    records.len() - candidates.len()
                );
            }

            let outcome = self.entities.merge(scope, candidates)?;
            visited = true;
            self.tally(level_kind).added += outcome.added;
            tracing::debug!(
                "{} page {}: +{} (total {})",
                scope.label(),
                page,
                outcome.added,
                outcome.total
            );

            if outcome.added == 0 {
                break;
            }
            if page == self.config.crawler.page_cap {
                tracing::warn!("{} reached the page cap of {}", scope.label(), page);
            }
        }

        if visited {
            tracing::info!(
                "{}: {} record(s) persisted",
                scope.label(),
                self.entities.count::<E>(scope)?
            );
        }
        Ok(())
    }

    /// Gates, issues and classifies one fetch
    async fn fetch_page(
        &mut self,
        session: &mut dyn FetchSession,
        url: &Url,
        scope: &Scope,
        page: u32,
    ) -> Result<PageOutcome> {
        self.suspender.check()?;
        self.pre_fetch_pauses().await?;
        self.pacing.smart_delay(&self.suspender).await?;

        self.governor.record_request();
        self.pacing.record_arrival();

        let rendered = match session.navigate(url.as_str()).await {
            Ok(rendered) => rendered,
            Err(e) if e.is_fatal() => return Err(HarvestError::TransportClosed(e.to_string())),
            Err(e) => {
                tracing::warn!(
                    "{} page {}: {} error, skipping: {}",
                    scope.label(),
                    page,
                    e.class(),
                    e
                );
                self.report
                    .record_issue(IssueKind::Transient, &scope.label(), Some(page), &e.to_string());
                return Ok(PageOutcome::Skipped);
            }
        };

        match self.classifier.classify(&rendered) {
            ResponseClass::Ok => {}
            ResponseClass::NotFound => {
                tracing::debug!(
                    "{} page {}: not found, treating as end of data",
                    scope.label(),
                    page
                );
                self.consecutive_blocks = 0;
                return Ok(PageOutcome::EndOfData);
            }
            ResponseClass::AuthRequired => {
                return Err(HarvestError::AuthRequired {
                    scope: scope.label(),
                });
            }
            ResponseClass::Blocked => return self.handle_block(scope, page).await,
        }
        self.consecutive_blocks = 0;

        match session.extract_structured(&self.level_for(scope).extract) {
            Ok(records) => Ok(PageOutcome::Records {
                records,
                page_url: rendered.final_url,
            }),
            Err(e) if e.is_fatal() => Err(HarvestError::TransportClosed(e.to_string())),
            Err(e) => {
                tracing::warn!("{} page {}: {}", scope.label(), page, e);
                self.report
                    .record_issue(IssueKind::Transient, &scope.label(), Some(page), &e.to_string());
                Ok(PageOutcome::Skipped)
            }
        }
    }

    /// Cooldown, emergency break and technical break, in that order
    ///
    /// The phase reads `Cooldown` only while one of them is actually pausing.
    async fn pre_fetch_pauses(&mut self) -> Result<bool> {
        let pending_break = self.pacing.roll_break();
        if !self.governor.should_cooldown()
            && !self.pacing.is_suspicious()
            && pending_break.is_none()
        {
            return Ok(false);
        }

        let previous = std::mem::replace(&mut self.phase, CrawlPhase::Cooldown);
        self.governor.cooldown_if_needed(&self.suspender).await?;
        self.pacing.emergency_break_if_flagged(&self.suspender).await?;
        if let Some((kind, duration)) = pending_break {
            tracing::debug!("Taking a {} break of {}s", kind.as_str(), duration.as_secs());
            self.suspender.pause(duration, kind.as_str()).await?;
        }
        self.phase = previous;
        Ok(true)
    }

    async fn handle_block(&mut self, scope: &Scope, page: u32) -> Result<PageOutcome> {
        self.consecutive_blocks += 1;
        tracing::warn!(
            "{} page {}: block marker detected ({} in a row), leaving branch for a later run",
            scope.label(),
            page,
            self.consecutive_blocks
        );
        self.report
            .record_issue(IssueKind::Blocked, &scope.label(), Some(page), "block marker");

        if self.consecutive_blocks >= self.config.crawler.max_consecutive_blocks {
            return Err(HarvestError::PersistentBlock {
                scope: scope.label(),
            });
        }

        let previous = std::mem::replace(&mut self.phase, CrawlPhase::Cooldown);
        self.suspender
            .pause(
                Duration::from_secs(self.config.crawler.forced_pause_secs),
                "forced pause after block",
            )
            .await?;
        self.phase = previous;
        Ok(PageOutcome::Blocked)
    }

    /// Entities with no persisted children are (re)enumerated
    fn needs_enumeration<E: Entity>(&self, scope: &Scope, fresh: bool) -> Result<bool> {
        if fresh {
            return Ok(true);
        }
        let count = self.entities.count::<E>(scope)?;
        if count == 0 && self.entities.exists(scope)? {
            tracing::info!("{} was empty last time, retrying", scope.label());
        }
        Ok(count == 0)
    }

    /// Auth-only levels are skipped, and recorded, in guest mode
    fn level_allowed(&mut self, level: &LevelConfig, scope: &Scope) -> bool {
        if level.requires_auth && self.mode == SessionMode::Guest {
            tracing::debug!("{} requires authentication, skipped in guest mode", scope.label());
            self.report.record_issue(
                IssueKind::AuthRequired,
                &scope.label(),
                None,
                "level requires an authenticated session",
            );
            return false;
        }
        true
    }

    fn level_for(&self, scope: &Scope) -> &LevelConfig {
        let levels = &self.config.levels;
        match scope {
            Scope::Countries => &levels.countries,
            Scope::Cities { .. } => &levels.cities,
            Scope::Locations { .. } => &levels.locations,
            Scope::LeafItems { .. } => &levels.leaf_items,
        }
    }

    fn tally(&mut self, level: Level) -> &mut LevelTally {
        match level {
            Level::Countries => &mut self.report.countries,
            Level::Cities => &mut self.report.cities,
            Level::Locations => &mut self.report.locations,
            Level::LeafItems => &mut self.report.leaf_items,
        }
    }
}

fn page_url(level: &LevelConfig, params: &[(&str, String)], page: u32) -> Result<Url> {
    let mut values = params.to_vec();
    values.push(("page", page.to_string()));
    Ok(expand_template(&level.url, &values)?)
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CrawlerConfig, DelayWindow, ExtractSpec, LevelsConfig, PacingConfig, PlatformConfig,
        SessionConfig, StorageBackend, StorageConfig, ThrottleConfig,
    };
    use crate::crawler::fetcher::{FetchError, HttpFetchSession, RenderedPage};
    use crate::session::SessionCookie;
    use crate::state::RunStatus;
    use crate::storage::{JsonTableStore, SqliteTableStore};
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashMap};
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    const COUNTRIES: &str = "https://platform.example/countries/?page={page}";
    const CITIES: &str = "https://platform.example/countries/{country}/?page={page}";
    const LOCATIONS: &str = "https://platform.example/cities/{city}/?page={page}";
    const LEAF: &str = "https://platform.example/locations/{location}/?offset={offset}";

    enum Scripted {
        Records(Vec<RawRecord>),
        Page(u16, &'static str),
        Timeout,
        Closed,
    }

    /// Fetch session replaying scripted responses; unknown URLs are empty pages
    struct ScriptedSession {
        script: HashMap<String, Scripted>,
        current: Option<String>,
        visited: Vec<String>,
        cancel_on: Option<(String, CancellationToken)>,
    }

    impl ScriptedSession {
        fn new() -> Self {
            Self {
                script: HashMap::new(),
                current: None,
                visited: Vec::new(),
                cancel_on: None,
            }
        }

        fn on(mut self, url: &str, response: Scripted) -> Self {
            self.script.insert(url.to_string(), response);
            self
        }

        fn visits_to(&self, prefix: &str) -> usize {
            self.visited.iter().filter(|u| u.starts_with(prefix)).count()
        }
    }

    #[async_trait]
    impl FetchSession for ScriptedSession {
        async fn navigate(&mut self, url: &str) -> std::result::Result<RenderedPage, FetchError> {
            self.visited.push(url.to_string());
            if let Some((trigger, token)) = &self.cancel_on {
                if trigger == url {
                    token.cancel();
                }
            }

            let (status, content) = match self.script.get(url) {
                Some(Scripted::Timeout) => {
                    return Err(FetchError::Timeout {
                        url: url.to_string(),
                    })
                }
                Some(Scripted::Closed) => {
                    return Err(FetchError::SessionClosed("browser exited".to_string()))
                }
                Some(Scripted::Page(status, content)) => (*status, content.to_string()),
                Some(Scripted::Records(_)) | None => (200, String::new()),
            };
            self.current = Some(url.to_string());
            Ok(RenderedPage {
                final_url: url.to_string(),
                status: Some(status),
                content,
            })
        }

        fn extract_structured(
            &self,
            _spec: &ExtractSpec,
        ) -> std::result::Result<Vec<RawRecord>, FetchError> {
            Ok(match self.current.as_ref().and_then(|u| self.script.get(u)) {
                Some(Scripted::Records(records)) => records.clone(),
                _ => Vec::new(),
            })
        }

        fn current_url(&self) -> Option<String> {
            self.current.clone()
        }

        fn install_cookies(
            &mut self,
            _cookies: &[SessionCookie],
        ) -> std::result::Result<(), FetchError> {
            Ok(())
        }

        fn export_cookies(&self) -> Vec<SessionCookie> {
            Vec::new()
        }

        fn clear_cookies(&mut self) -> std::result::Result<(), FetchError> {
            Ok(())
        }
    }

    fn record(fields: &[(&str, &str)]) -> RawRecord {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn countries(codes: &[&str]) -> Scripted {
        Scripted::Records(codes.iter().map(|c| record(&[("code", c), ("name", c)])).collect())
    }

    fn named(ids: &[&str]) -> Scripted {
        Scripted::Records(ids.iter().map(|id| record(&[("id", id), ("name", id)])).collect())
    }

    fn leaf(ids: &[&str]) -> Scripted {
        Scripted::Records(ids.iter().map(|id| record(&[("external_id", id)])).collect())
    }

    fn level(url: &str) -> LevelConfig {
        LevelConfig {
            url: url.to_string(),
            requires_auth: false,
            extract: ExtractSpec {
                item: "li".to_string(),
                fields: BTreeMap::new(),
            },
        }
    }

    fn test_config(dir: &tempfile::TempDir) -> Config {
        let zero = DelayWindow::new(0, 0);
        Config {
            crawler: CrawlerConfig {
                page_cap: 10,
                leaf_batch_limit: 5,
                allow_guest: true,
                forced_pause_secs: 600,
                max_consecutive_blocks: 3,
            },
            throttle: ThrottleConfig {
                request_threshold: 1_000,
                cooldown_secs: 300,
            },
            pacing: PacingConfig {
                night: zero,
                morning: zero,
                day: zero,
                evening: zero,
                sibling: zero,
                break_probability: 0.0,
                min_interval_ms: 0,
                burst_window_secs: 60,
                burst_ceiling: 10_000,
                emergency_pause_secs: 60,
            },
            session: SessionConfig {
                path: dir.path().join("session.json").to_string_lossy().to_string(),
                stale_after_hours: 24,
                probe_url: "https://platform.example/accounts/edit/".to_string(),
                fallback_probe_url: None,
                active_markers: vec![],
            },
            storage: StorageConfig {
                data_dir: dir.path().to_string_lossy().to_string(),
                backend: StorageBackend::Json,
                cache_max_age_days: 7,
            },
            platform: PlatformConfig {
                user_agent: "test".to_string(),
                timeout_secs: 5,
                block_markers: vec!["Please wait a few minutes".to_string()],
                auth_markers: vec!["Log in to continue".to_string()],
                not_found_markers: vec![],
            },
            levels: LevelsConfig {
                countries: level(COUNTRIES),
                cities: level(CITIES),
                locations: level(LOCATIONS),
                leaf_items: level(LEAF),
            },
        }
    }

    fn crawler(config: Config, store: Arc<dyn TableStore>) -> HierarchyCrawler {
        HierarchyCrawler::new(config, "0123456789abcdef", store).with_pacing_seed(42)
    }

    fn memory() -> Arc<dyn TableStore> {
        Arc::new(SqliteTableStore::new_in_memory().unwrap())
    }

    fn country_url(page: u32) -> String {
        COUNTRIES.replace("{page}", &page.to_string())
    }

    /// Seeds UA → c1 → location 42 so a resumed run goes straight to the leaf level
    fn seed_hierarchy(entities: &EntityStore) {
        entities
            .merge(
                &Scope::Countries,
                vec![Country {
                    code: "UA".to_string(),
                    name: "Ukraine".to_string(),
                    source_url: country_url(1),
                }],
            )
            .unwrap();
        entities
            .merge(
                &Scope::Cities {
                    country_code: "UA".to_string(),
                },
                vec![City {
                    id: "c1".to_string(),
                    name: "Kyiv".to_string(),
                    country_code: "UA".to_string(),
                    source_url: "https://platform.example/countries/UA/".to_string(),
                }],
            )
            .unwrap();
        entities
            .merge(
                &Scope::Locations {
                    city_id: "c1".to_string(),
                    city_name: "Kyiv".to_string(),
                },
                vec![Location {
                    id: "42".to_string(),
                    name: "Maidan".to_string(),
                    city_id: "c1".to_string(),
                    source_url: "https://platform.example/cities/c1/".to_string(),
                }],
            )
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pagination_issues_n_plus_one_fetches() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut session = ScriptedSession::new()
            .on(&country_url(1), countries(&["UA", "PL"]))
            .on(&country_url(2), countries(&["DE"]))
            .on(&country_url(3), countries(&["FR", "ES"]));

        let mut crawler = crawler(test_config(&dir), memory());
        let report = crawler.run(&mut session, &CrawlOptions::default()).await.unwrap();

        assert_eq!(session.visits_to("https://platform.example/countries/?"), 4);
        assert_eq!(report.countries.added, 5);
        assert_eq!(report.countries.pages_fetched, 4);
        assert_eq!(report.status, RunStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_page_stops_pagination() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut session = ScriptedSession::new()
            .on(&country_url(1), countries(&["UA"]))
            .on(&country_url(2), countries(&["UA"]))
            .on(&country_url(3), countries(&["PL"]));

        let mut crawler = crawler(test_config(&dir), memory());
        crawler.run(&mut session, &CrawlOptions::default()).await.unwrap();

        assert_eq!(session.visits_to("https://platform.example/countries/?"), 2);
        assert_eq!(crawler.entities().count::<Country>(&Scope::Countries).unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_merges_new_city_without_duplicates() {
        let dir = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn TableStore> = Arc::new(JsonTableStore::new(dir.path()).unwrap());
        let ua_cities = CITIES.replace("{country}", "UA").replace("{page}", "1");

        let mut first = ScriptedSession::new()
            .on(&country_url(1), countries(&["UA"]))
            .on(&ua_cities, named(&["c1", "c2", "c3"]));
        let mut crawler = crawler(test_config(&dir), Arc::clone(&store));
        crawler.run(&mut first, &CrawlOptions::default()).await.unwrap();

        let mut second = ScriptedSession::new()
            .on(&country_url(1), countries(&["UA"]))
            .on(&ua_cities, named(&["c1", "c2", "c3", "c4"]));
        let options = CrawlOptions {
            fresh: true,
            countries: vec![],
        };
        let report = crawler.run(&mut second, &options).await.unwrap();
        assert_eq!(report.cities.added, 1);

        let body = std::fs::read_to_string(dir.path().join("cities_UA.json")).unwrap();
        let cities: Vec<City> = serde_json::from_str(&body).unwrap();
        assert_eq!(cities.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_on_one_country_does_not_stop_the_next() {
        let dir = tempfile::TempDir::new().unwrap();
        let pl_cities = CITIES.replace("{country}", "PL").replace("{page}", "1");
        let ua_cities = CITIES.replace("{country}", "UA").replace("{page}", "1");
        let mut session = ScriptedSession::new()
            .on(&country_url(1), countries(&["PL", "UA"]))
            .on(&pl_cities, Scripted::Page(200, "Please wait a few minutes before you try again."))
            .on(&ua_cities, named(&["c1", "c2"]));

        let mut crawler = crawler(test_config(&dir), memory());
        let start = Instant::now();
        let report = crawler.run(&mut session, &CrawlOptions::default()).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(600));
        assert_eq!(session.visits_to("https://platform.example/countries/PL/"), 1);
        assert!(session.visits_to("https://platform.example/countries/UA/") >= 1);

        let pl = Scope::Cities {
            country_code: "PL".to_string(),
        };
        let ua = Scope::Cities {
            country_code: "UA".to_string(),
        };
        assert_eq!(crawler.entities().count::<City>(&pl).unwrap(), 0);
        assert_eq!(crawler.entities().count::<City>(&ua).unwrap(), 2);

        assert_eq!(report.status, RunStatus::Blocked);
        let blocked: Vec<_> = report.issues_of(IssueKind::Blocked).collect();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].scope, "country PL");
        assert!(report.halt.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_branch_is_retried_next_run() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = memory();
        let pl_cities = CITIES.replace("{country}", "PL").replace("{page}", "1");

        let mut blocked = ScriptedSession::new()
            .on(&country_url(1), countries(&["PL"]))
            .on(&pl_cities, Scripted::Page(429, ""));
        let mut crawler = crawler(test_config(&dir), Arc::clone(&store));
        crawler.run(&mut blocked, &CrawlOptions::default()).await.unwrap();

        let mut recovered = ScriptedSession::new().on(&pl_cities, named(&["w1"]));
        let report = crawler.run(&mut recovered, &CrawlOptions::default()).await.unwrap();

        // Countries were persisted, so only the empty PL branch is revisited
        assert_eq!(recovered.visits_to("https://platform.example/countries/?"), 0);
        assert_eq!(report.cities.added, 1);
        assert_eq!(report.status, RunStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_blocking_halts_run() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut session =
            ScriptedSession::new().on(&country_url(1), countries(&["PL", "UA", "DE"]));
        for code in ["PL", "UA", "DE"] {
            let url = CITIES.replace("{country}", code).replace("{page}", "1");
            session = session.on(&url, Scripted::Page(403, ""));
        }
        let mut config = test_config(&dir);
        config.crawler.max_consecutive_blocks = 2;

        let mut crawler = crawler(config, memory());
        let report = crawler.run(&mut session, &CrawlOptions::default()).await.unwrap();

        assert_eq!(report.halt, Some(HaltReason::PersistentBlock));
        assert_eq!(report.status, RunStatus::Blocked);
        assert_eq!(session.visits_to("https://platform.example/countries/DE/"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaf_offset_advances_by_new_items() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = memory();
        let entities = EntityStore::new(Arc::clone(&store));
        seed_hierarchy(&entities);

        let scope = Scope::LeafItems {
            location_id: "42".to_string(),
        };
        let known: Vec<LeafItem> = (0..20)
            .map(|i| LeafItem {
                external_id: format!("u{}", i),
                attributes: BTreeMap::new(),
                discovered_in_location_id: "42".to_string(),
            })
            .collect();
        entities.merge(&scope, known).unwrap();
        OffsetTracker::new(Arc::clone(&store)).save_offset("42", 20, 20).unwrap();

        let at_20 = LEAF.replace("{location}", "42").replace("{offset}", "20");
        let mut session = ScriptedSession::new().on(
            &at_20,
            leaf(&["u18", "u19", "n0", "n1", "n2", "n3", "n4"]),
        );

        let mut crawler = crawler(test_config(&dir), Arc::clone(&store));
        let report = crawler.run(&mut session, &CrawlOptions::default()).await.unwrap();

        assert_eq!(crawler.offsets().get_offset("42").unwrap(), 25);
        assert_eq!(crawler.offsets().get_stats("42").unwrap().unwrap().0, 25);
        assert_eq!(entities.count::<LeafItem>(&scope).unwrap(), 25);
        assert_eq!(report.leaf_items.added, 5);

        // Second batch from offset 25 came back empty: location exhausted and cached
        assert_eq!(session.visits_to("https://platform.example/locations/42/"), 2);
        assert_eq!(crawler.cache().get("42").unwrap().map(|v| v.len()), Some(25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_location_is_retried_next_run() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = memory();
        seed_hierarchy(&EntityStore::new(Arc::clone(&store)));
        let mut crawler = crawler(test_config(&dir), Arc::clone(&store));

        let mut first = ScriptedSession::new();
        crawler.run(&mut first, &CrawlOptions::default()).await.unwrap();
        assert_eq!(first.visits_to("https://platform.example/locations/42/"), 1);
        assert!(crawler.cache().get("42").unwrap().is_none());

        let mut second = ScriptedSession::new();
        let report = crawler.run(&mut second, &CrawlOptions::default()).await.unwrap();
        assert_eq!(second.visits_to("https://platform.example/locations/42/"), 1);
        assert_eq!(report.cache_hits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_network() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = memory();
        seed_hierarchy(&EntityStore::new(Arc::clone(&store)));
        ResultCache::with_max_age_days(Arc::clone(&store), 7)
            .put(
                "42",
                vec![LeafItem {
                    external_id: "cached".to_string(),
                    attributes: BTreeMap::new(),
                    discovered_in_location_id: "42".to_string(),
                }],
            )
            .unwrap();

        let mut session = ScriptedSession::new();
        let mut crawler = crawler(test_config(&dir), Arc::clone(&store));
        let report = crawler.run(&mut session, &CrawlOptions::default()).await.unwrap();

        assert!(session.visited.is_empty());
        assert_eq!(report.cache_hits, 1);
        assert_eq!(report.requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_limit_leaves_location_uncached() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = memory();
        seed_hierarchy(&EntityStore::new(Arc::clone(&store)));

        let mut session = ScriptedSession::new();
        for (i, offset) in [0, 2, 4].iter().enumerate() {
            let url = LEAF.replace("{location}", "42").replace("{offset}", &offset.to_string());
            let a = format!("a{}", i);
            let b = format!("b{}", i);
            session = session.on(&url, leaf(&[a.as_str(), b.as_str()]));
        }
        let mut config = test_config(&dir);
        config.crawler.leaf_batch_limit = 2;

        let mut crawler = crawler(config, Arc::clone(&store));
        crawler.run(&mut session, &CrawlOptions::default()).await.unwrap();

        assert_eq!(crawler.offsets().get_offset("42").unwrap(), 4);
        assert!(crawler.cache().get("42").unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_after_threshold() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut session = ScriptedSession::new()
            .on(&country_url(1), countries(&["A1"]))
            .on(&country_url(2), countries(&["A2"]))
            .on(&country_url(3), countries(&["A3"]));
        let mut config = test_config(&dir);
        config.throttle.request_threshold = 2;

        let mut crawler = crawler(config, memory());
        let start = Instant::now();
        let report = crawler
            .run(
                &mut session,
                &CrawlOptions {
                    fresh: false,
                    countries: vec!["none".to_string()],
                },
            )
            .await
            .unwrap();

        // Four country pages: a cooldown before the third fetch only
        assert_eq!(report.requests, 4);
        assert_eq!(report.cooldowns, 1);
        assert!(start.elapsed() >= Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_skips_branch() {
        let dir = tempfile::TempDir::new().unwrap();
        let pl_cities = CITIES.replace("{country}", "PL").replace("{page}", "1");
        let ua_cities = CITIES.replace("{country}", "UA").replace("{page}", "1");
        let mut session = ScriptedSession::new()
            .on(&country_url(1), countries(&["PL", "UA"]))
            .on(&pl_cities, Scripted::Timeout)
            .on(&ua_cities, named(&["c1"]));

        let mut crawler = crawler(test_config(&dir), memory());
        let report = crawler.run(&mut session, &CrawlOptions::default()).await.unwrap();

        assert_eq!(report.status, RunStatus::Partial);
        let transient: Vec<_> = report.issues_of(IssueKind::Transient).collect();
        assert_eq!(transient.len(), 1);
        assert_eq!(transient[0].page, Some(1));
        assert_eq!(report.cities.added, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_transport_ends_run_keeping_progress() {
        let dir = tempfile::TempDir::new().unwrap();
        let ua_cities = CITIES.replace("{country}", "UA").replace("{page}", "1");
        let mut session = ScriptedSession::new()
            .on(&country_url(1), countries(&["UA", "PL"]))
            .on(&ua_cities, Scripted::Closed);

        let store = memory();
        let mut crawler = crawler(test_config(&dir), Arc::clone(&store));
        let report = crawler.run(&mut session, &CrawlOptions::default()).await.unwrap();

        assert!(matches!(report.halt, Some(HaltReason::TransportClosed(_))));
        assert_eq!(report.status, RunStatus::Partial);
        assert!(crawler.phase().is_terminal());
        assert_eq!(crawler.entities().count::<Country>(&Scope::Countries).unwrap(), 2);
        assert_eq!(session.visits_to("https://platform.example/countries/PL/"), 0);

        let saved = RunReport::load_last(store.as_ref()).unwrap().unwrap();
        assert_eq!(saved.status, RunStatus::Partial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_wall_halts_only_its_branch() {
        let dir = tempfile::TempDir::new().unwrap();
        let pl_cities = CITIES.replace("{country}", "PL").replace("{page}", "1");
        let ua_cities = CITIES.replace("{country}", "UA").replace("{page}", "1");
        let mut session = ScriptedSession::new()
            .on(&country_url(1), countries(&["PL", "UA"]))
            .on(&pl_cities, Scripted::Page(200, "Log in to continue"))
            .on(&ua_cities, named(&["c1"]));

        let mut crawler = crawler(test_config(&dir), memory());
        let report = crawler.run(&mut session, &CrawlOptions::default()).await.unwrap();

        let auth: Vec<_> = report.issues_of(IssueKind::AuthRequired).collect();
        assert_eq!(auth.len(), 1);
        assert_eq!(auth[0].scope, "country PL");
        assert_eq!(report.cities.added, 1);
        assert_eq!(report.status, RunStatus::Partial);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_wall_on_location_keeps_its_siblings() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = memory();
        let entities = EntityStore::new(Arc::clone(&store));
        seed_hierarchy(&entities);
        entities
            .merge(
                &Scope::Locations {
                    city_id: "c1".to_string(),
                    city_name: "Kyiv".to_string(),
                },
                vec![Location {
                    id: "43".to_string(),
                    name: "Podil".to_string(),
                    city_id: "c1".to_string(),
                    source_url: "https://platform.example/cities/c1/".to_string(),
                }],
            )
            .unwrap();

        let at_42 = LEAF.replace("{location}", "42").replace("{offset}", "0");
        let at_43 = LEAF.replace("{location}", "43").replace("{offset}", "0");
        let mut session = ScriptedSession::new()
            .on(&at_42, Scripted::Page(200, "Log in to continue"))
            .on(&at_43, leaf(&["u1", "u2"]));

        let mut crawler = crawler(test_config(&dir), Arc::clone(&store));
        let report = crawler.run(&mut session, &CrawlOptions::default()).await.unwrap();

        assert!(session.visits_to("https://platform.example/locations/43/") >= 1);
        let leaf_43 = Scope::LeafItems {
            location_id: "43".to_string(),
        };
        assert_eq!(entities.count::<LeafItem>(&leaf_43).unwrap(), 2);

        let auth: Vec<_> = report.issues_of(IssueKind::AuthRequired).collect();
        assert_eq!(auth.len(), 1);
        assert_eq!(auth[0].scope, "location 42");
        assert!(report.halt.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_wall_on_city_keeps_its_siblings() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = memory();
        let entities = EntityStore::new(Arc::clone(&store));
        entities
            .merge(
                &Scope::Countries,
                vec![Country {
                    code: "UA".to_string(),
                    name: "Ukraine".to_string(),
                    source_url: country_url(1),
                }],
            )
            .unwrap();
        let ua = Scope::Cities {
            country_code: "UA".to_string(),
        };
        let cities: Vec<City> = ["c1", "c2"]
            .iter()
            .map(|id| City {
                id: id.to_string(),
                name: id.to_string(),
                country_code: "UA".to_string(),
                source_url: "https://platform.example/countries/UA/".to_string(),
            })
            .collect();
        entities.merge(&ua, cities).unwrap();

        let c1 = LOCATIONS.replace("{city}", "c1").replace("{page}", "1");
        let c2 = LOCATIONS.replace("{city}", "c2").replace("{page}", "1");
        let mut session = ScriptedSession::new()
            .on(&c1, Scripted::Page(401, ""))
            .on(&c2, named(&["77"]));

        let mut crawler = crawler(test_config(&dir), Arc::clone(&store));
        let report = crawler.run(&mut session, &CrawlOptions::default()).await.unwrap();

        assert_eq!(report.locations.added, 1);
        let auth: Vec<_> = report.issues_of(IssueKind::AuthRequired).collect();
        assert_eq!(auth.len(), 1);
        assert_eq!(auth[0].scope, "city c1 (c1)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninstallable_session_runs_as_guest() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = memory();
        seed_hierarchy(&EntityStore::new(Arc::clone(&store)));
        let config = test_config(&dir);
        let mut session = HttpFetchSession::new(&config.platform).unwrap();

        let mut crawler = crawler(config, store);
        crawler
            .session_gate()
            .complete_manual_auth(vec![SessionCookie::new("sessionid", "abc", "")])
            .unwrap();

        let options = CrawlOptions {
            fresh: false,
            countries: vec!["none".to_string()],
        };
        let report = crawler.run(&mut session, &options).await.unwrap();

        assert!(!report.authenticated);
        assert_eq!(report.requests, 0);
        assert!(report.halt.is_none());
        assert!(!crawler.session_gate().path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_is_cooldown_only_while_pausing() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.throttle.request_threshold = 1;
        let mut crawler = crawler(config, memory());
        crawler.phase = CrawlPhase::DiscoveringCountries;

        assert!(!crawler.pre_fetch_pauses().await.unwrap());
        assert_eq!(crawler.phase, CrawlPhase::DiscoveringCountries);
        assert_eq!(crawler.governor.stats().cooldowns_triggered, 0);

        crawler.governor.record_request();
        let start = Instant::now();
        assert!(crawler.pre_fetch_pauses().await.unwrap());
        assert!(start.elapsed() >= Duration::from_secs(300));
        assert_eq!(crawler.phase, CrawlPhase::DiscoveringCountries);
        assert_eq!(crawler.governor.stats().cooldowns_triggered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guest_mode_skips_auth_levels() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = memory();
        seed_hierarchy(&EntityStore::new(Arc::clone(&store)));
        let mut config = test_config(&dir);
        config.levels.leaf_items.requires_auth = true;

        let mut session = ScriptedSession::new();
        let mut crawler = crawler(config, store);
        let report = crawler.run(&mut session, &CrawlOptions::default()).await.unwrap();

        assert!(session.visited.is_empty());
        assert_eq!(report.issues_of(IssueKind::AuthRequired).count(), 1);
        assert!(!report.authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_session_without_guest_halts() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.crawler.allow_guest = false;

        let mut session = ScriptedSession::new();
        let mut crawler = crawler(config, memory());
        let report = crawler.run(&mut session, &CrawlOptions::default()).await.unwrap();

        assert_eq!(report.halt, Some(HaltReason::AuthRequired));
        assert!(session.visited.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_takes_effect_between_fetches() {
        let dir = tempfile::TempDir::new().unwrap();
        let token = CancellationToken::new();
        let mut session = ScriptedSession::new()
            .on(&country_url(1), countries(&["UA"]))
            .on(&country_url(2), countries(&["PL"]));
        session.cancel_on = Some((country_url(1), token.clone()));

        let mut crawler =
            crawler(test_config(&dir), memory()).with_suspender(Suspender::new(token));
        let report = crawler.run(&mut session, &CrawlOptions::default()).await.unwrap();

        assert_eq!(report.halt, Some(HaltReason::Cancelled));
        assert_eq!(session.visited, vec![country_url(1)]);
        // The page that completed before cancellation was merged
        assert_eq!(crawler.entities().count::<Country>(&Scope::Countries).unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_country_filter() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut session = ScriptedSession::new().on(&country_url(1), countries(&["UA", "PL"]));

        let mut crawler = crawler(test_config(&dir), memory());
        let options = CrawlOptions {
            fresh: false,
            countries: vec!["ua".to_string()],
        };
        crawler.run(&mut session, &options).await.unwrap();

        assert_eq!(session.visits_to("https://platform.example/countries/UA/"), 1);
        assert_eq!(session.visits_to("https://platform.example/countries/PL/"), 0);
    }

    #[test]
    fn test_planned_urls() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = memory();
        seed_hierarchy(&EntityStore::new(Arc::clone(&store)));
        OffsetTracker::new(Arc::clone(&store)).save_offset("42", 7, 7).unwrap();

        let crawler = crawler(test_config(&dir), store);
        let urls = crawler.planned_urls(&CrawlOptions::default()).unwrap();
        assert_eq!(
            urls,
            vec![
                country_url(1),
                "https://platform.example/countries/UA/?page=1".to_string(),
                "https://platform.example/cities/c1/?page=1".to_string(),
                "https://platform.example/locations/42/?offset=7".to_string(),
            ]
        );
    }
}
