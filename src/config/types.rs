use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for geo-harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub platform: PlatformConfig,
    pub levels: LevelsConfig,
}

/// Traversal behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Hard cap on listing pages fetched per parent entity
    #[serde(default = "default_page_cap")]
    pub page_cap: u32,

    /// Maximum number of leaf batches fetched per location in one run
    #[serde(default = "default_leaf_batch_limit")]
    pub leaf_batch_limit: u32,

    /// Whether traversal may continue without an authenticated session
    #[serde(default = "default_true")]
    pub allow_guest: bool,

    /// Pause imposed after a block marker is detected (seconds)
    #[serde(default = "default_forced_pause")]
    pub forced_pause_secs: u64,

    /// Consecutive blocked fetches after which the run is abandoned
    #[serde(default = "default_max_consecutive_blocks")]
    pub max_consecutive_blocks: u32,
}

/// Request-volume cooldown policy
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ThrottleConfig {
    /// Requests allowed between two mandatory cooldowns
    #[serde(default = "default_request_threshold")]
    pub request_threshold: u32,

    /// Length of a mandatory cooldown (seconds)
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            request_threshold: default_request_threshold(),
            cooldown_secs: default_cooldown(),
        }
    }
}

/// A `[min, max]` delay window in milliseconds
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct DelayWindow {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayWindow {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }
}

/// Human-plausible timing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PacingConfig {
    /// 00:00 - 05:59 local time
    #[serde(default = "default_night")]
    pub night: DelayWindow,

    /// 06:00 - 11:59 local time
    #[serde(default = "default_morning")]
    pub morning: DelayWindow,

    /// 12:00 - 17:59 local time
    #[serde(default = "default_day")]
    pub day: DelayWindow,

    /// 18:00 - 23:59 local time
    #[serde(default = "default_evening")]
    pub evening: DelayWindow,

    /// Pause between sibling entities (longer than the inter-page pause)
    #[serde(default = "default_sibling")]
    pub sibling: DelayWindow,

    /// Probability of a technical break before a fetch
    #[serde(default = "default_break_probability")]
    pub break_probability: f64,

    /// Intervals shorter than this flag suspicious activity (milliseconds)
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,

    /// Sliding window used for burst detection (seconds)
    #[serde(default = "default_burst_window")]
    pub burst_window_secs: u64,

    /// Requests allowed inside the burst window before flagging
    #[serde(default = "default_burst_ceiling")]
    pub burst_ceiling: u32,

    /// Length of the emergency pause once flagged (seconds)
    #[serde(default = "default_emergency_pause")]
    pub emergency_pause_secs: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            night: default_night(),
            morning: default_morning(),
            day: default_day(),
            evening: default_evening(),
            sibling: default_sibling(),
            break_probability: default_break_probability(),
            min_interval_ms: default_min_interval(),
            burst_window_secs: default_burst_window(),
            burst_ceiling: default_burst_ceiling(),
            emergency_pause_secs: default_emergency_pause(),
        }
    }
}

/// Persisted authentication session configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SessionConfig {
    /// Path of the session blob file
    pub path: String,

    /// Age after which a stored session is logged as stale (hours)
    #[serde(default = "default_stale_hours")]
    pub stale_after_hours: u64,

    /// Authenticated-only resource used as the primary liveness probe
    pub probe_url: String,

    /// Alternative probe tried once before declaring the session invalid
    #[serde(default)]
    pub fallback_probe_url: Option<String>,

    /// Substrings whose presence proves an active session
    #[serde(default)]
    pub active_markers: Vec<String>,
}

/// Which table backend persists entities, offsets and cache records
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Json,
    Sqlite,
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Directory holding every table
    pub data_dir: String,

    #[serde(default)]
    pub backend: StorageBackend,

    /// Maximum age of a leaf result cache record (days)
    #[serde(default = "default_cache_days")]
    pub cache_max_age_days: u32,
}

/// Remote platform description
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PlatformConfig {
    /// User agent presented by the HTTP fetch session
    pub user_agent: String,

    /// Request timeout (seconds)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Content markers indicating a block or challenge page
    #[serde(default)]
    pub block_markers: Vec<String>,

    /// Content markers indicating a login wall
    #[serde(default)]
    pub auth_markers: Vec<String>,

    /// Content markers indicating a missing resource
    #[serde(default)]
    pub not_found_markers: Vec<String>,
}

/// Listing configuration for every hierarchy level
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LevelsConfig {
    pub countries: LevelConfig,
    pub cities: LevelConfig,
    pub locations: LevelConfig,
    pub leaf_items: LevelConfig,
}

/// How one level is listed and extracted
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LevelConfig {
    /// URL template; placeholders are `{page}`, `{country}`, `{city}`, `{location}`, `{offset}`
    pub url: String,

    /// Whether this level is unreachable in guest mode
    #[serde(default)]
    pub requires_auth: bool,

    pub extract: ExtractSpec,
}

/// Selector description of the records on a listing page
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExtractSpec {
    /// CSS selector matching one element per record
    pub item: String,

    /// Named fields read relative to each item element
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
}

/// One field of an extracted record
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct FieldSpec {
    /// CSS selector relative to the item; empty means the item itself
    #[serde(default)]
    pub selector: String,

    /// Attribute to read instead of the element text
    #[serde(default)]
    pub attribute: Option<String>,

    /// Regex whose first capture group becomes the value
    #[serde(default)]
    pub capture: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_page_cap() -> u32 {
    50
}

fn default_leaf_batch_limit() -> u32 {
    20
}

fn default_forced_pause() -> u64 {
    600
}

fn default_max_consecutive_blocks() -> u32 {
    3
}

fn default_request_threshold() -> u32 {
    20
}

fn default_cooldown() -> u64 {
    300
}

fn default_night() -> DelayWindow {
    DelayWindow::new(8_000, 20_000)
}

fn default_morning() -> DelayWindow {
    DelayWindow::new(4_000, 10_000)
}

fn default_day() -> DelayWindow {
    DelayWindow::new(3_000, 8_000)
}

fn default_evening() -> DelayWindow {
    DelayWindow::new(5_000, 12_000)
}

fn default_sibling() -> DelayWindow {
    DelayWindow::new(15_000, 40_000)
}

fn default_break_probability() -> f64 {
    0.1
}

fn default_min_interval() -> u64 {
    1_500
}

fn default_burst_window() -> u64 {
    60
}

fn default_burst_ceiling() -> u32 {
    12
}

fn default_emergency_pause() -> u64 {
    60
}

fn default_stale_hours() -> u64 {
    24
}

fn default_cache_days() -> u32 {
    7
}

fn default_timeout() -> u64 {
    30
}
