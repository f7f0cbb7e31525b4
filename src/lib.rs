//! Geo-Harvester: a resumable hierarchical crawler
//!
//! This crate walks a country → city → location → leaf item hierarchy on a
//! rate-limited platform, persisting every level incrementally so that an
//! interrupted run can be resumed without refetching what is already known.

pub mod config;
pub mod crawler;
pub mod output;
pub mod session;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Geo-Harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Session error: {0}")]
    Session(#[from] session::SessionError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("Authentication required for {scope}")]
    AuthRequired { scope: String },

    #[error("Fetch session closed: {0}")]
    TransportClosed(String),

    #[error("Blocked repeatedly, last at {scope}")]
    PersistentBlock { scope: String },

    #[error("Run cancelled")]
    Cancelled,
}

impl HarvestError {
    /// True for failures that only end the current branch, not the run
    pub fn is_branch_local(&self) -> bool {
        matches!(self, Self::AuthRequired { .. })
    }
}

impl From<crawler::Cancelled> for HarvestError {
    fn from(_: crawler::Cancelled) -> Self {
        Self::Cancelled
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid URL template: {0}")]
    InvalidTemplate(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Unresolved placeholder in {0}")]
    UnresolvedPlaceholder(String),
}

/// Result type alias for Geo-Harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlOptions, HierarchyCrawler};
pub use state::{CrawlPhase, RunReport, RunStatus};
