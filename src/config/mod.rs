//! Configuration module for geo-harvester
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use geo_harvester::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvester.toml")).unwrap();
//! println!("Listing pages are capped at {}", config.crawler.page_cap);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlerConfig, DelayWindow, ExtractSpec, FieldSpec, LevelConfig, LevelsConfig,
    PacingConfig, PlatformConfig, SessionConfig, StorageBackend, StorageConfig, ThrottleConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
