//! Output module for harvest statistics and reports
//!
//! This module handles the read-only administrative surface: unprocessed
//! entities per scope, parsing completion, cache health and the report of
//! the most recent run.

pub mod stats;

pub use stats::{
    load_statistics, print_statistics, HarvestStatistics, LevelProgress, ParsingProgress,
    StatsReader,
};
