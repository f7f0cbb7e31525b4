//! Crawler module for hierarchy traversal
//!
//! This module contains the core crawling logic, including:
//! - The fetch session capability and its reqwest implementation
//! - Selector-driven record extraction
//! - Response classification (blocks, login walls, missing pages)
//! - Request throttling and human-plausible pacing
//! - Overall traversal coordination

mod classify;
mod coordinator;
mod fetcher;
mod pacing;
mod parser;
mod suspend;
mod throttle;

pub use classify::{MarkerClassifier, ResponseClass, ResponseClassifier};
pub use coordinator::{CrawlOptions, HierarchyCrawler};
pub use fetcher::{build_http_client, FetchError, FetchSession, HttpFetchSession, RenderedPage};
pub use pacing::{BreakKind, DayPart, PacingSimulator};
pub use parser::{
    extract_records, to_city, to_country, to_leaf_item, to_location, RawRecord, URL_FIELD,
};
pub use suspend::{Cancelled, Suspender};
pub use throttle::{ThrottleGovernor, ThrottleStats};
