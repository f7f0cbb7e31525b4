//! Response classification
//!
//! Decides from status and content whether a rendered page is usable. Blocks
//! and login walls arrive as ordinary pages, not as errors, so they are
//! detected here and kept out of the traversal logic.

use crate::config::PlatformConfig;
use crate::crawler::fetcher::RenderedPage;

/// What a fetched page means for the traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Ok,
    Blocked,
    NotFound,
    AuthRequired,
}

/// Replaceable block/auth detection strategy
pub trait ResponseClassifier: Send + Sync {
    fn classify(&self, page: &RenderedPage) -> ResponseClass;
}

/// Status codes plus configured substring markers
#[derive(Debug, Clone, Default)]
pub struct MarkerClassifier {
    block_markers: Vec<String>,
    auth_markers: Vec<String>,
    not_found_markers: Vec<String>,
}

impl MarkerClassifier {
    pub fn new(config: &PlatformConfig) -> Self {
        let lower = |markers: &[String]| -> Vec<String> {
            markers.iter().map(|m| m.to_lowercase()).collect()
        };
        Self {
            block_markers: lower(&config.block_markers),
            auth_markers: lower(&config.auth_markers),
            not_found_markers: lower(&config.not_found_markers),
        }
    }
}

impl ResponseClassifier for MarkerClassifier {
    fn classify(&self, page: &RenderedPage) -> ResponseClass {
        match page.status {
            Some(429) | Some(403) => return ResponseClass::Blocked,
            Some(401) => return ResponseClass::AuthRequired,
            Some(404) | Some(410) => return ResponseClass::NotFound,
            _ => {}
        }

        let content = page.content.to_lowercase();
        let contains_any =
            |markers: &[String]| markers.iter().any(|m| content.contains(m.as_str()));

        // Block markers win: challenge pages often also show a login prompt
        if contains_any(&self.block_markers) {
            ResponseClass::Blocked
        } else if contains_any(&self.auth_markers) {
            ResponseClass::AuthRequired
        } else if contains_any(&self.not_found_markers) {
            ResponseClass::NotFound
        } else {
            ResponseClass::Ok
        }
    }
}
