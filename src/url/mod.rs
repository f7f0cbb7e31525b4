//! URL handling module for geo-harvester
//!
//! This module builds listing URLs from configured templates, resolves links
//! found in extracted markup, and derives file-system-safe names from entity
//! names.

mod sanitize;
mod template;

pub use sanitize::sanitize_name;
pub use template::expand_template;

use url::Url;

/// Resolves an href found in listing markup to an absolute URL
///
/// Returns None if the link should be ignored:
/// - empty hrefs and same-page anchors
/// - javascript:, mailto:, tel: and data: schemes
/// - anything that does not resolve to HTTP(S)
pub fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    match base_url.join(href) {
        Ok(absolute_url) if matches!(absolute_url.scheme(), "http" | "https") => {
            Some(absolute_url.to_string())
        }
        _ => None,
    }
}
