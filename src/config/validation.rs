use crate::config::types::{
    Config, CrawlerConfig, DelayWindow, ExtractSpec, LevelConfig, LevelsConfig, PacingConfig,
    PlatformConfig, SessionConfig, StorageConfig, ThrottleConfig,
};
use crate::url::expand_template;
use crate::ConfigError;
use regex::Regex;
use scraper::Selector;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_throttle_config(&config.throttle)?;
    validate_pacing_config(&config.pacing)?;
    validate_session_config(&config.session)?;
    validate_storage_config(&config.storage)?;
    validate_platform_config(&config.platform)?;
    validate_levels(&config.levels)?;
    Ok(())
}

/// Validates traversal configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.page_cap < 1 {
        return Err(ConfigError::Validation(format!(
            "page_cap must be >= 1, got {}",
            config.page_cap
        )));
    }

    if config.leaf_batch_limit < 1 {
        return Err(ConfigError::Validation(format!(
            "leaf_batch_limit must be >= 1, got {}",
            config.leaf_batch_limit
        )));
    }

    if config.max_consecutive_blocks < 1 {
        return Err(ConfigError::Validation(format!(
            "max_consecutive_blocks must be >= 1, got {}",
            config.max_consecutive_blocks
        )));
    }

    Ok(())
}

fn validate_throttle_config(config: &ThrottleConfig) -> Result<(), ConfigError> {
    if config.request_threshold < 1 {
        return Err(ConfigError::Validation(format!(
            "request_threshold must be >= 1, got {}",
            config.request_threshold
        )));
    }
    Ok(())
}

/// Validates pacing windows and anomaly thresholds
fn validate_pacing_config(config: &PacingConfig) -> Result<(), ConfigError> {
    for (name, window) in [
        ("night", config.night),
        ("morning", config.morning),
        ("day", config.day),
        ("evening", config.evening),
        ("sibling", config.sibling),
    ] {
        validate_window(name, window)?;
    }
    validate_sibling_window(config)?;

    if !(0.0..=1.0).contains(&config.break_probability) {
        return Err(ConfigError::Validation(format!(
            "break_probability must be between 0 and 1, got {}",
            config.break_probability
        )));
    }

    if config.burst_ceiling < 1 {
        return Err(ConfigError::Validation(format!(
            "burst_ceiling must be >= 1, got {}",
            config.burst_ceiling
        )));
    }

    Ok(())
}

/// The pause between siblings must not be shorter than any inter-page pause
fn validate_sibling_window(config: &PacingConfig) -> Result<(), ConfigError> {
    let page_windows = [config.night, config.morning, config.day, config.evening];
    let longest_min = page_windows.iter().map(|w| w.min_ms).max().unwrap_or(0);
    let longest_max = page_windows.iter().map(|w| w.max_ms).max().unwrap_or(0);

    if config.sibling.min_ms < longest_min || config.sibling.max_ms < longest_max {
        return Err(ConfigError::Validation(format!(
            "sibling delay window {}-{}ms is shorter than the inter-page windows (up to {}-{}ms)",
            config.sibling.min_ms, config.sibling.max_ms, longest_min, longest_max
        )));
    }
    Ok(())
}

fn validate_window(name: &str, window: DelayWindow) -> Result<(), ConfigError> {
    if window.min_ms > window.max_ms {
        return Err(ConfigError::Validation(format!(
            "{} delay window is inverted: min {}ms > max {}ms",
            name, window.min_ms, window.max_ms
        )));
    }
    Ok(())
}

/// Validates session probe configuration
fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    if config.path.is_empty() {
        return Err(ConfigError::Validation(
            "session path cannot be empty".to_string(),
        ));
    }

    Url::parse(&config.probe_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid probe_url: {}", e)))?;

    if let Some(fallback) = &config.fallback_probe_url {
        Url::parse(fallback)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid fallback_probe_url: {}", e)))?;
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.data_dir.is_empty() {
        return Err(ConfigError::Validation(
            "data_dir cannot be empty".to_string(),
        ));
    }

    if config.cache_max_age_days < 1 {
        return Err(ConfigError::Validation(format!(
            "cache_max_age_days must be >= 1, got {}",
            config.cache_max_age_days
        )));
    }

    Ok(())
}

fn validate_platform_config(config: &PlatformConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "timeout_secs must be >= 1, got {}",
            config.timeout_secs
        )));
    }

    for marker in config
        .block_markers
        .iter()
        .chain(&config.auth_markers)
        .chain(&config.not_found_markers)
    {
        if marker.is_empty() {
            return Err(ConfigError::Validation(
                "response markers cannot be empty strings".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates every level: URL template placeholders and extraction spec
fn validate_levels(levels: &LevelsConfig) -> Result<(), ConfigError> {
    validate_level("countries", &levels.countries, &["page"], &["code", "name"])?;
    validate_level(
        "cities",
        &levels.cities,
        &["page", "country"],
        &["id", "name"],
    )?;
    validate_level(
        "locations",
        &levels.locations,
        &["page", "city"],
        &["id", "name"],
    )?;
    validate_level(
        "leaf-items",
        &levels.leaf_items,
        &["location", "offset"],
        &["external_id"],
    )?;
    Ok(())
}

fn validate_level(
    name: &str,
    level: &LevelConfig,
    placeholders: &[&str],
    required_fields: &[&str],
) -> Result<(), ConfigError> {
    for placeholder in placeholders {
        let token = format!("{{{}}}", placeholder);
        if !level.url.contains(&token) {
            return Err(ConfigError::InvalidTemplate(format!(
                "{} url '{}' must contain {}",
                name, level.url, token
            )));
        }
    }

    // Substitute harmless values to make sure the template yields a valid URL
    let probe: Vec<(&str, String)> = ["page", "country", "city", "location", "offset"]
        .iter()
        .map(|key| (*key, "1".to_string()))
        .collect();
    expand_template(&level.url, &probe)
        .map_err(|e| ConfigError::InvalidTemplate(format!("{} url: {}", name, e)))?;

    validate_extract_spec(name, &level.extract, required_fields)
}

fn validate_extract_spec(
    name: &str,
    spec: &ExtractSpec,
    required_fields: &[&str],
) -> Result<(), ConfigError> {
    if spec.item.trim().is_empty() {
        return Err(ConfigError::InvalidSelector(format!(
            "{} item selector cannot be empty",
            name
        )));
    }

    Selector::parse(&spec.item).map_err(|e| {
        ConfigError::InvalidSelector(format!("{} item selector '{}': {:?}", name, spec.item, e))
    })?;

    for required in required_fields {
        if !spec.fields.contains_key(*required) {
            return Err(ConfigError::Validation(format!(
                "{} extract spec is missing the '{}' field",
                name, required
            )));
        }
    }

    for (field, field_spec) in &spec.fields {
        if !field_spec.selector.is_empty() {
            Selector::parse(&field_spec.selector).map_err(|e| {
                ConfigError::InvalidSelector(format!(
                    "{}.{} selector '{}': {:?}",
                    name, field, field_spec.selector, e
                ))
            })?;
        }

        if let Some(capture) = &field_spec.capture {
            let regex = Regex::new(capture).map_err(|e| {
                ConfigError::Validation(format!("{}.{} capture regex: {}", name, field, e))
            })?;
            if regex.captures_len() < 2 {
                return Err(ConfigError::Validation(format!(
                    "{}.{} capture regex '{}' needs a capture group",
                    name, field, capture
                )));
            }
        }
    }

    Ok(())
}
