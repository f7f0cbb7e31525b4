/// Maximum length of a sanitized name component
const MAX_NAME_LEN: usize = 64;

/// Turns an entity name into a file-name-safe component
///
/// Letters and digits (including non-ASCII ones) are kept and lowercased,
/// every other run of characters collapses into a single underscore.
///
/// # Examples
///
/// ```
/// use geo_harvester::url::sanitize_name;
///
/// assert_eq!(sanitize_name("New York, NY"), "new_york_ny");
/// assert_eq!(sanitize_name("Київ"), "київ");
/// ```
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_separator = false;

    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.extend(c.to_lowercase());
        } else {
            pending_separator = true;
        }
    }

    if out.chars().count() > MAX_NAME_LEN {
        out = out.chars().take(MAX_NAME_LEN).collect();
    }

    if out.is_empty() {
        "unnamed".to_string()
    } else {
        out
    }
}
