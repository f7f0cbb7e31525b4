use crate::UrlError;
use url::Url;

/// Expands `{name}` placeholders in a listing URL template
///
/// Values are percent-encoded as path/query components so entity names with
/// spaces or slashes cannot change the shape of the URL. Unknown placeholders
/// are left untouched and will usually make the result fail to parse.
///
/// # Examples
///
/// ```
/// use geo_harvester::url::expand_template;
///
/// let url = expand_template(
///     "https://platform.example/explore/locations/{country}/?page={page}",
///     &[("country", "UA".to_string()), ("page", "2".to_string())],
/// )
/// .unwrap();
/// assert_eq!(url.as_str(), "https://platform.example/explore/locations/UA/?page=2");
/// ```
pub fn expand_template(template: &str, values: &[(&str, String)]) -> Result<Url, UrlError> {
    let mut expanded = template.to_string();

    for (key, value) in values {
        let token = format!("{{{}}}", key);
        if expanded.contains(&token) {
            expanded = expanded.replace(&token, &encode_component(value));
        }
    }

    if expanded.contains('{') || expanded.contains('}') {
        return Err(UrlError::UnresolvedPlaceholder(expanded));
    }

    let url = Url::parse(&expanded).map_err(|e| UrlError::Parse(format!("{}: {}", expanded, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(url.scheme().to_string()));
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingDomain);
    }

    Ok(url)
}

/// Percent-encodes everything outside the RFC 3986 unreserved set
fn encode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
