//! Persisted session blob
//!
//! The blob is a JSON document holding the cookies of an authenticated
//! session and the time they were captured. It is written with a temp file and
//! rename so a killed process never leaves half a blob behind.

use super::SessionError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// One cookie of a captured session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

impl SessionCookie {
    pub fn new(name: &str, value: &str, domain: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
            path: default_path(),
            secure: false,
            http_only: false,
        }
    }

    /// Renders the cookie as a `Set-Cookie` style string
    pub fn to_header(&self) -> String {
        let mut header = format!(
            "{}={}; Domain={}; Path={}",
            self.name, self.value, self.domain, self.path
        );
        if self.secure {
            header.push_str("; Secure");
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        header
    }

    /// Parses a `Set-Cookie` header, defaulting the domain to the responding host
    pub fn parse_set_cookie(header: &str, default_domain: &str) -> Option<Self> {
        let mut parts = header.split(';');
        let (name, value) = parts.next()?.trim().split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = Self::new(name, value.trim(), default_domain);
        for attribute in parts {
            let attribute = attribute.trim();
            let (key, val) = attribute.split_once('=').unwrap_or((attribute, ""));
            match key.to_ascii_lowercase().as_str() {
                "domain" if !val.is_empty() => {
                    cookie.domain = val.trim_start_matches('.').to_string()
                }
                "path" if !val.is_empty() => cookie.path = val.to_string(),
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                _ => {}
            }
        }
        Some(cookie)
    }
}

fn default_path() -> String {
    "/".to_string()
}

/// Durable authentication state reused across runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub cookies: Vec<SessionCookie>,
    pub captured_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(cookies: Vec<SessionCookie>) -> Self {
        Self {
            cookies,
            captured_at: Utc::now(),
        }
    }

    /// Age of the blob at `now`
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now - self.captured_at
    }

    /// Reads a blob, returning None if no file exists
    ///
    /// A blob that cannot be decoded is reported as an error so the caller can
    /// decide whether to purge it.
    pub fn load(path: &Path) -> Result<Option<Self>, SessionError> {
        let body = match fs::read_to_string(path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record = serde_json::from_str(&body).map_err(SessionError::Corrupt)?;
        Ok(Some(record))
    }

    /// Atomically writes the blob
    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let body = serde_json::to_string_pretty(self).map_err(SessionError::Corrupt)?;
        let mut temp_file = NamedTempFile::new_in(parent)?;
        temp_file.write_all(body.as_bytes())?;
        temp_file.as_file().sync_all()?;
        temp_file.persist(path).map_err(|e| SessionError::Io(e.error))?;
        Ok(())
    }
}
