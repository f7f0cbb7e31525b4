//! Fetch session capability
//!
//! The crawler never talks to an HTTP client directly. Every step receives a
//! `&mut dyn FetchSession` exposing navigation, structured extraction from the
//! current page, and cookie exchange with the session gate. `HttpFetchSession`
//! is the reqwest-backed implementation used by the binary.

use crate::config::{ExtractSpec, PlatformConfig};
use crate::crawler::parser::{extract_records, RawRecord};
use crate::session::SessionCookie;
use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::SET_COOKIE;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Failures surfaced by a fetch session
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Fetch session closed: {0}")]
    SessionClosed(String),
}

impl FetchError {
    /// True when the transport itself is unusable and the run must stop
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionClosed(_))
    }

    /// Short error class used in logs and run reports
    pub fn class(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Navigation { .. } => "navigation",
            Self::Extraction(_) => "extraction",
            Self::SessionClosed(_) => "transport",
        }
    }
}

/// Content of the page a session is currently on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    /// URL after redirects
    pub final_url: String,

    /// HTTP status when the transport exposes one
    pub status: Option<u16>,

    pub content: String,
}

/// Capability object the crawler drives
#[async_trait]
pub trait FetchSession: Send {
    /// Loads a URL and makes it the current page
    async fn navigate(&mut self, url: &str) -> Result<RenderedPage, FetchError>;

    /// Extracts structured records from the current page
    fn extract_structured(&self, spec: &ExtractSpec) -> Result<Vec<RawRecord>, FetchError>;

    /// URL of the current page, if any navigation succeeded
    fn current_url(&self) -> Option<String>;

    /// Installs previously captured cookies
    fn install_cookies(&mut self, cookies: &[SessionCookie]) -> Result<(), FetchError>;

    /// Returns the cookies currently held by the session
    fn export_cookies(&self) -> Vec<SessionCookie>;

    /// Drops every cookie, returning the session to guest state
    fn clear_cookies(&mut self) -> Result<(), FetchError>;
}

/// Builds an HTTP client bound to a cookie jar
///
/// # Arguments
///
/// * `config` - Platform configuration (user agent and timeout)
/// * `jar` - Cookie jar shared with the session
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &PlatformConfig, jar: Arc<Jar>) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .cookie_provider(jar)
        .gzip(true)
        .brotli(true)
        .build()
}

/// reqwest-backed fetch session
pub struct HttpFetchSession {
    config: PlatformConfig,
    client: Client,
    jar: Arc<Jar>,
    cookies: Vec<SessionCookie>,
    current: Option<RenderedPage>,
}

impl HttpFetchSession {
    pub fn new(config: &PlatformConfig) -> Result<Self, FetchError> {
        let jar = Arc::new(Jar::default());
        let client = build_http_client(config, Arc::clone(&jar))
            .map_err(|e| FetchError::SessionClosed(e.to_string()))?;

        Ok(Self {
            config: config.clone(),
            client,
            jar,
            cookies: Vec::new(),
            current: None,
        })
    }

    /// Keeps the exported cookie list in step with the jar
    fn remember_cookie(&mut self, cookie: SessionCookie) {
        match self
            .cookies
            .iter_mut()
            .find(|c| c.name == cookie.name && c.domain == cookie.domain)
        {
            Some(existing) => *existing = cookie,
            None => self.cookies.push(cookie),
        }
    }
}

#[async_trait]
impl FetchSession for HttpFetchSession {
    async fn navigate(&mut self, url: &str) -> Result<RenderedPage, FetchError> {
        tracing::debug!("Navigating to {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let host = final_url.host_str().unwrap_or_default().to_string();

        let set_cookies: Vec<SessionCookie> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| SessionCookie::parse_set_cookie(v, &host))
            .collect();
        for cookie in set_cookies {
            self.remember_cookie(cookie);
        }

        let content = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let page = RenderedPage {
            final_url: final_url.to_string(),
            status: Some(status),
            content,
        };
        self.current = Some(page.clone());
        Ok(page)
    }

    fn extract_structured(&self, spec: &ExtractSpec) -> Result<Vec<RawRecord>, FetchError> {
        let Some(page) = &self.current else {
            return Ok(Vec::new());
        };
        let base = Url::parse(&page.final_url).map_err(|e| FetchError::Extraction(e.to_string()))?;
        extract_records(&page.content, spec, &base)
    }

    fn current_url(&self) -> Option<String> {
        self.current.as_ref().map(|p| p.final_url.clone())
    }

    fn install_cookies(&mut self, cookies: &[SessionCookie]) -> Result<(), FetchError> {
        for cookie in cookies {
            let origin = format!("https://{}/", cookie.domain.trim_start_matches('.'));
            let url = Url::parse(&origin).map_err(|e| FetchError::Navigation {
                url: origin.clone(),
                message: e.to_string(),
            })?;
            self.jar.add_cookie_str(&cookie.to_header(), &url);
            self.remember_cookie(cookie.clone());
        }
        tracing::debug!("Installed {} cookie(s)", cookies.len());
        Ok(())
    }

    fn export_cookies(&self) -> Vec<SessionCookie> {
        self.cookies.clone()
    }

    fn clear_cookies(&mut self) -> Result<(), FetchError> {
        // reqwest jars cannot forget cookies, so the client is rebuilt
        self.jar = Arc::new(Jar::default());
        self.client = build_http_client(&self.config, Arc::clone(&self.jar))
            .map_err(|e| FetchError::SessionClosed(e.to_string()))?;
        self.cookies.clear();
        Ok(())
    }
}
