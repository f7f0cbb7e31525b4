//! Session gate
//!
//! Decides whether a run traverses as an authenticated user or as a guest.
//! A stored session is never trusted blindly: it is installed into the fetch
//! session and checked with a live probe against an authenticated-only page,
//! with one alternative probe before it is declared invalid and purged.

mod record;

pub use record::{SessionCookie, SessionRecord};

use crate::config::SessionConfig;
use crate::crawler::{FetchError, FetchSession, RenderedPage};
use chrono::Utc;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Session handling errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Manual authentication required")]
    ManualAuthRequired,

    #[error("Session blob is unreadable: {0}")]
    Corrupt(#[source] serde_json::Error),

    #[error("Session IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fetch session error: {0}")]
    Fetch(#[from] FetchError),
}

/// Traversal mode decided for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Guest,
    Authenticated,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::Authenticated => "authenticated",
        }
    }
}

/// Result of `ensure_session`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStatus {
    pub authenticated: bool,
    pub mode: SessionMode,
}

impl SessionStatus {
    pub fn guest() -> Self {
        Self {
            authenticated: false,
            mode: SessionMode::Guest,
        }
    }

    pub fn authenticated() -> Self {
        Self {
            authenticated: true,
            mode: SessionMode::Authenticated,
        }
    }
}

/// What a single liveness probe concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeOutcome {
    Active,
    Inactive,
    Unreachable,
}

/// Validates, refreshes and persists the authentication session
pub struct SessionGate {
    config: SessionConfig,
    allow_guest: bool,
}

impl SessionGate {
    pub fn new(config: &SessionConfig, allow_guest: bool) -> Self {
        Self {
            config: config.clone(),
            allow_guest,
        }
    }

    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.config.path)
    }

    /// Loads the stored blob; an unreadable blob is purged and treated as absent
    pub fn load(&self) -> Result<Option<SessionRecord>, SessionError> {
        match SessionRecord::load(Path::new(&self.config.path)) {
            Ok(record) => Ok(record),
            Err(SessionError::Corrupt(e)) => {
                tracing::warn!(
                    "Session blob {} is unreadable ({}), discarding",
                    self.config.path,
                    e
                );
                self.purge()?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Decides the traversal mode for this run
    ///
    /// A stored session that cannot be read, installed or probed never fails
    /// the run: the gate falls back to guest mode, or to
    /// `ManualAuthRequired` when guest traversal is disabled.
    ///
    /// # Arguments
    ///
    /// * `session` - The fetch session the run will use; on success it holds
    ///   the stored cookies, on downgrade it is cleared
    ///
    /// # Returns
    ///
    /// * `Ok(SessionStatus)` - Authenticated, or Guest when allowed
    /// * `Err(SessionError::ManualAuthRequired)` - No usable session and guest
    ///   traversal is disabled
    /// * `Err(SessionError::Fetch)` - The fetch session is closed
    pub async fn ensure_session(
        &self,
        session: &mut dyn FetchSession,
    ) -> Result<SessionStatus, SessionError> {
        match self.validate(session).await {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(SessionError::Fetch(e)) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                tracing::warn!("Session validation failed, continuing without it: {}", e);
                match session.clear_cookies() {
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => tracing::warn!("Failed to clear session cookies: {}", e),
                    Ok(()) => {}
                }
            }
        }
        self.downgrade()
    }

    /// Installs and probes the stored session; `None` means it is unusable
    async fn validate(
        &self,
        session: &mut dyn FetchSession,
    ) -> Result<Option<SessionStatus>, SessionError> {
        let Some(record) = self.load()? else {
            tracing::info!("No stored session found");
            return Ok(None);
        };

        let age = record.age_at(Utc::now());
        let stale_after_secs = self.config.stale_after_hours.saturating_mul(3600);
        if u64::try_from(age.num_seconds()).unwrap_or(0) > stale_after_secs {
            tracing::warn!(
                "Stored session is {}h old (threshold {}h), validating anyway",
                age.num_hours(),
                self.config.stale_after_hours
            );
        }

        if let Err(e) = session.install_cookies(&record.cookies) {
            if e.is_fatal() {
                return Err(e.into());
            }
            tracing::warn!("Stored session cannot be installed ({}), purging it", e);
            self.purge()?;
            session.clear_cookies()?;
            return Ok(None);
        }

        let primary = self.probe(session, &self.config.probe_url).await?;
        if primary == ProbeOutcome::Active {
            tracing::info!("Stored session is active");
            return Ok(Some(SessionStatus::authenticated()));
        }

        let fallback = match &self.config.fallback_probe_url {
            Some(url) => {
                tracing::debug!("Primary probe was {:?}, trying alternative probe", primary);
                Some(self.probe(session, url).await?)
            }
            None => None,
        };
        if fallback == Some(ProbeOutcome::Active) {
            tracing::info!("Stored session is active (alternative probe)");
            return Ok(Some(SessionStatus::authenticated()));
        }

        let unreachable =
            primary == ProbeOutcome::Unreachable || fallback == Some(ProbeOutcome::Unreachable);
        if unreachable {
            tracing::warn!("Session probe unreachable, keeping stored session for a later run");
        } else {
            tracing::warn!("Stored session is no longer valid, purging it");
            self.purge()?;
        }

        session.clear_cookies()?;
        Ok(None)
    }

    /// Persists cookies obtained through manual authentication
    pub fn complete_manual_auth(
        &self,
        cookies: Vec<SessionCookie>,
    ) -> Result<SessionRecord, SessionError> {
        let record = SessionRecord::new(cookies);
        record.save(Path::new(&self.config.path))?;
        tracing::info!(
            "Stored new session with {} cookie(s) at {}",
            record.cookies.len(),
            self.config.path
        );
        Ok(record)
    }

    /// Re-persists the cookies of a session that was validated, picking up
    /// any the platform rotated during the run
    pub fn refresh(&self, session: &dyn FetchSession) -> Result<SessionRecord, SessionError> {
        self.complete_manual_auth(session.export_cookies())
    }

    /// Deletes the stored blob; returns true if one existed
    pub fn purge(&self) -> Result<bool, SessionError> {
        match std::fs::remove_file(&self.config.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn downgrade(&self) -> Result<SessionStatus, SessionError> {
        if self.allow_guest {
            tracing::info!("Continuing in guest mode");
            Ok(SessionStatus::guest())
        } else {
            Err(SessionError::ManualAuthRequired)
        }
    }

    async fn probe(
        &self,
        session: &mut dyn FetchSession,
        url: &str,
    ) -> Result<ProbeOutcome, SessionError> {
        match session.navigate(url).await {
            Ok(page) => Ok(self.judge(url, &page)),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                tracing::debug!("Probe {} failed ({}): {}", url, e.class(), e);
                Ok(ProbeOutcome::Unreachable)
            }
        }
    }

    /// An active session answers with success, stays on the probed path, and
    /// shows an active marker when markers are configured
    fn judge(&self, url: &str, page: &RenderedPage) -> ProbeOutcome {
        if let Some(status) = page.status {
            if status >= 500 {
                return ProbeOutcome::Unreachable;
            }
            if !(200..300).contains(&status) {
                return ProbeOutcome::Inactive;
            }
        }

        let same_path = match (url::Url::parse(url), url::Url::parse(&page.final_url)) {
            (Ok(requested), Ok(landed)) => requested.path() == landed.path(),
            _ => true,
        };
        if !same_path {
            return ProbeOutcome::Inactive;
        }

        if self.config.active_markers.is_empty()
            || self
                .config
                .active_markers
                .iter()
                .any(|marker| page.content.contains(marker.as_str()))
        {
            ProbeOutcome::Active
        } else {
            ProbeOutcome::Inactive
        }
    }
}
