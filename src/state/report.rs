use crate::storage::{write_table, StorageResult, TableStore, LAST_RUN_TABLE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome status of a crawl run, as shown to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every branch was enumerated to its end of data
    Completed,

    /// Some branches failed or the run stopped early
    Partial,

    /// The platform blocked at least one branch
    Blocked,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "partial" => Some(Self::Partial),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run stopped before exhausting its traversal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum HaltReason {
    /// Operator cancellation observed at a suspension point
    Cancelled,

    /// The underlying client session is gone
    TransportClosed(String),

    /// Blocking persisted across consecutive fetches
    PersistentBlock,

    /// No session and guest traversal is not permitted
    AuthRequired,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::TransportClosed(detail) => write!(f, "transport closed: {}", detail),
            Self::PersistentBlock => f.write_str("persistent blocking"),
            Self::AuthRequired => f.write_str("manual authentication required"),
        }
    }
}

/// Class of a branch-level problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Block marker detected; branch left for a future run
    Blocked,

    /// Timeout or navigation failure; branch skipped
    Transient,

    /// Branch needs an authenticated session
    AuthRequired,
}

/// A branch that was not fully enumerated in this run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchIssue {
    pub kind: IssueKind,
    pub scope: String,
    pub page: Option<u32>,
    pub detail: String,
}

/// Per-level counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelTally {
    pub pages_fetched: u32,
    pub added: usize,
}

/// Best-effort result of one crawl run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub config_hash: String,
    pub authenticated: bool,
    pub status: RunStatus,
    pub countries: LevelTally,
    pub cities: LevelTally,
    pub locations: LevelTally,
    pub leaf_items: LevelTally,
    pub cache_hits: u32,
    pub requests: u64,
    pub cooldowns: u64,
    pub emergency_breaks: u32,
    pub issues: Vec<BranchIssue>,
    pub halt: Option<HaltReason>,
}

impl RunReport {
    pub fn new(config_hash: &str) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            config_hash: config_hash.to_string(),
            authenticated: false,
            status: RunStatus::Completed,
            countries: LevelTally::default(),
            cities: LevelTally::default(),
            locations: LevelTally::default(),
            leaf_items: LevelTally::default(),
            cache_hits: 0,
            requests: 0,
            cooldowns: 0,
            emergency_breaks: 0,
            issues: Vec::new(),
            halt: None,
        }
    }

    /// Records a branch that must be retried by a future run
    pub fn record_issue(&mut self, kind: IssueKind, scope: &str, page: Option<u32>, detail: &str) {
        self.issues.push(BranchIssue {
            kind,
            scope: scope.to_string(),
            page,
            detail: detail.to_string(),
        });
    }

    /// Branches of a given kind
    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &BranchIssue> {
        self.issues.iter().filter(move |issue| issue.kind == kind)
    }

    /// Stamps the finish time and derives the status
    ///
    /// Any block wins over other problems; any other issue or an early halt
    /// makes the run partial.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());

        let blocked = matches!(self.halt, Some(HaltReason::PersistentBlock))
            || self.issues_of(IssueKind::Blocked).next().is_some();

        self.status = if blocked {
            RunStatus::Blocked
        } else if self.halt.is_some() || !self.issues.is_empty() {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        };
    }

    /// Total new records merged across every level
    pub fn total_added(&self) -> usize {
        self.countries.added + self.cities.added + self.locations.added + self.leaf_items.added
    }

    /// Persists this report as the most recent run
    pub fn save(&self, store: &dyn TableStore) -> StorageResult<()> {
        write_table(store, LAST_RUN_TABLE, self)
    }

    /// Loads the most recent run report, if one is readable
    pub fn load_last(store: &dyn TableStore) -> StorageResult<Option<Self>> {
        let Some(body) = store.load(LAST_RUN_TABLE)? else {
            return Ok(None);
        };
        match serde_json::from_str(&body) {
            Ok(report) => Ok(Some(report)),
            Err(e) => {
                tracing::warn!("Last run report is unreadable: {}", e);
                Ok(None)
            }
        }
    }
}
