//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `CrawlPhase`: where the hierarchy crawler currently is in its traversal
//! - `RunReport`: the best-effort result of a run, with its status and the
//!   branches left for a future run

mod phase;
mod report;

pub use phase::CrawlPhase;
pub use report::{BranchIssue, HaltReason, IssueKind, LevelTally, RunReport, RunStatus};
