//! Request-volume throttling
//!
//! A rolling counter of requests issued since the last cooldown. When it
//! reaches the configured threshold the next `cooldown_if_needed` suspends
//! for the cooldown duration and then resets the counter. Network outcomes
//! play no part here.

use crate::config::ThrottleConfig;
use crate::crawler::suspend::{Cancelled, Suspender};
use std::time::Duration;

/// Snapshot of the governor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleStats {
    /// Requests since the last cooldown
    pub current: u32,

    /// Requests over the governor's lifetime
    pub total: u64,

    pub cooldowns_triggered: u64,
}

/// Mandatory cooldown after every `threshold` requests
#[derive(Debug, Clone)]
pub struct ThrottleGovernor {
    threshold: u32,
    cooldown: Duration,
    current: u32,
    total: u64,
    cooldowns_triggered: u64,
}

impl ThrottleGovernor {
    pub fn new(config: &ThrottleConfig) -> Self {
        Self {
            threshold: config.request_threshold.max(1),
            cooldown: Duration::from_secs(config.cooldown_secs),
            current: 0,
            total: 0,
            cooldowns_triggered: 0,
        }
    }

    /// Counts one issued request
    pub fn record_request(&mut self) {
        self.current = self.current.saturating_add(1);
        self.total += 1;
    }

    pub fn should_cooldown(&self) -> bool {
        self.current >= self.threshold
    }

    /// Suspends for the cooldown if the threshold was reached
    ///
    /// The counter is only reset after the full cooldown has elapsed; a
    /// cancelled cooldown leaves it untouched.
    pub async fn cooldown_if_needed(&mut self, suspender: &Suspender) -> Result<bool, Cancelled> {
        if !self.should_cooldown() {
            return Ok(false);
        }

        self.cooldowns_triggered += 1;
        tracing::info!(
            "Request threshold {} reached ({} total), cooling down for {}s",
            self.threshold,
            self.total,
            self.cooldown.as_secs()
        );

        suspender.pause(self.cooldown, "request cooldown").await?;
        self.current = 0;
        Ok(true)
    }

    pub fn stats(&self) -> ThrottleStats {
        ThrottleStats {
            current: self.current,
            total: self.total,
            cooldowns_triggered: self.cooldowns_triggered,
        }
    }
}
