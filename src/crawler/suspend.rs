//! Cancellable suspension points
//!
//! Every wait the crawler performs (cooldown, pacing delay, forced pause)
//! goes through a `Suspender`, so operator cancellation is observed between
//! fetches and never in the middle of one.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Returned when cancellation was observed at a suspension point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Sleeps that wake early on cancellation
#[derive(Debug, Clone, Default)]
pub struct Suspender {
    token: CancellationToken,
}

impl Suspender {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fails if cancellation was already requested
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.token.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Suspends for `duration` unless cancelled first
    pub async fn pause(&self, duration: Duration, reason: &str) -> Result<(), Cancelled> {
        self.check()?;
        if duration.is_zero() {
            return Ok(());
        }

        if duration >= Duration::from_secs(5) {
            tracing::info!("Pausing {:.0}s ({})", duration.as_secs_f64(), reason);
        } else {
            tracing::debug!("Pausing {}ms ({})", duration.as_millis(), reason);
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.token.cancelled() => {
                tracing::info!("Cancellation requested during {}", reason);
                Err(Cancelled)
            }
        }
    }
}
