//! Human-plausible request pacing
//!
//! This module keeps the request cadence inside human-looking bounds:
//! - Time-of-day delay windows sampled uniformly before each fetch
//! - Occasional categorized "technical breaks"
//! - Longer pauses between sibling entities
//! - A lightweight anomaly signal that forces one emergency pause
//!
//! Pacing never fails. An unusable window degrades to the longest configured
//! delay.

use crate::config::{DelayWindow, PacingConfig};
use crate::crawler::suspend::{Cancelled, Suspender};
use chrono::Timelike;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Wall-clock bucket selecting a delay window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayPart {
    Night,
    Morning,
    Day,
    Evening,
}

impl DayPart {
    /// Buckets a local hour (0-23)
    pub fn for_hour(hour: u32) -> Self {
        match hour {
            0..=5 => Self::Night,
            6..=11 => Self::Morning,
            12..=17 => Self::Day,
            _ => Self::Evening,
        }
    }
}

/// Categories of technical break and their duration ranges in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakKind {
    NotificationCheck,
    TabSwitch,
    CoffeeBreak,
}

impl BreakKind {
    const ALL: [BreakKind; 3] = [Self::NotificationCheck, Self::TabSwitch, Self::CoffeeBreak];

    fn range_secs(&self) -> (u64, u64) {
        match self {
            Self::NotificationCheck => (5, 15),
            Self::TabSwitch => (15, 45),
            Self::CoffeeBreak => (120, 300),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotificationCheck => "notification check",
            Self::TabSwitch => "tab switch",
            Self::CoffeeBreak => "coffee break",
        }
    }
}

/// Delay sampler with anomaly tracking; one instance per run
pub struct PacingSimulator {
    config: PacingConfig,
    rng: StdRng,
    arrivals: VecDeque<Instant>,
    suspicious: bool,
    emergency_breaks: u32,
}

impl PacingSimulator {
    pub fn new(config: &PacingConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Deterministic sampler for reproducible runs
    pub fn with_seed(config: &PacingConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &PacingConfig, rng: StdRng) -> Self {
        Self {
            config: config.clone(),
            rng,
            arrivals: VecDeque::new(),
            suspicious: false,
            emergency_breaks: 0,
        }
    }

    fn window(&self, part: DayPart) -> DelayWindow {
        match part {
            DayPart::Night => self.config.night,
            DayPart::Morning => self.config.morning,
            DayPart::Day => self.config.day,
            DayPart::Evening => self.config.evening,
        }
    }

    fn longest_delay(&self) -> Duration {
        let longest = [
            self.config.night,
            self.config.morning,
            self.config.day,
            self.config.evening,
        ]
        .iter()
        .map(|w| w.min_ms.max(w.max_ms))
        .max()
        .unwrap_or(0);
        Duration::from_millis(longest)
    }

    fn sample(&mut self, window: DelayWindow) -> Duration {
        if window.min_ms > window.max_ms {
            return self.longest_delay();
        }
        Duration::from_millis(self.rng.random_range(window.min_ms..=window.max_ms))
    }

    /// Samples the pre-fetch delay for a local hour
    pub fn delay_for_hour(&mut self, hour: u32) -> Duration {
        let window = self.window(DayPart::for_hour(hour));
        self.sample(window)
    }

    /// Sleeps a delay drawn from the current time-of-day window
    pub async fn smart_delay(&mut self, suspender: &Suspender) -> Result<(), Cancelled> {
        let hour = chrono::Local::now().hour();
        let delay = self.delay_for_hour(hour);
        suspender.pause(delay, "pacing delay").await
    }

    /// Rolls for a technical break without taking it
    pub fn roll_break(&mut self) -> Option<(BreakKind, Duration)> {
        let probability = self.config.break_probability.clamp(0.0, 1.0);
        if !self.rng.random_bool(probability) {
            return None;
        }

        let kind = BreakKind::ALL[self.rng.random_range(0..BreakKind::ALL.len())];
        let (min, max) = kind.range_secs();
        Some((kind, Duration::from_secs(self.rng.random_range(min..=max))))
    }

    /// Rolls for a technical break; returns the kind taken, if any
    pub async fn maybe_break(
        &mut self,
        suspender: &Suspender,
    ) -> Result<Option<BreakKind>, Cancelled> {
        let Some((kind, duration)) = self.roll_break() else {
            return Ok(None);
        };
        suspender.pause(duration, kind.as_str()).await?;
        Ok(Some(kind))
    }

    /// Pause inserted between sibling entities
    pub async fn sibling_pause(&mut self, suspender: &Suspender) -> Result<(), Cancelled> {
        let delay = self.sample(self.config.sibling);
        suspender.pause(delay, "sibling pause").await
    }

    /// Records a request arrival and updates the anomaly signal
    pub fn record_arrival(&mut self) {
        self.record_arrival_at(Instant::now());
    }

    fn record_arrival_at(&mut self, now: Instant) {
        let min_interval = Duration::from_millis(self.config.min_interval_ms);
        if let Some(last) = self.arrivals.back() {
            if now.duration_since(*last) < min_interval {
                self.flag("interval below minimum");
            }
        }

        self.arrivals.push_back(now);
        let window = Duration::from_secs(self.config.burst_window_secs);
        while let Some(first) = self.arrivals.front() {
            if now.duration_since(*first) > window {
                self.arrivals.pop_front();
            } else {
                break;
            }
        }

        if self.arrivals.len() > self.config.burst_ceiling as usize {
            self.flag("burst ceiling exceeded");
        }
    }

    fn flag(&mut self, reason: &str) {
        if !self.suspicious {
            tracing::warn!("Suspicious request pattern: {}", reason);
        }
        self.suspicious = true;
    }

    pub fn is_suspicious(&self) -> bool {
        self.suspicious
    }

    pub fn emergency_breaks(&self) -> u32 {
        self.emergency_breaks
    }

    /// Takes one long pause if the anomaly signal tripped, then clears it
    pub async fn emergency_break_if_flagged(
        &mut self,
        suspender: &Suspender,
    ) -> Result<bool, Cancelled> {
        if !self.suspicious {
            return Ok(false);
        }

        self.emergency_breaks += 1;
        suspender
            .pause(
                Duration::from_secs(self.config.emergency_pause_secs),
                "emergency pause",
            )
            .await?;
        self.suspicious = false;
        self.arrivals.clear();
        Ok(true)
    }
}
