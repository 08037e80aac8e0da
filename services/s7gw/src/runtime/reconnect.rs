//! Reconnection helpers
//!
//! Step backoff for connect retries and a debounced status flag for the
//! connection-error points published to the host.

use std::time::Duration;

use tracing::debug;

/// Two-step connect backoff
///
/// The first `short_attempts` consecutive failures wait `short`, later ones
/// wait `long`. A success resets the streak. With `short == long` this is a
/// fixed retry interval.
#[derive(Debug, Clone)]
pub struct ConnectBackoff {
    short: Duration,
    long: Duration,
    short_attempts: u32,
    streak: u32,
}

impl ConnectBackoff {
    pub fn new(short: Duration, long: Duration, short_attempts: u32) -> Self {
        Self {
            short,
            long,
            short_attempts,
            streak: 0,
        }
    }

    /// Same delay after every failure
    pub fn fixed(interval: Duration) -> Self {
        Self::new(interval, interval, 0)
    }

    /// Record a failed attempt and return how long to wait before the next one
    pub fn record_failure(&mut self) -> Duration {
        self.streak = self.streak.saturating_add(1);
        let delay = if self.streak > self.short_attempts {
            self.long
        } else {
            self.short
        };
        debug!(streak = self.streak, ?delay, "Connect attempt failed");
        delay
    }

    pub fn reset(&mut self) {
        self.streak = 0;
    }

    /// Consecutive failures since the last success
    pub fn streak(&self) -> u32 {
        self.streak
    }
}

/// Boolean status that only reports changes
#[derive(Debug, Clone, Default)]
pub struct StatusFlag {
    last: Option<bool>,
}

impl StatusFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value when it differs from the last reported one
    ///
    /// The first update always reports.
    pub fn update(&mut self, value: bool) -> Option<bool> {
        if self.last == Some(value) {
            return None;
        }
        self.last = Some(value);
        Some(value)
    }

    pub fn current(&self) -> Option<bool> {
        self.last
    }
}
