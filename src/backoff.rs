//! Retry delay policies shared by the driver, the SSH dialer, and the log
//! streaming client.
//!
//! Two shapes are provided: a fixed count of attempts separated by a constant
//! delay, and an exponential schedule whose total elapsed time is capped.
//! Neither policy sleeps on its own; callers ask for the next delay and decide
//! how to wait so the wait can race a cancellation signal.

use std::time::Duration;

use tokio::time::Instant;

/// Fixed number of attempts separated by a constant delay.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FixedBackoff {
    attempts: u32,
    delay: Duration,
}

impl FixedBackoff {
    /// Creates a policy allowing `attempts` tries with `delay` between them.
    /// A zero attempt count is raised to one.
    #[must_use]
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        let clamped = if attempts == 0 { 1 } else { attempts };
        Self {
            attempts: clamped,
            delay,
        }
    }

    /// Total number of attempts permitted.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay between consecutive attempts.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Returns the delay to wait after the zero-based `attempt` failed, or
    /// `None` when that was the final attempt.
    #[must_use]
    pub const fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt + 1 >= self.attempts {
            None
        } else {
            Some(self.delay)
        }
    }
}

/// Settings for an exponential schedule. Cheap to copy; call
/// [`ExponentialSettings::start`] to obtain a stateful [`ExponentialBackoff`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ExponentialSettings {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Upper bound on any single delay.
    pub max_interval: Duration,
    /// Total wall-clock budget measured from [`ExponentialSettings::start`].
    pub max_elapsed: Duration,
}

impl ExponentialSettings {
    /// Ten-second budget starting at half a second, doubling each time.
    pub const DEFAULT: Self = Self {
        initial_interval: Duration::from_millis(500),
        max_interval: Duration::from_secs(60),
        max_elapsed: Duration::from_secs(10),
    };

    /// Returns a copy with a different elapsed-time cap.
    #[must_use]
    pub const fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    /// Starts the clock and returns the stateful schedule.
    #[must_use]
    pub fn start(self) -> ExponentialBackoff {
        ExponentialBackoff {
            settings: self,
            current: self.initial_interval,
            started: Instant::now(),
        }
    }
}

impl Default for ExponentialSettings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Doubling delay schedule bounded by a total elapsed-time budget.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    settings: ExponentialSettings,
    current: Duration,
    started: Instant,
}

impl ExponentialBackoff {
    /// Returns the next delay, or `None` once sleeping for it would overrun
    /// the elapsed-time budget.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        let elapsed = self.started.elapsed();
        let delay = self.current.min(self.settings.max_interval);
        if elapsed.saturating_add(delay) > self.settings.max_elapsed {
            return None;
        }
        self.current = self
            .current
            .saturating_mul(2)
            .min(self.settings.max_interval);
        Some(delay)
    }

    /// Time spent since the schedule started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Restarts the schedule from the initial interval.
    pub fn reset(&mut self) {
        self.current = self.settings.initial_interval;
        self.started = Instant::now();
    }
}
