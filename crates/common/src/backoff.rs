//! Reconnect backoff policy.
//!
//! Delay grows linearly with the attempt counter (`base * attempt`), capped at
//! a ceiling. The counter resets on successful authentication, so a healthy
//! session always restarts its next outage from the base delay.

use std::time::Duration;

/// Configuration for reconnect pacing.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay for the first attempt; multiplied by the attempt number after that.
    pub base: Duration,
    /// Ceiling for the computed delay.
    pub max: Duration,
    /// Maximum number of attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            max: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

/// Tracks reconnect attempts and produces the delay before each one.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempt >= self.config.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some((self.config.base * self.attempt).min(self.config.max))
    }

    /// Reset the attempt counter after a successful authentication.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
