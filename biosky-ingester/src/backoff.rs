//! Reconnect backoff
//!
//! Exponential delay (doubling from `initial`, capped at `max`) with ±20%
//! jitter. Retries are unlimited; [`Backoff::reset`] after a successful
//! connection starts the sequence over.

use rand::Rng;
use std::time::Duration;

pub const DEFAULT_INITIAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX: Duration = Duration::from_secs(60);
const MULTIPLIER: u32 = 2;
const JITTER: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL, DEFAULT_MAX)
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempt: 0,
        }
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Un-jittered delay for a zero-based attempt number
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = MULTIPLIER.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Delay before the next attempt, advancing the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        let jitter = rand::thread_rng().gen_range(-JITTER..=JITTER);
        base.mul_f64(1.0 + jitter)
    }
}
