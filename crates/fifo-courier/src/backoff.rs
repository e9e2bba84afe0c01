//! # Backoff Policy Module
//!
//! Computes how long the poll loop waits after an empty receive and after a
//! transient transport failure.
//!
//! Idle waits are a bounded constant; transient waits grow exponentially with
//! jitter so many consumers failing together do not retry in lockstep.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for idle waits, matching the service-side long-poll cap
pub const MAX_IDLE_DELAY: Duration = Duration::from_secs(20);

/// Why the loop is waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// The last receive returned no messages
    Idle,
    /// The last receive or delete failed with a transient transport error
    Transient,
}

/// Backoff configuration in serializable form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub idle_delay_ms: u64,
    pub base_ms: u64,
    pub max_ms: u64,
    pub jitter_percent: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            idle_delay_ms: 1_000,
            base_ms: 200,
            max_ms: 30_000,
            jitter_percent: 0.5,
        }
    }
}

/// Backoff policy for the poll loop
///
/// # Examples
///
/// ```rust
/// use fifo_courier::backoff::{BackoffKind, BackoffPolicy};
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::new(
///     Duration::from_secs(1),
///     Duration::from_millis(100),
///     Duration::from_secs(5),
/// )
/// .without_jitter();
///
/// assert_eq!(policy.next_delay(0, BackoffKind::Transient), Duration::from_millis(100));
/// assert_eq!(policy.next_delay(3, BackoffKind::Transient), Duration::from_millis(800));
/// assert_eq!(policy.next_delay(10, BackoffKind::Transient), Duration::from_secs(5));
/// assert_eq!(policy.next_delay(10, BackoffKind::Idle), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Wait after an empty cycle
    pub idle_delay: Duration,

    /// Wait before the first retry after a transient failure
    pub base: Duration,

    /// Cap for transient waits, jitter included
    pub max: Duration,

    /// Whether to add jitter to transient delays
    pub use_jitter: bool,

    /// Jitter range as a fraction of the computed delay (default 0.5 = ±50%)
    pub jitter_percent: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

impl BackoffPolicy {
    /// Create a new backoff policy with ±50% jitter.
    ///
    /// `idle_delay` is clamped to [`MAX_IDLE_DELAY`] and `max` is raised to
    /// `base` if it is smaller.
    pub fn new(idle_delay: Duration, base: Duration, max: Duration) -> Self {
        Self {
            idle_delay: idle_delay.min(MAX_IDLE_DELAY),
            base,
            max: max.max(base),
            use_jitter: true,
            jitter_percent: 0.5,
        }
    }

    /// Build from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.idle_delay_ms),
            Duration::from_millis(config.base_ms),
            Duration::from_millis(config.max_ms),
        )
        .with_jitter_percent(config.jitter_percent)
    }

    /// Disable jitter
    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Set custom jitter percentage (0.0 to 1.0). Non-finite values disable
    /// jitter.
    pub fn with_jitter_percent(mut self, percent: f64) -> Self {
        self.jitter_percent = if percent.is_finite() {
            percent.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Un-jittered transient delay: `base * 2^attempt`, capped at `max`.
    ///
    /// Non-decreasing in `attempt`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay before the next cycle, using the thread-local RNG for jitter
    pub fn next_delay(&self, attempt: u32, kind: BackoffKind) -> Duration {
        self.next_delay_with_rng(attempt, kind, &mut rand::thread_rng())
    }

    /// Delay before the next cycle with an explicit jitter source.
    ///
    /// Transient delays always fall within `[0, max]`.
    pub fn next_delay_with_rng<R: Rng>(
        &self,
        attempt: u32,
        kind: BackoffKind,
        rng: &mut R,
    ) -> Duration {
        match kind {
            BackoffKind::Idle => self.idle_delay,
            BackoffKind::Transient => {
                let delay = self.base_delay(attempt);
                if !self.use_jitter || self.jitter_percent == 0.0 || delay.is_zero() {
                    return delay;
                }

                let delay_secs = delay.as_secs_f64();
                let jitter_range = delay_secs * self.jitter_percent;
                let jitter = rng.gen_range(-jitter_range..=jitter_range);
                let jittered = (delay_secs + jitter).clamp(0.0, self.max.as_secs_f64());

                Duration::from_secs_f64(jittered)
            }
        }
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
