//! Retry/contention policy
//!
//! Only storage-level lock failures reach a policy. Business errors raised by
//! operations never do, so they are never retried.

use std::fmt::Debug;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use refbatch_core::{UpdateError, UpdateResult};
use refbatch_storage::RefConflict;

// ============================================================================
// Policy Trait
// ============================================================================

/// Decides whether a commit that lost a ref race is attempted again
pub trait RetryPolicy: Send + Sync + Debug {
    /// Whether to retry after attempt `attempt` (1-based) failed with `conflicts`
    fn should_retry(&self, attempt: u32, conflicts: &[RefConflict]) -> bool;

    /// Delay before attempt `attempt + 1`
    fn backoff(&self, attempt: u32) -> Duration;
}

// ============================================================================
// Retry Configuration
// ============================================================================

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    10
}

fn default_max_delay_ms() -> u64 {
    200
}

fn default_jitter() -> bool {
    true
}

/// Bounded retries with capped exponential backoff
///
/// ```ignore
/// let config = RetryConfig::default()
///     .with_max_attempts(3)
///     .with_base_delay_ms(5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total commit attempts including the first (at least 1)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled for each later one
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Randomize each delay within [delay/2, delay]
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Single attempt, never retry
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Set the attempt ceiling
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base delay
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set the delay cap
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Reject nonsensical settings
    pub fn validate(&self) -> UpdateResult<()> {
        if self.max_attempts == 0 {
            return Err(UpdateError::bad_request(
                "retry.max_attempts must be at least 1",
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(UpdateError::bad_request(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }

    /// Un-jittered delay after attempt `attempt` (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(63);
        let delay_ms = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

impl RetryPolicy for RetryConfig {
    fn should_retry(&self, attempt: u32, _conflicts: &[RefConflict]) -> bool {
        attempt < self.max_attempts
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.calculate_delay(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let max = delay.as_micros() as u64;
        Duration::from_micros(rand::thread_rng().gen_range(max / 2..=max))
    }
}

/// Never retries
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn should_retry(&self, _attempt: u32, _conflicts: &[RefConflict]) -> bool {
        false
    }

    fn backoff(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}
