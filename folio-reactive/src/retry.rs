//! Retry policy for transient failures.

use backon::{BackoffBuilder, ExponentialBuilder};
use std::time::Duration;

/// Classifies failures for the retry loop.
///
/// Only transient failures (network drops, timeouts, overloaded upstreams)
/// are retried; everything else surfaces on the first attempt.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt)
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(15),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Fixed short delays, for tests that exercise the retry path.
    pub fn for_testing(max_retries: usize) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            multiplier: 1.0,
        }
    }

    /// Backoff schedule for one attempted operation.
    pub fn builder(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.multiplier)
            .with_max_times(self.max_retries)
    }

    /// Every delay the policy would sleep, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.builder().build().collect()
    }
}
