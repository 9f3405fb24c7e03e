//! Bounded retry with exponential backoff.

use std::collections::HashSet;
use std::time::Duration;

use crate::error::{ErrorClass, SitemapError};
use crate::types::range::IdRange;

/// Ranges starting above this ID sit in the historically slow region where
/// cold partition scans time out; only they are retried or degraded.
pub const HIGH_ID_THRESHOLD: i64 = 1_000_000;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retry_on: HashSet<ErrorClass>,
    /// Only ranges with `start > min_range_start` are retried
    pub min_range_start: i64,
    /// Wall-clock budget across all attempts; no retry starts past it
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            retry_on: [
                ErrorClass::ConnectionAcquisition,
                ErrorClass::StatementTimeout,
                ErrorClass::Transient,
            ]
            .into_iter()
            .collect(),
            min_range_start: HIGH_ID_THRESHOLD,
            deadline: Duration::from_secs(45),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Whether the range is eligible for retries at all.
    pub fn applies_to(&self, range: &IdRange) -> bool {
        range.start > self.min_range_start
    }

    /// Decide whether to try again after `attempt` (1-based) failed.
    pub fn should_retry(&self, error: &SitemapError, range: &IdRange, attempt: u32) -> bool {
        attempt < self.max_attempts
            && self.applies_to(range)
            && self.retry_on.contains(&error.class())
    }

    /// Delay before the retry that follows failed attempt `attempt`:
    /// 1s, 2s, 4s, ... capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}
