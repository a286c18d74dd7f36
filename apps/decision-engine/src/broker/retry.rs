//! Exponential backoff for transient broker failures.
//!
//! `max_attempts` counts total submissions, so a policy of 3 yields the
//! first try plus two retries. Jitter spreads retries out so a fleet of
//! engines does not hammer a recovering broker in lockstep.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy for broker API calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total submission attempts, first try included.
    pub max_attempts: u32,
    /// Backoff before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound on any single backoff, in milliseconds.
    pub max_backoff_ms: u64,
    /// Growth factor per retry.
    pub backoff_multiplier: f64,
    /// Jitter as a fraction of the backoff (0.2 means plus or minus 20%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries (used by tests and one-shot tools).
    #[must_use]
    pub const fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }
}

/// Iterator-style backoff sequence for one submission.
///
/// Yields one duration per permitted retry, `None` once the attempt
/// budget is spent.
#[derive(Debug)]
pub struct BackoffSchedule {
    policy: RetryPolicy,
    retries_issued: u32,
}

impl BackoffSchedule {
    /// Fresh schedule for one order submission.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retries_issued: 0,
        }
    }

    /// Next backoff, or `None` when attempts are exhausted.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries_issued + 1 >= self.policy.max_attempts {
            return None;
        }

        let base_ms = self.base_backoff_ms();
        let jittered_ms = self.apply_jitter(base_ms).min(self.policy.max_backoff_ms);
        self.retries_issued += 1;

        Some(Duration::from_millis(jittered_ms))
    }

    /// Retries handed out so far.
    #[must_use]
    pub const fn retries_issued(&self) -> u32 {
        self.retries_issued
    }

    fn base_backoff_ms(&self) -> u64 {
        let multiplier = self.policy.backoff_multiplier.powi(self.retries_issued as i32);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let backoff = (self.policy.initial_backoff_ms as f64 * multiplier) as u64;
        backoff.min(self.policy.max_backoff_ms)
    }

    fn apply_jitter(&self, backoff_ms: u64) -> u64 {
        if self.policy.jitter_factor == 0.0 {
            return backoff_ms;
        }

        let mut rng = rand::rng();
        let spread = backoff_ms as f64 * self.policy.jitter_factor;
        let low = (backoff_ms as f64 - spread).max(0.0);
        let high = backoff_ms as f64 + spread;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let jittered = rng.random_range(low..=high) as u64;
        jittered
    }
}

/// HTTP status codes worth retrying beyond the plain 5xx range.
const RETRYABLE_STATUS_CODES: &[u16] = &[
    408, // Request Timeout
    429, // Too Many Requests
];

/// Check if an HTTP status code indicates a transient failure.
#[must_use]
pub fn is_retryable_status(status_code: u16) -> bool {
    (500..600).contains(&status_code) || RETRYABLE_STATUS_CODES.contains(&status_code)
}
