// crates/ledger-bridge-core/src/retry.rs
// ============================================================================
// Module: Retry Executor
// Description: Bounded retry with capped exponential backoff for async calls.
// Purpose: Absorb transient engine failures without masking permanent ones.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! [`RetryExecutor`] runs an async operation up to [`RetryPolicy::attempts`]
//! times. After a failed attempt `n` it waits
//! `min(base_backoff * 2^(n-1), max_backoff)` before trying again. Callers can
//! supply a predicate to stop early on failures that are not worth retrying
//! and an observer that sees each labeled retry before its backoff sleep.
//!
//! ## Invariants
//! - The operation runs at least once and at most `attempts()` times.
//! - The returned error is the final attempt's error, unchanged.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::time::Duration;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Largest exponent applied to the base backoff.
const MAX_BACKOFF_EXPONENT: u32 = 30;

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Retry budget and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; zero is treated as one.
    pub max_attempts: u32,
    /// Backoff after the first failed attempt.
    pub base_backoff: Duration,
    /// Upper bound on any single backoff.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Creates a retry policy.
    #[must_use]
    pub const fn new(max_attempts: u32, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            base_backoff,
            max_backoff,
        }
    }

    /// Policy that runs the operation exactly once.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Returns the effective number of attempts.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        if self.max_attempts == 0 { 1 } else { self.max_attempts }
    }

    /// Returns the backoff that follows failed attempt `attempt` (1-based).
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.base_backoff
            .checked_mul(1_u32 << exponent)
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200), Duration::from_secs(5))
    }
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// Details about a failed attempt that is about to be retried.
#[derive(Debug)]
pub struct RetryNotice<'a, E> {
    /// Caller-supplied label naming the operation.
    pub label: &'a str,
    /// Attempt that just failed (1-based).
    pub attempt: u32,
    /// Effective attempt budget.
    pub max_attempts: u32,
    /// Backoff before the next attempt.
    pub delay: Duration,
    /// Failure from the attempt.
    pub error: &'a E,
}

/// Runs async operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryExecutor {
    /// Retry budget and backoff schedule.
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Creates an executor for `policy`.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
        }
    }

    /// Returns the executor's policy.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Runs `operation`, retrying every failure until the budget is spent.
    ///
    /// The operation receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the final attempt's error when every attempt fails.
    pub async fn retry<T, E, F, Fut>(&self, label: &str, operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.retry_if(label, operation, |_| true, |_| {}).await
    }

    /// Runs `operation`, retrying failures accepted by `should_retry`.
    ///
    /// `on_retry` observes each failure that will be retried before the
    /// backoff sleep begins.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable error, or the final attempt's error
    /// when the budget is spent.
    pub async fn retry_if<T, E, F, Fut, P, O>(
        &self,
        label: &str,
        mut operation: F,
        should_retry: P,
        mut on_retry: O,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        O: FnMut(RetryNotice<'_, E>),
    {
        let max_attempts = self.policy.attempts();
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= max_attempts || !should_retry(&error) {
                        return Err(error);
                    }
                    let delay = self.policy.backoff_for(attempt);
                    on_retry(RetryNotice {
                        label,
                        attempt,
                        max_attempts,
                        delay,
                        error: &error,
                    });
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
