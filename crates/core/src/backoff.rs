// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Exponential backoff with a ceiling.
//!
//! `delay(attempt) = min(base * 2^attempt, cap)` with a zero-based attempt.
//! Shared by reconnection scheduling and optimistic update retries.

use std::time::Duration;

/// Returns the wait before retry number `attempt` (zero-based).
///
/// Overflowing products saturate to `cap`.
pub fn delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let Some(factor) = 1u32.checked_shl(attempt) else {
        return if base.is_zero() { Duration::ZERO } else { cap };
    };
    base.checked_mul(factor).map_or(cap, |d| d.min(cap))
}

/// A base delay and a ceiling, applied through [`delay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay for the first retry.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub cap: Duration,
}

impl BackoffPolicy {
    /// Creates a policy from a base delay and a cap.
    pub fn new(base: Duration, cap: Duration) -> Self {
        BackoffPolicy { base, cap }
    }

    /// Creates a policy from millisecond values.
    pub fn from_millis(base_ms: u64, cap_ms: u64) -> Self {
        Self::new(Duration::from_millis(base_ms), Duration::from_millis(cap_ms))
    }

    /// Returns the wait before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        delay(attempt, self.base, self.cap)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::from_millis(1_000, 30_000)
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
