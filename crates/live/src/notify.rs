// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! User-facing reports from the optimistic update tracker.
//!
//! The tracker never swallows a failed update: every terminal rollback ends
//! in exactly one [`UpdateNotifier::failed`] call, carrying a [`ManualRetry`]
//! the UI can offer to the user.

use std::fmt;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{Error, Result, UpdateError};
use crate::tracker::{Entity, MutationRequest, WeakTracker};

/// An update is being retried automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryNotice {
    pub update_id: String,
    pub entity_id: String,
    /// Retries made so far, including the one being scheduled.
    pub retry_count: u32,
    pub max_retries: u32,
    /// Wait before the retry is sent.
    pub delay: Duration,
    /// What went wrong with the previous try.
    pub reason: UpdateError,
}

impl RetryNotice {
    /// Short text for a status line or toast.
    pub fn message(&self) -> String {
        format!("Retrying update ({}/{}): {}", self.retry_count, self.max_retries, self.reason)
    }
}

/// An update was rolled back for good.
#[derive(Debug)]
pub struct UpdateFailure<T: Entity> {
    pub update_id: String,
    pub entity_id: String,
    pub reason: UpdateError,
    /// Automatic retries made before giving up.
    pub retry_count: u32,
    /// True if the retry budget was spent; false if the connection was down.
    pub retries_exhausted: bool,
    /// Re-applies the same change as a new update.
    pub retry: ManualRetry<T>,
}

impl<T: Entity> UpdateFailure<T> {
    /// Short text for a status line or toast.
    pub fn message(&self) -> String {
        format!("Update failed: {}", self.reason)
    }
}

/// Re-applies a failed update with its original and speculative values.
pub struct ManualRetry<T: Entity> {
    pub(crate) tracker: WeakTracker<T>,
    pub(crate) original: T,
    pub(crate) speculative: T,
    pub(crate) request: MutationRequest,
}

impl<T: Entity> ManualRetry<T> {
    /// The value before the change.
    pub fn original(&self) -> &T {
        &self.original
    }

    /// The value the change tried to set.
    pub fn speculative(&self) -> &T {
        &self.speculative
    }

    /// Applies the change again. Returns the new update id.
    pub fn retry(self) -> Result<String> {
        let tracker = self.tracker.upgrade().ok_or(Error::Shutdown)?;
        tracker.apply(self.original, self.speculative, self.request.kind, self.request.extra)
    }
}

impl<T: Entity> fmt::Debug for ManualRetry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualRetry")
            .field("entity_id", &self.original.entity_id())
            .field("kind", &self.request.kind)
            .finish()
    }
}

/// Receives retry notices and terminal failures.
pub trait UpdateNotifier<T: Entity>: Send + Sync {
    /// An automatic retry has been scheduled.
    fn retrying(&self, _notice: &RetryNotice) {}

    /// An update was rolled back permanently.
    fn failed(&self, failure: UpdateFailure<T>);
}

impl<T, F> UpdateNotifier<T> for F
where
    T: Entity,
    F: Fn(UpdateFailure<T>) + Send + Sync,
{
    fn failed(&self, failure: UpdateFailure<T>) {
        self(failure)
    }
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl<T: Entity> UpdateNotifier<T> for LogNotifier {
    fn retrying(&self, notice: &RetryNotice) {
        info!(update_id = %notice.update_id, "{}", notice.message());
    }

    fn failed(&self, failure: UpdateFailure<T>) {
        warn!(
            update_id = %failure.update_id,
            entity_id = %failure.entity_id,
            retries = failure.retry_count,
            "{}",
            failure.message()
        );
    }
}

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
