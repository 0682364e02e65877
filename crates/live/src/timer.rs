// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Abortable background tasks.
//!
//! Every timer armed by the connection manager or the tracker is a spawned
//! task owned by a [`Timer`]. Dropping the guard aborts the task, so a record
//! that is removed can never leave a live timer behind.

use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;

/// Guard for a spawned task; aborts it on drop.
#[derive(Debug)]
pub struct Timer {
    handle: Option<AbortHandle>,
}

impl Timer {
    /// Runs `f` after `delay` unless the guard is cancelled or dropped first.
    pub fn after<F>(delay: Duration, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        })
    }

    /// Spawns `fut` under this guard.
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut).abort_handle();
        Timer { handle: Some(handle) }
    }

    /// Aborts the task.
    pub fn cancel(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Releases the task without aborting it.
    ///
    /// Used when the task itself is the one retiring its guard.
    pub fn detach(mut self) {
        self.handle = None;
    }

    /// Returns true once the task has run to completion or been aborted.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(AbortHandle::is_finished)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
#[path = "timer_tests.rs"]
mod tests;
