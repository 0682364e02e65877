// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Disposer handles returned by subscribe-style calls.

use std::fmt;
use std::sync::Mutex;

type Disposer = Box<dyn FnOnce() + Send>;

/// Removes exactly one registration when [`unsubscribe`](Self::unsubscribe) is called.
///
/// Calling it again is a no-op. Dropping the handle leaves the registration
/// in place.
#[must_use = "dropping a Subscription keeps the handler registered; call unsubscribe() to remove it"]
pub struct Subscription {
    disposer: Mutex<Option<Disposer>>,
}

impl Subscription {
    pub(crate) fn new(disposer: impl FnOnce() + Send + 'static) -> Self {
        Subscription { disposer: Mutex::new(Some(Box::new(disposer))) }
    }

    /// A handle that removes nothing.
    pub fn noop() -> Self {
        Subscription { disposer: Mutex::new(None) }
    }

    /// Removes the registration.
    pub fn unsubscribe(&self) {
        let disposer = self.disposer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(dispose) = disposer {
            dispose();
        }
    }

    /// Returns true until the first call to [`unsubscribe`](Self::unsubscribe).
    pub fn is_active(&self) -> bool {
        self.disposer.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("active", &self.is_active()).finish()
    }
}

#[cfg(test)]
#[path = "subscription_tests.rs"]
mod tests;
