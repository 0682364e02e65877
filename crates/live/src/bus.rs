// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Typed publish/subscribe for realtime events.
//!
//! Handlers are kept per [`EventKind`] in registration order. [`EventBus::dispatch`]
//! runs each one inside its own failure boundary: an `Err` or a panic is
//! logged and counted, and the remaining handlers still run.
//!
//! The registry lock is released before any handler is called, so handlers
//! may subscribe or unsubscribe from within a dispatch. Such changes take
//! effect from the next dispatch.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use tracing::{error, trace};

use pnr_core::{EventKind, RealtimeEvent};

use crate::subscription::Subscription;

/// Error type handlers may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What a handler returns.
pub type HandlerResult = Result<(), BoxError>;

type Handler = Arc<dyn Fn(&RealtimeEvent) -> HandlerResult + Send + Sync>;

/// A handler failure caught by the bus.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(BoxError),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Outcome of one [`EventBus::dispatch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that returned `Ok`.
    pub delivered: usize,
    /// Handlers that returned `Err` or panicked.
    pub failed: usize,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    buckets: HashMap<EventKind, Vec<(u64, Handler)>>,
}

/// Registry of event handlers keyed by event kind.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `handler` for events of `kind`.
    pub fn subscribe<F>(&self, kind: impl Into<EventKind>, handler: F) -> Subscription
    where
        F: Fn(&RealtimeEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let kind = kind.into();
        let id = {
            let mut registry = self.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.buckets.entry(kind.clone()).or_default().push((id, Arc::new(handler)));
            id
        };
        trace!(%kind, id, "handler registered");

        let registry: Weak<Mutex<Registry>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let mut registry = registry.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(bucket) = registry.buckets.get_mut(&kind) {
                bucket.retain(|(handler_id, _)| *handler_id != id);
                if bucket.is_empty() {
                    registry.buckets.remove(&kind);
                }
            }
        })
    }

    /// Delivers `event` to every handler registered for its kind, in registration order.
    pub fn dispatch(&self, event: &RealtimeEvent) -> DispatchReport {
        let handlers: Vec<Handler> = match self.lock().buckets.get(&event.kind) {
            Some(bucket) => bucket.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return DispatchReport::default(),
        };

        let mut report = DispatchReport::default();
        for handler in handlers {
            match catch_handler(|| handler(event)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    error!(kind = %event.kind, error = %e, "event handler failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: &EventKind) -> usize {
        self.lock().buckets.get(kind).map_or(0, Vec::len)
    }

    /// Returns true if any handler is registered for `kind`.
    pub fn has_handlers(&self, kind: &EventKind) -> bool {
        self.lock().buckets.contains_key(kind)
    }

    /// Drops every registration.
    pub fn clear(&self) {
        self.lock().buckets.clear();
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.lock();
        let mut kinds: Vec<_> = registry.buckets.keys().map(EventKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("EventBus").field("kinds", &kinds).finish()
    }
}

/// Runs one handler call inside a failure boundary.
///
/// An `Err` or a panic comes back as a [`HandlerError`] instead of reaching
/// the caller. Shared with the connection manager's state handlers.
pub(crate) fn catch_handler(f: impl FnOnce() -> HandlerResult) -> Result<(), HandlerError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(HandlerError::Failed(e)),
        Err(payload) => Err(HandlerError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
