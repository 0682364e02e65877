// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Live session: the composition root.
//!
//! Owns one event bus, one connection manager and one tracker, wired
//! together. Create it with [`LiveSession::init`] and tear it down with
//! [`LiveSession::destroy`].

use std::sync::Arc;

use tracing::info;

use pnr_core::{ClockSource, SystemClock};

use crate::bus::EventBus;
use crate::config::LiveConfig;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::notify::UpdateNotifier;
use crate::tracker::{Entity, OptimisticTracker};
use crate::transport::{Connector, WebSocketConnector};

/// A realtime session for entities of type `T`.
pub struct LiveSession<T: Entity> {
    config: LiveConfig,
    bus: EventBus,
    connection: ConnectionManager,
    tracker: OptimisticTracker<T>,
}

impl<T: Entity> LiveSession<T> {
    /// Validates `config` and wires the components. Does not connect.
    pub fn init(
        config: LiveConfig,
        connector: Arc<dyn Connector>,
        notifier: Arc<dyn UpdateNotifier<T>>,
    ) -> Result<Self> {
        Self::init_with_clock(config, connector, notifier, Arc::new(SystemClock))
    }

    /// Like [`init`](Self::init) with a custom clock.
    pub fn init_with_clock(
        config: LiveConfig,
        connector: Arc<dyn Connector>,
        notifier: Arc<dyn UpdateNotifier<T>>,
        clock: Arc<dyn ClockSource>,
    ) -> Result<Self> {
        config.validate()?;

        let bus = EventBus::new();
        let connection = ConnectionManager::with_clock(
            config.connection(),
            connector,
            bus.clone(),
            Arc::clone(&clock),
        );
        let tracker =
            OptimisticTracker::with_clock(config.tracker(), connection.clone(), notifier, clock);

        info!(url = %config.url, "live session initialized");
        Ok(LiveSession { config, bus, connection, tracker })
    }

    /// Session over a real WebSocket.
    pub fn websocket(config: LiveConfig, notifier: Arc<dyn UpdateNotifier<T>>) -> Result<Self> {
        Self::init(config, Arc::new(WebSocketConnector::new()), notifier)
    }

    /// Connects to the configured server.
    pub fn connect(&self) {
        self.connection.connect(&self.config.url);
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn tracker(&self) -> &OptimisticTracker<T> {
        &self.tracker
    }

    /// Drops pending updates, closes the connection and removes every handler.
    pub fn destroy(self) {
        self.tracker.clear_all();
        self.tracker.detach();
        self.connection.destroy();
        info!("live session destroyed");
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
