// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Relay state.
//!
//! Holds the last confirmed value per record and the broadcast channel that
//! fans events out to every connection.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use serde_json::Value;

use pnr_core::{ClockSource, RealtimeEvent, SystemClock};

/// How the relay answers mutations that carry an `updateId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReplyMode {
    /// Store the change, confirm it and broadcast the new status.
    Confirm,
    /// Reject every change.
    Reject,
    /// Never answer.
    Silent,
}

/// An event for every connection, or only for members of one room.
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub room: Option<String>,
    pub event: RealtimeEvent,
}

/// Shared relay state.
#[derive(Clone)]
pub struct RelayState {
    inner: Arc<RelayStateInner>,
}

struct RelayStateInner {
    mode: ReplyMode,
    /// Last confirmed value per record id.
    records: Mutex<HashMap<String, Value>>,
    /// Broadcast channel for fanning events out to clients.
    broadcast_tx: broadcast::Sender<Broadcast>,
    clock: SystemClock,
}

impl RelayState {
    pub fn new(mode: ReplyMode) -> Self {
        // Create broadcast channel with reasonable buffer
        let (broadcast_tx, _) = broadcast::channel(1024);

        RelayState {
            inner: Arc::new(RelayStateInner {
                mode,
                records: Mutex::new(HashMap::new()),
                broadcast_tx,
                clock: SystemClock,
            }),
        }
    }

    pub fn mode(&self) -> ReplyMode {
        self.inner.mode
    }

    /// Current time in milliseconds since Unix epoch.
    pub fn now_ms(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    /// Stores the confirmed value of a record.
    pub async fn store(&self, id: &str, value: Value) {
        self.inner.records.lock().await.insert(id.to_string(), value);
    }

    /// Last confirmed value of a record.
    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn record(&self, id: &str) -> Option<Value> {
        self.inner.records.lock().await.get(id).cloned()
    }

    /// Sends `event` to members of `room`, or to everyone when `room` is `None`.
    pub fn broadcast(&self, room: Option<String>, event: RealtimeEvent) {
        // No receivers is fine
        let _ = self.inner.broadcast_tx.send(Broadcast { room, event });
    }

    /// Subscribe to broadcast messages.
    pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.inner.broadcast_tx.subscribe()
    }
}
