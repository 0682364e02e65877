// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers: a scripted in-memory connector and a sample entity.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use pnr_core::{EventKind, RealtimeEvent};

use crate::notify::{UpdateFailure, UpdateNotifier};
use crate::transport::{ConnectFuture, Connector, Link, LinkEvent, TransportError};
use crate::tracker::Entity;

pub const URL: &str = "ws://mock.test/live";

/// What the next connection attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    Refuse,
    /// Never completes; only the connect timeout ends it.
    Hang,
}

/// The server side of an accepted mock link.
pub struct MockPeer {
    pub outbound: mpsc::UnboundedReceiver<RealtimeEvent>,
    pub inbound: mpsc::UnboundedSender<LinkEvent>,
}

impl MockPeer {
    /// Drains every frame the client has sent so far.
    pub fn sent(&mut self) -> Vec<RealtimeEvent> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Drains sent frames and keeps those of `kind`.
    pub fn sent_of(&mut self, kind: impl Into<EventKind>) -> Vec<RealtimeEvent> {
        let kind = kind.into();
        self.sent().into_iter().filter(|e| e.kind == kind).collect()
    }

    /// Pushes a frame to the client.
    pub fn push(&self, kind: impl Into<EventKind>, data: Value) {
        let event = RealtimeEvent::new(kind, data, 1);
        self.inbound.send(LinkEvent::Message(event)).unwrap();
    }

    /// Closes the link from the server side.
    pub fn close(&self, reason: &str) {
        self.inbound.send(LinkEvent::Closed(reason.to_string())).unwrap();
    }
}

#[derive(Default)]
struct MockState {
    script: VecDeque<Outcome>,
    attempts: Vec<Instant>,
    urls: Vec<String>,
    peers: VecDeque<MockPeer>,
    next_id: u32,
}

/// In-memory connector driven by a script of outcomes.
pub struct MockConnector {
    default: Mutex<Outcome>,
    state: Mutex<MockState>,
}

impl MockConnector {
    pub fn new(default: Outcome) -> Arc<Self> {
        Arc::new(MockConnector { default: Mutex::new(default), state: Mutex::default() })
    }

    /// Queues outcomes for the next attempts, ahead of the default.
    pub fn script(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.state.lock().unwrap().script.extend(outcomes);
    }

    pub fn set_default(&self, outcome: Outcome) {
        *self.default.lock().unwrap() = outcome;
    }

    /// When each attempt started.
    pub fn attempts(&self) -> Vec<Instant> {
        self.state.lock().unwrap().attempts.clone()
    }

    /// URLs dialed, in order.
    pub fn urls(&self) -> Vec<String> {
        self.state.lock().unwrap().urls.clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.state.lock().unwrap().attempts.len()
    }

    /// Gaps between consecutive attempts, in milliseconds.
    pub fn gaps_ms(&self) -> Vec<u128> {
        self.attempts().windows(2).map(|w| (w[1] - w[0]).as_millis()).collect()
    }

    /// Takes the oldest accepted link not yet taken.
    pub fn take_peer(&self) -> MockPeer {
        self.state.lock().unwrap().peers.pop_front().unwrap()
    }
}

impl Connector for MockConnector {
    fn connect(&self, url: &str) -> ConnectFuture {
        let mut state = self.state.lock().unwrap();
        state.attempts.push(Instant::now());
        state.urls.push(url.to_string());
        let outcome = state.script.pop_front().unwrap_or(*self.default.lock().unwrap());

        match outcome {
            Outcome::Accept => {
                let (outbound, outbound_rx) = mpsc::unbounded_channel();
                let (inbound_tx, inbound) = mpsc::unbounded_channel();
                state.next_id += 1;
                let connection_id = format!("mock-{}", state.next_id);
                state.peers.push_back(MockPeer { outbound: outbound_rx, inbound: inbound_tx });
                Box::pin(async move { Ok(Link { connection_id, outbound, inbound }) })
            }
            Outcome::Refuse => Box::pin(async {
                Err(TransportError::ConnectionFailed("connection refused".into()))
            }),
            Outcome::Hang => Box::pin(std::future::pending()),
        }
    }
}

/// Lets spawned tasks run without moving far along the timeline.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Sample entity: a reservation record and its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PnrRecord {
    pub id: String,
    pub status: String,
}

impl PnrRecord {
    pub fn new(id: &str, status: &str) -> Self {
        PnrRecord { id: id.to_string(), status: status.to_string() }
    }
}

impl Entity for PnrRecord {
    fn entity_id(&self) -> &str {
        &self.id
    }
}

/// Notifier that records every call.
#[derive(Default)]
pub struct RecordingNotifier {
    pub retries: Mutex<Vec<(String, u32)>>,
    pub failures: Mutex<Vec<UpdateFailure<PnrRecord>>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failure_count(&self) -> usize {
        self.failures.lock().unwrap().len()
    }

    pub fn retry_counts(&self) -> Vec<u32> {
        self.retries.lock().unwrap().iter().map(|(_, n)| *n).collect()
    }
}

impl UpdateNotifier<PnrRecord> for RecordingNotifier {
    fn retrying(&self, notice: &crate::notify::RetryNotice) {
        self.retries.lock().unwrap().push((notice.update_id.clone(), notice.retry_count));
    }

    fn failed(&self, failure: UpdateFailure<PnrRecord>) {
        self.failures.lock().unwrap().push(failure);
    }
}
