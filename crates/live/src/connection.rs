// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Connection manager with automatic reconnection.
//!
//! Owns one logical connection to the realtime server and runs the
//! reconnection state machine:
//!
//! ```text
//! Disconnected ──connect──► Connecting ──ok──► Connected
//!                               ▲  │                │ drop
//!                         timer │  │ fail/timeout   ▼
//!                               └──┴─────────► Reconnecting ──cap──► Failed
//! ```
//!
//! Every attempt, handshake and backoff wait is tagged with an epoch. A manual
//! disconnect or a fresh attempt bumps the epoch, so completions from a
//! superseded attempt are ignored and at most one attempt is in flight.
//!
//! The internal lock is never held while a state handler or bus handler runs.
//! State changes are queued as notices and delivered by one caller at a time,
//! so every handler sees states in the order they happened, even when a
//! handler itself triggers a transition. A failing state handler is logged and
//! does not stop delivery to the others.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use pnr_core::{BackoffPolicy, ClockSource, EventKind, RealtimeEvent, SystemClock};

use crate::bus::{catch_handler, EventBus, HandlerResult};
use crate::subscription::Subscription;
use crate::timer::Timer;
use crate::transport::{Connector, Link, LinkEvent, TransportError, TransportResult};

/// Connection manager settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Max time to wait for the transport handshake.
    pub connect_timeout: Duration,
    /// Reconnection attempts before the manager gives up.
    pub max_reconnect_attempts: u32,
    /// Delay between reconnection attempts.
    pub backoff: BackoffPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            connect_timeout: Duration::from_secs(20),
            max_reconnect_attempts: 10,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Snapshot of the connection, replaced on every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub connected: bool,
    pub connecting: bool,
    pub connection_id: Option<String>,
    /// Milliseconds since Unix epoch.
    pub last_connected_at: Option<u64>,
    pub reconnect_attempts: u32,
    pub error: Option<String>,
}

/// Where the manager is in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out a backoff delay, or for the host to come back online.
    Reconnecting,
    /// Gave up after the attempt cap; only `connect()` leaves this phase.
    Failed,
}

/// Network availability reported by the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    Online,
    Offline,
}

type StateHandler = Arc<dyn Fn(&ConnectionState) + Send + Sync>;

/// A state snapshot waiting to be delivered to the handlers registered when it was taken.
struct Notice {
    state: ConnectionState,
    handlers: Vec<StateHandler>,
}

struct Inner {
    url: Option<String>,
    phase: Phase,
    state: ConnectionState,
    epoch: u64,
    /// Set by `disconnect()`; suppresses every automatic reconnect.
    manual: bool,
    host_online: bool,
    outbound: Option<mpsc::UnboundedSender<RealtimeEvent>>,
    handshake: Option<Timer>,
    reconnect: Option<Timer>,
    reader: Option<Timer>,
    rooms: BTreeSet<String>,
    next_handler_id: u64,
    state_handlers: Vec<(u64, StateHandler)>,
    notices: VecDeque<Notice>,
    /// True while some caller is draining `notices`.
    delivering: bool,
}

struct Shared {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    bus: EventBus,
    clock: Arc<dyn ClockSource>,
    inner: Mutex<Inner>,
}

/// Manages the realtime connection.
///
/// Cloning yields another handle to the same connection. Methods that open
/// connections or arm timers must be called from within a tokio runtime.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Creates a disconnected manager that dispatches inbound events to `bus`.
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>, bus: EventBus) -> Self {
        Self::with_clock(config, connector, bus, Arc::new(SystemClock))
    }

    /// Creates a manager with a custom clock for event timestamps.
    pub fn with_clock(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        bus: EventBus,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        let inner = Inner {
            url: None,
            phase: Phase::Disconnected,
            state: ConnectionState::default(),
            epoch: 0,
            manual: true,
            host_online: true,
            outbound: None,
            handshake: None,
            reconnect: None,
            reader: None,
            rooms: BTreeSet::new(),
            next_handler_id: 0,
            state_handlers: Vec::new(),
            notices: VecDeque::new(),
            delivering: false,
        };
        ConnectionManager {
            shared: Arc::new(Shared { config, connector, bus, clock, inner: Mutex::new(inner) }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs `f` under the lock, then notifies state handlers if the state changed.
    fn transition<R>(&self, f: impl FnOnce(&Self, &mut Inner) -> R) -> R {
        let result = {
            let mut inner = self.lock();
            let before = inner.state.clone();
            let result = f(self, &mut *inner);
            if inner.state != before {
                let handlers = inner.state_handlers.iter().map(|(_, h)| Arc::clone(h)).collect();
                let state = inner.state.clone();
                inner.notices.push_back(Notice { state, handlers });
            }
            result
        };
        self.deliver_notices();
        result
    }

    /// Delivers queued notices in order.
    ///
    /// Only one caller drains at a time. A notice queued meanwhile, including
    /// one queued from inside a handler, is delivered by the caller already
    /// draining, after the notice it is working on.
    fn deliver_notices(&self) {
        {
            let mut inner = self.lock();
            if inner.delivering || inner.notices.is_empty() {
                return;
            }
            inner.delivering = true;
        }

        loop {
            let notice = {
                let mut inner = self.lock();
                match inner.notices.pop_front() {
                    Some(notice) => notice,
                    None => {
                        inner.delivering = false;
                        return;
                    }
                }
            };
            for handler in notice.handlers {
                let delivered = catch_handler(|| {
                    handler(&notice.state);
                    Ok(())
                });
                if let Err(e) = delivered {
                    error!(error = %e, "state handler failed");
                }
            }
        }
    }

    /// Opens a connection to `url`.
    ///
    /// No-op while connected or connecting. From `Failed` the attempt counter
    /// starts over; from `Reconnecting` the backoff wait is skipped.
    pub fn connect(&self, url: &str) {
        self.transition(|this, inner| {
            if matches!(inner.phase, Phase::Connected | Phase::Connecting) {
                debug!(%url, phase = ?inner.phase, "connect ignored: already active");
                return;
            }

            inner.url = Some(url.to_string());
            inner.manual = false;
            match inner.phase {
                Phase::Failed => inner.state.reconnect_attempts = 0,
                Phase::Reconnecting => inner.state.reconnect_attempts += 1,
                _ => {}
            }
            if let Some(timer) = inner.reconnect.take() {
                timer.cancel();
            }
            this.start_attempt(inner);
        });
    }

    /// Closes the connection and stops all recovery.
    pub fn disconnect(&self) {
        self.transition(|_, inner| {
            inner.epoch += 1;
            inner.manual = true;
            for timer in [inner.handshake.take(), inner.reconnect.take(), inner.reader.take()]
                .into_iter()
                .flatten()
            {
                timer.cancel();
            }
            // Dropping the sender closes the link
            inner.outbound = None;

            if inner.phase != Phase::Disconnected {
                info!("disconnected");
            }
            inner.phase = Phase::Disconnected;
            inner.state = ConnectionState {
                last_connected_at: inner.state.last_connected_at,
                ..ConnectionState::default()
            };
        });
    }

    /// Disconnects and drops every handler registration.
    pub fn destroy(&self) {
        self.disconnect();
        self.lock().state_handlers.clear();
        self.shared.bus.clear();
    }

    /// Sends an event if connected. Returns false if the event was dropped.
    pub fn emit(&self, kind: impl Into<EventKind>, data: Value) -> bool {
        let event = RealtimeEvent::new(kind, data, self.shared.clock.now_ms());
        let inner = self.lock();
        match (&inner.phase, &inner.outbound) {
            (Phase::Connected, Some(outbound)) => {
                let kind = event.kind.clone();
                if outbound.send(event).is_err() {
                    warn!(%kind, "link closed; dropping event");
                    return false;
                }
                true
            }
            _ => {
                warn!(kind = %event.kind, phase = ?inner.phase, "not connected; dropping event");
                false
            }
        }
    }

    /// Registers a handler for inbound events of `kind`.
    pub fn subscribe<F>(&self, kind: impl Into<EventKind>, handler: F) -> Subscription
    where
        F: Fn(&RealtimeEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.shared.bus.subscribe(kind, handler)
    }

    /// Registers a state handler and calls it with the current state before returning.
    ///
    /// The current state is queued behind any state already waiting, so the
    /// handler never sees an older state after a newer one. When called from
    /// inside a state handler, delivery happens once that handler returns.
    pub fn on_state_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        let handler: StateHandler = Arc::new(handler);
        let id = {
            let mut inner = self.lock();
            let id = inner.next_handler_id;
            inner.next_handler_id += 1;
            inner.state_handlers.push((id, Arc::clone(&handler)));
            let state = inner.state.clone();
            inner.notices.push_back(Notice { state, handlers: vec![handler] });
            id
        };
        self.deliver_notices();

        let shared = Arc::downgrade(&self.shared);
        Subscription::new(move || {
            if let Some(shared) = shared.upgrade() {
                let mut inner = shared.inner.lock().unwrap_or_else(|e| e.into_inner());
                inner.state_handlers.retain(|(handler_id, _)| *handler_id != id);
            }
        })
    }

    /// Reacts to the host going online or offline.
    ///
    /// Offline cancels a pending backoff wait without counting an attempt.
    /// Online retries at once if the manager is recovering from a dropped
    /// connection and still under the attempt cap.
    pub fn host_signal(&self, signal: HostSignal) {
        self.transition(|this, inner| match signal {
            HostSignal::Offline => {
                inner.host_online = false;
                if let Some(timer) = inner.reconnect.take() {
                    timer.cancel();
                    info!(attempts = inner.state.reconnect_attempts, "host offline; reconnect paused");
                }
            }
            HostSignal::Online => {
                inner.host_online = true;
                let recovering =
                    matches!(inner.phase, Phase::Disconnected | Phase::Reconnecting | Phase::Failed);
                let under_cap =
                    inner.state.reconnect_attempts < this.shared.config.max_reconnect_attempts;
                if inner.manual || !recovering || !under_cap || inner.url.is_none() {
                    debug!(phase = ?inner.phase, "host online; nothing to recover");
                    return;
                }
                if let Some(timer) = inner.reconnect.take() {
                    timer.cancel();
                }
                info!("host online; reconnecting now");
                inner.state.reconnect_attempts += 1;
                this.start_attempt(inner);
            }
        });
    }

    /// Joins a room. The manager re-joins it after every reconnect.
    ///
    /// Returns false if the request could not be sent now.
    pub fn join_room(&self, room_id: &str) -> bool {
        self.lock().rooms.insert(room_id.to_string());
        self.emit(EventKind::JoinRoom, json!({ "roomId": room_id }))
    }

    /// Leaves a room.
    pub fn leave_room(&self, room_id: &str) -> bool {
        self.lock().rooms.remove(room_id);
        self.emit(EventKind::LeaveRoom, json!({ "roomId": room_id }))
    }

    /// Rooms currently joined, sorted.
    pub fn rooms(&self) -> Vec<String> {
        self.lock().rooms.iter().cloned().collect()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.lock().state.clone()
    }

    /// Current state machine phase.
    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// Returns true if the connection is open.
    pub fn is_connected(&self) -> bool {
        self.lock().phase == Phase::Connected
    }

    /// The event bus inbound events are dispatched to.
    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    fn start_attempt(&self, inner: &mut Inner) {
        let Some(url) = inner.url.clone() else {
            return;
        };
        inner.epoch += 1;
        let epoch = inner.epoch;
        inner.phase = Phase::Connecting;
        inner.state = ConnectionState {
            connecting: true,
            connected: false,
            connection_id: None,
            ..inner.state.clone()
        };
        info!(%url, attempt = inner.state.reconnect_attempts, "connecting");

        let handshake = self.shared.connector.connect(&url);
        let connect_timeout = self.shared.config.connect_timeout;
        let shared = Arc::downgrade(&self.shared);
        inner.handshake = Some(Timer::spawn(async move {
            let result = match tokio::time::timeout(connect_timeout, handshake).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };
            if let Some(shared) = shared.upgrade() {
                ConnectionManager { shared }.attempt_finished(epoch, result);
            }
        }));
    }

    fn attempt_finished(&self, epoch: u64, result: TransportResult<Link>) {
        self.transition(|this, inner| {
            if inner.epoch != epoch || inner.phase != Phase::Connecting {
                debug!(epoch, "ignoring stale connection attempt");
                return;
            }
            if let Some(task) = inner.handshake.take() {
                task.detach();
            }

            let link = match result {
                Ok(link) => link,
                Err(e) => {
                    warn!(error = %e, attempt = inner.state.reconnect_attempts, "connection attempt failed");
                    this.handle_failure(inner, e.to_string());
                    return;
                }
            };

            let now = this.shared.clock.now_ms();
            for room in &inner.rooms {
                let rejoin = RealtimeEvent::new(EventKind::JoinRoom, json!({ "roomId": room }), now);
                let _ = link.outbound.send(rejoin);
            }

            info!(connection_id = %link.connection_id, "connected");
            inner.phase = Phase::Connected;
            inner.outbound = Some(link.outbound);
            inner.state = ConnectionState {
                connected: true,
                connecting: false,
                connection_id: Some(link.connection_id),
                last_connected_at: Some(now),
                reconnect_attempts: 0,
                error: None,
            };

            let shared = Arc::downgrade(&this.shared);
            inner.reader = Some(Timer::spawn(read_loop(shared, epoch, link.inbound)));
        });
    }

    fn link_dropped(&self, epoch: u64, reason: String) {
        self.transition(|this, inner| {
            if inner.epoch != epoch || inner.phase != Phase::Connected {
                return;
            }
            if let Some(task) = inner.reader.take() {
                task.detach();
            }
            warn!(%reason, "connection lost");
            this.handle_failure(inner, reason);
        });
    }

    /// Schedules the next attempt, or gives up once the cap is reached.
    fn handle_failure(&self, inner: &mut Inner, reason: String) {
        inner.outbound = None;
        let attempts = inner.state.reconnect_attempts;
        let max = self.shared.config.max_reconnect_attempts;

        if attempts >= max {
            warn!(attempts, "giving up on reconnection");
            inner.phase = Phase::Failed;
            inner.state = ConnectionState {
                connected: false,
                connecting: false,
                connection_id: None,
                error: Some(format!("max reconnection attempts ({max}) exceeded: {reason}")),
                ..inner.state.clone()
            };
            return;
        }

        inner.phase = Phase::Reconnecting;
        inner.state = ConnectionState {
            connected: false,
            connecting: false,
            connection_id: None,
            error: Some(reason),
            ..inner.state.clone()
        };

        if !inner.host_online {
            info!(attempts, "host offline; waiting for network");
            return;
        }

        let delay = self.shared.config.backoff.delay(attempts);
        info!(attempts, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        let epoch = inner.epoch;
        let shared = Arc::downgrade(&self.shared);
        inner.reconnect = Some(Timer::after(delay, move || {
            if let Some(shared) = shared.upgrade() {
                ConnectionManager { shared }.reconnect_fired(epoch);
            }
        }));
    }

    fn reconnect_fired(&self, epoch: u64) {
        self.transition(|this, inner| {
            if inner.epoch != epoch || inner.phase != Phase::Reconnecting {
                return;
            }
            if let Some(timer) = inner.reconnect.take() {
                timer.detach();
            }
            inner.state.reconnect_attempts += 1;
            this.start_attempt(inner);
        });
    }
}

/// Dispatches inbound frames in arrival order until the link closes.
async fn read_loop(shared: Weak<Shared>, epoch: u64, mut inbound: mpsc::UnboundedReceiver<LinkEvent>) {
    let reason = loop {
        let Some(event) = inbound.recv().await else {
            break TransportError::ConnectionClosed.to_string();
        };
        let Some(strong) = shared.upgrade() else {
            return;
        };
        let manager = ConnectionManager { shared: strong };
        match event {
            LinkEvent::Message(mut event) => {
                if manager.lock().epoch != epoch {
                    return;
                }
                event.timestamp = manager.shared.clock.now_ms();
                manager.shared.bus.dispatch(&event);
            }
            LinkEvent::Closed(reason) => break reason,
        }
    };

    if let Some(shared) = shared.upgrade() {
        ConnectionManager { shared }.link_dropped(epoch, reason);
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("ConnectionManager")
            .field("phase", &inner.phase)
            .field("state", &inner.state)
            .field("rooms", &inner.rooms)
            .finish()
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
