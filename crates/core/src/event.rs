// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Realtime events and their kinds.
//!
//! A [`RealtimeEvent`] is both the unit of delivery on the event bus and the
//! frame written to the wire:
//!
//! ```json
//! {"type": "update_confirmation", "data": {"updateId": "pnr-1-1700000000000-0", "success": true}, "timestamp": 1700000000123}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Kind of a realtime event.
///
/// Known protocol messages have dedicated variants. Mutation requests use
/// caller-defined names, carried by [`EventKind::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    /// Server push: a PNR changed status.
    PnrStatusUpdate,
    /// Server push: someone joined or left a room.
    UserPresence,
    /// Server push: user-facing notification.
    Notification,
    /// Server push: operational message from the backend.
    SystemMessage,
    /// Server push: outcome of a mutation request.
    UpdateConfirmation,
    /// Server push: another client's collaborative action.
    CollaborativeAction,
    /// Client request: subscribe to a room.
    JoinRoom,
    /// Client request: unsubscribe from a room.
    LeaveRoom,
    /// Client request: re-send of an unconfirmed mutation.
    RetryUpdate,
    /// Any other event name, typically a mutation type.
    Custom(String),
}

impl EventKind {
    /// Returns the wire name of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::PnrStatusUpdate => "pnr_status_update",
            EventKind::UserPresence => "user_presence",
            EventKind::Notification => "notification",
            EventKind::SystemMessage => "system_message",
            EventKind::UpdateConfirmation => "update_confirmation",
            EventKind::CollaborativeAction => "collaborative_action",
            EventKind::JoinRoom => "join_room",
            EventKind::LeaveRoom => "leave_room",
            EventKind::RetryUpdate => "retry_update",
            EventKind::Custom(name) => name,
        }
    }

    /// Maps a wire name to a kind. Unknown names become [`EventKind::Custom`].
    pub fn from_wire(name: &str) -> Self {
        match name {
            "pnr_status_update" => EventKind::PnrStatusUpdate,
            "user_presence" => EventKind::UserPresence,
            "notification" => EventKind::Notification,
            "system_message" => EventKind::SystemMessage,
            "update_confirmation" => EventKind::UpdateConfirmation,
            "collaborative_action" => EventKind::CollaborativeAction,
            "join_room" => EventKind::JoinRoom,
            "leave_room" => EventKind::LeaveRoom,
            "retry_update" => EventKind::RetryUpdate,
            other => EventKind::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(EventKind::from_wire(s))
    }
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        EventKind::from_wire(name)
    }
}

impl From<String> for EventKind {
    fn from(name: String) -> Self {
        match EventKind::from_wire(&name) {
            EventKind::Custom(_) => EventKind::Custom(name),
            known => known,
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Custom(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

/// A typed event with a JSON payload and a millisecond timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    /// What happened.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Event payload.
    #[serde(default)]
    pub data: Value,
    /// Milliseconds since Unix epoch, assigned at emission or receipt.
    #[serde(default)]
    pub timestamp: u64,
}

impl RealtimeEvent {
    /// Creates an event.
    pub fn new(kind: impl Into<EventKind>, data: Value, timestamp: u64) -> Self {
        RealtimeEvent { kind: kind.into(), data, timestamp }
    }

    /// Deserializes the payload into a typed message.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.data)?)
    }

    /// Serializes the event to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserializes an event from JSON.
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
