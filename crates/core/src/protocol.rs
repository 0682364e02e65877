// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Payloads carried in the `data` field of protocol events.
//!
//! The protocol is simple:
//! - Client joins and leaves rooms, sends mutations and retries
//! - Server answers mutations with `update_confirmation` and pushes
//!   status, presence and notification events
//!
//! Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::event::{EventKind, RealtimeEvent};

/// Payload of `join_room` and `leave_room`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRequest {
    /// Room to join or leave.
    pub room_id: String,
}

/// Payload of `update_confirmation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfirmation {
    /// The update being confirmed or rejected.
    pub update_id: String,
    /// Whether the server applied the update.
    pub success: bool,
    /// Server-supplied rejection reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpdateConfirmation {
    /// Creates a successful confirmation.
    pub fn accepted(update_id: impl Into<String>) -> Self {
        UpdateConfirmation { update_id: update_id.into(), success: true, error: None }
    }

    /// Creates a rejection with a reason.
    pub fn rejected(update_id: impl Into<String>, error: impl Into<String>) -> Self {
        UpdateConfirmation { update_id: update_id.into(), success: false, error: Some(error.into()) }
    }

    /// Extracts a confirmation from an `update_confirmation` event.
    pub fn from_event(event: &RealtimeEvent) -> Result<Self> {
        if event.kind != EventKind::UpdateConfirmation {
            return Err(Error::InvalidPayload(format!(
                "expected update_confirmation, got {}",
                event.kind
            )));
        }
        event.payload()
    }
}

/// Payload of `retry_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryUpdate {
    /// The update being re-sent.
    pub update_id: String,
    /// How many retries have been made, including this one.
    pub retry_count: u32,
    /// Speculative value.
    pub data: Value,
}

/// Builds the payload of a mutation event: `{updateId, ...context, data}`.
///
/// `updateId` and `data` always win over context keys of the same name.
pub fn mutation_payload(update_id: &str, context: &Map<String, Value>, data: Value) -> Value {
    let mut payload = context.clone();
    payload.insert("updateId".to_string(), Value::String(update_id.to_string()));
    payload.insert("data".to_string(), data);
    Value::Object(payload)
}

/// Reads the `updateId` field of a mutation payload, if any.
pub fn update_id_of(data: &Value) -> Option<&str> {
    data.get("updateId").and_then(Value::as_str)
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
