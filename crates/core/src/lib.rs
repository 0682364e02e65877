// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! pnr-core: Shared primitives for PNR live updates
//!
//! This crate provides the event and wire types, the backoff policy and the
//! clock/id helpers used by both the `pnr-live` client library and the
//! `pnr-relay` development server.

pub mod backoff;
pub mod clock;
pub mod error;
pub mod event;
pub mod id;
pub mod protocol;

pub use backoff::{delay, BackoffPolicy};
pub use clock::{ClockSource, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use event::{EventKind, RealtimeEvent};
pub use id::UpdateIdGenerator;
pub use protocol::{mutation_payload, update_id_of, RetryUpdate, RoomRequest, UpdateConfirmation};
