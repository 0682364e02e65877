// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! pnr-live: realtime sync client for the PNR dashboard.
//!
//! Keeps one WebSocket connection to the live server alive and lets the UI
//! show mutations before the server confirms them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  emit   ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Tracker   │────────►│ Connection  │────►│  Connector  │────►│   Relay     │
//! │ (optimistic)│         │  Manager    │◄────│   (trait)   │◄────│   Server    │
//! └─────────────┘         └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                       │ inbound
//!        │ update_confirmation   ▼
//!        │                ┌─────────────┐
//!        └────────────────│  Event Bus  │────► UI handlers
//!                         └─────────────┘
//! ```
//!
//! # Features
//!
//! - Reconnection with exponential backoff and an attempt cap
//! - Host online/offline awareness
//! - Room membership restored after every reconnect
//! - Optimistic updates with timeout, retry and rollback
//! - Injectable connector and clock for testing
//!
//! [`LiveSession`] wires everything together.

pub mod bus;
pub mod config;
pub mod connection;
pub mod env;
pub mod error;
pub mod notify;
pub mod session;
pub mod subscription;
mod timer;
pub mod tracker;
pub mod transport;

pub use bus::{BoxError, DispatchReport, EventBus, HandlerError, HandlerResult};
pub use config::LiveConfig;
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, HostSignal, Phase};
pub use error::{Error, Result, UpdateError};
pub use notify::{LogNotifier, ManualRetry, RetryNotice, UpdateFailure, UpdateNotifier};
pub use session::LiveSession;
pub use subscription::Subscription;
pub use tracker::{Entity, OptimisticTracker, PendingUpdate, RollbackOutcome, TrackerConfig};
pub use transport::{Connector, Link, LinkEvent, TransportError, WebSocketConnector};

pub use pnr_core::{EventKind, RealtimeEvent};

#[cfg(test)]
mod test_helpers;
