// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::connection::Phase;
use crate::error::Error;
use crate::test_helpers::{settle, MockConnector, Outcome, PnrRecord, RecordingNotifier};
use pnr_core::EventKind;
use serde_json::{json, Map};
use std::time::Duration;

fn session(
    url: &str,
) -> (Arc<MockConnector>, Arc<RecordingNotifier>, Result<LiveSession<PnrRecord>>) {
    let connector = MockConnector::new(Outcome::Accept);
    let notifier = RecordingNotifier::new();
    let config = LiveConfig::default().with_url(url);
    let session = LiveSession::init(
        config,
        Arc::clone(&connector) as Arc<dyn Connector>,
        Arc::clone(&notifier) as Arc<dyn UpdateNotifier<PnrRecord>>,
    );
    (connector, notifier, session)
}

#[test]
fn init_rejects_invalid_config() {
    let (_, _, session) = session("http://localhost:3001");
    assert!(matches!(session, Err(Error::Config(_))));
}

#[tokio::test(start_paused = true)]
async fn connect_dials_configured_url() {
    let (connector, _, session) = session("ws://127.0.0.1:3001");
    let session = session.unwrap();

    session.connect();
    settle().await;

    assert_eq!(connector.urls(), vec!["ws://127.0.0.1:3001".to_string()]);
    assert!(session.connection().is_connected());
}

#[tokio::test(start_paused = true)]
async fn confirmation_flows_from_connection_to_tracker() {
    let (connector, notifier, session) = session("ws://127.0.0.1:3001");
    let session = session.unwrap();
    session.connect();
    settle().await;
    let mut peer = connector.take_peer();

    let id = session
        .tracker()
        .apply(PnrRecord::new("pnr-1", "WL"), PnrRecord::new("pnr-1", "CNF"), "update_pnr_status", Map::new())
        .unwrap();
    assert_eq!(peer.sent_of("update_pnr_status").len(), 1);

    peer.push(EventKind::UpdateConfirmation, json!({"updateId": id, "success": true}));
    settle().await;

    assert!(session.tracker().is_empty());
    assert_eq!(notifier.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn destroy_tears_everything_down() {
    let (connector, notifier, session) = session("ws://127.0.0.1:3001");
    let session = session.unwrap();
    session.connect();
    settle().await;
    let _peer = connector.take_peer();

    let tracker = session.tracker().clone();
    let connection = session.connection().clone();
    let bus = session.bus().clone();
    tracker
        .apply(PnrRecord::new("pnr-1", "WL"), PnrRecord::new("pnr-1", "CNF"), "update_pnr_status", Map::new())
        .unwrap();

    session.destroy();

    assert!(tracker.is_empty());
    assert_eq!(connection.phase(), Phase::Disconnected);
    assert!(!bus.has_handlers(&EventKind::UpdateConfirmation));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(notifier.failure_count(), 0);
    assert_eq!(connector.attempt_count(), 1);
}
