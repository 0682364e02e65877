// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use super::*;
use crate::test_helpers::{settle, MockConnector, Outcome, URL};
use pnr_core::ManualClock;
use tokio::time::{sleep, Instant};

fn config(max_attempts: u32) -> ConnectionConfig {
    ConnectionConfig {
        connect_timeout: Duration::from_secs(20),
        max_reconnect_attempts: max_attempts,
        backoff: BackoffPolicy::from_millis(1_000, 30_000),
    }
}

fn manager(connector: &Arc<MockConnector>, config: ConnectionConfig) -> ConnectionManager {
    ConnectionManager::with_clock(
        config,
        Arc::clone(connector) as Arc<dyn Connector>,
        EventBus::new(),
        Arc::new(ManualClock::new(42)),
    )
}

fn record_states(manager: &ConnectionManager) -> (Arc<Mutex<Vec<ConnectionState>>>, Subscription) {
    let states = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&states);
    let sub = manager.on_state_change(move |state| s.lock().unwrap().push(state.clone()));
    (states, sub)
}

#[tokio::test(start_paused = true)]
async fn connect_success_records_connection() {
    let connector = MockConnector::new(Outcome::Accept);
    let manager = manager(&connector, config(10));

    manager.connect(URL);
    settle().await;

    let state = manager.state();
    assert!(state.connected);
    assert!(!state.connecting);
    assert_eq!(state.connection_id.as_deref(), Some("mock-1"));
    assert_eq!(state.last_connected_at, Some(42));
    assert_eq!(state.reconnect_attempts, 0);
    assert_eq!(state.error, None);
    assert_eq!(manager.phase(), Phase::Connected);
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn reconnect_delays_follow_backoff_until_cap() {
    let connector = MockConnector::new(Outcome::Refuse);
    let manager = manager(&connector, config(5));

    manager.connect(URL);
    sleep(Duration::from_secs(120)).await;

    assert_eq!(connector.attempt_count(), 6);
    assert_eq!(connector.gaps_ms(), vec![1_000, 2_000, 4_000, 8_000, 16_000]);
    assert_eq!(manager.phase(), Phase::Failed);

    let state = manager.state();
    assert!(!state.connected);
    assert!(!state.connecting);
    assert_eq!(state.reconnect_attempts, 5);
    let error = state.error.expect("terminal error");
    assert!(error.contains("max reconnection attempts (5)"), "{error}");
    assert!(error.contains("connection refused"), "{error}");
}

#[tokio::test(start_paused = true)]
async fn failed_state_is_terminal_until_connect() {
    let connector = MockConnector::new(Outcome::Refuse);
    let manager = manager(&connector, config(1));

    manager.connect(URL);
    sleep(Duration::from_secs(10)).await;
    assert_eq!(manager.phase(), Phase::Failed);
    assert_eq!(connector.attempt_count(), 2);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempt_count(), 2);

    connector.set_default(Outcome::Accept);
    manager.connect(URL);
    settle().await;

    assert_eq!(manager.phase(), Phase::Connected);
    assert_eq!(manager.state().reconnect_attempts, 0);
    assert_eq!(manager.state().error, None);
}

#[tokio::test(start_paused = true)]
async fn connect_is_noop_while_connected_or_connecting() {
    let connector = MockConnector::new(Outcome::Hang);
    let manager = manager(&connector, config(10));

    manager.connect(URL);
    manager.connect(URL);
    settle().await;
    assert_eq!(manager.phase(), Phase::Connecting);
    assert_eq!(connector.attempt_count(), 1);

    manager.disconnect();
    connector.set_default(Outcome::Accept);
    manager.connect(URL);
    settle().await;
    manager.connect(URL);
    settle().await;

    assert_eq!(manager.phase(), Phase::Connected);
    assert_eq!(connector.attempt_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_counts_as_failure() {
    let connector = MockConnector::new(Outcome::Hang);
    let mut config = config(3);
    config.connect_timeout = Duration::from_millis(500);
    let manager = manager(&connector, config);
    let start = Instant::now();

    manager.connect(URL);
    sleep(Duration::from_millis(600)).await;

    assert_eq!(manager.phase(), Phase::Reconnecting);
    assert_eq!(manager.state().error.as_deref(), Some("connection attempt timed out"));

    // Timeout at 500, then delay(0) = 1000
    sleep(Duration::from_millis(1_000)).await;
    let attempts = connector.attempts();
    assert_eq!(attempts.len(), 2);
    assert_eq!((attempts[1] - start).as_millis(), 1_500);
    assert_eq!(manager.state().reconnect_attempts, 1);
    assert!(manager.state().connecting);
}

#[tokio::test(start_paused = true)]
async fn dropped_connection_reconnects_after_backoff() {
    let connector = MockConnector::new(Outcome::Accept);
    let manager = manager(&connector, config(10));

    manager.connect(URL);
    settle().await;
    let peer = connector.take_peer();

    peer.close("server went away");
    settle().await;
    assert_eq!(manager.phase(), Phase::Reconnecting);
    assert_eq!(manager.state().error.as_deref(), Some("server went away"));
    assert_eq!(manager.state().connection_id, None);

    sleep(Duration::from_millis(1_000)).await;
    assert_eq!(connector.attempt_count(), 2);
    assert_eq!(manager.phase(), Phase::Connected);
    assert_eq!(manager.state().connection_id.as_deref(), Some("mock-2"));
    assert_eq!(manager.state().reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn manual_disconnect_never_reconnects() {
    let connector = MockConnector::new(Outcome::Accept);
    let manager = manager(&connector, config(10));

    manager.connect(URL);
    settle().await;
    let mut peer = connector.take_peer();

    manager.disconnect();
    settle().await;

    // Client side of the link is gone
    assert!(peer.outbound.recv().await.is_none());

    sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(manager.phase(), Phase::Disconnected);

    let state = manager.state();
    assert!(!state.connected);
    assert_eq!(state.reconnect_attempts, 0);
    assert_eq!(state.error, None);
    assert_eq!(state.last_connected_at, Some(42));
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_reconnect() {
    let connector = MockConnector::new(Outcome::Refuse);
    let manager = manager(&connector, config(10));

    manager.connect(URL);
    settle().await;
    assert_eq!(manager.phase(), Phase::Reconnecting);
    assert!(manager.state().error.is_some());

    manager.disconnect();
    sleep(Duration::from_secs(60)).await;

    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(manager.state(), ConnectionState::default());
}

#[tokio::test(start_paused = true)]
async fn disconnect_abandons_inflight_handshake() {
    let connector = MockConnector::new(Outcome::Hang);
    let mut config = config(10);
    config.connect_timeout = Duration::from_millis(500);
    let manager = manager(&connector, config);

    manager.connect(URL);
    settle().await;
    manager.disconnect();
    sleep(Duration::from_secs(30)).await;

    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(manager.phase(), Phase::Disconnected);
    assert_eq!(manager.state().error, None);
}

#[tokio::test(start_paused = true)]
async fn emit_requires_connection() {
    let connector = MockConnector::new(Outcome::Accept);
    let manager = manager(&connector, config(10));

    assert!(!manager.emit("notification", json!({"x": 1})));

    manager.connect(URL);
    settle().await;
    let mut peer = connector.take_peer();

    assert!(manager.emit("seat_change", json!({"x": 1})));
    let sent = peer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, EventKind::Custom("seat_change".into()));
    assert_eq!(sent[0].data, json!({"x": 1}));
    assert_eq!(sent[0].timestamp, 42);
}

#[tokio::test(start_paused = true)]
async fn inbound_events_dispatch_in_arrival_order_with_receipt_time() {
    let connector = MockConnector::new(Outcome::Accept);
    let manager = manager(&connector, config(10));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let _sub = manager.subscribe(EventKind::PnrStatusUpdate, move |event| {
        s.lock().unwrap().push((event.data["n"].as_u64().unwrap(), event.timestamp));
        Ok(())
    });

    manager.connect(URL);
    settle().await;
    let peer = connector.take_peer();
    for n in 0..5 {
        peer.push("pnr_status_update", json!({ "n": n }));
    }
    peer.push("notification", json!({}));
    settle().await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    assert!(seen.iter().all(|(_, ts)| *ts == 42));
}

#[tokio::test(start_paused = true)]
async fn on_state_change_delivers_current_state_immediately() {
    let connector = MockConnector::new(Outcome::Accept);
    let manager = manager(&connector, config(10));

    let (states, sub) = record_states(&manager);
    assert_eq!(*states.lock().unwrap(), vec![ConnectionState::default()]);

    manager.connect(URL);
    settle().await;

    {
        let states = states.lock().unwrap();
        assert_eq!(states.len(), 3);
        assert!(states[1].connecting);
        assert!(states[2].connected);
    }

    // Late subscriber sees the present
    let (late, _late_sub) = record_states(&manager);
    assert_eq!(late.lock().unwrap().len(), 1);
    assert!(late.lock().unwrap()[0].connected);

    sub.unsubscribe();
    manager.disconnect();
    assert_eq!(states.lock().unwrap().len(), 3);
    assert_eq!(late.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn panicking_state_handler_does_not_block_others() {
    let connector = MockConnector::new(Outcome::Accept);
    let manager = manager(&connector, config(10));

    let _failing = manager.on_state_change(|state| {
        if state.connected {
            panic!("state handler exploded");
        }
    });
    let (states, _sub) = record_states(&manager);

    manager.connect(URL);
    settle().await;

    assert!(manager.is_connected());
    assert!(states.lock().unwrap().last().unwrap().connected);

    // The failing handler stays registered and the caller never sees the panic
    manager.disconnect();
    let states = states.lock().unwrap();
    assert_eq!(states.len(), 4);
    assert!(!states[3].connected);
    assert_eq!(states[3].last_connected_at, Some(42));
}

#[tokio::test(start_paused = true)]
async fn transition_from_state_handler_is_delivered_in_order() {
    let connector = MockConnector::new(Outcome::Accept);
    let manager = manager(&connector, config(10));

    let m = manager.clone();
    let disconnector = manager.on_state_change(move |state| {
        if state.connected {
            m.disconnect();
        }
    });
    let (states, _sub) = record_states(&manager);

    manager.connect(URL);
    settle().await;

    let seen: Vec<(bool, bool)> =
        states.lock().unwrap().iter().map(|s| (s.connecting, s.connected)).collect();
    assert_eq!(seen, vec![(false, false), (true, false), (false, true), (false, false)]);
    assert_eq!(manager.phase(), Phase::Disconnected);

    disconnector.unsubscribe();
}

#[tokio::test(start_paused = true)]
async fn subscribing_from_state_handler_sees_current_state() {
    let connector = MockConnector::new(Outcome::Accept);
    let manager = manager(&connector, config(10));

    let late = Arc::new(Mutex::new(Vec::new()));
    let subs = Arc::new(Mutex::new(Vec::new()));
    let (m, l, sb) = (manager.clone(), Arc::clone(&late), Arc::clone(&subs));
    let outer = manager.on_state_change(move |state| {
        if state.connected && sb.lock().unwrap().is_empty() {
            let l = Arc::clone(&l);
            let sub = m.on_state_change(move |state| l.lock().unwrap().push(state.clone()));
            sb.lock().unwrap().push(sub);
        }
    });

    manager.connect(URL);
    settle().await;

    let late = late.lock().unwrap();
    assert_eq!(late.len(), 1);
    assert!(late[0].connected);

    outer.unsubscribe();
}

#[tokio::test(start_paused = true)]
async fn offline_pauses_and_online_reconnects_immediately() {
    let connector = MockConnector::new(Outcome::Accept);
    let manager = manager(&connector, config(10));

    manager.connect(URL);
    settle().await;
    let peer = connector.take_peer();

    connector.set_default(Outcome::Refuse);
    peer.close("network changed");
    sleep(Duration::from_millis(1_500)).await;
    // Drop, then one refused retry at +1000; next wait is 2000
    assert_eq!(connector.attempt_count(), 2);
    assert_eq!(manager.phase(), Phase::Reconnecting);
    assert_eq!(manager.state().reconnect_attempts, 1);

    manager.host_signal(HostSignal::Offline);
    sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.attempt_count(), 2);
    assert_eq!(manager.state().reconnect_attempts, 1);
    assert_eq!(manager.phase(), Phase::Reconnecting);

    connector.set_default(Outcome::Accept);
    let online_at = Instant::now();
    manager.host_signal(HostSignal::Online);
    settle().await;

    let attempts = connector.attempts();
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[2], online_at);
    assert_eq!(manager.phase(), Phase::Connected);
}

#[tokio::test(start_paused = true)]
async fn failure_while_offline_parks_without_timer() {
    let connector = MockConnector::new(Outcome::Refuse);
    let manager = manager(&connector, config(10));

    manager.host_signal(HostSignal::Offline);
    manager.connect(URL);
    sleep(Duration::from_secs(60)).await;

    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(manager.phase(), Phase::Reconnecting);
    assert_eq!(manager.state().reconnect_attempts, 0);

    manager.host_signal(HostSignal::Online);
    settle().await;
    assert_eq!(connector.attempt_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn online_after_manual_disconnect_stays_down() {
    let connector = MockConnector::new(Outcome::Accept);
    let manager = manager(&connector, config(10));

    manager.connect(URL);
    settle().await;
    manager.disconnect();

    manager.host_signal(HostSignal::Offline);
    manager.host_signal(HostSignal::Online);
    settle().await;

    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(manager.phase(), Phase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn online_before_first_connect_is_ignored() {
    let connector = MockConnector::new(Outcome::Accept);
    let manager = manager(&connector, config(10));

    manager.host_signal(HostSignal::Online);
    settle().await;

    assert_eq!(connector.attempt_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn rooms_are_rejoined_after_reconnect() {
    let connector = MockConnector::new(Outcome::Accept);
    let manager = manager(&connector, config(10));

    assert!(!manager.join_room("pnr-1"));
    manager.connect(URL);
    settle().await;
    let mut first = connector.take_peer();
    assert!(manager.join_room("coach-b"));

    let joined: Vec<_> = first.sent_of("join_room").into_iter().map(|e| e.data).collect();
    assert_eq!(joined, vec![json!({"roomId": "pnr-1"}), json!({"roomId": "coach-b"})]);

    assert!(manager.leave_room("pnr-1"));
    assert_eq!(first.sent_of(EventKind::LeaveRoom)[0].data, json!({"roomId": "pnr-1"}));
    assert_eq!(manager.rooms(), vec!["coach-b".to_string()]);

    first.close("restart");
    sleep(Duration::from_millis(1_001)).await;
    let mut second = connector.take_peer();

    let rejoined: Vec<_> = second.sent_of("join_room").into_iter().map(|e| e.data).collect();
    assert_eq!(rejoined, vec![json!({"roomId": "coach-b"})]);
}

#[tokio::test(start_paused = true)]
async fn destroy_drops_all_handlers() {
    let connector = MockConnector::new(Outcome::Accept);
    let manager = manager(&connector, config(10));
    let (states, _sub) = record_states(&manager);
    let _events = manager.subscribe("notification", |_: &RealtimeEvent| Ok(()));

    manager.connect(URL);
    settle().await;
    manager.destroy();

    assert!(!manager.bus().has_handlers(&EventKind::Notification));
    let seen = states.lock().unwrap().len();
    manager.connect(URL);
    settle().await;
    assert_eq!(states.lock().unwrap().len(), seen);
}

#[tokio::test(start_paused = true)]
async fn recovers_after_transient_refusals() {
    let connector = MockConnector::new(Outcome::Accept);
    connector.script([Outcome::Refuse, Outcome::Refuse]);
    let manager = manager(&connector, config(10));

    manager.connect(URL);
    sleep(Duration::from_secs(10)).await;

    assert_eq!(connector.gaps_ms(), vec![1_000, 2_000]);
    assert_eq!(manager.phase(), Phase::Connected);
    assert_eq!(manager.state().reconnect_attempts, 0);
    assert_eq!(manager.state().error, None);
}
