// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn system_clock_is_after_2020() {
    // 2020-01-01T00:00:00Z
    assert!(SystemClock.now_ms() > 1_577_836_800_000);
}

#[test]
fn manual_clock_set_and_advance() {
    let clock = ManualClock::new(1_000);
    assert_eq!(clock.now_ms(), 1_000);

    clock.advance(250);
    assert_eq!(clock.now_ms(), 1_250);

    clock.set(42);
    assert_eq!(clock.now_ms(), 42);
}

#[test]
fn shared_clock_reads_through() {
    let clock = Arc::new(ManualClock::new(7));
    let dyn_clock: Arc<dyn ClockSource> = clock.clone();
    clock.advance(3);
    assert_eq!(dyn_clock.now_ms(), 10);
    assert_eq!((&*clock).now_ms(), 10);
}
