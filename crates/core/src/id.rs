// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Optimistic update identifiers.
//!
//! Format: `{entity_id}-{created_at_ms}-{seq}`. The sequence is shared by
//! every id a generator hands out, so two updates for the same entity in the
//! same millisecond still get distinct ids.

use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out unique update ids.
#[derive(Debug, Default)]
pub struct UpdateIdGenerator {
    seq: AtomicU64,
}

impl UpdateIdGenerator {
    /// Creates a generator starting at sequence 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh id for an update to `entity_id` created at `now_ms`.
    pub fn next(&self, entity_id: &str, now_ms: u64) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{entity_id}-{now_ms}-{seq}")
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
