// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Optimistic update tracking.
//!
//! A mutation is shown to the user before the server confirms it. The tracker
//! keeps one slot per update id holding the [`PendingUpdate`] and the single
//! timer currently armed for it:
//!
//! ```text
//! apply ──► pending ──confirm──► removed
//!              │
//!         timeout/reject
//!              ▼
//!          rollback ──retry budget left and connected──► retry timer ──► re-sent, timeout re-armed
//!              │
//!              └──otherwise──► removed, notifier.failed() once
//! ```
//!
//! Each armed timer carries the slot generation it was armed for; a timer
//! that fires after its slot moved on does nothing. Confirmations for ids
//! no longer tracked are ignored.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use pnr_core::{
    mutation_payload, BackoffPolicy, ClockSource, EventKind, RealtimeEvent, RetryUpdate,
    SystemClock, UpdateConfirmation, UpdateIdGenerator,
};

use crate::bus::HandlerResult;
use crate::connection::ConnectionManager;
use crate::error::{Result, UpdateError};
use crate::notify::{ManualRetry, RetryNotice, UpdateFailure, UpdateNotifier};
use crate::subscription::Subscription;
use crate::timer::Timer;

/// Reason given when the server rejects an update without saying why.
const DEFAULT_REJECTION: &str = "Update rejected by server";

/// A value the tracker can overlay: identified, cloneable and serializable.
pub trait Entity: Clone + Serialize + Send + Sync + 'static {
    /// Id used to match pending updates against canonical items.
    fn entity_id(&self) -> &str;
}

/// Tracker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// How long to wait for a confirmation before rolling back.
    pub update_timeout: Duration,
    /// Automatic retries per update.
    pub max_retries: u32,
    /// Delay before each retry.
    pub backoff: BackoffPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            update_timeout: Duration::from_secs(10),
            max_retries: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// A speculative change awaiting server confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate<T> {
    pub id: String,
    pub entity_id: String,
    pub original: T,
    pub speculative: T,
    /// Milliseconds since Unix epoch; refreshed on every retry.
    pub created_at: u64,
    pub retry_count: u32,
    pub max_retries: u32,
}

/// What [`OptimisticTracker::rollback`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// The id is not tracked.
    Unknown,
    /// A retry was scheduled.
    Retrying { retry_count: u32, delay: Duration },
    /// The update was removed and the failure reported.
    Failed,
}

/// The mutation as it was requested, kept for retries.
#[derive(Debug, Clone)]
pub(crate) struct MutationRequest {
    pub(crate) kind: EventKind,
    pub(crate) extra: Map<String, Value>,
}

struct Slot<T> {
    update: PendingUpdate<T>,
    request: MutationRequest,
    /// Speculative value as sent on the wire.
    data: Value,
    /// Bumped on every apply and retry; orders updates made in the same millisecond.
    revision: u64,
    /// Bumped every time a timer is armed for this slot.
    generation: u64,
    timer: Option<Timer>,
}

struct Inner<T> {
    slots: HashMap<String, Slot<T>>,
    next_revision: u64,
    confirmations: Option<Subscription>,
}

struct Shared<T> {
    config: TrackerConfig,
    connection: ConnectionManager,
    notifier: Arc<dyn UpdateNotifier<T>>,
    clock: Arc<dyn ClockSource>,
    ids: UpdateIdGenerator,
    inner: Mutex<Inner<T>>,
}

/// Tracks optimistic updates for entities of type `T`.
///
/// Cloning yields another handle to the same tracker.
pub struct OptimisticTracker<T: Entity> {
    shared: Arc<Shared<T>>,
}

/// Non-owning tracker handle held by [`ManualRetry`].
pub(crate) struct WeakTracker<T: Entity> {
    shared: Weak<Shared<T>>,
}

impl<T: Entity> WeakTracker<T> {
    pub(crate) fn upgrade(&self) -> Option<OptimisticTracker<T>> {
        self.shared.upgrade().map(|shared| OptimisticTracker { shared })
    }
}

impl<T: Entity> Clone for OptimisticTracker<T> {
    fn clone(&self) -> Self {
        OptimisticTracker { shared: Arc::clone(&self.shared) }
    }
}

impl<T: Entity> OptimisticTracker<T> {
    /// Creates a tracker that sends through `connection` and listens for
    /// `update_confirmation` events on its bus.
    pub fn new(
        config: TrackerConfig,
        connection: ConnectionManager,
        notifier: Arc<dyn UpdateNotifier<T>>,
    ) -> Self {
        Self::with_clock(config, connection, notifier, Arc::new(SystemClock))
    }

    /// Creates a tracker with a custom clock for update ids and timestamps.
    pub fn with_clock(
        config: TrackerConfig,
        connection: ConnectionManager,
        notifier: Arc<dyn UpdateNotifier<T>>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        let inner = Inner { slots: HashMap::new(), next_revision: 0, confirmations: None };
        let tracker = OptimisticTracker {
            shared: Arc::new(Shared {
                config,
                connection,
                notifier,
                clock,
                ids: UpdateIdGenerator::new(),
                inner: Mutex::new(inner),
            }),
        };

        let weak = tracker.downgrade();
        let sub = tracker.shared.connection.subscribe(EventKind::UpdateConfirmation, move |event| {
            match weak.upgrade() {
                Some(tracker) => tracker.on_confirmation(event),
                None => Ok(()),
            }
        });
        tracker.lock().confirmations = Some(sub);
        tracker
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.shared.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn downgrade(&self) -> WeakTracker<T> {
        WeakTracker { shared: Arc::downgrade(&self.shared) }
    }

    /// Records a speculative change and sends it as a `kind` mutation.
    ///
    /// The update is tracked even when the connection is down; it then runs
    /// into its timeout like any unanswered update. Fails only if
    /// `speculative` cannot be serialized.
    pub fn apply(
        &self,
        original: T,
        speculative: T,
        kind: impl Into<EventKind>,
        extra: Map<String, Value>,
    ) -> Result<String> {
        let data = serde_json::to_value(&speculative).map_err(pnr_core::Error::from)?;
        let now = self.shared.clock.now_ms();
        let entity_id = speculative.entity_id().to_string();
        let id = self.shared.ids.next(&entity_id, now);
        let request = MutationRequest { kind: kind.into(), extra };
        let payload = mutation_payload(&id, &request.extra, data.clone());
        let kind = request.kind.clone();

        {
            let mut inner = self.lock();
            let revision = inner.next_revision;
            inner.next_revision += 1;
            let mut slot = Slot {
                update: PendingUpdate {
                    id: id.clone(),
                    entity_id: entity_id.clone(),
                    original,
                    speculative,
                    created_at: now,
                    retry_count: 0,
                    max_retries: self.shared.config.max_retries,
                },
                request,
                data,
                revision,
                generation: 0,
                timer: None,
            };
            self.arm_timeout(&id, &mut slot);
            inner.slots.insert(id.clone(), slot);
        }

        debug!(update_id = %id, %entity_id, %kind, "optimistic update applied");
        self.shared.connection.emit(kind, payload);
        Ok(id)
    }

    /// Marks an update as accepted. Returns false for unknown ids.
    pub fn confirm(&self, update_id: &str) -> bool {
        let removed = self.lock().slots.remove(update_id);
        match removed {
            Some(slot) => {
                debug!(update_id, entity_id = %slot.update.entity_id, "update confirmed");
                true
            }
            None => {
                debug!(update_id, "confirmation for unknown update ignored");
                false
            }
        }
    }

    /// Handles a failed try: schedules a retry or gives up.
    ///
    /// Retries while the retry budget lasts and the connection is up.
    /// Otherwise the update is removed and the notifier told exactly once.
    pub fn rollback(&self, update_id: &str, reason: UpdateError) -> RollbackOutcome {
        let connected = self.shared.connection.is_connected();
        let mut inner = self.lock();
        let Some(slot) = inner.slots.get_mut(update_id) else {
            debug!(update_id, "rollback for unknown update ignored");
            return RollbackOutcome::Unknown;
        };

        if slot.update.retry_count < slot.update.max_retries && connected {
            slot.update.retry_count += 1;
            slot.update.created_at = self.shared.clock.now_ms();
            let retry_count = slot.update.retry_count;
            let delay = self.shared.config.backoff.delay(retry_count - 1);
            self.arm_retry(update_id, slot, delay);
            let revision = inner.next_revision;
            inner.next_revision += 1;

            let Some(slot) = inner.slots.get_mut(update_id) else {
                return RollbackOutcome::Unknown;
            };
            slot.revision = revision;
            let notice = RetryNotice {
                update_id: update_id.to_string(),
                entity_id: slot.update.entity_id.clone(),
                retry_count,
                max_retries: slot.update.max_retries,
                delay,
                reason,
            };
            drop(inner);

            warn!(update_id, retry_count, delay_ms = delay.as_millis() as u64, reason = %notice.reason, "update retry scheduled");
            self.shared.notifier.retrying(&notice);
            return RollbackOutcome::Retrying { retry_count, delay };
        }

        let Some(slot) = inner.slots.remove(update_id) else {
            return RollbackOutcome::Unknown;
        };
        drop(inner);

        let Slot { update, request, timer, .. } = slot;
        if let Some(timer) = timer {
            timer.cancel();
        }
        let retries_exhausted = update.retry_count >= update.max_retries;
        warn!(
            update_id,
            entity_id = %update.entity_id,
            retries = update.retry_count,
            retries_exhausted,
            %reason,
            "update rolled back"
        );

        let failure = UpdateFailure {
            update_id: update.id,
            entity_id: update.entity_id,
            reason,
            retry_count: update.retry_count,
            retries_exhausted,
            retry: ManualRetry {
                tracker: self.downgrade(),
                original: update.original,
                speculative: update.speculative,
                request,
            },
        };
        self.shared.notifier.failed(failure);
        RollbackOutcome::Failed
    }

    /// Returns `items` with the newest pending speculative value swapped in.
    pub fn overlay(&self, items: &[T]) -> Vec<T> {
        let inner = self.lock();
        let mut newest: HashMap<&str, (u64, u64, &T)> = HashMap::new();
        for slot in inner.slots.values() {
            let key = (slot.update.created_at, slot.revision);
            let entry = newest
                .entry(slot.update.entity_id.as_str())
                .or_insert((key.0, key.1, &slot.update.speculative));
            if key > (entry.0, entry.1) {
                *entry = (key.0, key.1, &slot.update.speculative);
            }
        }

        items
            .iter()
            .map(|item| match newest.get(item.entity_id()) {
                Some((_, _, speculative)) => (*speculative).clone(),
                None => item.clone(),
            })
            .collect()
    }

    /// Returns true if any update for `entity_id` is pending.
    pub fn has_pending(&self, entity_id: &str) -> bool {
        self.lock().slots.values().any(|s| s.update.entity_id == entity_id)
    }

    /// Number of pending updates for `entity_id`.
    pub fn pending_count(&self, entity_id: &str) -> usize {
        self.lock().slots.values().filter(|s| s.update.entity_id == entity_id).count()
    }

    /// Snapshot of one pending update.
    pub fn pending(&self, update_id: &str) -> Option<PendingUpdate<T>> {
        self.lock().slots.get(update_id).map(|s| s.update.clone())
    }

    /// Total number of pending updates.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().slots.is_empty()
    }

    /// Drops every pending update and cancels its timer. Nothing is reported.
    pub fn clear_all(&self) {
        let slots: Vec<Slot<T>> = self.lock().slots.drain().map(|(_, slot)| slot).collect();
        if !slots.is_empty() {
            info!(count = slots.len(), "pending updates cleared");
        }
        for timer in slots.into_iter().filter_map(|slot| slot.timer) {
            timer.cancel();
        }
    }

    /// Stops listening for confirmations on the bus.
    pub fn detach(&self) {
        let sub = self.lock().confirmations.take();
        if let Some(sub) = sub {
            sub.unsubscribe();
        }
    }

    fn on_confirmation(&self, event: &RealtimeEvent) -> HandlerResult {
        let confirmation = UpdateConfirmation::from_event(event)?;
        if confirmation.success {
            self.confirm(&confirmation.update_id);
        } else {
            let reason = confirmation.error.unwrap_or_else(|| DEFAULT_REJECTION.to_string());
            self.rollback(&confirmation.update_id, UpdateError::Rejected(reason));
        }
        Ok(())
    }

    fn arm_timeout(&self, update_id: &str, slot: &mut Slot<T>) {
        slot.generation += 1;
        let generation = slot.generation;
        let id = update_id.to_string();
        let weak = self.downgrade();
        slot.timer = Some(Timer::after(self.shared.config.update_timeout, move || {
            if let Some(tracker) = weak.upgrade() {
                tracker.timeout_fired(&id, generation);
            }
        }));
    }

    fn arm_retry(&self, update_id: &str, slot: &mut Slot<T>, delay: Duration) {
        slot.generation += 1;
        let generation = slot.generation;
        let id = update_id.to_string();
        let weak = self.downgrade();
        slot.timer = Some(Timer::after(delay, move || {
            if let Some(tracker) = weak.upgrade() {
                tracker.retry_fired(&id, generation);
            }
        }));
    }

    /// Takes the slot's timer if it is still the one armed for `generation`.
    fn claim_timer(&self, inner: &mut Inner<T>, update_id: &str, generation: u64) -> bool {
        match inner.slots.get_mut(update_id) {
            Some(slot) if slot.generation == generation => {
                if let Some(timer) = slot.timer.take() {
                    timer.detach();
                }
                true
            }
            _ => false,
        }
    }

    fn timeout_fired(&self, update_id: &str, generation: u64) {
        if !self.claim_timer(&mut self.lock(), update_id, generation) {
            return;
        }
        debug!(update_id, "update timed out");
        self.rollback(update_id, UpdateError::Timeout);
    }

    fn retry_fired(&self, update_id: &str, generation: u64) {
        let payload = {
            let mut inner = self.lock();
            if !self.claim_timer(&mut inner, update_id, generation) {
                return;
            }
            let Some(slot) = inner.slots.get_mut(update_id) else {
                return;
            };
            let retry = RetryUpdate {
                update_id: update_id.to_string(),
                retry_count: slot.update.retry_count,
                data: slot.data.clone(),
            };
            self.arm_timeout(update_id, slot);
            serde_json::to_value(retry)
        };

        match payload {
            Ok(payload) => {
                info!(update_id, "retrying update");
                self.shared.connection.emit(EventKind::RetryUpdate, payload);
            }
            Err(e) => warn!(update_id, error = %e, "could not encode retry"),
        }
    }
}

impl<T: Entity> fmt::Debug for OptimisticTracker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticTracker")
            .field("config", &self.shared.config)
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;
