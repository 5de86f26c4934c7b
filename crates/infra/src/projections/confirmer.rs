//! Pending/confirmed bookkeeping for at-least-once projection delivery.
//!
//! Every dispatched projectable is marked **pending** under its composite
//! identity (`type` + `data_id` + `data_version`) and moves to **confirmed**
//! exactly once. Confirmed wins: marking a confirmed projectable pending again
//! is a no-op. Whatever is still pending past a timeout is handed back by
//! `check_unconfirmed` so a retry job can dispatch it again.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::trace;

use chronicle_events::{Projectable, ProjectableId};

/// Confirmation tracking shared by the dispatcher and any retry job.
pub trait Confirmer: Send + Sync {
    /// Mark as pending (refreshing the timestamp); no-op once confirmed.
    fn pending(&self, projectable: &Projectable);

    /// Move to confirmed (also valid without a prior `pending`).
    fn confirm(&self, projectable: &Projectable);

    /// Projectables pending for longer than `threshold`, oldest first.
    fn check_unconfirmed(&self, threshold: Duration) -> Vec<Projectable>;

    fn is_pending(&self, id: &ProjectableId) -> bool;

    fn is_confirmed(&self, id: &ProjectableId) -> bool;

    fn pending_count(&self) -> usize;
}

impl<C> Confirmer for Arc<C>
where
    C: Confirmer + ?Sized,
{
    fn pending(&self, projectable: &Projectable) {
        (**self).pending(projectable)
    }

    fn confirm(&self, projectable: &Projectable) {
        (**self).confirm(projectable)
    }

    fn check_unconfirmed(&self, threshold: Duration) -> Vec<Projectable> {
        (**self).check_unconfirmed(threshold)
    }

    fn is_pending(&self, id: &ProjectableId) -> bool {
        (**self).is_pending(id)
    }

    fn is_confirmed(&self, id: &ProjectableId) -> bool {
        (**self).is_confirmed(id)
    }

    fn pending_count(&self) -> usize {
        (**self).pending_count()
    }
}

/// Source of "now"; injectable so timeouts can be tested without sleeping.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone)]
struct PendingRecord {
    projectable: Projectable,
    since: DateTime<Utc>,
    attempts: u32,
}

#[derive(Debug, Default)]
struct ConfirmerState {
    pending: HashMap<ProjectableId, PendingRecord>,
    confirmed: HashSet<ProjectableId>,
}

/// In-memory confirmer.
pub struct InMemoryConfirmer {
    state: Mutex<ConfirmerState>,
    clock: Clock,
}

impl core::fmt::Debug for InMemoryConfirmer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryConfirmer")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryConfirmer {
    fn default() -> Self {
        Self::with_clock(Arc::new(Utc::now))
    }
}

impl InMemoryConfirmer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            state: Mutex::new(ConfirmerState::default()),
            clock,
        }
    }

    // Each operation is a single map update, so a poisoned guard is still consistent.
    fn state(&self) -> MutexGuard<'_, ConfirmerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// How many times a pending projectable has been dispatched.
    pub fn attempts(&self, id: &ProjectableId) -> Option<u32> {
        self.state().pending.get(id).map(|r| r.attempts)
    }

    pub fn confirmed_count(&self) -> usize {
        self.state().confirmed.len()
    }
}

impl Confirmer for InMemoryConfirmer {
    fn pending(&self, projectable: &Projectable) {
        let now = (self.clock)();
        let mut state = self.state();
        let id = projectable.id();

        if state.confirmed.contains(id) {
            trace!(projectable = %id, "already confirmed; pending ignored");
            return;
        }

        state
            .pending
            .entry(id.clone())
            .and_modify(|r| {
                r.since = now;
                r.attempts += 1;
            })
            .or_insert_with(|| PendingRecord {
                projectable: projectable.clone(),
                since: now,
                attempts: 1,
            });
    }

    fn confirm(&self, projectable: &Projectable) {
        let mut state = self.state();
        let id = projectable.id();

        state.pending.remove(id);
        if state.confirmed.insert(id.clone()) {
            trace!(projectable = %id, "confirmed");
        }
    }

    fn check_unconfirmed(&self, threshold: Duration) -> Vec<Projectable> {
        let now = (self.clock)();
        let state = self.state();

        let mut overdue: Vec<&PendingRecord> = state
            .pending
            .values()
            .filter(|r| match (now - r.since).to_std() {
                Ok(elapsed) => elapsed > threshold,
                Err(_) => false,
            })
            .collect();
        overdue.sort_by(|a, b| {
            a.since
                .cmp(&b.since)
                .then_with(|| a.projectable.id().cmp(b.projectable.id()))
        });

        overdue.into_iter().map(|r| r.projectable.clone()).collect()
    }

    fn is_pending(&self, id: &ProjectableId) -> bool {
        self.state().pending.contains_key(id)
    }

    fn is_confirmed(&self, id: &ProjectableId) -> bool {
        self.state().confirmed.contains(id)
    }

    fn pending_count(&self) -> usize {
        self.state().pending.len()
    }
}
