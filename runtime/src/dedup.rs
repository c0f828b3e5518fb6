//! Bounded processed-event set.
//!
//! Remembers the `event_id`s a subscriber has already dispatched so an exact
//! redelivery of the same envelope is skipped. Only the most recent
//! `capacity` ids are kept; older ones are evicted first-in first-out.
//!
//! This catches broker redeliveries, not logical duplicates: a re-published
//! event carries a fresh `event_id`. Handlers stay responsible for their own
//! idempotence.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Default number of remembered event ids.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// FIFO-bounded set of processed event ids.
#[derive(Debug)]
pub struct SeenEvents {
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    ids: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

impl SeenEvents {
    /// Create a set that remembers at most `capacity` ids (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Whether `event_id` was already recorded.
    #[must_use]
    pub fn contains(&self, event_id: &Uuid) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ids
            .contains(event_id)
    }

    /// Record `event_id`. Returns `false` if it was already present.
    pub fn insert(&self, event_id: Uuid) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if !inner.ids.insert(event_id) {
            return false;
        }
        inner.order.push_back(event_id);
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.ids.remove(&evicted);
            }
        }
        true
    }

    /// Number of remembered ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SeenEvents {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
