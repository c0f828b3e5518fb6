//! Per-order write serialization.
//!
//! Every read-classify-write-publish cycle on an order runs under that
//! order's lock, so two outcomes consumed concurrently from different topics
//! see each other's writes. Locks are striped: distinct orders may share a
//! stripe, one order always maps to the same stripe. Never take a second
//! order lock while holding one.

use std::hash::{DefaultHasher, Hash, Hasher};
use tokio::sync::{Mutex, MutexGuard};

const STRIPES: u64 = 64;

pub(crate) struct OrderLocks {
    stripes: Vec<Mutex<()>>,
}

impl OrderLocks {
    pub(crate) fn new() -> Self {
        Self {
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub(crate) async fn lock(&self, order_id: &str) -> MutexGuard<'_, ()> {
        self.stripes[stripe_for(order_id)].lock().await
    }
}

fn stripe_for(order_id: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    order_id.hash(&mut hasher);
    usize::try_from(hasher.finish() % STRIPES).unwrap_or_default()
}
