//! In-memory broker for tests.
//!
//! Behaves like a single-node Kafka-protocol broker as far as the checkout
//! services can observe:
//!
//! - every topic has a fixed number of partitions; a record goes to
//!   `hash(key) % partitions`, so one key always lands on one partition
//! - each partition is an append-only log with dense offsets from 0
//! - consumer groups keep committed offsets; a consumer that re-subscribes
//!   under the same group resumes from the last commit, so uncommitted
//!   records are redelivered
//! - faults can be injected into publish (all topics or one), poll, commit,
//!   subscribe and health checks, one failure per call, for the next `n` calls
//!
//! Every consumer reads every partition of its topics: group rebalancing
//! between several live members is not modelled.

use checkout_core::envelope::Envelope;
use checkout_core::event_bus::{
    BrokerRecord, BusFuture, DeliveryReceipt, EventBus, EventBusError, EventConsumer, OffsetReset,
    SubscriptionSpec, next_offsets,
};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Default partitions per topic.
pub const DEFAULT_PARTITIONS: i32 = 3;

#[derive(Clone, Debug)]
struct StoredRecord {
    key: Option<String>,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct Faults {
    publish: usize,
    publish_to: HashMap<String, usize>,
    poll: usize,
    commit: usize,
    subscribe: usize,
    health: usize,
}

#[derive(Debug, Default)]
struct BusState {
    logs: HashMap<String, Vec<Vec<StoredRecord>>>,
    committed: HashMap<(String, String, i32), i64>,
    faults: Faults,
}

#[derive(Debug)]
struct Shared {
    partitions: i32,
    state: Mutex<BusState>,
    appended: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Take one injected fault if any are pending.
fn take_fault(counter: &mut usize) -> bool {
    if *counter == 0 {
        return false;
    }
    *counter -= 1;
    true
}

/// Kafka-like broker held entirely in memory.
#[derive(Clone, Debug)]
pub struct InMemoryEventBus {
    shared: Arc<Shared>,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventBus {
    /// Create a bus with [`DEFAULT_PARTITIONS`] partitions per topic.
    #[must_use]
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Create a bus with `partitions` partitions per topic (minimum 1).
    #[must_use]
    pub fn with_partitions(partitions: i32) -> Self {
        Self {
            shared: Arc::new(Shared {
                partitions: partitions.max(1),
                state: Mutex::new(BusState::default()),
                appended: Notify::new(),
            }),
        }
    }

    /// Partition a key is routed to.
    #[must_use]
    pub fn partition_for(&self, key: &str) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let bucket = hasher.finish() % u64::from(self.shared.partitions.unsigned_abs());
        i32::try_from(bucket).unwrap_or(0)
    }

    /// Fail the next `n` publishes.
    pub fn fail_next_publishes(&self, n: usize) {
        self.shared.lock().faults.publish = n;
    }

    /// Fail the next `n` publishes to `topic`; other topics are unaffected.
    pub fn fail_next_publishes_to(&self, topic: &str, n: usize) {
        self.shared.lock().faults.publish_to.insert(topic.to_string(), n);
    }

    /// Fail the next `n` polls with a transient error.
    pub fn fail_next_polls(&self, n: usize) {
        self.shared.lock().faults.poll = n;
    }

    /// Fail the next `n` commits.
    pub fn fail_next_commits(&self, n: usize) {
        self.shared.lock().faults.commit = n;
    }

    /// Fail the next `n` subscribes with a connection error.
    pub fn fail_next_subscribes(&self, n: usize) {
        self.shared.lock().faults.subscribe = n;
    }

    /// Fail the next `n` health checks.
    pub fn fail_next_health_checks(&self, n: usize) {
        self.shared.lock().faults.health = n;
    }

    /// Every record published to `topic`, partition by partition.
    #[must_use]
    pub fn records(&self, topic: &str) -> Vec<BrokerRecord> {
        let state = self.shared.lock();
        let Some(partitions) = state.logs.get(topic) else {
            return Vec::new();
        };

        partitions
            .iter()
            .zip(0_i32..)
            .flat_map(|(log, partition)| {
                log.iter().zip(0_i64..).map(move |(stored, offset)| BrokerRecord {
                    topic: topic.to_string(),
                    partition,
                    offset,
                    key: stored.key.clone(),
                    payload: stored.payload.clone(),
                })
            })
            .collect()
    }

    /// Envelopes published to `topic`. Records that do not decode are left out.
    #[must_use]
    pub fn envelopes(&self, topic: &str) -> Vec<Envelope> {
        self.records(topic)
            .iter()
            .filter_map(|record| Envelope::decode(&record.payload).ok())
            .collect()
    }

    /// Number of records in `topic`.
    #[must_use]
    pub fn published_count(&self, topic: &str) -> usize {
        self.shared
            .lock()
            .logs
            .get(topic)
            .map_or(0, |partitions| partitions.iter().map(Vec::len).sum())
    }

    /// Committed position of `group` on one partition.
    #[must_use]
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.shared
            .lock()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Append raw bytes, bypassing fault injection. Useful for malformed input.
    pub fn inject_raw(&self, topic: &str, key: &str, payload: Vec<u8>) -> DeliveryReceipt {
        self.append(topic, key, payload)
    }

    fn append(&self, topic: &str, key: &str, payload: Vec<u8>) -> DeliveryReceipt {
        let partition = self.partition_for(key);
        let receipt = {
            let mut state = self.shared.lock();
            let partitions = self.shared.partitions;
            let logs = state.logs.entry(topic.to_string()).or_insert_with(|| {
                (0..partitions).map(|_| Vec::new()).collect()
            });
            let log = &mut logs[usize::try_from(partition).unwrap_or(0)];
            log.push(StoredRecord {
                key: Some(key.to_string()),
                payload,
            });
            DeliveryReceipt {
                partition,
                offset: i64::try_from(log.len()).unwrap_or(i64::MAX) - 1,
            }
        };
        self.shared.appended.notify_waiters();
        receipt
    }
}

impl EventBus for InMemoryEventBus {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        payload: &'a [u8],
    ) -> BusFuture<'a, DeliveryReceipt> {
        Box::pin(async move {
            let failed = {
                let mut state = self.shared.lock();
                let faults = &mut state.faults;
                take_fault(&mut faults.publish)
                    || faults.publish_to.get_mut(topic).is_some_and(take_fault)
            };
            if failed {
                return Err(EventBusError::PublishFailed {
                    topic: topic.to_string(),
                    reason: "injected publish failure".to_string(),
                });
            }
            Ok(self.append(topic, key, payload.to_vec()))
        })
    }

    fn flush(&self, _timeout: Duration) -> BusFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn health_check(&self) -> BusFuture<'_, ()> {
        Box::pin(async move {
            if take_fault(&mut self.shared.lock().faults.health) {
                return Err(EventBusError::ConnectionFailed(
                    "injected health check failure".to_string(),
                ));
            }
            Ok(())
        })
    }

    fn subscribe(&self, spec: SubscriptionSpec) -> BusFuture<'_, Box<dyn EventConsumer>> {
        Box::pin(async move {
            let mut state = self.shared.lock();
            if take_fault(&mut state.faults.subscribe) {
                return Err(EventBusError::ConnectionFailed(
                    "injected subscribe failure".to_string(),
                ));
            }

            let mut positions = HashMap::new();
            for topic in &spec.topics {
                for partition in 0..self.shared.partitions {
                    let committed = state
                        .committed
                        .get(&(spec.group.clone(), topic.clone(), partition))
                        .copied();
                    let start = committed.unwrap_or_else(|| match spec.offset_reset {
                        OffsetReset::Earliest => 0,
                        OffsetReset::Latest => state
                            .logs
                            .get(topic)
                            .and_then(|logs| logs.get(usize::try_from(partition).ok()?))
                            .map_or(0, |log| i64::try_from(log.len()).unwrap_or(i64::MAX)),
                    });
                    positions.insert((topic.clone(), partition), start);
                }
            }
            drop(state);

            tracing::debug!(group = %spec.group, topics = ?spec.topics, "In-memory consumer subscribed");

            Ok(Box::new(InMemoryConsumer {
                shared: Arc::clone(&self.shared),
                group: spec.group,
                topics: spec.topics,
                positions,
                closed: false,
            }) as Box<dyn EventConsumer>)
        })
    }
}

/// Consumer handed out by [`InMemoryEventBus::subscribe`].
#[derive(Debug)]
pub struct InMemoryConsumer {
    shared: Arc<Shared>,
    group: String,
    topics: Vec<String>,
    positions: HashMap<(String, i32), i64>,
    closed: bool,
}

impl InMemoryConsumer {
    /// Take up to `max` records past the current positions and advance them.
    fn take(&mut self, state: &BusState, max: usize) -> Vec<BrokerRecord> {
        let mut batch = Vec::new();
        for topic in &self.topics {
            let Some(logs) = state.logs.get(topic) else {
                continue;
            };
            for (log, partition) in logs.iter().zip(0_i32..) {
                let position = self.positions.entry((topic.clone(), partition)).or_insert(0);
                let start = usize::try_from(*position).unwrap_or(0);
                for (stored, offset) in log.iter().skip(start).zip(*position..) {
                    if batch.len() >= max {
                        return batch;
                    }
                    batch.push(BrokerRecord {
                        topic: topic.clone(),
                        partition,
                        offset,
                        key: stored.key.clone(),
                        payload: stored.payload.clone(),
                    });
                    *position = offset + 1;
                }
            }
        }
        batch
    }
}

impl EventConsumer for InMemoryConsumer {
    fn poll_batch(&mut self, max: usize, timeout: Duration) -> BusFuture<'_, Vec<BrokerRecord>> {
        Box::pin(async move {
            if self.closed {
                return Err(EventBusError::Closed("consumer closed".to_string()));
            }
            let deadline = Instant::now() + timeout;
            let shared = Arc::clone(&self.shared);

            loop {
                let appended = shared.appended.notified();
                tokio::pin!(appended);
                appended.as_mut().enable();

                let batch = {
                    let mut state = shared.lock();
                    if take_fault(&mut state.faults.poll) {
                        return Err(EventBusError::TransportError(
                            "injected poll failure".to_string(),
                        ));
                    }
                    self.take(&state, max.max(1))
                };

                if !batch.is_empty() {
                    return Ok(batch);
                }
                if tokio::time::timeout_at(deadline, appended).await.is_err() {
                    return Ok(Vec::new());
                }
            }
        })
    }

    fn commit<'a>(&'a mut self, records: &'a [BrokerRecord]) -> BusFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.shared.lock();
            if take_fault(&mut state.faults.commit) {
                return Err(EventBusError::CommitFailed(
                    "injected commit failure".to_string(),
                ));
            }
            for ((topic, partition), next) in next_offsets(records) {
                state.committed.insert((self.group.clone(), topic, partition), next);
            }
            Ok(())
        })
    }

    fn close(&mut self) -> BusFuture<'_, ()> {
        Box::pin(async move {
            self.closed = true;
            Ok(())
        })
    }
}
