//! Batch subscriber with handler fan-out and commit-after-batch.
//!
//! # State Machine
//!
//! ```text
//! Stopped ──start()──► Starting ──(group joined)──► Running
//!    ▲                    │                            │
//!    │          (startup budget exhausted)          stop()
//!    │                    │                            ▼
//!    └────────────────────┴──────────────────────── Stopping
//! ```
//!
//! # Run Loop
//!
//! ```text
//! loop {
//!     batch = poll_batch(max, timeout)        // suspends; shutdown wins here
//!     lanes = split batch by (topic, key)     // per-key order preserved
//!     join_all(lanes):                        // lanes run concurrently
//!         for message in lane:                // offset order inside a lane
//!             decode   → malformed: log, skip
//!             seen?    → duplicate: skip
//!             handlers → none: log, skip (still counts as processed)
//!             join_all(handlers)              // errors and panics logged
//!             all ok?  → remember in seen-set
//!     commit(batch)                           // once, after every lane
//! }
//! ```
//!
//! A failing handler never aborts its siblings and never blocks the commit;
//! its side effect is lost unless it retries internally. A crash (or a stop
//! that overruns the shutdown timeout) before the commit redelivers the whole
//! batch, including messages whose handlers already succeeded.

use crate::dedup::SeenEvents;
use crate::metrics::SubscriberMetrics;
use crate::registry::{EventHandler, HandlerError, HandlerRegistry};
use crate::retry::{RetryPolicy, retry_with_backoff};
use checkout_core::envelope::Envelope;
use checkout_core::event_bus::{
    BrokerRecord, EventBus, EventBusError, EventConsumer, OffsetReset, SubscriptionSpec,
};
use futures::FutureExt;
use futures::future::join_all;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Errors returned by the subscriber lifecycle.
#[derive(Error, Debug)]
pub enum SubscriberError {
    /// `start` was called while not stopped
    #[error("Subscriber is already {0:?}")]
    AlreadyStarted(SubscriberState),

    /// The broker could not be joined within the startup budget
    #[error("Failed to start subscriber: {0}")]
    Startup(#[source] EventBusError),
}

/// Subscriber lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriberState {
    /// Not connected
    Stopped,
    /// Joining the consumer group
    Starting,
    /// Polling and dispatching
    Running,
    /// Draining the in-flight batch
    Stopping,
}

/// Subscriber settings.
#[derive(Clone, Debug)]
pub struct SubscriberConfig {
    /// Consumer group identity
    pub group: String,
    /// Topics to consume
    pub topics: Vec<String>,
    /// Start position on first start
    pub offset_reset: OffsetReset,
    /// Maximum messages per batch
    pub max_batch: usize,
    /// How long a poll waits for the first message
    pub poll_timeout: Duration,
    /// How long `stop` lets the in-flight batch finish
    pub shutdown_timeout: Duration,
    /// Retry budget for joining the group
    pub startup_policy: RetryPolicy,
    /// Backoff between failed polls
    pub poll_backoff: RetryPolicy,
    /// Remember this many processed event ids; `None` disables the seen-set
    pub dedup_capacity: Option<usize>,
}

impl SubscriberConfig {
    /// Defaults: earliest, batches of 10, 1s polls, 30s shutdown, 5 startup retries.
    #[must_use]
    pub fn new(group: impl Into<String>, topics: Vec<String>) -> Self {
        Self {
            group: group.into(),
            topics,
            offset_reset: OffsetReset::Earliest,
            max_batch: 10,
            poll_timeout: Duration::from_millis(1000),
            shutdown_timeout: Duration::from_secs(30),
            startup_policy: RetryPolicy::startup(5),
            poll_backoff: RetryPolicy::builder()
                .initial_delay(Duration::from_millis(200))
                .max_delay(Duration::from_secs(5))
                .build(),
            dedup_capacity: None,
        }
    }

    /// Set the offset reset policy.
    #[must_use]
    pub const fn with_offset_reset(mut self, offset_reset: OffsetReset) -> Self {
        self.offset_reset = offset_reset;
        self
    }

    /// Set the batch size (minimum 1).
    #[must_use]
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    /// Set the poll timeout.
    #[must_use]
    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the shutdown timeout.
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the startup retry budget.
    #[must_use]
    pub fn with_startup_policy(mut self, policy: RetryPolicy) -> Self {
        self.startup_policy = policy;
        self
    }

    /// Set the backoff between failed polls.
    #[must_use]
    pub fn with_poll_backoff(mut self, policy: RetryPolicy) -> Self {
        self.poll_backoff = policy;
        self
    }

    /// Enable the processed-event seen-set.
    #[must_use]
    pub const fn with_dedup(mut self, capacity: usize) -> Self {
        self.dedup_capacity = Some(capacity);
        self
    }

    fn subscription(&self) -> SubscriptionSpec {
        SubscriptionSpec::new(self.group.clone(), self.topics.clone())
            .with_offset_reset(self.offset_reset)
    }
}

/// Per-service batch subscriber.
pub struct Subscriber {
    bus: Arc<dyn EventBus>,
    config: SubscriberConfig,
    registry: Arc<HandlerRegistry>,
    seen: Option<Arc<SeenEvents>>,
    state: Arc<watch::Sender<SubscriberState>>,
    shutdown: Mutex<Option<broadcast::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Subscriber {
    /// Create a stopped subscriber with an empty registry.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, config: SubscriberConfig) -> Self {
        let seen = config.dedup_capacity.map(|capacity| Arc::new(SeenEvents::new(capacity)));
        let (state, _) = watch::channel(SubscriberState::Stopped);
        Self {
            bus,
            config,
            registry: Arc::new(HandlerRegistry::new()),
            seen,
            state: Arc::new(state),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SubscriberState {
        *self.state.borrow()
    }

    /// Settings this subscriber runs with.
    #[must_use]
    pub const fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    /// The handler registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Add a handler for `event_type`.
    pub fn register(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.registry.register(event_type, handler);
    }

    /// Wait until the subscriber reaches `target`. Returns `false` on timeout.
    pub async fn wait_for_state(&self, target: SubscriberState, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|state| *state == target))
            .await
            .is_ok_and(|reached| reached.is_ok())
    }

    /// Join the consumer group and spawn the run loop.
    ///
    /// # Errors
    ///
    /// - [`SubscriberError::AlreadyStarted`] unless the subscriber is stopped
    /// - [`SubscriberError::Startup`] if the group cannot be joined within the
    ///   startup budget (fatal for the service)
    pub async fn start(&self) -> Result<(), SubscriberError> {
        let claimed = self.state.send_if_modified(|state| {
            if *state == SubscriberState::Stopped {
                *state = SubscriberState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(SubscriberError::AlreadyStarted(self.state()));
        }

        tracing::info!(
            group = %self.config.group,
            topics = ?self.config.topics,
            offset_reset = %self.config.offset_reset,
            "Starting subscriber"
        );

        let spec = self.config.subscription();
        let consumer = match retry_with_backoff(self.config.startup_policy.clone(), || {
            self.bus.subscribe(spec.clone())
        })
        .await
        {
            Ok(consumer) => consumer,
            Err(e) => {
                self.state.send_replace(SubscriberState::Stopped);
                tracing::error!(group = %self.config.group, error = %e, "Subscriber failed to start");
                return Err(SubscriberError::Startup(e));
            },
        };

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        *self.shutdown.lock().unwrap_or_else(PoisonError::into_inner) = Some(shutdown_tx);

        let run_loop = RunLoop {
            consumer,
            registry: Arc::clone(&self.registry),
            seen: self.seen.clone(),
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            shutdown: shutdown_rx,
        };
        let span = tracing::info_span!("subscriber", group = %self.config.group);

        self.state.send_replace(SubscriberState::Running);
        let handle = tokio::spawn(run_loop.run().instrument(span));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        tracing::info!(group = %self.config.group, "Subscriber running");
        Ok(())
    }

    /// Stop polling, let the in-flight batch finish, release the connection.
    ///
    /// If the batch is still running after the shutdown timeout, the loop is
    /// aborted and the batch is left uncommitted for redelivery.
    pub async fn stop(&self) {
        let handle = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut handle) = handle else {
            return;
        };

        self.state.send_if_modified(|state| {
            if *state == SubscriberState::Running {
                *state = SubscriberState::Stopping;
                true
            } else {
                false
            }
        });
        tracing::info!(group = %self.config.group, "Stopping subscriber");

        if let Some(shutdown) = self.shutdown.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = shutdown.send(());
        }

        match tokio::time::timeout(self.config.shutdown_timeout, &mut handle).await {
            Ok(Ok(())) => tracing::info!(group = %self.config.group, "Subscriber stopped"),
            Ok(Err(e)) => tracing::error!(group = %self.config.group, error = %e, "Subscriber task failed"),
            Err(_) => {
                handle.abort();
                tracing::warn!(
                    group = %self.config.group,
                    timeout_secs = self.config.shutdown_timeout.as_secs(),
                    "Shutdown timeout elapsed, in-flight batch abandoned uncommitted"
                );
            },
        }

        self.state.send_replace(SubscriberState::Stopped);
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("group", &self.config.group)
            .field("topics", &self.config.topics)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct RunLoop {
    consumer: Box<dyn EventConsumer>,
    registry: Arc<HandlerRegistry>,
    seen: Option<Arc<SeenEvents>>,
    config: SubscriberConfig,
    state: Arc<watch::Sender<SubscriberState>>,
    shutdown: broadcast::Receiver<()>,
}

impl RunLoop {
    async fn run(mut self) {
        let mut poll_failures = 0;

        loop {
            let polled = tokio::select! {
                biased;
                _ = self.shutdown.recv() => break,
                polled = self.consumer.poll_batch(self.config.max_batch, self.config.poll_timeout) => polled,
            };

            let batch = match polled {
                Ok(batch) => {
                    poll_failures = 0;
                    batch
                },
                Err(e) if e.is_transient() => {
                    SubscriberMetrics::record_poll_error();
                    let delay = self.config.poll_backoff.delay_for_attempt(poll_failures);
                    poll_failures += 1;
                    tracing::warn!(
                        error = %e,
                        attempt = poll_failures,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Poll failed, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = self.shutdown.recv() => break,
                        () = tokio::time::sleep(delay) => continue,
                    }
                },
                Err(e) => {
                    SubscriberMetrics::record_poll_error();
                    tracing::error!(error = %e, "Poll failed permanently, stopping run loop");
                    break;
                },
            };

            if batch.is_empty() {
                continue;
            }

            let started = Instant::now();
            dispatch_batch(&batch, &self.registry, self.seen.as_deref()).await;

            match self.consumer.commit(&batch).await {
                Ok(()) => {
                    SubscriberMetrics::record_batch(started.elapsed());
                    tracing::debug!(messages = batch.len(), "Batch committed");
                },
                Err(e) => {
                    SubscriberMetrics::record_commit_error();
                    tracing::error!(
                        messages = batch.len(),
                        error = %e,
                        "Batch commit failed, messages may be redelivered"
                    );
                },
            }
        }

        if let Err(e) = self.consumer.close().await {
            tracing::warn!(error = %e, "Error closing consumer");
        }
        self.state.send_replace(SubscriberState::Stopped);
    }
}

/// Dispatch one batch: lanes by `(topic, key)` concurrently, messages within a
/// lane in offset order.
pub(crate) async fn dispatch_batch(
    batch: &[BrokerRecord],
    registry: &HandlerRegistry,
    seen: Option<&SeenEvents>,
) {
    let lanes = split_into_lanes(batch);
    join_all(lanes.into_iter().map(|lane| async move {
        for record in lane {
            dispatch_record(record, registry, seen).await;
        }
    }))
    .await;
}

/// Group records by `(topic, key)`, keeping first-seen lane order and offset
/// order inside each lane. Unkeyed records fall back to their partition.
fn split_into_lanes(batch: &[BrokerRecord]) -> Vec<Vec<&BrokerRecord>> {
    let mut index: HashMap<(&str, LaneKey<'_>), usize> = HashMap::new();
    let mut lanes: Vec<Vec<&BrokerRecord>> = Vec::new();

    for record in batch {
        let key = record
            .key
            .as_deref()
            .map_or(LaneKey::Partition(record.partition), LaneKey::Key);
        let slot = *index.entry((record.topic.as_str(), key)).or_insert_with(|| {
            lanes.push(Vec::new());
            lanes.len() - 1
        });
        lanes[slot].push(record);
    }

    for lane in &mut lanes {
        lane.sort_by_key(|record| (record.partition, record.offset));
    }
    lanes
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum LaneKey<'a> {
    Key(&'a str),
    Partition(i32),
}

async fn dispatch_record(record: &BrokerRecord, registry: &HandlerRegistry, seen: Option<&SeenEvents>) {
    let envelope = match Envelope::decode(&record.payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            SubscriberMetrics::record_malformed(&record.topic);
            tracing::warn!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                error = %e,
                "Skipping malformed message"
            );
            return;
        },
    };

    if seen.is_some_and(|seen| seen.contains(&envelope.event_id)) {
        SubscriberMetrics::record_duplicate(&envelope.event_type);
        tracing::debug!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            "Skipping already processed event"
        );
        return;
    }

    let handlers = registry.handlers_for(&envelope.event_type);
    let mut all_succeeded = true;
    if handlers.is_empty() {
        SubscriberMetrics::record_unhandled(&envelope.event_type);
        tracing::info!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            topic = %record.topic,
            "No handler registered, skipping"
        );
    } else {
        tracing::debug!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            handlers = handlers.len(),
            "Dispatching event"
        );

        let outcomes = join_all(handlers.iter().map(|handler| invoke(handler.as_ref(), &envelope))).await;

        for (handler, outcome) in handlers.iter().zip(outcomes) {
            if let Err(e) = outcome {
                all_succeeded = false;
                SubscriberMetrics::record_handler_failure(handler.name());
                tracing::error!(
                    handler = handler.name(),
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    error = %e,
                    "Handler failed"
                );
            }
        }
        SubscriberMetrics::record_processed(&envelope.event_type);
    }

    // A failed event stays eligible for redelivery
    if let Some(seen) = seen.filter(|_| all_succeeded) {
        seen.insert(envelope.event_id);
    }
}

async fn invoke(handler: &dyn EventHandler, envelope: &Envelope) -> Result<(), HandlerError> {
    AssertUnwindSafe(handler.handle(envelope))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(HandlerError::Panicked(message))
        })
}
