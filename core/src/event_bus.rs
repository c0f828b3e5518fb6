//! Broker abstraction shared by publishers and subscribers.
//!
//! The [`EventBus`] trait is the only way services reach the message broker.
//! It deals in raw bytes keyed by a partition key; envelope encoding lives one
//! layer up in the runtime crate.
//!
//! # Delivery model
//!
//! ```text
//!   Publisher ──publish(topic, key, bytes)──► EventBus ──► partition log
//!                                                              │
//!   Subscriber ◄──poll_batch── EventConsumer ◄─────────────────┘
//!        │
//!        └──commit(batch)──► committed offset per (group, topic, partition)
//! ```
//!
//! - **Keyed ordering**: records with the same key land on the same partition
//!   and are delivered in publish order. Nothing is promised across keys.
//! - **At-least-once**: a consumer that stops before committing sees the
//!   uncommitted records again after it re-subscribes under the same group.
//! - **Manual commit**: consumers never auto-commit. The caller commits after
//!   the whole batch has been dispatched.
//!
//! # Implementations
//!
//! - `RedpandaEventBus` in `checkout-redpanda` (Kafka protocol, production)
//! - `InMemoryEventBus` in `checkout-testing` (tests)
//!
//! # Dyn Compatibility
//!
//! Both traits return boxed futures instead of using `async fn` so they can be
//! held as `Arc<dyn EventBus>` and `Box<dyn EventConsumer>`.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a record to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to commit consumer offsets
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// Topic not found or invalid
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// The operation did not complete in time
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),

    /// The consumer or producer was already closed
    #[error("Closed: {0}")]
    Closed(String),

    /// Generic error for other failures
    #[error("Event bus error: {0}")]
    Other(String),
}

impl EventBusError {
    /// Whether the error is a transient broker condition worth retrying.
    ///
    /// Connection loss, transport hiccups and timeouts are transient. Invalid
    /// topics, closed handles and rejected subscriptions are not.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::TransportError(_) | Self::Timeout(_)
        )
    }
}

/// Future returned by broker operations.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventBusError>> + Send + 'a>>;

/// Where a consumer group starts reading when it has no committed offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OffsetReset {
    /// Start from the oldest retained record.
    #[default]
    Earliest,
    /// Start from the next record published after subscribing.
    Latest,
}

impl OffsetReset {
    /// Broker configuration value (`earliest` or `latest`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OffsetReset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            other => Err(format!(
                "invalid offset reset '{other}', expected 'earliest' or 'latest'"
            )),
        }
    }
}

/// Subscription request: a fixed topic set under a named consumer group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Consumer group identity
    pub group: String,
    /// Topics to consume
    pub topics: Vec<String>,
    /// Start position when the group has no committed offset
    pub offset_reset: OffsetReset,
}

impl SubscriptionSpec {
    /// Create a subscription starting from the earliest offset.
    #[must_use]
    pub fn new(group: impl Into<String>, topics: Vec<String>) -> Self {
        Self {
            group: group.into(),
            topics,
            offset_reset: OffsetReset::Earliest,
        }
    }

    /// Set the offset reset policy.
    #[must_use]
    pub const fn with_offset_reset(mut self, offset_reset: OffsetReset) -> Self {
        self.offset_reset = offset_reset;
        self
    }
}

/// Broker acknowledgment of a published record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Partition the record was written to
    pub partition: i32,
    /// Offset of the record within the partition
    pub offset: i64,
}

/// A record pulled from the broker, not yet decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerRecord {
    /// Source topic
    pub topic: String,
    /// Source partition
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Partition key, if the producer set one
    pub key: Option<String>,
    /// Raw record value
    pub payload: Vec<u8>,
}

/// Offsets to commit for a processed batch.
///
/// Returns, per `(topic, partition)`, the highest offset seen plus one, which
/// is the position the group resumes from.
#[must_use]
pub fn next_offsets(records: &[BrokerRecord]) -> BTreeMap<(String, i32), i64> {
    let mut offsets: BTreeMap<(String, i32), i64> = BTreeMap::new();
    for record in records {
        let next = record.offset + 1;
        offsets
            .entry((record.topic.clone(), record.partition))
            .and_modify(|current| *current = (*current).max(next))
            .or_insert(next);
    }
    offsets
}

/// Trait for broker client implementations.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: a single bus is shared by every
/// call site that publishes, including handlers running concurrently. Per-key
/// ordering must survive concurrent publishers.
pub trait EventBus: Send + Sync {
    /// Publish a record and wait for the broker acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the broker rejects or
    /// times out the send.
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        payload: &'a [u8],
    ) -> BusFuture<'a, DeliveryReceipt>;

    /// Wait for in-flight sends to complete.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Timeout`] if sends are still pending after `timeout`.
    fn flush(&self, timeout: Duration) -> BusFuture<'_, ()>;

    /// Probe broker connectivity.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the broker cannot be reached.
    fn health_check(&self) -> BusFuture<'_, ()>;

    /// Join a consumer group and subscribe to its topics.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription is rejected.
    fn subscribe(&self, spec: SubscriptionSpec) -> BusFuture<'_, Box<dyn EventConsumer>>;
}

/// A consumer-group member pulling batches with manual commit.
pub trait EventConsumer: Send {
    /// Pull up to `max` records.
    ///
    /// Waits at most `timeout` for the first record and returns an empty batch
    /// if nothing arrives.
    ///
    /// # Errors
    ///
    /// Returns a transient error (see [`EventBusError::is_transient`]) on
    /// connection problems.
    fn poll_batch(&mut self, max: usize, timeout: Duration) -> BusFuture<'_, Vec<BrokerRecord>>;

    /// Commit the batch: the highest offset + 1 per topic-partition.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::CommitFailed`] if the broker rejects the commit.
    fn commit<'a>(&'a mut self, records: &'a [BrokerRecord]) -> BusFuture<'a, ()>;

    /// Leave the group and release the connection. Uncommitted records are redelivered.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer cannot be shut down cleanly.
    fn close(&mut self) -> BusFuture<'_, ()>;
}
