//! Envelope publisher.
//!
//! Wraps payloads in a fresh [`Envelope`] and hands them to the broker keyed
//! by the aggregate id, so all events of one cart or order land on one
//! partition in emission order.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──start()──► Running ──stop()──► Stopped
//!            (health probe under        (flush in-flight
//!             the startup budget)        sends)
//! ```
//!
//! Publishing is safe from any number of concurrent call sites. Acknowledgment
//! from all replicas and broker-side idempotence are properties of the bus
//! configuration (see `checkout-redpanda`).
//!
//! # Delivery
//!
//! A publish either returns a [`PublishReceipt`] or an error. It is never
//! retried here: the caller decides whether to redo the logical operation,
//! and a redo produces a new `event_id`.

use crate::metrics::PublisherMetrics;
use crate::retry::{RetryPolicy, retry_with_backoff};
use checkout_core::envelope::{Envelope, EnvelopeError};
use checkout_core::environment::Clock;
use checkout_core::event::DomainEvent;
use checkout_core::event_bus::{EventBus, EventBusError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by the publisher.
#[derive(Error, Debug)]
pub enum PublishError {
    /// `publish` was called before `start` or after `stop`
    #[error("Publisher is not started")]
    NotStarted,

    /// The broker stayed unreachable for the whole startup budget
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The envelope could not be built
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// The broker rejected or timed out the send
    #[error(transparent)]
    Broker(#[from] EventBusError),
}

/// Publisher lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublisherState {
    /// Not accepting publishes
    Stopped,
    /// Connected and accepting publishes
    Running,
}

/// Where a published envelope landed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Id of the envelope that was sent
    pub event_id: Uuid,
    /// Topic written to
    pub topic: String,
    /// Partition written to
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
}

/// Per-service envelope publisher.
pub struct Publisher {
    bus: Arc<dyn EventBus>,
    producer_service: String,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
    startup_policy: RetryPolicy,
    flush_timeout: Duration,
}

impl Publisher {
    /// Create a stopped publisher stamping envelopes with `producer_service`.
    #[must_use]
    pub fn new(
        bus: Arc<dyn EventBus>,
        producer_service: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bus,
            producer_service: producer_service.into(),
            clock,
            running: AtomicBool::new(false),
            startup_policy: RetryPolicy::startup(5),
            flush_timeout: Duration::from_secs(30),
        }
    }

    /// Set the retry budget used by [`Publisher::start`].
    #[must_use]
    pub fn with_startup_policy(mut self, policy: RetryPolicy) -> Self {
        self.startup_policy = policy;
        self
    }

    /// Set how long [`Publisher::stop`] waits for in-flight sends.
    #[must_use]
    pub const fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Identity stamped on every envelope.
    #[must_use]
    pub fn producer_service(&self) -> &str {
        &self.producer_service
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PublisherState {
        if self.running.load(Ordering::Acquire) {
            PublisherState::Running
        } else {
            PublisherState::Stopped
        }
    }

    /// Probe the broker and start accepting publishes.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Unavailable`] if the broker cannot be reached
    /// within the startup budget.
    pub async fn start(&self) -> Result<(), PublishError> {
        if self.state() == PublisherState::Running {
            return Ok(());
        }

        retry_with_backoff(self.startup_policy.clone(), || self.bus.health_check())
            .await
            .map_err(|e| PublishError::Unavailable(e.to_string()))?;

        self.running.store(true, Ordering::Release);
        tracing::info!(producer = %self.producer_service, "Publisher started");
        Ok(())
    }

    /// Stop accepting publishes and drain in-flight sends.
    ///
    /// The publisher is stopped even if the flush fails.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Broker`] if sends were still pending after the
    /// flush timeout.
    pub async fn stop(&self) -> Result<(), PublishError> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let flushed = self.bus.flush(self.flush_timeout).await;
        match &flushed {
            Ok(()) => tracing::info!(producer = %self.producer_service, "Publisher stopped"),
            Err(e) => tracing::error!(
                producer = %self.producer_service,
                error = %e,
                "Publisher stopped with unflushed sends"
            ),
        }
        flushed.map_err(PublishError::from)
    }

    /// Wrap `payload` in a new envelope and publish it under `key`.
    ///
    /// # Errors
    ///
    /// - [`PublishError::NotStarted`] if the publisher is stopped
    /// - [`PublishError::Envelope`] if the envelope cannot be encoded
    /// - [`PublishError::Broker`] if the broker does not acknowledge the send
    pub async fn publish(
        &self,
        topic: &str,
        event_type: &str,
        payload: serde_json::Value,
        key: &str,
    ) -> Result<PublishReceipt, PublishError> {
        if self.state() != PublisherState::Running {
            tracing::error!(topic, event_type, "Publish attempted while publisher is stopped");
            return Err(PublishError::NotStarted);
        }

        let envelope = Envelope::new(event_type, &self.producer_service, self.clock.now(), payload);
        let bytes = envelope.encode()?;

        match self.bus.publish(topic, key, &bytes).await {
            Ok(delivery) => {
                PublisherMetrics::record_published(topic);
                tracing::info!(
                    event_id = %envelope.event_id,
                    event_type,
                    topic,
                    key,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "Event published"
                );
                Ok(PublishReceipt {
                    event_id: envelope.event_id,
                    topic: topic.to_string(),
                    partition: delivery.partition,
                    offset: delivery.offset,
                })
            },
            Err(e) => {
                PublisherMetrics::record_error(topic);
                tracing::error!(
                    event_id = %envelope.event_id,
                    event_type,
                    topic,
                    key,
                    error = %e,
                    "Failed to publish event"
                );
                Err(e.into())
            },
        }
    }

    /// Publish a typed event to its topic, keyed by its aggregate id.
    ///
    /// # Errors
    ///
    /// Same as [`Publisher::publish`].
    pub async fn publish_event<E: DomainEvent>(&self, event: &E) -> Result<PublishReceipt, PublishError> {
        let payload = event.to_payload()?;
        self.publish(
            event.topic().name(),
            event.event_type(),
            payload,
            &event.partition_key(),
        )
        .await
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("producer_service", &self.producer_service)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
