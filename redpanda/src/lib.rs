//! Redpanda broker client for the checkout services.
//!
//! Implements [`EventBus`] and [`EventConsumer`] from `checkout-core` over
//! rdkafka, so it works against Redpanda or any Kafka-protocol broker.
//!
//! # Delivery Semantics
//!
//! **Producer**: idempotent, `acks=all`, at most 5 in-flight requests per
//! connection. Retries inside librdkafka cannot reorder or duplicate records
//! of one partition. A send that still fails after `message.timeout.ms` is
//! reported to the caller and never retried here.
//!
//! **Consumer**: `enable.auto.commit=false`. Offsets are committed only when
//! the caller commits a processed batch, synchronously, highest offset + 1 per
//! topic-partition. A crash before that commit redelivers the batch.
//!
//! # Example
//!
//! ```no_run
//! use checkout_redpanda::{BrokerConfig, RedpandaEventBus};
//! use checkout_core::event_bus::EventBus;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaEventBus::new(
//!     BrokerConfig::new("localhost:9092").with_compression("gzip"),
//! )?;
//! bus.health_check().await?;
//! bus.publish("order.created", "order-1", br#"{"event_type":"order_created"}"#).await?;
//! # Ok(())
//! # }
//! ```

use checkout_core::event_bus::{
    BrokerRecord, BusFuture, DeliveryReceipt, EventBus, EventBusError, EventConsumer,
    SubscriptionSpec, next_offsets,
};
use futures::FutureExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;

pub mod config;

pub use config::{ConfigError, KafkaConfig};

/// Connection and producer settings shared by every client of one service.
///
/// # Example
///
/// ```
/// use checkout_redpanda::BrokerConfig;
/// use std::time::Duration;
///
/// let config = BrokerConfig::new("redpanda:9092")
///     .with_producer_acks("all")
///     .with_compression("lz4")
///     .with_message_timeout(Duration::from_secs(10));
///
/// assert_eq!(config.compression, "lz4");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Comma-separated bootstrap servers
    pub brokers: String,
    /// Producer acknowledgement mode ("0", "1", "all")
    pub producer_acks: String,
    /// Compression codec ("none", "gzip", "snappy", "lz4", "zstd")
    pub compression: String,
    /// How long librdkafka keeps trying to deliver one record
    pub message_timeout: Duration,
    /// Consumer session timeout
    pub session_timeout: Duration,
    /// Timeout for metadata requests during health checks
    pub metadata_timeout: Duration,
    /// Client id reported to the broker
    pub client_id: Option<String>,
}

impl BrokerConfig {
    /// Defaults: `acks=all`, no compression, 30s message timeout, 10s session
    /// timeout, 5s metadata timeout.
    #[must_use]
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            producer_acks: "all".to_string(),
            compression: "none".to_string(),
            message_timeout: Duration::from_secs(30),
            session_timeout: Duration::from_secs(10),
            metadata_timeout: Duration::from_secs(5),
            client_id: None,
        }
    }

    /// Set the producer acknowledgement mode.
    #[must_use]
    pub fn with_producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = acks.into();
        self
    }

    /// Set the compression codec.
    #[must_use]
    pub fn with_compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = compression.into();
        self
    }

    /// Set the per-record delivery timeout.
    #[must_use]
    pub const fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    /// Set the consumer session timeout.
    #[must_use]
    pub const fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set the client id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// librdkafka settings for the idempotent producer.
    #[must_use]
    pub fn producer_settings(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("acks", &self.producer_acks)
            .set("enable.idempotence", "true")
            .set("max.in.flight.requests.per.connection", "5")
            .set("compression.type", &self.compression)
            .set("message.timeout.ms", millis(self.message_timeout));
        if let Some(client_id) = &self.client_id {
            config.set("client.id", client_id);
        }
        config
    }

    /// librdkafka settings for a manual-commit consumer of `spec`.
    #[must_use]
    pub fn consumer_settings(&self, spec: &SubscriptionSpec) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &spec.group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", spec.offset_reset.as_str())
            .set("session.timeout.ms", millis(self.session_timeout))
            .set("enable.partition.eof", "false");
        if let Some(client_id) = &self.client_id {
            config.set("client.id", client_id);
        }
        config
    }
}

fn millis(duration: Duration) -> String {
    duration.as_millis().to_string()
}

/// Transport-level failures are worth retrying; everything else is not.
fn classify(error: &KafkaError, context: &str) -> EventBusError {
    match error {
        KafkaError::MessageConsumption(_)
        | KafkaError::MetadataFetch(_)
        | KafkaError::Global(_)
        | KafkaError::Flush(_) => EventBusError::TransportError(format!("{context}: {error}")),
        _ => EventBusError::Other(format!("{context}: {error}")),
    }
}

/// Redpanda-backed [`EventBus`].
///
/// Holds one idempotent producer for the lifetime of the service. Each
/// [`subscribe`](EventBus::subscribe) creates a fresh consumer joined to the
/// requested group.
#[derive(Clone)]
pub struct RedpandaEventBus {
    producer: FutureProducer,
    config: Arc<BrokerConfig>,
}

impl RedpandaEventBus {
    /// Create the producer. No network traffic happens until the first call.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if librdkafka rejects the
    /// configuration.
    pub fn new(config: BrokerConfig) -> Result<Self, EventBusError> {
        if config.brokers.trim().is_empty() {
            return Err(EventBusError::ConnectionFailed(
                "Brokers not configured".to_string(),
            ));
        }

        let producer: FutureProducer = config.producer_settings().create().map_err(|e| {
            EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
        })?;

        tracing::info!(
            brokers = %config.brokers,
            acks = %config.producer_acks,
            compression = %config.compression,
            idempotent = true,
            "RedpandaEventBus created"
        );

        Ok(Self {
            producer,
            config: Arc::new(config),
        })
    }

    /// Settings this bus was built with.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }
}

impl std::fmt::Debug for RedpandaEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedpandaEventBus")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EventBus for RedpandaEventBus {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        payload: &'a [u8],
    ) -> BusFuture<'a, DeliveryReceipt> {
        Box::pin(async move {
            let record = FutureRecord::to(topic).key(key).payload(payload);

            // The queue timeout only bounds waiting for local buffer space;
            // delivery itself is bounded by message.timeout.ms.
            match self
                .producer
                .send(record, Timeout::After(self.config.message_timeout))
                .await
            {
                Ok((partition, offset)) => {
                    tracing::debug!(topic, key, partition, offset, "Record delivered");
                    Ok(DeliveryReceipt { partition, offset })
                },
                Err((kafka_error, _)) => {
                    tracing::error!(topic, key, error = %kafka_error, "Record delivery failed");
                    Err(EventBusError::PublishFailed {
                        topic: topic.to_string(),
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn flush(&self, timeout: Duration) -> BusFuture<'_, ()> {
        let producer = self.producer.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
                .await
                .map_err(|e| EventBusError::Other(format!("Flush task failed: {e}")))?
                .map_err(|e| match e {
                    KafkaError::Flush(code) => EventBusError::Timeout(format!("Flush did not complete: {code}")),
                    other => classify(&other, "Flush failed"),
                })
        })
    }

    fn health_check(&self) -> BusFuture<'_, ()> {
        let producer = self.producer.clone();
        let timeout = self.config.metadata_timeout;
        Box::pin(async move {
            let brokers = tokio::task::spawn_blocking(move || {
                producer
                    .client()
                    .fetch_metadata(None, Timeout::After(timeout))
                    .map(|metadata| metadata.brokers().len())
            })
            .await
            .map_err(|e| EventBusError::Other(format!("Health check task failed: {e}")))?
            .map_err(|e| EventBusError::ConnectionFailed(format!("Metadata request failed: {e}")))?;

            if brokers == 0 {
                return Err(EventBusError::ConnectionFailed(
                    "Cluster reported no brokers".to_string(),
                ));
            }
            tracing::debug!(brokers, "Broker health check passed");
            Ok(())
        })
    }

    fn subscribe(&self, spec: SubscriptionSpec) -> BusFuture<'_, Box<dyn EventConsumer>> {
        Box::pin(async move {
            let consumer: StreamConsumer = self
                .config
                .consumer_settings(&spec)
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: spec.topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topics: Vec<&str> = spec.topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topics)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: spec.topics.clone(),
                    reason: format!("Failed to subscribe: {e}"),
                })?;

            tracing::info!(
                group = %spec.group,
                topics = ?spec.topics,
                offset_reset = %spec.offset_reset,
                manual_commit = true,
                "Subscribed to topics"
            );

            Ok(Box::new(RedpandaConsumer {
                consumer: Arc::new(consumer),
                group: spec.group,
            }) as Box<dyn EventConsumer>)
        })
    }
}

/// Manual-commit consumer handed out by [`RedpandaEventBus::subscribe`].
pub struct RedpandaConsumer {
    consumer: Arc<StreamConsumer>,
    group: String,
}

impl RedpandaConsumer {
    /// Copy a borrowed message out of the consumer's buffer.
    fn to_record<M: Message>(message: &M) -> BrokerRecord {
        BrokerRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message
                .key()
                .map(|key| String::from_utf8_lossy(key).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        }
    }
}

impl EventConsumer for RedpandaConsumer {
    fn poll_batch(&mut self, max: usize, timeout: Duration) -> BusFuture<'_, Vec<BrokerRecord>> {
        Box::pin(async move {
            let max = max.max(1);
            let mut batch = Vec::with_capacity(max);

            // Wait up to `timeout` for the first record, then drain whatever is
            // already buffered without waiting again.
            match tokio::time::timeout(timeout, self.consumer.recv()).await {
                Err(_) => return Ok(batch),
                Ok(Err(e)) => return Err(classify(&e, "Failed to receive message")),
                Ok(Ok(message)) => batch.push(Self::to_record(&message)),
            }

            while batch.len() < max {
                match self.consumer.recv().now_or_never() {
                    Some(Ok(message)) => batch.push(Self::to_record(&message)),
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Receive failed mid-batch, returning partial batch");
                        break;
                    },
                    None => break,
                }
            }

            tracing::trace!(group = %self.group, messages = batch.len(), "Polled batch");
            Ok(batch)
        })
    }

    fn commit<'a>(&'a mut self, records: &'a [BrokerRecord]) -> BusFuture<'a, ()> {
        Box::pin(async move {
            let mut positions = TopicPartitionList::new();
            for ((topic, partition), next) in next_offsets(records) {
                positions
                    .add_partition_offset(&topic, partition, Offset::Offset(next))
                    .map_err(|e| EventBusError::CommitFailed(e.to_string()))?;
            }
            if positions.count() == 0 {
                return Ok(());
            }

            let consumer = Arc::clone(&self.consumer);
            tokio::task::spawn_blocking(move || consumer.commit(&positions, CommitMode::Sync))
                .await
                .map_err(|e| EventBusError::CommitFailed(format!("Commit task failed: {e}")))?
                .map_err(|e| EventBusError::CommitFailed(e.to_string()))?;

            tracing::debug!(group = %self.group, records = records.len(), "Offsets committed");
            Ok(())
        })
    }

    fn close(&mut self) -> BusFuture<'_, ()> {
        Box::pin(async move {
            self.consumer.unsubscribe();
            tracing::info!(group = %self.group, "Consumer closed");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkout_core::event_bus::OffsetReset;

    #[test]
    fn bus_and_consumer_are_thread_safe() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaEventBus>();
        assert_sync::<RedpandaEventBus>();
        assert_send::<RedpandaConsumer>();
    }

    #[test]
    fn producer_is_idempotent_with_full_acks() {
        let settings = BrokerConfig::new("localhost:9092").producer_settings();

        assert_eq!(settings.get("acks"), Some("all"));
        assert_eq!(settings.get("enable.idempotence"), Some("true"));
        assert_eq!(settings.get("max.in.flight.requests.per.connection"), Some("5"));
        assert_eq!(settings.get("message.timeout.ms"), Some("30000"));
        assert_eq!(settings.get("compression.type"), Some("none"));
    }

    #[test]
    fn consumer_commits_manually_from_the_requested_position() {
        let spec = SubscriptionSpec::new("notification-service", vec!["cart.cleared".to_string()])
            .with_offset_reset(OffsetReset::Latest);
        let settings = BrokerConfig::new("localhost:9092")
            .with_session_timeout(Duration::from_secs(6))
            .consumer_settings(&spec);

        assert_eq!(settings.get("group.id"), Some("notification-service"));
        assert_eq!(settings.get("enable.auto.commit"), Some("false"));
        assert_eq!(settings.get("auto.offset.reset"), Some("latest"));
        assert_eq!(settings.get("session.timeout.ms"), Some("6000"));
    }

    #[test]
    fn client_id_is_forwarded_when_set() {
        let config = BrokerConfig::new("b:9092").with_client_id("order-service");
        assert_eq!(config.producer_settings().get("client.id"), Some("order-service"));
        assert_eq!(BrokerConfig::new("b:9092").producer_settings().get("client.id"), None);
    }

    #[test]
    fn empty_broker_list_is_rejected() {
        assert!(matches!(
            RedpandaEventBus::new(BrokerConfig::new("  ")),
            Err(EventBusError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn consumption_errors_are_transient() {
        let error = KafkaError::MessageConsumption(rdkafka::types::RDKafkaErrorCode::BrokerTransportFailure);
        assert!(classify(&error, "poll").is_transient());
    }
}
