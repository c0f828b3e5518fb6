//! Order service configuration.

use checkout_core::topics::Topic;
use checkout_redpanda::{ConfigError, KafkaConfig};
use checkout_runtime::{RetryPolicy, SubscriberConfig};

/// Service identity: default consumer group, client id and `producer_service`.
pub const SERVICE_NAME: &str = "order-service";

/// Topics the saga consumes when `KAFKA_TOPICS` is not set.
#[must_use]
pub fn default_topics() -> Vec<String> {
    [Topic::CheckoutInitiated, Topic::PaymentProcessed, Topic::PaymentFailed]
        .into_iter()
        .map(|topic| topic.name().to_string())
        .collect()
}

/// Settings of the order service process.
#[derive(Debug, Clone)]
pub struct OrderConfig {
    /// Broker and consumer settings
    pub kafka: KafkaConfig,
    /// Size of the processed-event seen-set (`DEDUP_CAPACITY`, 0 disables it)
    pub dedup_capacity: usize,
}

impl OrderConfig {
    /// Load from the process environment. Order events are compressed with
    /// gzip unless `KAFKA_COMPRESSION` says otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unparsable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let dedup_capacity = match lookup("DEDUP_CAPACITY") {
            None => 10_000,
            Some(value) => value.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::Invalid {
                    name: "DEDUP_CAPACITY",
                    value,
                    reason: e.to_string(),
                }
            })?,
        };
        Ok(Self {
            kafka: KafkaConfig::from_lookup(SERVICE_NAME, "gzip", lookup)?,
            dedup_capacity,
        })
    }

    /// Subscriber settings for the saga.
    #[must_use]
    pub fn subscriber_config(&self) -> SubscriberConfig {
        let config = SubscriberConfig::new(
            self.kafka.group_id.clone(),
            self.kafka.topics_or(default_topics()),
        )
        .with_offset_reset(self.kafka.offset_reset)
        .with_max_batch(self.kafka.max_batch)
        .with_poll_timeout(self.kafka.poll_timeout)
        .with_shutdown_timeout(self.kafka.shutdown_timeout)
        .with_startup_policy(RetryPolicy::startup(self.kafka.startup_max_retries));

        if self.dedup_capacity == 0 {
            config
        } else {
            config.with_dedup(self.dedup_capacity)
        }
    }
}
