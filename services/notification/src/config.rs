//! Notification service configuration.

use checkout_core::topics::Topic;
use checkout_redpanda::{ConfigError, KafkaConfig};
use checkout_runtime::{RetryPolicy, SubscriberConfig};

/// Service identity: default consumer group, client id and `producer_service`.
pub const SERVICE_NAME: &str = "notification-service";

/// Cart and order lifecycle topics.
#[must_use]
pub fn default_topics() -> Vec<String> {
    Topic::CART
        .into_iter()
        .chain(Topic::ORDER)
        .map(|topic| topic.name().to_string())
        .collect()
}

/// Settings of the notification service process.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Broker and consumer settings
    pub kafka: KafkaConfig,
}

impl NotificationConfig {
    /// Load from the process environment.
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
        Ok(Self {
            kafka: KafkaConfig::from_lookup(SERVICE_NAME, "none", lookup)?,
        })
    }

    /// Subscriber settings for the fan-out.
    #[must_use]
    pub fn subscriber_config(&self) -> SubscriberConfig {
        SubscriberConfig::new(
            self.kafka.group_id.clone(),
            self.kafka.topics_or(default_topics()),
        )
        .with_offset_reset(self.kafka.offset_reset)
        .with_max_batch(self.kafka.max_batch)
        .with_poll_timeout(self.kafka.poll_timeout)
        .with_shutdown_timeout(self.kafka.shutdown_timeout)
        .with_startup_policy(RetryPolicy::startup(self.kafka.startup_max_retries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn defaults_consume_cart_and_order_topics() {
        let subscriber = NotificationConfig::from_lookup(|_| None)
            .unwrap()
            .subscriber_config();

        assert_eq!(subscriber.group, "notification-service");
        assert_eq!(subscriber.topics.len(), 9);
        assert!(subscriber.topics.contains(&"cart.item.removed".to_string()));
        assert!(subscriber.topics.contains(&"order.shipped".to_string()));
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn topic_override_wins() {
        let config = NotificationConfig::from_lookup(|name| {
            (name == "KAFKA_TOPICS").then(|| "cart.cleared".to_string())
        })
        .unwrap();

        assert_eq!(config.subscriber_config().topics, vec!["cart.cleared"]);
    }
}
