//! Broker settings loaded from the environment.
//!
//! Every checkout service reads the same `KAFKA_*` variables. Each one has a
//! default so a local broker works without any configuration.

use crate::BrokerConfig;
use checkout_core::event_bus::OffsetReset;
use std::time::Duration;
use thiserror::Error;

/// Invalid configuration values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// Raw value
        value: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Broker and consumer settings of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    /// `KAFKA_BOOTSTRAP_SERVERS`
    pub bootstrap_servers: String,
    /// `KAFKA_GROUP_ID`
    pub group_id: String,
    /// `KAFKA_TOPICS` override, comma-separated
    pub topics: Option<Vec<String>>,
    /// `KAFKA_AUTO_OFFSET_RESET`
    pub offset_reset: OffsetReset,
    /// `KAFKA_PRODUCER_ACKS`
    pub producer_acks: String,
    /// `KAFKA_COMPRESSION`
    pub compression: String,
    /// `SUBSCRIBER_MAX_BATCH`
    pub max_batch: usize,
    /// `SUBSCRIBER_POLL_TIMEOUT_MS`
    pub poll_timeout: Duration,
    /// `SHUTDOWN_TIMEOUT_SECS`
    pub shutdown_timeout: Duration,
    /// `STARTUP_MAX_RETRIES`
    pub startup_max_retries: usize,
}

impl KafkaConfig {
    /// Load from the process environment.
    ///
    /// `service` supplies the default group id and client id;
    /// `default_compression` lets a service pick its own codec default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unparsable values.
    pub fn from_env(service: &str, default_compression: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(service, default_compression, |name| std::env::var(name).ok())
    }

    /// Load through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for unparsable values.
    pub fn from_lookup(
        service: &str,
        default_compression: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let offset_reset = match lookup("KAFKA_AUTO_OFFSET_RESET") {
            Some(value) => value.parse().map_err(|reason| ConfigError::Invalid {
                name: "KAFKA_AUTO_OFFSET_RESET",
                value: value.clone(),
                reason,
            })?,
            None => OffsetReset::Earliest,
        };

        let topics = lookup("KAFKA_TOPICS").map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|topic| !topic.is_empty())
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        });

        Ok(Self {
            bootstrap_servers: lookup("KAFKA_BOOTSTRAP_SERVERS")
                .unwrap_or_else(|| "localhost:9092".to_string()),
            group_id: lookup("KAFKA_GROUP_ID").unwrap_or_else(|| service.to_string()),
            topics: topics.filter(|topics| !topics.is_empty()),
            offset_reset,
            producer_acks: lookup("KAFKA_PRODUCER_ACKS").unwrap_or_else(|| "all".to_string()),
            compression: lookup("KAFKA_COMPRESSION")
                .unwrap_or_else(|| default_compression.to_string()),
            max_batch: parse(&lookup, "SUBSCRIBER_MAX_BATCH", 10)?,
            poll_timeout: Duration::from_millis(parse(&lookup, "SUBSCRIBER_POLL_TIMEOUT_MS", 1000)?),
            shutdown_timeout: Duration::from_secs(parse(&lookup, "SHUTDOWN_TIMEOUT_SECS", 30)?),
            startup_max_retries: parse(&lookup, "STARTUP_MAX_RETRIES", 5)?,
        })
    }

    /// Client settings for [`RedpandaEventBus`](crate::RedpandaEventBus).
    #[must_use]
    pub fn broker_config(&self, client_id: &str) -> BrokerConfig {
        BrokerConfig::new(self.bootstrap_servers.clone())
            .with_producer_acks(self.producer_acks.clone())
            .with_compression(self.compression.clone())
            .with_client_id(client_id)
    }

    /// Topics to consume: the override if set, otherwise `defaults`.
    #[must_use]
    pub fn topics_or(&self, defaults: Vec<String>) -> Vec<String> {
        self.topics.clone().unwrap_or(defaults)
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn defaults_apply_when_nothing_is_set() {
        let config = KafkaConfig::from_lookup("order-service", "gzip", lookup(&[])).unwrap();

        assert_eq!(config.bootstrap_servers, "localhost:9092");
        assert_eq!(config.group_id, "order-service");
        assert_eq!(config.offset_reset, OffsetReset::Earliest);
        assert_eq!(config.producer_acks, "all");
        assert_eq!(config.compression, "gzip");
        assert_eq!(config.max_batch, 10);
        assert_eq!(config.poll_timeout, Duration::from_millis(1000));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.startup_max_retries, 5);
        assert_eq!(config.topics, None);
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn variables_override_defaults() {
        let config = KafkaConfig::from_lookup(
            "notification-service",
            "none",
            lookup(&[
                ("KAFKA_BOOTSTRAP_SERVERS", "redpanda:29092"),
                ("KAFKA_GROUP_ID", "notifications-v2"),
                ("KAFKA_TOPICS", "cart.cleared, order.created,,"),
                ("KAFKA_AUTO_OFFSET_RESET", "LATEST"),
                ("SUBSCRIBER_MAX_BATCH", "50"),
            ]),
        )
        .unwrap();

        assert_eq!(config.bootstrap_servers, "redpanda:29092");
        assert_eq!(config.group_id, "notifications-v2");
        assert_eq!(
            config.topics,
            Some(vec!["cart.cleared".to_string(), "order.created".to_string()])
        );
        assert_eq!(config.offset_reset, OffsetReset::Latest);
        assert_eq!(config.max_batch, 50);
    }

    #[test]
    fn invalid_offset_reset_is_rejected() {
        let result = KafkaConfig::from_lookup(
            "order-service",
            "gzip",
            lookup(&[("KAFKA_AUTO_OFFSET_RESET", "smallest")]),
        );

        assert!(matches!(
            result,
            Err(ConfigError::Invalid { name: "KAFKA_AUTO_OFFSET_RESET", .. })
        ));
    }

    #[test]
    fn unparsable_numbers_are_rejected() {
        let result = KafkaConfig::from_lookup(
            "order-service",
            "gzip",
            lookup(&[("SUBSCRIBER_MAX_BATCH", "ten")]),
        );

        assert!(matches!(result, Err(ConfigError::Invalid { name: "SUBSCRIBER_MAX_BATCH", .. })));
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn broker_config_carries_producer_settings() {
        let config = KafkaConfig::from_lookup("order-service", "gzip", lookup(&[])).unwrap();
        let broker = config.broker_config("order-service");

        assert_eq!(broker.compression, "gzip");
        assert_eq!(broker.producer_acks, "all");
        assert_eq!(broker.client_id.as_deref(), Some("order-service"));
    }
}
