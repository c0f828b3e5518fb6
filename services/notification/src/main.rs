//! Notification service process.
//!
//! Reads the same `KAFKA_*` / `SUBSCRIBER_*` variables as the other services.

use anyhow::Context;
use checkout_core::environment::{Clock, SystemClock};
use checkout_core::event_bus::EventBus;
use checkout_redpanda::RedpandaEventBus;
use checkout_runtime::Subscriber;
use notification_service::{FanOutHandler, LoggingSink, NotificationConfig, NotificationSink, SERVICE_NAME};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "notification_service=info,checkout_runtime=info,checkout_redpanda=info",
            )
        }))
        .init();

    let config = NotificationConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        bootstrap_servers = %config.kafka.bootstrap_servers,
        group_id = %config.kafka.group_id,
        "Starting notification service"
    );

    let bus: Arc<dyn EventBus> = Arc::new(
        RedpandaEventBus::new(config.kafka.broker_config(SERVICE_NAME))
            .context("failed to create broker client")?,
    );
    let sink: Arc<dyn NotificationSink> = Arc::new(LoggingSink);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let subscriber = Subscriber::new(bus, config.subscriber_config());
    FanOutHandler::register_all(&subscriber, &sink, &clock);
    subscriber.start().await.context("subscriber failed to start")?;
    tracing::info!("Notification service running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    subscriber.stop().await;
    tracing::info!("Notification service stopped");
    Ok(())
}
