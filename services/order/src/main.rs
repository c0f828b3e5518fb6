//! Order service process.
//!
//! Configuration comes from the `KAFKA_*`, `SUBSCRIBER_*`, `SHUTDOWN_TIMEOUT_SECS`,
//! `STARTUP_MAX_RETRIES` and `DEDUP_CAPACITY` variables. Log filtering follows
//! `RUST_LOG`.

use anyhow::Context;
use checkout_core::environment::{Clock, SystemClock};
use checkout_core::event_bus::EventBus;
use checkout_redpanda::RedpandaEventBus;
use checkout_runtime::{Publisher, RetryPolicy, Subscriber};
use order_service::{InMemoryOrderRepository, OrderConfig, OrderSaga, OrderService, SERVICE_NAME};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("order_service=info,checkout_runtime=info,checkout_redpanda=info")
            }),
        )
        .init();

    let config = OrderConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        bootstrap_servers = %config.kafka.bootstrap_servers,
        group_id = %config.kafka.group_id,
        "Starting order service"
    );

    let bus: Arc<dyn EventBus> = Arc::new(
        RedpandaEventBus::new(config.kafka.broker_config(SERVICE_NAME))
            .context("failed to create broker client")?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let publisher = Arc::new(
        Publisher::new(Arc::clone(&bus), SERVICE_NAME, Arc::clone(&clock))
            .with_startup_policy(RetryPolicy::startup(config.kafka.startup_max_retries)),
    );
    let service = Arc::new(OrderService::new(
        Arc::new(InMemoryOrderRepository::new()),
        Arc::clone(&publisher),
        clock,
    ));

    let subscriber = Subscriber::new(bus, config.subscriber_config());
    OrderSaga::register(service, &subscriber);

    publisher.start().await.context("publisher failed to start")?;
    if let Err(error) = subscriber.start().await {
        if let Err(stop_error) = publisher.stop().await {
            tracing::warn!(error = %stop_error, "Publisher did not flush cleanly");
        }
        return Err(error).context("subscriber failed to start");
    }
    tracing::info!("Order service running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    subscriber.stop().await;
    publisher.stop().await.context("publisher failed to flush")?;
    tracing::info!("Order service stopped");
    Ok(())
}
