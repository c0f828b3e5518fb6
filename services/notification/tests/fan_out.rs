//! Fan-out through a running subscriber: notification failures never hold up
//! sibling handlers or the batch commit.

#![allow(clippy::unwrap_used)] // Test code

use checkout_core::envelope::Envelope;
use checkout_core::environment::Clock;
use checkout_core::event_bus::EventBus;
use checkout_runtime::{RetryPolicy, Subscriber, SubscriberConfig};
use checkout_testing::{InMemoryEventBus, init_test_tracing, test_clock};
use notification_service::{FanOutHandler, NotificationSink, RecordingSink};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

const GROUP: &str = "notification-test";

fn policy() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(0)
        .initial_delay(Duration::from_millis(1))
        .build()
}

fn start_fan_out(bus: &Arc<InMemoryEventBus>, sink: &Arc<RecordingSink>) -> Subscriber {
    let subscriber = Subscriber::new(
        bus.clone(),
        SubscriberConfig::new(
            GROUP,
            vec!["cart.item.removed".to_string(), "cart.cleared".to_string()],
        )
        .with_poll_timeout(Duration::from_millis(20))
        .with_startup_policy(policy())
        .with_poll_backoff(policy()),
    );
    let sink: Arc<dyn NotificationSink> = sink.clone();
    let clock: Arc<dyn Clock> = Arc::new(test_clock());
    FanOutHandler::register_all(&subscriber, &sink, &clock);
    subscriber
}

async fn publish(bus: &InMemoryEventBus, topic: &str, event_type: &str, payload: Value) {
    let envelope = Envelope::new(event_type, "cart-service", test_clock().now(), payload);
    bus.publish(topic, "cart-1", &envelope.encode().unwrap())
        .await
        .unwrap();
}

fn committed(bus: &InMemoryEventBus, topic: &str) -> i64 {
    let partition = bus.partition_for("cart-1");
    bus.committed_offset(GROUP, topic, partition).unwrap_or(0)
}

async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn cleared_payload() -> Value {
    json!({
        "cart_id": "cart-1",
        "cleared_items": [{"product_id": 1, "quantity": 2, "price_at_add": 10.0}],
        "total_items_cleared": 1,
    })
}

#[tokio::test]
async fn sink_failure_does_not_block_siblings_or_commit() {
    init_test_tracing();
    let bus = Arc::new(InMemoryEventBus::new());
    let sink = Arc::new(RecordingSink::new());
    sink.fail_for("item_removed_from_cart");

    publish(
        &bus,
        "cart.item.removed",
        "item_removed_from_cart",
        json!({"cart_id": "cart-1", "removed_item": {"product_id": 1, "quantity": 2}}),
    )
    .await;
    publish(&bus, "cart.cleared", "cart_cleared", cleared_payload()).await;

    let subscriber = start_fan_out(&bus, &sink);
    subscriber.start().await.unwrap();

    assert!(
        eventually(|| {
            committed(&bus, "cart.item.removed") == 1 && committed(&bus, "cart.cleared") == 1
        })
        .await
    );
    subscriber.stop().await;

    let notifications = sink.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].event_type, "cart_cleared");
    assert_eq!(notifications[0].message, "Cart cleared (1 items)");
    assert_eq!(sink.analytics().len(), 1);
}

#[tokio::test]
async fn malformed_payload_does_not_block_siblings_or_commit() {
    init_test_tracing();
    let bus = Arc::new(InMemoryEventBus::new());
    let sink = Arc::new(RecordingSink::new());

    publish(
        &bus,
        "cart.item.removed",
        "item_removed_from_cart",
        json!({"cart_id": "cart-1", "removed_item": "not an object"}),
    )
    .await;
    publish(&bus, "cart.cleared", "cart_cleared", cleared_payload()).await;

    let subscriber = start_fan_out(&bus, &sink);
    subscriber.start().await.unwrap();

    assert!(
        eventually(|| {
            committed(&bus, "cart.item.removed") == 1 && committed(&bus, "cart.cleared") == 1
        })
        .await
    );
    subscriber.stop().await;

    let types: Vec<String> = sink.notifications().into_iter().map(|n| n.event_type).collect();
    assert_eq!(types, vec!["cart_cleared".to_string()]);
}

#[tokio::test]
async fn every_notification_carries_its_payload_to_analytics() {
    init_test_tracing();
    let bus = Arc::new(InMemoryEventBus::new());
    let sink = Arc::new(RecordingSink::new());

    publish(&bus, "cart.cleared", "cart_cleared", cleared_payload()).await;

    let subscriber = start_fan_out(&bus, &sink);
    subscriber.start().await.unwrap();
    assert!(eventually(|| !sink.analytics().is_empty()).await);
    subscriber.stop().await;

    let analytics = sink.analytics();
    let record = &analytics[0];
    assert_eq!(record.event_type, "cart_cleared");
    assert_eq!(record.data, cleared_payload());
    assert_eq!(record.timestamp, test_clock().now());
    assert_eq!(sink.notifications()[0].cart_id.as_deref(), Some("cart-1"));
}
