//! Round-trip tests against a live broker.
//!
//! Ignored by default. Start Redpanda (or Kafka) with topic auto-creation
//! enabled, then run:
//!
//! ```bash
//! KAFKA_BOOTSTRAP_SERVERS=localhost:9092 cargo test -p checkout-redpanda -- --ignored
//! ```

#![allow(clippy::unwrap_used)] // Test code

use checkout_core::event_bus::{EventBus, OffsetReset, SubscriptionSpec};
use checkout_redpanda::{BrokerConfig, RedpandaEventBus};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn bus() -> RedpandaEventBus {
    let brokers =
        std::env::var("KAFKA_BOOTSTRAP_SERVERS").unwrap_or_else(|_| "localhost:9092".to_string());
    RedpandaEventBus::new(BrokerConfig::new(brokers)).unwrap()
}

/// Topic and group names unique to one test run.
fn unique(prefix: &str) -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    format!("{prefix}-{nanos}")
}

#[tokio::test]
#[ignore = "requires a running broker"]
async fn health_check_sees_the_cluster() {
    bus().health_check().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running broker"]
async fn same_key_records_share_a_partition_in_order() {
    let bus = bus();
    let topic = unique("it.order");

    let first = bus.publish(&topic, "order-1", b"1").await.unwrap();
    let second = bus.publish(&topic, "order-1", b"2").await.unwrap();

    assert_eq!(first.partition, second.partition);
    assert!(second.offset > first.offset);
}

#[tokio::test]
#[ignore = "requires a running broker"]
async fn uncommitted_batch_is_redelivered_to_the_group() {
    let bus = bus();
    let topic = unique("it.cart");
    let group = unique("it-group");
    for payload in [b"a", b"b", b"c"] {
        bus.publish(&topic, "cart-1", payload).await.unwrap();
    }
    bus.flush(Duration::from_secs(5)).await.unwrap();

    let spec = SubscriptionSpec::new(group.clone(), vec![topic.clone()])
        .with_offset_reset(OffsetReset::Earliest);

    let mut consumer = bus.subscribe(spec.clone()).await.unwrap();
    let mut seen = Vec::new();
    for _ in 0..30 {
        seen.extend(consumer.poll_batch(10, Duration::from_secs(1)).await.unwrap());
        if seen.len() >= 3 {
            break;
        }
    }
    assert_eq!(seen.len(), 3);
    consumer.commit(&seen[..1]).await.unwrap();
    consumer.close().await.unwrap();
    drop(consumer);

    let mut again = bus.subscribe(spec).await.unwrap();
    let mut redelivered = Vec::new();
    for _ in 0..30 {
        redelivered.extend(again.poll_batch(10, Duration::from_secs(1)).await.unwrap());
        if redelivered.len() >= 2 {
            break;
        }
    }
    let payloads: Vec<&[u8]> = redelivered.iter().map(|r| r.payload.as_slice()).collect();
    assert_eq!(payloads, vec![b"b".as_slice(), b"c".as_slice()]);
}
