//! Order saga behaviour: checkout to order, payment outcomes, replays and the
//! administrative paths, against the in-memory broker.

#![allow(clippy::unwrap_used)] // Test code

use checkout_core::envelope::Envelope;
use checkout_core::event::DomainEvent;
use checkout_core::event_bus::EventBus;
use checkout_core::events::order::OrderStatus;
use checkout_core::events::payment::{PaymentEvent, PaymentStatus};
use checkout_core::money::Money;
use checkout_runtime::{
    EventHandler, HandlerError, Publisher, RetryPolicy, Subscriber, SubscriberConfig,
};
use async_trait::async_trait;
use checkout_testing::{InMemoryEventBus, init_test_tracing, test_clock};
use order_service::payment::MOCK_FAILURE_REASON;
use order_service::{
    CreateOutcome, InMemoryOrderRepository, Order, OrderError, OrderFilter, OrderRepository,
    OrderSaga, OrderService, Payment, RepositoryError, TransitionOutcome,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

const ALL_TOPICS: [&str; 7] = [
    "order.created",
    "order.confirmed",
    "order.cancelled",
    "order.shipped",
    "payment.requested",
    "payment.processed",
    "payment.failed",
];

struct Harness {
    bus: Arc<InMemoryEventBus>,
    service: Arc<OrderService>,
    saga: OrderSaga,
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(0)
        .initial_delay(Duration::from_millis(1))
        .build()
}

async fn harness() -> Harness {
    harness_with(Arc::new(InMemoryOrderRepository::new())).await
}

async fn harness_with(repository: Arc<dyn OrderRepository>) -> Harness {
    init_test_tracing();
    let bus = Arc::new(InMemoryEventBus::new());
    let publisher = Arc::new(
        Publisher::new(bus.clone(), "order-service", Arc::new(test_clock()))
            .with_startup_policy(fast_policy()),
    );
    publisher.start().await.unwrap();
    let service = Arc::new(OrderService::new(
        repository,
        publisher,
        Arc::new(test_clock()),
    ));
    Harness {
        bus,
        saga: OrderSaga::new(Arc::clone(&service)),
        service,
    }
}

fn envelope(event_type: &str, payload: Value) -> Envelope {
    Envelope::new(event_type, "test-producer", test_clock_now(), payload)
}

fn test_clock_now() -> chrono::DateTime<chrono::Utc> {
    use checkout_core::environment::Clock;
    test_clock().now()
}

fn checkout(cart_id: &str, checkout_id: Option<&str>) -> Envelope {
    let mut payload = json!({
        "cart_id": cart_id,
        "user_id": "user-1",
        "items": [{"product_id": 1, "quantity": 2, "price_at_add": 10.0}],
        "total_amount": 20.0,
        "total_items": 2,
    });
    if let Some(token) = checkout_id {
        payload["checkout_id"] = json!(token);
    }
    envelope("checkout_initiated", payload)
}

/// Store that hands control back to the scheduler after every read, so
/// concurrent handlers interleave between their reads and writes.
struct YieldingRepository {
    inner: InMemoryOrderRepository,
}

#[async_trait]
impl OrderRepository for YieldingRepository {
    async fn create_order(&self, order: Order) -> Result<CreateOutcome, RepositoryError> {
        self.inner.create_order(order).await
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<Order>, RepositoryError> {
        let order = self.inner.get_order(order_id).await;
        tokio::task::yield_now().await;
        order
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError> {
        self.inner.list_orders(filter).await
    }

    async fn count_orders(
        &self,
        status: Option<OrderStatus>,
        user_id: Option<&str>,
    ) -> Result<usize, RepositoryError> {
        self.inner.count_orders(status, user_id).await
    }

    async fn save(&self, order: &Order, payment: Option<&Payment>) -> Result<(), RepositoryError> {
        tokio::task::yield_now().await;
        self.inner.save(order, payment).await
    }

    async fn insert_payment(&self, payment: Payment) -> Result<(), RepositoryError> {
        self.inner.insert_payment(payment).await
    }

    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>, RepositoryError> {
        let payment = self.inner.get_payment(payment_id).await;
        tokio::task::yield_now().await;
        payment
    }

    async fn payments_for_order(&self, order_id: &str) -> Result<Vec<Payment>, RepositoryError> {
        let payments = self.inner.payments_for_order(order_id).await;
        tokio::task::yield_now().await;
        payments
    }
}

impl Harness {
    async fn only_order(&self) -> Order {
        let orders = self.service.list_orders(&OrderFilter::default()).await.unwrap();
        assert_eq!(orders.len(), 1, "expected exactly one order");
        orders.into_iter().next().unwrap()
    }

    fn published_total(&self) -> usize {
        ALL_TOPICS.iter().map(|topic| self.bus.published_count(topic)).sum()
    }

    async fn pending_order(&self) -> Order {
        self.saga.handle(&checkout("cart-1", Some("cart-1:1"))).await.unwrap();
        self.only_order().await
    }
}

#[tokio::test]
async fn checkout_creates_pending_order_and_requests_payment() {
    let h = harness().await;

    let order = h.pending_order().await;

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.final_amount, Money::from_cents(2000));
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].product_name, "Product 1");
    assert_eq!(order.items[0].total_price, Money::from_cents(2000));

    let created = h.bus.envelopes("order.created");
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].payload["order_id"], json!(order.id));
    assert_eq!(created[0].producer_service, "order-service");

    let requested = h.bus.envelopes("payment.requested");
    assert_eq!(requested.len(), 1);
    assert_eq!(requested[0].payload["amount"], json!(20.0));
    assert_eq!(requested[0].payload["status"], json!("pending"));
    assert_eq!(requested[0].payload["currency"], json!("USD"));

    let payments = h.service.payments_for_order(&order.id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount, Money::from_cents(2000));
    assert_eq!(payments[0].status, PaymentStatus::Pending);
}

#[tokio::test]
async fn payment_processed_confirms_order() {
    let h = harness().await;
    let order = h.pending_order().await;

    h.saga
        .handle(&envelope(
            "payment_processed",
            json!({"order_id": order.id, "transaction_id": "tx1"}),
        ))
        .await
        .unwrap();

    let order = h.service.get_order(&order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert!(order.confirmed_at.is_some());

    let payments = h.service.payments_for_order(&order.id).await.unwrap();
    let payment = &payments[0];
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.external_transaction_id.as_deref(), Some("tx1"));
    assert!(payment.processed_at.is_some());

    let confirmed = h.bus.envelopes("order.confirmed");
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].payload["status"], json!("confirmed"));
}

#[tokio::test]
async fn payment_failed_cancels_order() {
    let h = harness().await;
    let order = h.pending_order().await;

    h.saga
        .handle(&envelope(
            "payment_failed",
            json!({"order_id": order.id, "failure_reason": "declined"}),
        ))
        .await
        .unwrap();

    let order = h.service.get_order(&order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);

    let payments = h.service.payments_for_order(&order.id).await.unwrap();
    let payment = &payments[0];
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.failure_reason.as_deref(), Some("declined"));

    let cancelled = h.bus.envelopes("order.cancelled");
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].payload["cancellation_reason"], json!("declined"));
}

#[tokio::test]
async fn checkout_without_cart_id_is_dropped() {
    let h = harness().await;
    let payload = json!({
        "items": [{"product_id": 1, "quantity": 1, "price_at_add": 5.0}],
        "total_amount": 5.0,
        "total_items": 1,
    });

    h.saga.handle(&envelope("checkout_initiated", payload)).await.unwrap();

    assert_eq!(h.published_total(), 0);
    assert_eq!(h.service.count_orders(None, None).await.unwrap(), 0);
}

#[tokio::test]
async fn checkout_without_items_is_dropped() {
    let h = harness().await;

    h.saga
        .handle(&envelope(
            "checkout_initiated",
            json!({"cart_id": "cart-1", "items": null, "total_amount": 0.0}),
        ))
        .await
        .unwrap();

    assert_eq!(h.published_total(), 0);
}

#[tokio::test]
async fn replayed_events_change_nothing() {
    let h = harness().await;
    let first = checkout("cart-1", Some("cart-1:1"));
    h.saga.handle(&first).await.unwrap();
    h.saga.handle(&first).await.unwrap();
    // Same checkout republished under a new envelope id
    h.saga.handle(&checkout("cart-1", Some("cart-1:1"))).await.unwrap();

    let order = h.only_order().await;
    assert_eq!(h.bus.published_count("order.created"), 1);
    assert_eq!(h.bus.published_count("payment.requested"), 1);

    let processed = envelope(
        "payment_processed",
        json!({"order_id": order.id, "transaction_id": "tx1"}),
    );
    h.saga.handle(&processed).await.unwrap();
    h.saga.handle(&processed).await.unwrap();

    assert_eq!(h.bus.published_count("order.confirmed"), 1);
    assert_eq!(
        h.service.get_order(&order.id).await.unwrap().status,
        OrderStatus::Confirmed
    );
}

#[tokio::test]
async fn checkout_without_token_dedups_on_envelope_id() {
    let h = harness().await;
    let first = checkout("cart-1", None);

    h.saga.handle(&first).await.unwrap();
    h.saga.handle(&first).await.unwrap();
    assert_eq!(h.service.count_orders(None, None).await.unwrap(), 1);

    h.saga.handle(&checkout("cart-1", None)).await.unwrap();
    assert_eq!(h.service.count_orders(None, None).await.unwrap(), 2);
}

#[tokio::test]
async fn failure_after_success_is_ignored() {
    let h = harness().await;
    let order = h.pending_order().await;

    h.saga
        .handle(&envelope("payment_processed", json!({"order_id": order.id})))
        .await
        .unwrap();
    h.saga
        .handle(&envelope(
            "payment_failed",
            json!({"order_id": order.id, "failure_reason": "late decline"}),
        ))
        .await
        .unwrap();

    let order = h.service.get_order(&order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(
        h.service.payments_for_order(&order.id).await.unwrap()[0].status,
        PaymentStatus::Completed
    );
    assert_eq!(h.bus.published_count("order.cancelled"), 0);
}

#[tokio::test]
async fn outcome_for_unknown_order_is_dropped() {
    let h = harness().await;

    h.saga
        .handle(&envelope("payment_processed", json!({"order_id": "missing"})))
        .await
        .unwrap();
    h.saga
        .handle(&envelope("payment_failed", json!({"failure_reason": "no order"})))
        .await
        .unwrap();

    assert_eq!(h.published_total(), 0);
}

#[tokio::test]
async fn publish_failure_is_reported_and_recovered_on_redelivery() {
    let h = harness().await;
    let delivery = checkout("cart-1", Some("cart-1:1"));

    h.bus.fail_next_publishes(1);
    let result = h.saga.handle(&delivery).await;
    assert!(matches!(result, Err(HandlerError::Publish(_))));
    assert_eq!(h.bus.published_count("order.created"), 0);
    assert_eq!(h.bus.published_count("payment.requested"), 0);

    h.saga.handle(&delivery).await.unwrap();
    h.saga.handle(&delivery).await.unwrap();

    let order = h.only_order().await;
    assert_eq!(h.bus.published_count("order.created"), 1);
    assert_eq!(h.bus.published_count("payment.requested"), 1);
    assert_eq!(h.service.payments_for_order(&order.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn payment_request_lost_on_publish_is_sent_on_redelivery() {
    let h = harness().await;
    let delivery = checkout("cart-1", Some("cart-1:1"));

    h.bus.fail_next_publishes_to("payment.requested", 1);
    let result = h.saga.handle(&delivery).await;
    assert!(matches!(result, Err(HandlerError::Publish(_))));
    assert_eq!(h.bus.published_count("order.created"), 1);
    assert_eq!(h.bus.published_count("payment.requested"), 0);

    h.saga.handle(&delivery).await.unwrap();

    let order = h.only_order().await;
    assert_eq!(h.bus.published_count("order.created"), 1);
    assert_eq!(h.bus.published_count("payment.requested"), 1);
    let payments = h.service.payments_for_order(&order.id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(
        h.bus.envelopes("payment.requested")[0].payload["payment_id"],
        json!(payments[0].id)
    );
}

#[tokio::test]
async fn confirmation_lost_on_publish_is_sent_on_redelivery() {
    let h = harness().await;
    let order = h.pending_order().await;
    let processed = envelope(
        "payment_processed",
        json!({"order_id": order.id, "transaction_id": "tx1"}),
    );

    h.bus.fail_next_publishes_to("order.confirmed", 1);
    let result = h.saga.handle(&processed).await;
    assert!(matches!(result, Err(HandlerError::Publish(_))));
    assert_eq!(
        h.service.get_order(&order.id).await.unwrap().status,
        OrderStatus::Confirmed
    );
    assert_eq!(h.bus.published_count("order.confirmed"), 0);

    h.saga.handle(&processed).await.unwrap();
    assert_eq!(h.bus.published_count("order.confirmed"), 1);

    h.saga.handle(&processed).await.unwrap();
    assert_eq!(h.bus.published_count("order.confirmed"), 1);
}

#[tokio::test]
async fn cancellation_lost_on_publish_keeps_its_reason() {
    let h = harness().await;
    let order = h.pending_order().await;
    let failed = envelope(
        "payment_failed",
        json!({"order_id": order.id, "failure_reason": "declined"}),
    );

    h.bus.fail_next_publishes_to("order.cancelled", 1);
    assert!(h.saga.handle(&failed).await.is_err());
    h.saga.handle(&failed).await.unwrap();

    let cancelled = h.bus.envelopes("order.cancelled");
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].payload["cancellation_reason"], json!("declined"));
}

#[tokio::test]
async fn shipment_lost_on_publish_is_sent_when_repeated() {
    let h = harness().await;
    let order = h.pending_order().await;
    h.saga
        .handle(&envelope("payment_processed", json!({"order_id": order.id})))
        .await
        .unwrap();
    h.service.update_status(&order.id, OrderStatus::Processing).await.unwrap();

    h.bus.fail_next_publishes_to("order.shipped", 1);
    assert!(matches!(
        h.service.update_status(&order.id, OrderStatus::Shipped).await,
        Err(OrderError::Publish(_))
    ));
    assert_eq!(h.bus.published_count("order.shipped"), 0);

    assert_eq!(
        h.service.update_status(&order.id, OrderStatus::Shipped).await.unwrap(),
        TransitionOutcome::AlreadyApplied
    );
    assert_eq!(h.bus.published_count("order.shipped"), 1);
}

#[tokio::test]
#[allow(clippy::panic)] // Test code
async fn concurrent_contradicting_outcomes_apply_only_one() {
    let h = harness_with(Arc::new(YieldingRepository {
        inner: InMemoryOrderRepository::new(),
    }))
    .await;
    let order = h.pending_order().await;
    let processed = envelope(
        "payment_processed",
        json!({"order_id": order.id, "transaction_id": "tx1"}),
    );
    let failed = envelope(
        "payment_failed",
        json!({"order_id": order.id, "failure_reason": "declined"}),
    );

    let (first, second) = tokio::join!(h.saga.handle(&processed), h.saga.handle(&failed));
    first.unwrap();
    second.unwrap();

    let confirmed = h.bus.published_count("order.confirmed");
    let cancelled = h.bus.published_count("order.cancelled");
    assert_eq!(confirmed + cancelled, 1);

    let order = h.service.get_order(&order.id).await.unwrap();
    let payment = &h.service.payments_for_order(&order.id).await.unwrap()[0];
    match order.status {
        OrderStatus::Confirmed => {
            assert_eq!(confirmed, 1);
            assert_eq!(payment.status, PaymentStatus::Completed);
            assert_eq!(payment.failure_reason, None);
        },
        OrderStatus::Cancelled => {
            assert_eq!(cancelled, 1);
            assert_eq!(payment.status, PaymentStatus::Failed);
            assert_eq!(payment.external_transaction_id, None);
        },
        other => panic!("order ended {other}"),
    }
}

#[tokio::test]
async fn resolved_payment_is_left_alone_when_order_catches_up() {
    let repository = Arc::new(InMemoryOrderRepository::new());
    let h = harness_with(repository.clone()).await;
    let order = h.pending_order().await;

    let settled_at = test_clock_now() - chrono::Duration::hours(1);
    let mut payment = h.service.payments_for_order(&order.id).await.unwrap().remove(0);
    payment.status = PaymentStatus::Completed;
    payment.external_transaction_id = Some("tx-original".to_string());
    payment.processed_at = Some(settled_at);
    repository.save(&order, Some(&payment)).await.unwrap();

    h.saga
        .handle(&envelope(
            "payment_processed",
            json!({"order_id": order.id, "transaction_id": "tx-late"}),
        ))
        .await
        .unwrap();

    assert_eq!(
        h.service.get_order(&order.id).await.unwrap().status,
        OrderStatus::Confirmed
    );
    assert_eq!(h.service.get_payment(&payment.id).await.unwrap(), payment);
    assert_eq!(h.bus.published_count("order.confirmed"), 1);
}

#[tokio::test]
async fn mock_processor_drives_the_saga() {
    let h = harness().await;
    let order = h.pending_order().await;
    let payment_id = h.service.payments_for_order(&order.id).await.unwrap()[0].id.clone();

    let event = h.service.process_mock_payment(&payment_id, true, None).await.unwrap();
    let transaction_id = match &event {
        PaymentEvent::Processed(processed) => processed.transaction_id.clone(),
        PaymentEvent::Requested(_) | PaymentEvent::Failed(_) => None,
    };
    assert!(transaction_id.unwrap().starts_with("mock_txn_"));

    let published = h.bus.envelopes("payment.processed");
    assert_eq!(published.len(), 1);
    h.saga.handle(&published[0]).await.unwrap();

    assert_eq!(
        h.service.get_order(&order.id).await.unwrap().status,
        OrderStatus::Confirmed
    );
    assert!(matches!(
        h.service.process_mock_payment(&payment_id, false, None).await,
        Err(OrderError::PaymentResolved { status: PaymentStatus::Completed, .. })
    ));
}

#[tokio::test]
async fn mock_failure_uses_fixed_reason() {
    let h = harness().await;
    let order = h.pending_order().await;
    let payment_id = h.service.payments_for_order(&order.id).await.unwrap()[0].id.clone();

    let event = h.service.process_mock_payment(&payment_id, false, None).await.unwrap();

    assert_eq!(event.event_type(), "payment_failed");
    let published = h.bus.envelopes("payment.failed");
    assert_eq!(published[0].payload["failure_reason"], json!(MOCK_FAILURE_REASON));
    assert_eq!(published[0].payload["payment_id"], json!(payment_id));
}

#[tokio::test]
async fn shipping_publishes_and_refund_moves_payment() {
    let h = harness().await;
    let order = h.pending_order().await;

    assert!(matches!(
        h.service.update_status(&order.id, OrderStatus::Shipped).await,
        Err(OrderError::InvalidTransition { from: OrderStatus::Pending, .. })
    ));

    h.saga
        .handle(&envelope("payment_processed", json!({"order_id": order.id})))
        .await
        .unwrap();
    for status in [OrderStatus::Processing, OrderStatus::Shipped] {
        assert_eq!(
            h.service.update_status(&order.id, status).await.unwrap(),
            TransitionOutcome::Applied
        );
    }
    assert_eq!(
        h.service.update_status(&order.id, OrderStatus::Shipped).await.unwrap(),
        TransitionOutcome::AlreadyApplied
    );

    let shipped = h.bus.envelopes("order.shipped");
    assert_eq!(shipped.len(), 1);
    assert!(h.service.get_order(&order.id).await.unwrap().shipped_at.is_some());

    h.service.update_status(&order.id, OrderStatus::Refunded).await.unwrap();
    assert_eq!(
        h.service.payments_for_order(&order.id).await.unwrap()[0].status,
        PaymentStatus::Refunded
    );
}

#[tokio::test]
async fn subscriber_runs_saga_end_to_end() {
    let h = harness().await;
    let subscriber = Subscriber::new(
        h.bus.clone(),
        SubscriberConfig::new(
            "order-service",
            vec![
                "cart.checkout.initiated".to_string(),
                "payment.processed".to_string(),
                "payment.failed".to_string(),
            ],
        )
        .with_poll_timeout(Duration::from_millis(20))
        .with_startup_policy(fast_policy())
        .with_poll_backoff(fast_policy()),
    );
    OrderSaga::register(Arc::clone(&h.service), &subscriber);
    subscriber.start().await.unwrap();

    let bytes = checkout("cart-9", Some("cart-9:1")).encode().unwrap();
    h.bus.publish("cart.checkout.initiated", "cart-9", &bytes).await.unwrap();

    let mut requested = 0;
    for _ in 0..200 {
        requested = h.bus.published_count("payment.requested");
        if requested > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    subscriber.stop().await;

    assert_eq!(requested, 1);
    assert_eq!(h.only_order().await.cart_id, "cart-9");
}
