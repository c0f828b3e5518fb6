//! Order and payment persistence boundary.
//!
//! The saga needs create/read/update keyed by order and payment id with
//! read-your-writes consistency inside the service. Order creation is keyed by
//! the checkout token as well, so a redelivered checkout finds the order it
//! already produced instead of creating a second one.

use crate::error::RepositoryError;
use crate::models::{Order, OrderFilter, Payment};
use async_trait::async_trait;
use checkout_core::events::order::OrderStatus;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Result of [`OrderRepository::create_order`].
#[derive(Clone, Debug, PartialEq)]
pub enum CreateOutcome {
    /// The order was stored
    Created(Order),
    /// An order for the same checkout token already exists; nothing was stored
    Existing(Order),
}

/// Durable store for orders and their payments.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Store `order` unless an order with the same checkout token exists.
    async fn create_order(&self, order: Order) -> Result<CreateOutcome, RepositoryError>;

    /// Order by id.
    async fn get_order(&self, order_id: &str) -> Result<Option<Order>, RepositoryError>;

    /// Orders matching `filter`, newest first.
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError>;

    /// Number of orders matching the status and user filters.
    async fn count_orders(
        &self,
        status: Option<OrderStatus>,
        user_id: Option<&str>,
    ) -> Result<usize, RepositoryError>;

    /// Replace an existing order and, optionally, one of its payments, atomically.
    async fn save(&self, order: &Order, payment: Option<&Payment>) -> Result<(), RepositoryError>;

    /// Store a new payment.
    async fn insert_payment(&self, payment: Payment) -> Result<(), RepositoryError>;

    /// Payment by id.
    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>, RepositoryError>;

    /// Payments of one order, oldest first.
    async fn payments_for_order(&self, order_id: &str) -> Result<Vec<Payment>, RepositoryError>;
}

#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<String, Order>,
    /// Order ids in insertion order (tie-break for equal timestamps)
    order_sequence: Vec<String>,
    by_token: HashMap<String, String>,
    payments: HashMap<String, Payment>,
    payment_sequence: Vec<String>,
}

/// In-process store. Used by tests and by the binary when no database is
/// configured.
#[derive(Debug, Default)]
pub struct InMemoryOrderRepository {
    tables: RwLock<Tables>,
}

impl InMemoryOrderRepository {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create_order(&self, order: Order) -> Result<CreateOutcome, RepositoryError> {
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables
            .by_token
            .get(&order.checkout_token)
            .and_then(|id| tables.orders.get(id))
        {
            return Ok(CreateOutcome::Existing(existing.clone()));
        }

        tables
            .by_token
            .insert(order.checkout_token.clone(), order.id.clone());
        tables.order_sequence.push(order.id.clone());
        tables.orders.insert(order.id.clone(), order.clone());
        Ok(CreateOutcome::Created(order))
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<Order>, RepositoryError> {
        Ok(self.tables.read().await.orders.get(order_id).cloned())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut matching: Vec<(usize, &Order)> = tables
            .order_sequence
            .iter()
            .enumerate()
            .filter_map(|(seq, id)| tables.orders.get(id).map(|order| (seq, order)))
            .filter(|(_, order)| filter.matches(order))
            .collect();

        matching.sort_by(|(a_seq, a), (b_seq, b)| {
            b.created_at.cmp(&a.created_at).then(b_seq.cmp(a_seq))
        });

        Ok(matching
            .into_iter()
            .skip(filter.skip)
            .take(filter.limit)
            .map(|(_, order)| order.clone())
            .collect())
    }

    async fn count_orders(
        &self,
        status: Option<OrderStatus>,
        user_id: Option<&str>,
    ) -> Result<usize, RepositoryError> {
        let filter = OrderFilter {
            status,
            user_id: user_id.map(ToString::to_string),
            ..OrderFilter::default()
        };
        Ok(self
            .tables
            .read()
            .await
            .orders
            .values()
            .filter(|order| filter.matches(order))
            .count())
    }

    async fn save(&self, order: &Order, payment: Option<&Payment>) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;

        if !tables.orders.contains_key(&order.id) {
            return Err(RepositoryError::NotFound(format!("order {}", order.id)));
        }
        if let Some(payment) = payment {
            if !tables.payments.contains_key(&payment.id) {
                return Err(RepositoryError::NotFound(format!("payment {}", payment.id)));
            }
            tables.payments.insert(payment.id.clone(), payment.clone());
        }
        tables.orders.insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn insert_payment(&self, payment: Payment) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.orders.contains_key(&payment.order_id) {
            return Err(RepositoryError::NotFound(format!("order {}", payment.order_id)));
        }
        tables.payment_sequence.push(payment.id.clone());
        tables.payments.insert(payment.id.clone(), payment);
        Ok(())
    }

    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>, RepositoryError> {
        Ok(self.tables.read().await.payments.get(payment_id).cloned())
    }

    async fn payments_for_order(&self, order_id: &str) -> Result<Vec<Payment>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .payment_sequence
            .iter()
            .filter_map(|id| tables.payments.get(id))
            .filter(|payment| payment.order_id == order_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkout_core::events::payment::{PaymentMethod, PaymentStatus};
    use checkout_core::money::Money;
    use chrono::{DateTime, Duration, Utc};

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600 + seconds, 0).unwrap_or_default()
    }

    fn order(id: &str, token: &str, user: Option<&str>, created: DateTime<Utc>) -> Order {
        Order {
            id: id.to_string(),
            cart_id: format!("cart-{id}"),
            user_id: user.map(ToString::to_string),
            checkout_token: token.to_string(),
            status: OrderStatus::Pending,
            total_amount: Money::from_cents(1000),
            final_amount: Money::from_cents(1000),
            total_items: 1,
            items: Vec::new(),
            shipping_address: None,
            shipping_method: None,
            created_at: created,
            updated_at: created,
            confirmed_at: None,
            shipped_at: None,
            delivered_at: None,
            cancellation_reason: None,
            announcement_pending: false,
        }
    }

    fn payment(id: &str, order_id: &str) -> Payment {
        Payment {
            id: id.to_string(),
            order_id: order_id.to_string(),
            amount: Money::from_cents(1000),
            currency: "USD".to_string(),
            method: PaymentMethod::Card,
            status: PaymentStatus::Pending,
            external_transaction_id: None,
            failure_reason: None,
            created_at: at(0),
            processed_at: None,
            announcement_pending: false,
        }
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)] // Test code
    async fn create_is_idempotent_per_checkout_token() {
        let repo = InMemoryOrderRepository::new();

        let first = repo.create_order(order("o-1", "c:1", None, at(0))).await.unwrap();
        let second = repo.create_order(order("o-2", "c:1", None, at(1))).await.unwrap();

        assert!(matches!(first, CreateOutcome::Created(ref o) if o.id == "o-1"));
        assert!(matches!(second, CreateOutcome::Existing(ref o) if o.id == "o-1"));
        assert!(repo.get_order("o-2").await.unwrap().is_none());
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)] // Test code
    async fn list_is_newest_first_with_filters_and_pages() {
        let repo = InMemoryOrderRepository::new();
        repo.create_order(order("o-1", "t1", Some("alice"), at(0))).await.unwrap();
        repo.create_order(order("o-2", "t2", Some("bob"), at(10))).await.unwrap();
        repo.create_order(order("o-3", "t3", Some("alice"), at(20))).await.unwrap();

        let all = repo.list_orders(&OrderFilter::default()).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["o-3", "o-2", "o-1"]);

        let alice = OrderFilter {
            user_id: Some("alice".to_string()),
            skip: 1,
            limit: 5,
            ..OrderFilter::default()
        };
        let page = repo.list_orders(&alice).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "o-1");

        assert_eq!(repo.count_orders(None, Some("alice")).await.unwrap(), 2);
        assert_eq!(repo.count_orders(Some(OrderStatus::Confirmed), None).await.unwrap(), 0);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)] // Test code
    async fn save_requires_existing_rows() {
        let repo = InMemoryOrderRepository::new();
        let missing = order("o-9", "t9", None, at(0));

        assert!(matches!(
            repo.save(&missing, None).await,
            Err(RepositoryError::NotFound(_))
        ));
        assert!(repo.insert_payment(payment("p-1", "o-9")).await.is_err());

        repo.create_order(missing.clone()).await.unwrap();
        repo.insert_payment(payment("p-1", "o-9")).await.unwrap();
        let mut resolved = payment("p-1", "o-9");
        resolved.status = PaymentStatus::Completed;
        let mut confirmed = missing;
        confirmed.status = OrderStatus::Confirmed;
        confirmed.updated_at = confirmed.created_at + Duration::seconds(5);

        repo.save(&confirmed, Some(&resolved)).await.unwrap();

        assert_eq!(
            repo.get_order("o-9").await.unwrap().map(|o| o.status),
            Some(OrderStatus::Confirmed)
        );
        assert_eq!(
            repo.payments_for_order("o-9").await.unwrap()[0].status,
            PaymentStatus::Completed
        );
    }
}
