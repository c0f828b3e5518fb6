//! Order operations.
//!
//! Every state change follows the same shape under the order's lock: load,
//! classify the edge with [`TransitionOutcome`], write only when it applies
//! (marking the follow-up event as owed), then publish the owed event and
//! clear the mark. A publish that fails leaves the mark set; the redelivered
//! event finds the change `AlreadyApplied` and publishes what is still owed.
//! `Rejected` writes nothing and publishes nothing.

use crate::error::OrderError;
use crate::locks::OrderLocks;
use crate::models::{Order, OrderFilter, OrderItem, Payment, TransitionOutcome};
use crate::repository::{CreateOutcome, OrderRepository};
use checkout_core::environment::Clock;
use checkout_core::events::cart::CheckoutInitiated;
use checkout_core::events::order::OrderStatus;
use checkout_core::events::payment::PaymentStatus;
use checkout_runtime::Publisher;
use std::sync::Arc;
use uuid::Uuid;

/// How a payment resolved, as reported by the processor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The charge went through
    Succeeded {
        /// Processor transaction id
        transaction_id: Option<String>,
    },
    /// The charge was declined or errored
    Failed {
        /// Processor reason
        reason: String,
    },
}

impl PaymentOutcome {
    const fn targets(&self) -> (OrderStatus, PaymentStatus) {
        match self {
            Self::Succeeded { .. } => (OrderStatus::Confirmed, PaymentStatus::Completed),
            Self::Failed { .. } => (OrderStatus::Cancelled, PaymentStatus::Failed),
        }
    }
}

/// Order and payment operations of the order service.
pub struct OrderService {
    pub(crate) repository: Arc<dyn OrderRepository>,
    pub(crate) publisher: Arc<Publisher>,
    pub(crate) clock: Arc<dyn Clock>,
    locks: OrderLocks,
}

impl OrderService {
    /// Create a service over `repository`, publishing through `publisher`.
    #[must_use]
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        publisher: Arc<Publisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            publisher,
            clock,
            locks: OrderLocks::new(),
        }
    }

    /// Turn a checkout into a PENDING order and request its payment.
    ///
    /// `fallback_token` (the envelope's `event_id`) deduplicates checkouts that
    /// carry no `checkout_id`. A checkout whose order already exists creates
    /// nothing; whatever its first delivery failed to publish
    /// (`order_created`, `payment_requested`) is published now.
    ///
    /// Totals are taken from the checkout as reported by the cart.
    ///
    /// # Errors
    ///
    /// - [`OrderError::InvalidEvent`] when `cart_id` or `items` is missing
    /// - [`OrderError::Repository`] / [`OrderError::Publish`] on infrastructure failures
    pub async fn create_order_from_checkout(
        &self,
        checkout: &CheckoutInitiated,
        fallback_token: &str,
    ) -> Result<Order, OrderError> {
        if checkout.cart_id.is_empty() {
            return Err(OrderError::InvalidEvent(
                "checkout_initiated without cart_id".to_string(),
            ));
        }
        if checkout.items.is_empty() {
            return Err(OrderError::InvalidEvent(format!(
                "checkout_initiated for cart {} without items",
                checkout.cart_id
            )));
        }

        let token = checkout.checkout_token().unwrap_or(fallback_token).to_string();
        let now = self.clock.now();
        let items: Vec<OrderItem> = checkout
            .items
            .iter()
            .map(|item| OrderItem {
                product_id: item.product_id,
                product_name: item
                    .product_name
                    .clone()
                    .unwrap_or_else(|| format!("Product {}", item.product_id)),
                quantity: item.quantity,
                unit_price: item.price_at_add,
                total_price: item.price_at_add.saturating_multiply(item.quantity),
            })
            .collect();

        let candidate = Order {
            id: Uuid::new_v4().to_string(),
            cart_id: checkout.cart_id.clone(),
            user_id: checkout.user_id.clone(),
            checkout_token: token.clone(),
            status: OrderStatus::Pending,
            total_amount: checkout.total_amount,
            final_amount: checkout.total_amount,
            total_items: checkout.total_items,
            items,
            shipping_address: None,
            shipping_method: None,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
            shipped_at: None,
            delivered_at: None,
            cancellation_reason: None,
            announcement_pending: true,
        };

        let order = match self.repository.create_order(candidate).await? {
            CreateOutcome::Created(order) => {
                tracing::info!(
                    order_id = %order.id,
                    cart_id = %order.cart_id,
                    checkout_token = %token,
                    final_amount = %order.final_amount,
                    "Order created from checkout"
                );
                order
            },
            CreateOutcome::Existing(order) => {
                tracing::info!(
                    order_id = %order.id,
                    checkout_token = %token,
                    "Checkout already turned into an order, resuming"
                );
                order
            },
        };

        let _guard = self.locks.lock(&order.id).await;
        let mut order = self.get_order(&order.id).await?;
        self.announce(&mut order).await?;
        if order.status == OrderStatus::Pending {
            self.request_payment(&order).await?;
        }
        Ok(order)
    }

    /// Apply a payment outcome to an order and its payment.
    ///
    /// The payment is `payment_id` when given, otherwise the order's latest
    /// payment. Only a PENDING order reacts: the first outcome applied wins,
    /// and a contradicting later outcome is logged as an anomaly and ignored.
    /// A redelivered outcome whose event never reached the broker publishes
    /// it now.
    ///
    /// # Errors
    ///
    /// - [`OrderError::InvalidEvent`] when `order_id` is empty
    /// - [`OrderError::OrderNotFound`] for unknown orders
    /// - [`OrderError::Repository`] / [`OrderError::Publish`] on infrastructure failures
    pub async fn apply_payment_outcome(
        &self,
        order_id: &str,
        payment_id: Option<&str>,
        outcome: PaymentOutcome,
    ) -> Result<TransitionOutcome, OrderError> {
        if order_id.is_empty() {
            return Err(OrderError::InvalidEvent("payment outcome without order_id".to_string()));
        }
        let _guard = self.locks.lock(order_id).await;
        let mut order = self.get_order(order_id).await?;
        let mut payment = self.resolve_payment(order_id, payment_id).await?;
        let (order_target, payment_target) = outcome.targets();

        let payment_step = payment
            .as_ref()
            .map(|payment| TransitionOutcome::for_payment(payment.status, payment_target));
        let decision = match TransitionOutcome::for_order(order.status, order_target) {
            TransitionOutcome::Applied
                if order.status != OrderStatus::Pending
                    || payment_step == Some(TransitionOutcome::Rejected) =>
            {
                TransitionOutcome::Rejected
            },
            other => other,
        };

        match decision {
            TransitionOutcome::AlreadyApplied => {
                tracing::info!(
                    order_id,
                    status = %order.status,
                    "Payment outcome already applied, skipping"
                );
                self.announce(&mut order).await?;
                return Ok(decision);
            },
            TransitionOutcome::Rejected => {
                tracing::warn!(
                    order_id,
                    order_status = %order.status,
                    payment_status = payment.as_ref().map(|p| p.status.as_str()),
                    outcome = ?outcome,
                    "Contradicting payment outcome ignored"
                );
                return Ok(decision);
            },
            TransitionOutcome::Applied => {},
        }

        let now = self.clock.now();
        order.set_status(order_target, now);
        order.announcement_pending = true;
        if let PaymentOutcome::Failed { reason } = &outcome {
            order.cancellation_reason = Some(reason.clone());
        }

        // An already-resolved payment keeps its own record
        let resolved = match (payment.as_mut(), payment_step) {
            (Some(payment), Some(TransitionOutcome::Applied)) => {
                payment.status = payment_target;
                payment.processed_at = Some(now);
                match &outcome {
                    PaymentOutcome::Succeeded { transaction_id } => {
                        payment.external_transaction_id.clone_from(transaction_id);
                    },
                    PaymentOutcome::Failed { reason } => {
                        payment.failure_reason = Some(reason.clone());
                    },
                }
                Some(&*payment)
            },
            (Some(_), _) => None,
            (None, _) => {
                tracing::warn!(order_id, "No payment on record for outcome, updating order only");
                None
            },
        };
        self.repository.save(&order, resolved).await?;

        match &outcome {
            PaymentOutcome::Succeeded { .. } => {
                tracing::info!(order_id, "Order confirmed after successful payment");
            },
            PaymentOutcome::Failed { reason } => {
                tracing::info!(order_id, reason = %reason, "Order cancelled after failed payment");
            },
        }
        self.announce(&mut order).await?;

        Ok(TransitionOutcome::Applied)
    }

    /// Move an order to `status` (administrative path).
    ///
    /// SHIPPED and DELIVERED stamp their timestamps; SHIPPED publishes
    /// `order_shipped`. Refunding moves the order's completed payment to
    /// REFUNDED.
    ///
    /// # Errors
    ///
    /// - [`OrderError::OrderNotFound`] for unknown orders
    /// - [`OrderError::InvalidTransition`] when the edge is not allowed
    /// - [`OrderError::Repository`] / [`OrderError::Publish`] on infrastructure failures
    pub async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<TransitionOutcome, OrderError> {
        let _guard = self.locks.lock(order_id).await;
        let mut order = self.get_order(order_id).await?;

        match TransitionOutcome::for_order(order.status, status) {
            TransitionOutcome::AlreadyApplied => {
                self.announce(&mut order).await?;
                return Ok(TransitionOutcome::AlreadyApplied);
            },
            TransitionOutcome::Rejected => {
                tracing::warn!(order_id, from = %order.status, to = %status, "Status change rejected");
                return Err(OrderError::InvalidTransition {
                    order_id: order_id.to_string(),
                    from: order.status,
                    to: status,
                });
            },
            TransitionOutcome::Applied => {},
        }

        let now = self.clock.now();
        let refunded = if status == OrderStatus::Refunded {
            self.repository
                .payments_for_order(order_id)
                .await?
                .into_iter()
                .rev()
                .find(|payment| payment.status == PaymentStatus::Completed)
                .map(|mut payment| {
                    payment.status = PaymentStatus::Refunded;
                    payment.processed_at = Some(now);
                    payment
                })
        } else {
            None
        };

        order.set_status(status, now);
        order.announcement_pending = status == OrderStatus::Shipped;
        self.repository.save(&order, refunded.as_ref()).await?;
        tracing::info!(order_id, status = %status, "Order status updated");

        self.announce(&mut order).await?;
        Ok(TransitionOutcome::Applied)
    }

    /// Order by id.
    ///
    /// # Errors
    ///
    /// [`OrderError::OrderNotFound`] for unknown orders.
    pub async fn get_order(&self, order_id: &str) -> Result<Order, OrderError> {
        self.repository
            .get_order(order_id)
            .await?
            .ok_or_else(|| OrderError::OrderNotFound(order_id.to_string()))
    }

    /// Orders matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// [`OrderError::Repository`] when the store fails.
    pub async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, OrderError> {
        Ok(self.repository.list_orders(filter).await?)
    }

    /// Number of orders matching the filters.
    ///
    /// # Errors
    ///
    /// [`OrderError::Repository`] when the store fails.
    pub async fn count_orders(
        &self,
        status: Option<OrderStatus>,
        user_id: Option<&str>,
    ) -> Result<usize, OrderError> {
        Ok(self.repository.count_orders(status, user_id).await?)
    }

    /// Publish the event for the order's current status if it has not
    /// reached the broker yet, then record that it has. Caller holds the
    /// order lock.
    async fn announce(&self, order: &mut Order) -> Result<(), OrderError> {
        if !order.announcement_pending {
            return Ok(());
        }
        if let Some(event) = order.lifecycle_event() {
            self.publisher.publish_event(&event).await?;
        }
        order.announcement_pending = false;
        self.repository.save(order, None).await?;
        Ok(())
    }

    async fn resolve_payment(
        &self,
        order_id: &str,
        payment_id: Option<&str>,
    ) -> Result<Option<Payment>, OrderError> {
        if let Some(payment_id) = payment_id.filter(|id| !id.is_empty()) {
            let payment = self.repository.get_payment(payment_id).await?;
            if let Some(payment) = payment.filter(|p| p.order_id == order_id) {
                return Ok(Some(payment));
            }
            tracing::warn!(order_id, payment_id, "Payment not found for order, using latest");
        }
        Ok(self.repository.payments_for_order(order_id).await?.pop())
    }
}

impl std::fmt::Debug for OrderService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderService")
            .field("producer", &self.publisher.producer_service())
            .finish_non_exhaustive()
    }
}
