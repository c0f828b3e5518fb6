//! Orders, payments and guarded status transitions.
//!
//! An order's items and totals are frozen at creation. Afterwards only its
//! status and lifecycle timestamps change, and only along the edges of
//! [`OrderStatus::can_transition_to`].

use checkout_core::events::order::{
    OrderCancelled, OrderConfirmed, OrderCreated, OrderEvent, OrderItemSnapshot, OrderShipped,
    OrderStatus,
};
use checkout_core::events::payment::{PaymentMethod, PaymentStatus};
use checkout_core::money::Money;
use chrono::{DateTime, Utc};

/// Currency of every payment in this deployment.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Result of asking for a status change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The status changed and the follow-up event was published
    Applied,
    /// The entity is already in the requested status; nothing written, nothing published
    AlreadyApplied,
    /// The edge is not allowed from the current status; nothing written, nothing published
    Rejected,
}

impl TransitionOutcome {
    /// Classify moving an order from `current` to `target`.
    #[must_use]
    pub fn for_order(current: OrderStatus, target: OrderStatus) -> Self {
        if current == target {
            Self::AlreadyApplied
        } else if current.can_transition_to(target) {
            Self::Applied
        } else {
            Self::Rejected
        }
    }

    /// Classify moving a payment from `current` to `target`.
    #[must_use]
    pub fn for_payment(current: PaymentStatus, target: PaymentStatus) -> Self {
        if current == target {
            Self::AlreadyApplied
        } else if current.can_transition_to(target) {
            Self::Applied
        } else {
            Self::Rejected
        }
    }
}

/// One line of an order, copied from the cart at checkout.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderItem {
    /// Catalog product id
    pub product_id: u64,
    /// Name at checkout time
    pub product_name: String,
    /// Units ordered
    pub quantity: u32,
    /// Price per unit at checkout time
    pub unit_price: Money,
    /// `unit_price * quantity`
    pub total_price: Money,
}

impl OrderItem {
    /// Wire form used in `order_created`.
    #[must_use]
    pub fn snapshot(&self) -> OrderItemSnapshot {
        OrderItemSnapshot {
            product_id: self.product_id,
            product_name: self.product_name.clone(),
            quantity: self.quantity,
            unit_price: self.unit_price,
            total_price: self.total_price,
        }
    }
}

/// An order owned by the order service.
#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    /// Generated id
    pub id: String,
    /// Cart the order was created from
    pub cart_id: String,
    /// Owner, when known
    pub user_id: Option<String>,
    /// Checkout token the order was created for
    pub checkout_token: String,
    /// Lifecycle status
    pub status: OrderStatus,
    /// Sum of item totals as reported by the cart
    pub total_amount: Money,
    /// Amount to charge (no discounts, shipping or tax yet)
    pub final_amount: Money,
    /// Sum of quantities
    pub total_items: u32,
    /// Frozen line items
    pub items: Vec<OrderItem>,
    /// Delivery address
    pub shipping_address: Option<String>,
    /// Carrier or service level
    pub shipping_method: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
    /// Set when payment succeeded
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Set when shipped
    pub shipped_at: Option<DateTime<Utc>>,
    /// Set when delivered
    pub delivered_at: Option<DateTime<Utc>>,
    /// Set when a failed payment cancelled the order
    pub cancellation_reason: Option<String>,
    /// The event for the current status has not reached the broker yet
    pub announcement_pending: bool,
}

impl Order {
    /// Move to `status` and stamp the matching lifecycle timestamp.
    ///
    /// Callers check the edge first with [`TransitionOutcome::for_order`].
    pub fn set_status(&mut self, status: OrderStatus, at: DateTime<Utc>) {
        self.status = status;
        self.updated_at = at;
        match status {
            OrderStatus::Confirmed => self.confirmed_at = Some(at),
            OrderStatus::Shipped => self.shipped_at = Some(at),
            OrderStatus::Delivered => self.delivered_at = Some(at),
            _ => {},
        }
    }

    /// Event announcing the current status, for statuses that have one.
    #[must_use]
    pub fn lifecycle_event(&self) -> Option<OrderEvent> {
        let event = match self.status {
            OrderStatus::Pending => OrderEvent::Created(OrderCreated {
                order_id: self.id.clone(),
                cart_id: self.cart_id.clone(),
                user_id: self.user_id.clone(),
                total_amount: self.final_amount,
                total_items: self.total_items,
                status: self.status,
                items: self.items.iter().map(OrderItem::snapshot).collect(),
                created_at: self.created_at,
            }),
            OrderStatus::Confirmed => OrderEvent::Confirmed(OrderConfirmed {
                order_id: self.id.clone(),
                cart_id: self.cart_id.clone(),
                user_id: self.user_id.clone(),
                status: self.status,
                confirmed_at: self.confirmed_at.unwrap_or(self.updated_at),
            }),
            OrderStatus::Cancelled => OrderEvent::Cancelled(OrderCancelled {
                order_id: self.id.clone(),
                cart_id: self.cart_id.clone(),
                user_id: self.user_id.clone(),
                status: self.status,
                cancellation_reason: self.cancellation_reason.clone(),
            }),
            OrderStatus::Shipped => OrderEvent::Shipped(OrderShipped {
                order_id: self.id.clone(),
                user_id: self.user_id.clone(),
                status: self.status,
                shipped_at: self.shipped_at.unwrap_or(self.updated_at),
                shipping_address: self.shipping_address.clone(),
                shipping_method: self.shipping_method.clone(),
            }),
            _ => return None,
        };
        Some(event)
    }
}

/// A payment attempt for an order.
#[derive(Clone, Debug, PartialEq)]
pub struct Payment {
    /// Generated id
    pub id: String,
    /// Owning order
    pub order_id: String,
    /// Charged amount, equal to the order's final amount at request time
    pub amount: Money,
    /// ISO currency code
    pub currency: String,
    /// How the customer pays
    pub method: PaymentMethod,
    /// Lifecycle status
    pub status: PaymentStatus,
    /// Processor transaction id, set on success
    pub external_transaction_id: Option<String>,
    /// Set on failure
    pub failure_reason: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Set when resolved
    pub processed_at: Option<DateTime<Utc>>,
    /// `payment_requested` has not reached the broker yet
    pub announcement_pending: bool,
}

/// Filters and pagination for [`list_orders`](crate::OrderService::list_orders).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderFilter {
    /// Only orders in this status
    pub status: Option<OrderStatus>,
    /// Only orders of this user
    pub user_id: Option<String>,
    /// Orders to skip (newest first)
    pub skip: usize,
    /// Maximum orders returned
    pub limit: usize,
}

impl Default for OrderFilter {
    fn default() -> Self {
        Self {
            status: None,
            user_id: None,
            skip: 0,
            limit: 100,
        }
    }
}

impl OrderFilter {
    /// Whether `order` passes the status and user filters.
    #[must_use]
    pub fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|status| order.status == status)
            && self
                .user_id
                .as_deref()
                .is_none_or(|user| order.user_id.as_deref() == Some(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_status_is_already_applied() {
        assert_eq!(
            TransitionOutcome::for_order(OrderStatus::Confirmed, OrderStatus::Confirmed),
            TransitionOutcome::AlreadyApplied
        );
        assert_eq!(
            TransitionOutcome::for_payment(PaymentStatus::Failed, PaymentStatus::Failed),
            TransitionOutcome::AlreadyApplied
        );
    }

    #[test]
    fn illegal_edges_are_rejected() {
        assert_eq!(
            TransitionOutcome::for_order(OrderStatus::Cancelled, OrderStatus::Confirmed),
            TransitionOutcome::Rejected
        );
        assert_eq!(
            TransitionOutcome::for_order(OrderStatus::Pending, OrderStatus::Shipped),
            TransitionOutcome::Rejected
        );
        assert_eq!(
            TransitionOutcome::for_payment(PaymentStatus::Completed, PaymentStatus::Failed),
            TransitionOutcome::Rejected
        );
    }

    #[test]
    fn legal_edges_apply() {
        assert_eq!(
            TransitionOutcome::for_order(OrderStatus::Pending, OrderStatus::Confirmed),
            TransitionOutcome::Applied
        );
        assert_eq!(
            TransitionOutcome::for_payment(PaymentStatus::Pending, PaymentStatus::Completed),
            TransitionOutcome::Applied
        );
    }

    #[test]
    fn set_status_stamps_lifecycle_times() {
        let at = DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default();
        let mut order = Order {
            id: "o-1".to_string(),
            cart_id: "c-1".to_string(),
            user_id: None,
            checkout_token: "c-1:1".to_string(),
            status: OrderStatus::Pending,
            total_amount: Money::from_cents(2000),
            final_amount: Money::from_cents(2000),
            total_items: 2,
            items: Vec::new(),
            shipping_address: None,
            shipping_method: None,
            created_at: at,
            updated_at: at,
            confirmed_at: None,
            shipped_at: None,
            delivered_at: None,
            cancellation_reason: None,
            announcement_pending: false,
        };

        order.set_status(OrderStatus::Confirmed, at);
        order.set_status(OrderStatus::Processing, at);
        order.set_status(OrderStatus::Shipped, at);

        assert_eq!(order.confirmed_at, Some(at));
        assert_eq!(order.shipped_at, Some(at));
        assert_eq!(order.delivered_at, None);

        let shipped = order.lifecycle_event();
        assert!(matches!(shipped, Some(OrderEvent::Shipped(ref e)) if e.shipped_at == at));
        order.set_status(OrderStatus::Delivered, at);
        assert_eq!(order.lifecycle_event(), None);
    }
}
