//! Topic catalogue.
//!
//! One topic per event type. Cart topics are keyed by cart id, order and
//! payment topics by order id.

use std::fmt;
use std::str::FromStr;

/// Every topic exchanged by the checkout services.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// `cart.item.added`
    CartItemAdded,
    /// `cart.item.updated`
    CartItemUpdated,
    /// `cart.item.removed`
    CartItemRemoved,
    /// `cart.cleared`
    CartCleared,
    /// `cart.checkout.initiated`
    CheckoutInitiated,
    /// `order.created`
    OrderCreated,
    /// `order.confirmed`
    OrderConfirmed,
    /// `order.cancelled`
    OrderCancelled,
    /// `order.shipped`
    OrderShipped,
    /// `payment.requested`
    PaymentRequested,
    /// `payment.processed`
    PaymentProcessed,
    /// `payment.failed`
    PaymentFailed,
}

impl Topic {
    /// Cart lifecycle topics.
    pub const CART: [Self; 5] = [
        Self::CartItemAdded,
        Self::CartItemUpdated,
        Self::CartItemRemoved,
        Self::CartCleared,
        Self::CheckoutInitiated,
    ];

    /// Order lifecycle topics.
    pub const ORDER: [Self; 4] = [
        Self::OrderCreated,
        Self::OrderConfirmed,
        Self::OrderCancelled,
        Self::OrderShipped,
    ];

    /// Payment topics.
    pub const PAYMENT: [Self; 3] = [
        Self::PaymentRequested,
        Self::PaymentProcessed,
        Self::PaymentFailed,
    ];

    /// Wire name of the topic.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CartItemAdded => "cart.item.added",
            Self::CartItemUpdated => "cart.item.updated",
            Self::CartItemRemoved => "cart.item.removed",
            Self::CartCleared => "cart.cleared",
            Self::CheckoutInitiated => "cart.checkout.initiated",
            Self::OrderCreated => "order.created",
            Self::OrderConfirmed => "order.confirmed",
            Self::OrderCancelled => "order.cancelled",
            Self::OrderShipped => "order.shipped",
            Self::PaymentRequested => "payment.requested",
            Self::PaymentProcessed => "payment.processed",
            Self::PaymentFailed => "payment.failed",
        }
    }

    /// Names of a topic group, ready for a subscription.
    #[must_use]
    pub fn names(topics: &[Self]) -> Vec<String> {
        topics.iter().map(|topic| topic.name().to_string()).collect()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::CART
            .iter()
            .chain(Self::ORDER.iter())
            .chain(Self::PAYMENT.iter())
            .copied()
            .find(|topic| topic.name() == s)
            .ok_or_else(|| format!("unknown topic '{s}'"))
    }
}
