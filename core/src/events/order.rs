//! Order lifecycle events, emitted by the order service.
//!
//! | event_type | topic | payload |
//! |---|---|---|
//! | `order_created` | `order.created` | [`OrderCreated`] |
//! | `order_confirmed` | `order.confirmed` | [`OrderConfirmed`] |
//! | `order_cancelled` | `order.cancelled` | [`OrderCancelled`] |
//! | `order_shipped` | `order.shipped` | [`OrderShipped`] |

use crate::envelope::timestamp;
use crate::event::DomainEvent;
use crate::money::Money;
use crate::topics::Topic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Order status.
///
/// ```text
/// PENDING ──► CONFIRMED ──► PROCESSING ──► SHIPPED ──► DELIVERED
///    │            │              │            │            │
///    └────────────┴──────┬───────┴────────────┘            │
///                        ▼                                 │
///                    CANCELLED          REFUNDED ◄─────────┘
///                                  (from CONFIRMED onward)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Awaiting payment
    Pending,
    /// Paid
    Confirmed,
    /// Being prepared
    Processing,
    /// Handed to the carrier
    Shipped,
    /// Received by the customer
    Delivered,
    /// Cancelled before delivery
    Cancelled,
    /// Money returned
    Refunded,
}

impl OrderStatus {
    /// Whether `self → next` is a legal edge.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed | Self::Cancelled)
                | (Self::Confirmed, Self::Processing | Self::Cancelled | Self::Refunded)
                | (Self::Processing, Self::Shipped | Self::Cancelled | Self::Refunded)
                | (Self::Shipped, Self::Delivered | Self::Cancelled | Self::Refunded)
                | (Self::Delivered, Self::Refunded)
        )
    }

    /// No further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Refunded)
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            other => Err(format!("unknown order status '{other}'")),
        }
    }
}

/// Immutable snapshot of an ordered line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItemSnapshot {
    /// Product id
    pub product_id: u64,
    /// Display name at order time
    pub product_name: String,
    /// Quantity
    pub quantity: u32,
    /// Unit price at order time
    pub unit_price: Money,
    /// `unit_price * quantity`
    pub total_price: Money,
}

/// `{order_id, cart_id, user_id?, total_amount, total_items, status, items:[...], created_at}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderCreated {
    /// Order id
    pub order_id: String,
    /// Originating cart
    pub cart_id: String,
    /// Owning user, if known
    pub user_id: Option<String>,
    /// Final amount of the order
    pub total_amount: Money,
    /// Sum of quantities
    pub total_items: u32,
    /// Always `pending`
    pub status: OrderStatus,
    /// Line snapshots
    pub items: Vec<OrderItemSnapshot>,
    /// Creation time
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

/// `{order_id, cart_id, user_id?, status, confirmed_at}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    /// Order id
    pub order_id: String,
    /// Originating cart
    pub cart_id: String,
    /// Owning user, if known
    pub user_id: Option<String>,
    /// Always `confirmed`
    pub status: OrderStatus,
    /// Confirmation time
    #[serde(with = "timestamp")]
    pub confirmed_at: DateTime<Utc>,
}

/// `{order_id, cart_id, user_id?, status, cancellation_reason?}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelled {
    /// Order id
    pub order_id: String,
    /// Originating cart
    pub cart_id: String,
    /// Owning user, if known
    pub user_id: Option<String>,
    /// Always `cancelled`
    pub status: OrderStatus,
    /// Why the order was cancelled
    #[serde(default)]
    pub cancellation_reason: Option<String>,
}

/// `{order_id, user_id?, status, shipped_at, shipping_address?, shipping_method?}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderShipped {
    /// Order id
    pub order_id: String,
    /// Owning user, if known
    pub user_id: Option<String>,
    /// Always `shipped`
    pub status: OrderStatus,
    /// Shipping time
    #[serde(with = "timestamp")]
    pub shipped_at: DateTime<Utc>,
    /// Destination
    #[serde(default)]
    pub shipping_address: Option<String>,
    /// Carrier or service level
    #[serde(default)]
    pub shipping_method: Option<String>,
}

/// Events on the order lifecycle topics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload")]
pub enum OrderEvent {
    /// An order was created from a checkout
    #[serde(rename = "order_created")]
    Created(OrderCreated),
    /// Payment succeeded
    #[serde(rename = "order_confirmed")]
    Confirmed(OrderConfirmed),
    /// Payment failed or the order was cancelled
    #[serde(rename = "order_cancelled")]
    Cancelled(OrderCancelled),
    /// The order left the warehouse
    #[serde(rename = "order_shipped")]
    Shipped(OrderShipped),
}

impl DomainEvent for OrderEvent {
    const EVENT_TYPES: &'static [&'static str] = &[
        "order_created",
        "order_confirmed",
        "order_cancelled",
        "order_shipped",
    ];

    fn event_type(&self) -> &'static str {
        match self {
            Self::Created(_) => "order_created",
            Self::Confirmed(_) => "order_confirmed",
            Self::Cancelled(_) => "order_cancelled",
            Self::Shipped(_) => "order_shipped",
        }
    }

    fn topic(&self) -> Topic {
        match self {
            Self::Created(_) => Topic::OrderCreated,
            Self::Confirmed(_) => Topic::OrderConfirmed,
            Self::Cancelled(_) => Topic::OrderCancelled,
            Self::Shipped(_) => Topic::OrderShipped,
        }
    }

    fn partition_key(&self) -> String {
        match self {
            Self::Created(e) => e.order_id.clone(),
            Self::Confirmed(e) => e.order_id.clone(),
            Self::Cancelled(e) => e.order_id.clone(),
            Self::Shipped(e) => e.order_id.clone(),
        }
    }
}
