//! One handler per cart and order event type.
//!
//! Each handler turns its event into a [`Notification`] and an
//! [`AnalyticsRecord`] and hands both to the [`NotificationSink`]. Sink
//! failures are logged in [`FanOutHandler::deliver`] and otherwise dropped, so
//! a failing notifier never holds up the batch commit.
//!
//! | event_type | summary |
//! |---|---|
//! | `item_added_to_cart` | `Item added to cart: {quantity} pcs.` |
//! | `item_updated_in_cart` | `Item quantity changed: {new_quantity} pcs.` |
//! | `item_removed_from_cart` | `Item removed from cart` |
//! | `cart_cleared` | `Cart cleared ({n} items)` |
//! | `checkout_initiated` | `Order placed! Total: {total}` |
//! | `order_created` | `Order {id} created, total {total}` |
//! | `order_confirmed` | `Order {id} confirmed` |
//! | `order_cancelled` | `Order {id} cancelled: {reason}` |
//! | `order_shipped` | `Order {id} shipped` |

use crate::sink::{AnalyticsRecord, Notification, NotificationSink};
use async_trait::async_trait;
use checkout_core::environment::Clock;
use checkout_core::envelope::{Envelope, EnvelopeError};
use checkout_core::event::{Decoded, DomainEvent};
use checkout_core::events::cart::CartEvent;
use checkout_core::events::order::OrderEvent;
use checkout_runtime::{EventHandler, HandlerError, Subscriber};
use std::sync::Arc;

/// Event types the fan-out consumes.
#[must_use]
pub fn event_types() -> Vec<&'static str> {
    CartEvent::EVENT_TYPES
        .iter()
        .chain(OrderEvent::EVENT_TYPES)
        .copied()
        .collect()
}

/// What a notification is about and what it says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    /// Cart the event concerns
    pub cart_id: Option<String>,
    /// Order the event concerns
    pub order_id: Option<String>,
    /// Human-readable message
    pub message: String,
}

impl Summary {
    fn cart(cart_id: &str, message: String) -> Self {
        Self {
            cart_id: Some(cart_id.to_string()),
            order_id: None,
            message,
        }
    }

    fn order(order_id: &str, cart_id: Option<&str>, message: String) -> Self {
        Self {
            cart_id: cart_id.map(ToString::to_string),
            order_id: Some(order_id.to_string()),
            message,
        }
    }
}

/// Summarize an envelope. `Ok(None)` for event types outside the fan-out.
///
/// # Errors
///
/// Returns [`EnvelopeError::InvalidPayload`] when the payload does not match
/// its event type.
pub fn summarize(envelope: &Envelope) -> Result<Option<Summary>, EnvelopeError> {
    if let Decoded::Known(event) = CartEvent::from_envelope(envelope)? {
        let summary = match event {
            CartEvent::ItemAdded(e) => Summary::cart(
                &e.cart_id,
                format!("Item added to cart: {} pcs.", e.item.quantity),
            ),
            CartEvent::ItemUpdated(e) => Summary::cart(
                &e.cart_id,
                format!("Item quantity changed: {} pcs.", e.item.new_quantity),
            ),
            CartEvent::ItemRemoved(e) => {
                Summary::cart(&e.cart_id, "Item removed from cart".to_string())
            },
            CartEvent::Cleared(e) => Summary::cart(
                &e.cart_id,
                format!("Cart cleared ({} items)", e.total_items_cleared),
            ),
            CartEvent::CheckoutInitiated(e) => Summary::cart(
                &e.cart_id,
                format!("Order placed! Total: {}", e.total_amount),
            ),
        };
        return Ok(Some(summary));
    }

    let summary = match OrderEvent::from_envelope(envelope)? {
        Decoded::Known(OrderEvent::Created(e)) => Summary::order(
            &e.order_id,
            Some(e.cart_id.as_str()),
            format!("Order {} created, total {}", e.order_id, e.total_amount),
        ),
        Decoded::Known(OrderEvent::Confirmed(e)) => Summary::order(
            &e.order_id,
            Some(e.cart_id.as_str()),
            format!("Order {} confirmed", e.order_id),
        ),
        Decoded::Known(OrderEvent::Cancelled(e)) => Summary::order(
            &e.order_id,
            Some(e.cart_id.as_str()),
            format!(
                "Order {} cancelled: {}",
                e.order_id,
                e.cancellation_reason.as_deref().unwrap_or("no reason given")
            ),
        ),
        Decoded::Known(OrderEvent::Shipped(e)) => {
            Summary::order(&e.order_id, None, format!("Order {} shipped", e.order_id))
        },
        Decoded::Unknown(_) => return Ok(None),
    };
    Ok(Some(summary))
}

/// Notification handler for one event type.
pub struct FanOutHandler {
    name: String,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl FanOutHandler {
    /// Handler named `notify-{event_type}`.
    #[must_use]
    pub fn new(event_type: &str, sink: Arc<dyn NotificationSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: format!("notify-{event_type}"),
            sink,
            clock,
        }
    }

    /// Register one handler per consumed event type.
    pub fn register_all(
        subscriber: &Subscriber,
        sink: &Arc<dyn NotificationSink>,
        clock: &Arc<dyn Clock>,
    ) {
        for event_type in event_types() {
            subscriber.register(
                event_type,
                Arc::new(Self::new(event_type, Arc::clone(sink), Arc::clone(clock))),
            );
        }
    }

    async fn deliver(&self, envelope: &Envelope, summary: Summary) {
        let now = self.clock.now();
        let notification = Notification {
            cart_id: summary.cart_id,
            order_id: summary.order_id,
            event_type: envelope.event_type.clone(),
            message: summary.message,
            timestamp: now,
        };
        let record = AnalyticsRecord {
            event_type: envelope.event_type.clone(),
            timestamp: now,
            data: envelope.payload.clone(),
        };

        if let Err(error) = self.sink.notify(&notification).await {
            tracing::warn!(
                handler = %self.name,
                event_id = %envelope.event_id,
                error = %error,
                "Notification not delivered"
            );
        }
        if let Err(error) = self.sink.record(&record).await {
            tracing::warn!(
                handler = %self.name,
                event_id = %envelope.event_id,
                error = %error,
                "Analytics record not delivered"
            );
        }
    }
}

#[async_trait]
impl EventHandler for FanOutHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        match summarize(envelope)? {
            Some(summary) => {
                tracing::info!(
                    handler = %self.name,
                    event_id = %envelope.event_id,
                    message = %summary.message,
                    "Event received"
                );
                self.deliver(envelope, summary).await;
            },
            None => tracing::debug!(
                handler = %self.name,
                event_type = %envelope.event_type,
                "Not a notification event"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    fn envelope(event_type: &str, payload: serde_json::Value) -> Envelope {
        let at = DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default();
        Envelope::new(event_type, "test", at, payload)
    }

    #[test]
    fn consumes_every_cart_and_order_type() {
        let types = event_types();

        assert_eq!(types.len(), 9);
        assert!(types.contains(&"item_removed_from_cart"));
        assert!(types.contains(&"order_shipped"));
        assert!(!types.contains(&"payment_requested"));
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn summaries_name_their_subject() {
        let cleared = summarize(&envelope(
            "cart_cleared",
            json!({"cart_id": "c-1", "cleared_items": [], "total_items_cleared": 2}),
        ))
        .unwrap()
        .unwrap();
        assert_eq!(cleared.cart_id.as_deref(), Some("c-1"));
        assert_eq!(cleared.message, "Cart cleared (2 items)");

        let cancelled = summarize(&envelope(
            "order_cancelled",
            json!({"order_id": "o-1", "cart_id": "c-1", "status": "cancelled",
                   "cancellation_reason": "declined"}),
        ))
        .unwrap()
        .unwrap();
        assert_eq!(cancelled.order_id.as_deref(), Some("o-1"));
        assert_eq!(cancelled.message, "Order o-1 cancelled: declined");
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn checkout_summary_formats_money() {
        let summary = summarize(&envelope(
            "checkout_initiated",
            json!({"cart_id": "c-1", "items": [], "total_amount": 20.0, "total_items": 2}),
        ))
        .unwrap()
        .unwrap();

        assert_eq!(summary.message, "Order placed! Total: $20.00");
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn other_types_are_not_summarized() {
        assert!(summarize(&envelope("payment_failed", json!({}))).unwrap().is_none());
    }

    #[test]
    fn malformed_payloads_are_errors() {
        assert!(summarize(&envelope("item_removed_from_cart", json!({"cart_id": 5}))).is_err());
    }
}
