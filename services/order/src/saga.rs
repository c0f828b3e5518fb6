//! The order saga: checkout → order → payment → confirmation or cancellation.
//!
//! One handler is registered for `checkout_initiated`, `payment_processed`
//! and `payment_failed`. Events that lack required data, or that refer to an
//! order this service never created, are logged and dropped; retrying them
//! cannot succeed.

use crate::error::OrderError;
use crate::service::{OrderService, PaymentOutcome};
use async_trait::async_trait;
use checkout_core::envelope::Envelope;
use checkout_core::event::{Decoded, DomainEvent};
use checkout_core::events::cart::CartEvent;
use checkout_core::events::payment::PaymentEvent;
use checkout_runtime::{EventHandler, HandlerError, Subscriber};
use std::sync::Arc;

/// Event types the saga consumes.
pub const SAGA_EVENT_TYPES: [&str; 3] = ["checkout_initiated", "payment_processed", "payment_failed"];

/// Subscriber handler driving [`OrderService`] from cart and payment events.
pub struct OrderSaga {
    service: Arc<OrderService>,
}

impl OrderSaga {
    /// Wrap `service`.
    #[must_use]
    pub const fn new(service: Arc<OrderService>) -> Self {
        Self { service }
    }

    /// Register one saga handler for every event type it consumes.
    pub fn register(service: Arc<OrderService>, subscriber: &Subscriber) {
        let saga: Arc<dyn EventHandler> = Arc::new(Self::new(service));
        for event_type in SAGA_EVENT_TYPES {
            subscriber.register(event_type, Arc::clone(&saga));
        }
    }

    async fn dispatch(&self, envelope: &Envelope) -> Result<(), OrderError> {
        if let Decoded::Known(event) = CartEvent::from_envelope(envelope)? {
            return match event {
                CartEvent::CheckoutInitiated(checkout) => self
                    .service
                    .create_order_from_checkout(&checkout, &envelope.event_id.to_string())
                    .await
                    .map(|_| ()),
                CartEvent::ItemAdded(_)
                | CartEvent::ItemUpdated(_)
                | CartEvent::ItemRemoved(_)
                | CartEvent::Cleared(_) => Ok(()),
            };
        }

        match PaymentEvent::from_envelope(envelope)? {
            Decoded::Known(PaymentEvent::Processed(processed)) => self
                .service
                .apply_payment_outcome(
                    &processed.order_id,
                    processed.payment_id.as_deref(),
                    PaymentOutcome::Succeeded {
                        transaction_id: processed.transaction_id,
                    },
                )
                .await
                .map(|_| ()),
            Decoded::Known(PaymentEvent::Failed(failed)) => self
                .service
                .apply_payment_outcome(
                    &failed.order_id,
                    failed.payment_id.as_deref(),
                    PaymentOutcome::Failed {
                        reason: failed.failure_reason,
                    },
                )
                .await
                .map(|_| ()),
            Decoded::Known(PaymentEvent::Requested(_)) | Decoded::Unknown(_) => Ok(()),
        }
    }
}

#[async_trait]
impl EventHandler for OrderSaga {
    fn name(&self) -> &str {
        "order-saga"
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        match self.dispatch(envelope).await {
            Ok(()) => Ok(()),
            Err(error @ (OrderError::InvalidEvent(_) | OrderError::OrderNotFound(_))) => {
                tracing::warn!(
                    event_id = %envelope.event_id,
                    event_type = %envelope.event_type,
                    error = %error,
                    "Dropping event the saga cannot act on"
                );
                Ok(())
            },
            Err(error) => Err(error.into()),
        }
    }
}
