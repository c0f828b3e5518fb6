//! Order service errors.

use checkout_core::envelope::EnvelopeError;
use checkout_core::events::order::OrderStatus;
use checkout_core::events::payment::PaymentStatus;
use checkout_runtime::{HandlerError, PublishError};
use thiserror::Error;

/// Failures of the order store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// The entity to update does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The store could not be reached or rejected the write
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by order and payment operations.
#[derive(Error, Debug)]
pub enum OrderError {
    /// The event lacks data the saga needs (dropped with a warning)
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// No order with this id
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// No payment with this id
    #[error("Payment not found: {0}")]
    PaymentNotFound(String),

    /// The order status cannot move to the requested status
    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Order id
        order_id: String,
        /// Current status
        from: OrderStatus,
        /// Requested status
        to: OrderStatus,
    },

    /// The payment has already been resolved
    #[error("Payment {payment_id} is already {status}")]
    PaymentResolved {
        /// Payment id
        payment_id: String,
        /// Current status
        status: PaymentStatus,
    },

    /// The store failed
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// A follow-up event could not be published
    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl From<EnvelopeError> for OrderError {
    fn from(error: EnvelopeError) -> Self {
        Self::InvalidEvent(error.to_string())
    }
}

impl From<OrderError> for HandlerError {
    fn from(error: OrderError) -> Self {
        match error {
            OrderError::Repository(e) => Self::Storage(e.to_string()),
            OrderError::Publish(e) => Self::Publish(e.to_string()),
            other => Self::InvalidPayload(other.to_string()),
        }
    }
}
