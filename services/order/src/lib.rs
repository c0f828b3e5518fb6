//! # Order Service
//!
//! Coordinates the checkout saga. A `checkout_initiated` event becomes a
//! PENDING order plus a payment request; the processor's outcome confirms or
//! cancels the order.
//!
//! ```text
//! checkout_initiated ──► order PENDING ──► payment_requested
//! payment_processed  ──► order CONFIRMED, payment COMPLETED ──► order_confirmed
//! payment_failed     ──► order CANCELLED, payment FAILED    ──► order_cancelled
//! ```
//!
//! Every step is idempotent: redelivered events find the order or payment
//! already in its target state and change nothing, apart from publishing an
//! event their first delivery failed to send.

pub mod config;
pub mod error;
mod locks;
pub mod models;
pub mod payment;
pub mod repository;
pub mod saga;
pub mod service;

pub use config::{OrderConfig, SERVICE_NAME};
pub use error::{OrderError, RepositoryError};
pub use models::{Order, OrderFilter, OrderItem, Payment, TransitionOutcome};
pub use repository::{CreateOutcome, InMemoryOrderRepository, OrderRepository};
pub use saga::OrderSaga;
pub use service::{OrderService, PaymentOutcome};
