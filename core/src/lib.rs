//! # Checkout Core
//!
//! Shared contract for the checkout choreography services.
//!
//! The cart, order and notification services never share a database and never
//! call each other on the critical path. They only agree on what travels over
//! the broker, and that agreement lives here.
//!
//! ## Core Concepts
//!
//! - **Envelope**: the five-field wire record around every event ([`envelope`])
//! - **Event Bus**: raw keyed publish and manual-commit batch consume ([`event_bus`])
//! - **Topics**: one topic per event type, dotted names ([`topics`])
//! - **Domain Events**: sealed enums per topic family with typed payloads
//!   ([`event`], [`events`])
//! - **Environment**: injected dependencies such as the [`environment::Clock`]
//!
//! ## Delivery Guarantees
//!
//! - At-least-once: handlers must tolerate redelivery
//! - Ordered per partition key (cart id or order id), unordered across keys
//! - No exactly-once, no distributed transactions
//!
//! ## Example
//!
//! ```
//! use checkout_core::envelope::Envelope;
//! use checkout_core::event::{Decoded, DomainEvent};
//! use checkout_core::events::cart::{CartEvent, CheckoutInitiated};
//! use chrono::Utc;
//!
//! let event = CartEvent::CheckoutInitiated(CheckoutInitiated {
//!     cart_id: "cart-1".to_string(),
//!     ..CheckoutInitiated::default()
//! });
//!
//! let envelope = Envelope::new(
//!     event.event_type(),
//!     "cart-service",
//!     Utc::now(),
//!     event.to_payload().unwrap_or_default(),
//! );
//!
//! let decoded = CartEvent::from_envelope(&envelope).ok().and_then(Decoded::known);
//! assert_eq!(decoded, Some(event));
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod envelope;
pub mod event;
pub mod event_bus;
pub mod events;
pub mod money;
pub mod topics;

pub use envelope::{Envelope, EnvelopeError};
pub use event::{Decoded, DomainEvent};
pub use event_bus::{
    BrokerRecord, DeliveryReceipt, EventBus, EventBusError, EventConsumer, OffsetReset,
    SubscriptionSpec,
};
pub use money::Money;
pub use topics::Topic;

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// into the components that need them.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock = SystemClock;
    ///
    /// // Test - fixed time for deterministic tests
    /// let clock = checkout_testing::test_clock();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
