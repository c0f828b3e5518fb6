//! # Checkout Runtime
//!
//! Publish and consume machinery each checkout service runs.
//!
//! ## Core Components
//!
//! - **Publisher**: wraps payloads in envelopes and sends them keyed by
//!   aggregate id ([`publisher`])
//! - **Subscriber**: pulls batches, fans out to handlers, commits after the
//!   batch ([`subscriber`])
//! - **Handler Registry**: `event_type` → handlers ([`registry`])
//! - **Retry**: exponential backoff for transient broker failures ([`retry`])
//! - **Seen-set**: bounded processed-event ids ([`dedup`])
//! - **Metrics**: counters through the `metrics` facade ([`metrics`])
//!
//! Both components are constructed explicitly and owned by the service's
//! composition root. Start the publisher before the subscriber (handlers
//! publish) and stop them in the reverse order.
//!
//! ## Example
//!
//! ```ignore
//! use checkout_runtime::{Publisher, Subscriber, SubscriberConfig, handler_fn};
//!
//! let publisher = Arc::new(Publisher::new(bus.clone(), "order-service", clock));
//! publisher.start().await?;
//!
//! let subscriber = Subscriber::new(bus, SubscriberConfig::new("order-service", topics));
//! subscriber.register("payment_processed", handler_fn("confirm-order", |envelope| async move {
//!     // ...
//!     Ok(())
//! }));
//! subscriber.start().await?;
//!
//! // ... on shutdown
//! subscriber.stop().await;
//! publisher.stop().await?;
//! ```

pub mod dedup;
pub mod metrics;
pub mod publisher;
pub mod registry;
pub mod retry;
pub mod subscriber;

pub use dedup::SeenEvents;
pub use publisher::{PublishError, PublishReceipt, Publisher, PublisherState};
pub use registry::{EventHandler, HandlerError, HandlerRegistry, handler_fn};
pub use retry::RetryPolicy;
pub use subscriber::{Subscriber, SubscriberConfig, SubscriberError, SubscriberState};
