//! Event handler trait and the per-service handler registry.
//!
//! The registry maps an `event_type` to the handlers interested in it. Several
//! handlers may register for the same type; the subscriber runs all of them
//! concurrently for every matching message.
//!
//! Handlers receive the decoded [`Envelope`]. Typed dispatch (matching on
//! `CartEvent`, `OrderEvent`, ...) happens inside the handler, so the registry
//! stays string-keyed and a type nobody registered for falls through to the
//! subscriber's "no handler" branch instead of failing.
//!
//! # Example
//!
//! ```rust
//! use checkout_runtime::registry::{HandlerRegistry, handler_fn};
//!
//! let registry = HandlerRegistry::new();
//! registry.register(
//!     "cart_cleared",
//!     handler_fn("log-cart-cleared", |envelope| async move {
//!         tracing::info!(event_id = %envelope.event_id, "cart cleared");
//!         Ok(())
//!     }),
//! );
//!
//! assert_eq!(registry.handlers_for("cart_cleared").len(), 1);
//! assert!(registry.handlers_for("order_created").is_empty());
//! ```

use async_trait::async_trait;
use checkout_core::envelope::{Envelope, EnvelopeError};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Errors returned by event handlers.
///
/// The subscriber logs them with the handler name and moves on; they never
/// block sibling handlers or the batch commit.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The payload does not match the schema for its event type
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A follow-up event could not be published
    #[error("Publish failed: {0}")]
    Publish(String),

    /// The handler's store failed
    #[error("Storage failure: {0}")]
    Storage(String),

    /// An external collaborator failed
    #[error("Collaborator failure: {0}")]
    Collaborator(String),

    /// The handler panicked
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl From<EnvelopeError> for HandlerError {
    fn from(error: EnvelopeError) -> Self {
        Self::InvalidPayload(error.to_string())
    }
}

/// An asynchronous reaction to one event type.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Identity used in logs and metrics.
    fn name(&self) -> &str;

    /// React to one delivery of an envelope.
    ///
    /// Deliveries are at-least-once: the same envelope may arrive again.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] if the reaction failed. The error is logged
    /// and the side effect is lost unless the handler retries internally.
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError>;
}

/// A handler backed by a closure. Built with [`handler_fn`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        (self.f)(envelope.clone()).await
    }
}

/// Adapt a closure into a named handler.
#[must_use]
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

/// Map from `event_type` to its handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<BTreeMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for `event_type`. Earlier registrations are kept.
    pub fn register(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event_type = event_type.into();
        tracing::debug!(event_type = %event_type, handler = handler.name(), "Registering handler");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// Snapshot of the handlers registered for `event_type`.
    #[must_use]
    pub fn handlers_for(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Event types with at least one handler, sorted.
    #[must_use]
    pub fn registered_types(&self) -> Vec<String> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("event_types", &self.registered_types())
            .finish()
    }
}
