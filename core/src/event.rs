//! Typed events and their mapping onto envelopes.
//!
//! Each topic family has a sealed enum implementing [`DomainEvent`]. The enum
//! is serialized adjacently tagged (`event_type` + `payload`), which lines up
//! exactly with the envelope fields, so encoding a variant yields the
//! envelope's `event_type` and `payload` and decoding is the inverse.
//!
//! # Example
//!
//! ```
//! use checkout_core::event::{Decoded, DomainEvent};
//! use checkout_core::events::payment::{PaymentEvent, PaymentFailed};
//!
//! let event = PaymentEvent::Failed(PaymentFailed {
//!     order_id: "o-1".to_string(),
//!     payment_id: None,
//!     failure_reason: "declined".to_string(),
//! });
//!
//! assert_eq!(event.event_type(), "payment_failed");
//! assert_eq!(event.partition_key(), "o-1");
//! ```

use crate::envelope::{Envelope, EnvelopeError};
use crate::topics::Topic;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Result of decoding an envelope into a topic family's enum.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded<E> {
    /// The event type belongs to this family and the payload decoded.
    Known(E),
    /// The event type is not part of this family.
    Unknown(String),
}

impl<E> Decoded<E> {
    /// The known event, if any.
    #[must_use]
    pub fn known(self) -> Option<E> {
        match self {
            Self::Known(event) => Some(event),
            Self::Unknown(_) => None,
        }
    }
}

/// A sealed family of events sharing a topic group.
///
/// Implementors are enums annotated with
/// `#[serde(tag = "event_type", content = "payload")]` whose variants are
/// renamed to their wire `event_type`.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync {
    /// Every `event_type` this family can decode.
    const EVENT_TYPES: &'static [&'static str];

    /// Wire `event_type` of this event.
    fn event_type(&self) -> &'static str;

    /// Topic this event is published to.
    fn topic(&self) -> Topic;

    /// Partition key (aggregate id) that keeps per-aggregate ordering.
    fn partition_key(&self) -> String;

    /// The envelope payload for this event.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if serialization fails.
    fn to_payload(&self) -> Result<serde_json::Value, EnvelopeError> {
        let mut tagged =
            serde_json::to_value(self).map_err(|e| EnvelopeError::Encode(e.to_string()))?;
        tagged
            .get_mut("payload")
            .map(serde_json::Value::take)
            .ok_or_else(|| EnvelopeError::Encode(format!("{} has no payload", self.event_type())))
    }

    /// Decode an envelope into this family.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidPayload`] when the type is known but
    /// the payload does not match its schema.
    fn from_envelope(envelope: &Envelope) -> Result<Decoded<Self>, EnvelopeError> {
        if !Self::EVENT_TYPES.contains(&envelope.event_type.as_str()) {
            return Ok(Decoded::Unknown(envelope.event_type.clone()));
        }

        let tagged = serde_json::json!({
            "event_type": envelope.event_type,
            "payload": envelope.payload,
        });

        serde_json::from_value(tagged)
            .map(Decoded::Known)
            .map_err(|e| EnvelopeError::InvalidPayload {
                event_type: envelope.event_type.clone(),
                reason: e.to_string(),
            })
    }
}
