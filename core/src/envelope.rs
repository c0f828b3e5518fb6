//! The wire-level event envelope shared by every service.
//!
//! Every publisher produces, and every subscriber consumes, exactly this
//! five-field record serialized as JSON:
//!
//! ```text
//! {
//!   "event_id":         "1b4e28ba-2fa1-11d2-883f-0016d3cca427",
//!   "event_type":       "checkout_initiated",
//!   "event_timestamp":  "2025-01-01T00:00:00Z",
//!   "producer_service": "cart-service",
//!   "payload":          { ... }
//! }
//! ```
//!
//! The `payload` schema is selected by `event_type` (see [`crate::events`]).
//! A retried publish of the same logical event produces a new `event_id`, so
//! `event_id` only identifies a single publish attempt. Payloads that need
//! stable deduplication carry their own token (for example `checkout_id`).

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while encoding or decoding envelopes.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// The bytes are not a valid envelope.
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// The envelope is valid but its payload does not match the expected schema.
    #[error("Invalid payload for event type '{event_type}': {reason}")]
    InvalidPayload {
        /// Event type whose payload failed to decode
        event_type: String,
        /// Decoder error
        reason: String,
    },

    /// The envelope could not be serialized.
    #[error("Failed to encode envelope: {0}")]
    Encode(String),
}

/// Immutable event envelope exchanged between services.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique per publish attempt, generated at publish time.
    pub event_id: Uuid,

    /// Flat, global tag selecting the handlers.
    pub event_type: String,

    /// Producer-assigned UTC timestamp.
    #[serde(with = "timestamp")]
    pub event_timestamp: DateTime<Utc>,

    /// Identity of the originating service.
    pub producer_service: String,

    /// Structured data specific to `event_type`.
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Wrap a payload in a fresh envelope with a new `event_id`.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        producer_service: impl Into<String>,
        event_timestamp: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            event_timestamp,
            producer_service: producer_service.into(),
            payload,
        }
    }

    /// Serialize to the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if the payload cannot be serialized.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    /// Decode an envelope from JSON wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] if the bytes are not valid JSON,
    /// a field is missing, or `event_type` is empty.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Self =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

        if envelope.event_type.trim().is_empty() {
            return Err(EnvelopeError::Malformed("event_type is empty".to_string()));
        }

        Ok(envelope)
    }

    /// Decode the payload into a concrete schema.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidPayload`] if the payload does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| EnvelopeError::InvalidPayload {
            event_type: self.event_type.clone(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Envelope {{ id: {}, type: {}, from: {} }}",
            self.event_id, self.event_type, self.producer_service
        )
    }
}

/// ISO-8601 UTC timestamp codec.
///
/// Encodes RFC 3339 with a `Z` suffix. Decoding also accepts naive
/// timestamps without an offset and reads them as UTC.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a UTC timestamp as RFC 3339.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    /// Deserialize an RFC 3339 or naive ISO-8601 timestamp.
    ///
    /// # Errors
    ///
    /// Fails if the string is neither form.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    /// Parse an RFC 3339 or naive ISO-8601 timestamp into UTC.
    ///
    /// # Errors
    ///
    /// Returns a description of the rejected input.
    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Ok(parsed.with_timezone(&Utc));
        }

        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp '{raw}': {e}"))
    }
}
