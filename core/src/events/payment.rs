//! Payment events.
//!
//! The order service publishes `payment_requested`. A payment processor (an
//! external collaborator, or the order service's mock processor) answers with
//! `payment_processed` or `payment_failed`.

use super::null_as_default;
use crate::envelope::timestamp;
use crate::event::DomainEvent;
use crate::money::Money;
use crate::topics::Topic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default reason when a processor reports a failure without one.
pub const DEFAULT_FAILURE_REASON: &str = "Payment failed";

/// Payment status.
///
/// `PENDING → PROCESSING → COMPLETED | FAILED`, with `PENDING` allowed to jump
/// straight to an outcome. `COMPLETED` can later become `REFUNDED`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Awaiting the processor
    Pending,
    /// The processor accepted the request
    Processing,
    /// Money captured
    Completed,
    /// The processor declined
    Failed,
    /// Withdrawn before capture
    Cancelled,
    /// Money returned after capture
    Refunded,
}

impl PaymentStatus {
    /// Whether `self → next` is a legal edge.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::Processing | Self::Completed | Self::Failed | Self::Cancelled
            ) | (Self::Processing, Self::Completed | Self::Failed | Self::Cancelled)
                | (Self::Completed, Self::Refunded)
        )
    }

    /// The processor has reported an outcome (or the payment was withdrawn).
    #[must_use]
    pub const fn is_resolved(self) -> bool {
        !matches!(self, Self::Pending | Self::Processing)
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the customer pays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Card payment
    #[default]
    Card,
    /// Bank transfer
    BankTransfer,
    /// Cash on delivery
    Cash,
    /// Wallet provider
    DigitalWallet,
}

/// `{payment_id, order_id, amount, currency, method, status, cart_id, user_id?, created_at}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequested {
    /// Payment id
    pub payment_id: String,
    /// Order being paid
    pub order_id: String,
    /// Amount to capture
    pub amount: Money,
    /// ISO 4217 currency
    pub currency: String,
    /// Payment method
    pub method: PaymentMethod,
    /// Always `pending`
    pub status: PaymentStatus,
    /// Originating cart
    pub cart_id: String,
    /// Owning user, if known
    pub user_id: Option<String>,
    /// Request time
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

/// `{order_id, payment_id?, transaction_id?}`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentProcessed {
    /// Order being paid
    #[serde(default, deserialize_with = "null_as_default")]
    pub order_id: String,
    /// Payment id, when the processor echoes it
    #[serde(default)]
    pub payment_id: Option<String>,
    /// Processor transaction reference
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// `{order_id, payment_id?, failure_reason?}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentFailed {
    /// Order being paid
    #[serde(default, deserialize_with = "null_as_default")]
    pub order_id: String,
    /// Payment id, when the processor echoes it
    #[serde(default)]
    pub payment_id: Option<String>,
    /// Why the payment failed
    #[serde(default = "default_failure_reason", deserialize_with = "failure_reason")]
    pub failure_reason: String,
}

fn default_failure_reason() -> String {
    DEFAULT_FAILURE_REASON.to_string()
}

fn failure_reason<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)
        .map(|reason| reason.filter(|r| !r.is_empty()).unwrap_or_else(default_failure_reason))
}

/// Events on the payment topics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload")]
pub enum PaymentEvent {
    /// The order service asks for payment
    #[serde(rename = "payment_requested")]
    Requested(PaymentRequested),
    /// The processor captured the payment
    #[serde(rename = "payment_processed")]
    Processed(PaymentProcessed),
    /// The processor declined the payment
    #[serde(rename = "payment_failed")]
    Failed(PaymentFailed),
}

impl DomainEvent for PaymentEvent {
    const EVENT_TYPES: &'static [&'static str] =
        &["payment_requested", "payment_processed", "payment_failed"];

    fn event_type(&self) -> &'static str {
        match self {
            Self::Requested(_) => "payment_requested",
            Self::Processed(_) => "payment_processed",
            Self::Failed(_) => "payment_failed",
        }
    }

    fn topic(&self) -> Topic {
        match self {
            Self::Requested(_) => Topic::PaymentRequested,
            Self::Processed(_) => Topic::PaymentProcessed,
            Self::Failed(_) => Topic::PaymentFailed,
        }
    }

    fn partition_key(&self) -> String {
        match self {
            Self::Requested(e) => e.order_id.clone(),
            Self::Processed(e) => e.order_id.clone(),
            Self::Failed(e) => e.order_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use crate::event::Decoded;
    use serde_json::json;

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn missing_failure_reason_gets_default() {
        for payload in [json!({ "order_id": "o-1" }), json!({ "order_id": "o-1", "failure_reason": null })] {
            let envelope = Envelope::new("payment_failed", "processor", Utc::now(), payload);
            let decoded = PaymentEvent::from_envelope(&envelope).unwrap();
            let Decoded::Known(PaymentEvent::Failed(failed)) = decoded else {
                unreachable!("payment_failed is a payment event");
            };
            assert_eq!(failed.failure_reason, DEFAULT_FAILURE_REASON);
        }
    }

    #[test]
    fn outcomes_only_leave_open_states() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Completed));
        assert!(PaymentStatus::Processing.can_transition_to(PaymentStatus::Failed));
        assert!(PaymentStatus::Completed.can_transition_to(PaymentStatus::Refunded));
        assert!(!PaymentStatus::Completed.can_transition_to(PaymentStatus::Failed));
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Completed));
        assert!(!PaymentStatus::Refunded.can_transition_to(PaymentStatus::Completed));
        assert!(PaymentStatus::Failed.is_resolved());
        assert!(!PaymentStatus::Processing.is_resolved());
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn method_uses_snake_case() {
        assert_eq!(
            serde_json::to_value(PaymentMethod::DigitalWallet).unwrap(),
            json!("digital_wallet")
        );
    }
}
