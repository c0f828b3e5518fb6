//! Notification and analytics collaborators.
//!
//! Delivery is best-effort. Sinks report failures as [`SinkError`]; the
//! fan-out logs them and moves on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// A user-facing message about a cart or order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Cart the event concerns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cart_id: Option<String>,
    /// Order the event concerns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    /// Wire `event_type` that triggered it
    pub event_type: String,
    /// Human-readable summary
    pub message: String,
    /// When the notification was produced
    pub timestamp: DateTime<Utc>,
}

/// Raw event data forwarded to analytics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalyticsRecord {
    /// Wire `event_type`
    pub event_type: String,
    /// When the record was produced
    pub timestamp: DateTime<Utc>,
    /// Event payload as received
    pub data: serde_json::Value,
}

/// Failure of an external collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The collaborator rejected or did not answer the request
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Destination for notifications and analytics records.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver a notification.
    async fn notify(&self, notification: &Notification) -> Result<(), SinkError>;

    /// Record an analytics entry.
    async fn record(&self, record: &AnalyticsRecord) -> Result<(), SinkError>;
}

/// Writes everything to the log. Used until a real notifier is wired in.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingSink;

#[async_trait]
impl NotificationSink for LoggingSink {
    async fn notify(&self, notification: &Notification) -> Result<(), SinkError> {
        tracing::info!(
            cart_id = notification.cart_id.as_deref(),
            order_id = notification.order_id.as_deref(),
            event_type = %notification.event_type,
            message = %notification.message,
            "Notification sent"
        );
        Ok(())
    }

    async fn record(&self, record: &AnalyticsRecord) -> Result<(), SinkError> {
        tracing::info!(event_type = %record.event_type, "Analytics updated");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Recorded {
    notifications: Vec<Notification>,
    analytics: Vec<AnalyticsRecord>,
    failing: Vec<String>,
}

/// Keeps everything it receives. Can be told to fail for chosen event types.
#[derive(Debug, Default)]
pub struct RecordingSink {
    recorded: Mutex<Recorded>,
}

impl RecordingSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every delivery for `event_type` from now on.
    pub fn fail_for(&self, event_type: impl Into<String>) {
        self.lock().failing.push(event_type.into());
    }

    /// Notifications delivered so far.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.lock().notifications.clone()
    }

    /// Analytics records delivered so far.
    #[must_use]
    pub fn analytics(&self) -> Vec<AnalyticsRecord> {
        self.lock().analytics.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(recorded: &Recorded, event_type: &str) -> Result<(), SinkError> {
        if recorded.failing.iter().any(|failing| failing == event_type) {
            return Err(SinkError::Delivery(format!("refused {event_type}")));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, notification: &Notification) -> Result<(), SinkError> {
        let mut recorded = self.lock();
        Self::check(&recorded, &notification.event_type)?;
        recorded.notifications.push(notification.clone());
        Ok(())
    }

    async fn record(&self, record: &AnalyticsRecord) -> Result<(), SinkError> {
        let mut recorded = self.lock();
        Self::check(&recorded, &record.event_type)?;
        recorded.analytics.push(record.clone());
        Ok(())
    }
}
