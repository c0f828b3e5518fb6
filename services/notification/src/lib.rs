//! # Notification Service
//!
//! Best-effort fan-out of cart and order events to a notifier and an
//! analytics collaborator. Nothing here feeds back into the saga: a failed
//! notification is logged and forgotten.

pub mod config;
pub mod handlers;
pub mod sink;

pub use config::{NotificationConfig, SERVICE_NAME};
pub use handlers::{FanOutHandler, Summary, event_types, summarize};
pub use sink::{AnalyticsRecord, LoggingSink, Notification, NotificationSink, RecordingSink, SinkError};
