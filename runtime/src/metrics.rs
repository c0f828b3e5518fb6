//! Metric names and recorders for the publish/consume path.
//!
//! Recording goes through the `metrics` facade. Without an installed recorder
//! every call is a no-op, so services that do not export metrics pay nothing.
//! Installing an exporter is left to the deployment.
//!
//! | Metric | Labels |
//! |---|---|
//! | `publisher_events_published_total` | `topic` |
//! | `publisher_publish_errors_total` | `topic` |
//! | `subscriber_messages_processed_total` | `event_type` |
//! | `subscriber_messages_unhandled_total` | `event_type` |
//! | `subscriber_messages_malformed_total` | `topic` |
//! | `subscriber_messages_duplicate_total` | `event_type` |
//! | `subscriber_handler_failures_total` | `handler` |
//! | `subscriber_batches_committed_total` | |
//! | `subscriber_commit_errors_total` | |
//! | `subscriber_poll_errors_total` | |
//! | `subscriber_batch_duration_seconds` | |

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;

/// Register all metric descriptions.
///
/// Call once after installing a recorder.
pub fn describe_metrics() {
    describe_counter!(
        "publisher_events_published_total",
        "Total number of envelopes acknowledged by the broker"
    );
    describe_counter!(
        "publisher_publish_errors_total",
        "Total number of publishes rejected or timed out"
    );
    describe_counter!(
        "subscriber_messages_processed_total",
        "Total number of messages dispatched to at least one handler"
    );
    describe_counter!(
        "subscriber_messages_unhandled_total",
        "Total number of messages with no registered handler"
    );
    describe_counter!(
        "subscriber_messages_malformed_total",
        "Total number of messages skipped because they did not decode"
    );
    describe_counter!(
        "subscriber_messages_duplicate_total",
        "Total number of redelivered messages skipped by the seen-set"
    );
    describe_counter!(
        "subscriber_handler_failures_total",
        "Total number of handler errors and panics"
    );
    describe_counter!(
        "subscriber_batches_committed_total",
        "Total number of batches committed"
    );
    describe_counter!(
        "subscriber_commit_errors_total",
        "Total number of failed batch commits"
    );
    describe_counter!(
        "subscriber_poll_errors_total",
        "Total number of failed polls"
    );
    describe_histogram!(
        "subscriber_batch_duration_seconds",
        "Time taken to dispatch one batch"
    );
    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!(
        "retry_exhausted_total",
        "Total number of operations that exhausted their retry budget"
    );
}

/// Publisher metrics recorder.
pub struct PublisherMetrics;

impl PublisherMetrics {
    /// Record an acknowledged publish.
    pub fn record_published(topic: &str) {
        counter!("publisher_events_published_total", "topic" => topic.to_string()).increment(1);
    }

    /// Record a failed publish.
    pub fn record_error(topic: &str) {
        counter!("publisher_publish_errors_total", "topic" => topic.to_string()).increment(1);
    }
}

/// Subscriber metrics recorder.
pub struct SubscriberMetrics;

impl SubscriberMetrics {
    /// Record a dispatched message.
    pub fn record_processed(event_type: &str) {
        counter!("subscriber_messages_processed_total", "event_type" => event_type.to_string())
            .increment(1);
    }

    /// Record a message nobody handles.
    pub fn record_unhandled(event_type: &str) {
        counter!("subscriber_messages_unhandled_total", "event_type" => event_type.to_string())
            .increment(1);
    }

    /// Record an undecodable message.
    pub fn record_malformed(topic: &str) {
        counter!("subscriber_messages_malformed_total", "topic" => topic.to_string()).increment(1);
    }

    /// Record a redelivery skipped by the seen-set.
    pub fn record_duplicate(event_type: &str) {
        counter!("subscriber_messages_duplicate_total", "event_type" => event_type.to_string())
            .increment(1);
    }

    /// Record a handler error or panic.
    pub fn record_handler_failure(handler: &str) {
        counter!("subscriber_handler_failures_total", "handler" => handler.to_string())
            .increment(1);
    }

    /// Record a committed batch and how long dispatch took.
    pub fn record_batch(duration: Duration) {
        counter!("subscriber_batches_committed_total").increment(1);
        histogram!("subscriber_batch_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed commit.
    pub fn record_commit_error() {
        counter!("subscriber_commit_errors_total").increment(1);
    }

    /// Record a failed poll.
    pub fn record_poll_error() {
        counter!("subscriber_poll_errors_total").increment(1);
    }
}
