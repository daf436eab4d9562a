//! Metrics definitions for the room client.
//!
//! All metrics follow Prometheus naming conventions:
//! - `room_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// Join
// ============================================================================

/// Record the result of a `join()` call.
///
/// Metrics: `room_joins_total`, `room_join_duration_seconds`
/// Labels: `outcome` (success or a `ClientError::label()` value)
pub fn record_join(outcome: &str, duration: Duration) {
    counter!("room_joins_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("room_join_duration_seconds", "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Subscriptions
// ============================================================================

/// Record a subscription lifecycle event.
///
/// Metric: `room_subscriptions_total`
/// Labels: `outcome` (requested, active, failed, feed_departed)
pub fn record_subscription(outcome: &str) {
    counter!("room_subscriptions_total", "outcome" => outcome.to_string()).increment(1);
}

/// Set the number of occupied subscription slots.
///
/// Metric: `room_subscriptions_active`
pub fn set_active_subscriptions(count: usize) {
    // Slot counts are tiny; no precision loss
    #[allow(clippy::cast_precision_loss)]
    gauge!("room_subscriptions_active").set(count as f64);
}

// ============================================================================
// Handles
// ============================================================================

/// Record a detached handle.
///
/// Metric: `room_detaches_total`
/// Labels: `role` (publisher, subscriber)
pub fn record_detach(role: &str) {
    counter!("room_detaches_total", "role" => role.to_string()).increment(1);
}

/// Record a gateway anomaly confined to one handle.
///
/// Metric: `room_protocol_errors_total`
/// Labels: `kind`
pub fn record_protocol_error(kind: &str) {
    counter!("room_protocol_errors_total", "kind" => kind.to_string()).increment(1);
}

/// Record an offer, answer or answer-application failure.
///
/// Metric: `room_negotiation_failures_total`
/// Labels: `role` (publisher, subscriber)
pub fn record_negotiation_failure(role: &str) {
    counter!("room_negotiation_failures_total", "role" => role.to_string()).increment(1);
}

/// Record a result or event dropped because its handle is gone.
///
/// Metric: `room_stale_results_total`
/// Labels: `source` (gateway_event, negotiation, track)
pub fn record_stale_result(source: &str) {
    counter!("room_stale_results_total", "source" => source.to_string()).increment(1);
}
