//! Observability for the room client.
//!
//! # Privacy by Default
//!
//! The actor loop uses `#[instrument(skip_all)]` with explicit fields. The
//! private id and the gateway API secret are never logged. Metric labels
//! are bounded:
//! - `outcome`: join and subscription outcomes
//! - `role`: publisher, subscriber
//! - `kind`: `ClientError::label()` values
//! - `source`: gateway_event, negotiation, track
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `room_joins_total` | Counter | `outcome` | Join attempts by result |
//! | `room_join_duration_seconds` | Histogram | `outcome` | Time from `join()` to result |
//! | `room_subscriptions_total` | Counter | `outcome` | Subscription lifecycle events |
//! | `room_detaches_total` | Counter | `role` | Handles detached |
//! | `room_protocol_errors_total` | Counter | `kind` | Per-handle gateway anomalies |
//! | `room_negotiation_failures_total` | Counter | `role` | Offer/answer failures |
//! | `room_stale_results_total` | Counter | `source` | Results dropped for gone handles |
//! | `room_subscriptions_active` | Gauge | none | Occupied slots |
//!
//! No exporter is installed here; the embedding application picks one.

pub mod metrics;
