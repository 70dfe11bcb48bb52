//! Relay metrics.
//!
//! Metric names live here so call sites never spell raw strings. Values go
//! through the `metrics` facade; with no recorder installed they are no-ops.

use metrics::{counter, gauge};

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// Connections currently registered, local and federated (gauge).
pub const CONNECTIONS_ACTIVE: &str = "rchat_connections_active";

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Events queued to a recipient during fan-out (counter).
pub const EVENTS_FORWARDED: &str = "rchat_events_forwarded_total";
/// Messages whose local segment had no live route (counter).
pub const ROUTE_MISSES: &str = "rchat_route_misses_total";
/// Error events dropped because their target had no live route (counter).
pub const ERRORS_DROPPED: &str = "rchat_errors_dropped_total";
/// Fan-out sends to a connection that had already shut down (counter).
pub const SEND_FAILURES: &str = "rchat_send_failures_total";
/// Messages too large to forward, bounced to the sender (counter).
pub const EVENTS_OVERSIZED: &str = "rchat_events_oversized_total";
/// Events of an unrecognised type, ignored (counter).
pub const EVENTS_UNKNOWN: &str = "rchat_events_unknown_total";

// ---------------------------------------------------------------------------
// Federation
// ---------------------------------------------------------------------------

/// Upstream links established at bootstrap (counter).
pub const FEDERATION_LINKS_UP: &str = "rchat_federation_links_established_total";
/// Upstreams skipped at bootstrap, labelled by `stage` (counter).
pub const FEDERATION_LINK_FAILURES: &str = "rchat_federation_link_failures_total";

pub fn connection_registered() {
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

pub fn connection_unregistered() {
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

pub fn events_forwarded(n: usize) {
    counter!(EVENTS_FORWARDED).increment(n as u64);
}

pub fn route_miss() {
    counter!(ROUTE_MISSES).increment(1);
}

pub fn error_dropped() {
    counter!(ERRORS_DROPPED).increment(1);
}

pub fn send_failed() {
    counter!(SEND_FAILURES).increment(1);
}

pub fn oversized_event() {
    counter!(EVENTS_OVERSIZED).increment(1);
}

pub fn unknown_event() {
    counter!(EVENTS_UNKNOWN).increment(1);
}

pub fn federation_link_up() {
    counter!(FEDERATION_LINKS_UP).increment(1);
}

pub fn federation_link_failed(stage: &'static str) {
    counter!(FEDERATION_LINK_FAILURES, "stage" => stage).increment(1);
}
