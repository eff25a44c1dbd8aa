//! Prometheus metrics collection for blockshared.
//!
//! Tracks connection lifecycle, lock protocol outcomes, commit throughput,
//! and bus health. Exposed on the HTTP collaborator's `/metrics` endpoint.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry for all metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    // ========================================================================
    // Counters (monotonic increasing)
    // ========================================================================

    /// Total WebSocket connections accepted into a room.
    pub static ref CONNECTIONS_TOTAL: IntCounter = IntCounter::new(
        "blockshare_connections_total",
        "Total admitted workspace connections"
    ).unwrap();

    /// Connections rejected because the room was at capacity (close 4003).
    pub static ref REJECTED_ROOM_FULL: IntCounter = IntCounter::new(
        "blockshare_rejected_room_full_total",
        "Connections rejected with room-full"
    ).unwrap();

    /// Connections rejected because the room does not exist (close 4004).
    pub static ref REJECTED_ROOM_NOT_FOUND: IntCounter = IntCounter::new(
        "blockshare_rejected_room_not_found_total",
        "Connections rejected with room-not-found"
    ).unwrap();

    /// Inbound frames that decoded to a known message type.
    pub static ref MESSAGES_RECEIVED: IntCounter = IntCounter::new(
        "blockshare_messages_received_total",
        "Well-formed inbound messages"
    ).unwrap();

    /// Inbound frames dropped as malformed or unknown.
    pub static ref MESSAGES_DROPPED: IntCounter = IntCounter::new(
        "blockshare_messages_dropped_total",
        "Malformed or unknown inbound frames"
    ).unwrap();

    /// Lock acquisitions granted.
    pub static ref LOCKS_GRANTED: IntCounter = IntCounter::new(
        "blockshare_locks_granted_total",
        "Granted lock acquisitions"
    ).unwrap();

    /// Lock acquisitions denied due to contention.
    pub static ref LOCKS_DENIED: IntCounter = IntCounter::new(
        "blockshare_locks_denied_total",
        "Denied lock acquisitions"
    ).unwrap();

    /// Commits applied and fanned out.
    pub static ref COMMITS_APPLIED: IntCounter = IntCounter::new(
        "blockshare_commits_applied_total",
        "Applied commits"
    ).unwrap();

    /// Events delivered to room buses.
    pub static ref EVENTS_PUBLISHED: IntCounter = IntCounter::new(
        "blockshare_events_published_total",
        "Events published on room buses"
    ).unwrap();

    /// Subscribers dropped because their queue overflowed.
    pub static ref SLOW_SINKS_DROPPED: IntCounter = IntCounter::new(
        "blockshare_slow_sinks_dropped_total",
        "Bus subscribers dropped for overflow"
    ).unwrap();

    // ========================================================================
    // Gauges (can increase/decrease)
    // ========================================================================

    /// Currently active workspace sessions.
    pub static ref ACTIVE_SESSIONS: IntGauge = IntGauge::new(
        "blockshare_active_sessions",
        "Currently active sessions"
    ).unwrap();
}

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at server startup before any metrics are recorded.
pub fn init() {
    REGISTRY.register(Box::new(CONNECTIONS_TOTAL.clone())).unwrap();
    REGISTRY.register(Box::new(REJECTED_ROOM_FULL.clone())).unwrap();
    REGISTRY
        .register(Box::new(REJECTED_ROOM_NOT_FOUND.clone()))
        .unwrap();
    REGISTRY.register(Box::new(MESSAGES_RECEIVED.clone())).unwrap();
    REGISTRY.register(Box::new(MESSAGES_DROPPED.clone())).unwrap();
    REGISTRY.register(Box::new(LOCKS_GRANTED.clone())).unwrap();
    REGISTRY.register(Box::new(LOCKS_DENIED.clone())).unwrap();
    REGISTRY.register(Box::new(COMMITS_APPLIED.clone())).unwrap();
    REGISTRY.register(Box::new(EVENTS_PUBLISHED.clone())).unwrap();
    REGISTRY.register(Box::new(SLOW_SINKS_DROPPED.clone())).unwrap();
    REGISTRY.register(Box::new(ACTIVE_SESSIONS.clone())).unwrap();
}

/// Gather all metrics in Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let before = LOCKS_GRANTED.get();
        LOCKS_GRANTED.inc();
        assert_eq!(LOCKS_GRANTED.get(), before + 1);
    }

    #[test]
    fn gauge_moves_both_ways() {
        let before = ACTIVE_SESSIONS.get();
        ACTIVE_SESSIONS.inc();
        ACTIVE_SESSIONS.dec();
        assert_eq!(ACTIVE_SESSIONS.get(), before);
    }
}
