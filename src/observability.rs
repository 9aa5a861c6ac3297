use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, status.
pub const REQUESTS_TOTAL: &str = "slothold_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const REQUEST_DURATION_SECONDS: &str = "slothold_request_duration_seconds";

// ── Hold protocol ───────────────────────────────────────────────

/// Counter: successful acquires. Labels: kind (new, renewed).
pub const HOLDS_ACQUIRED_TOTAL: &str = "slothold_holds_acquired_total";

/// Counter: rejected acquires. Labels: reason (slot_on_hold, user_has_other_hold).
pub const HOLD_CONFLICTS_TOTAL: &str = "slothold_hold_conflicts_total";

/// Counter: release calls. Labels: outcome (released, no_hold, not_owner).
pub const HOLDS_RELEASED_TOTAL: &str = "slothold_holds_released_total";

/// Counter: holds handed off to the repository as bookings.
pub const HOLDS_COMMITTED_TOTAL: &str = "slothold_holds_committed_total";

/// Counter: optimistic transactions aborted and retried. Labels: op.
pub const TXN_RETRIES_TOTAL: &str = "slothold_txn_retries_total";

/// Counter: expired holds evicted by the reaper.
pub const HOLDS_REAPED_TOTAL: &str = "slothold_holds_reaped_total";

/// Counter: store entries that failed to decode.
pub const DECODE_FAILURES_TOTAL: &str = "slothold_decode_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: live WebSocket sessions.
pub const SESSIONS_ACTIVE: &str = "slothold_sessions_active";

/// Counter: WebSocket sessions accepted.
pub const SESSIONS_TOTAL: &str = "slothold_sessions_total";

/// Counter: WebSocket upgrades rejected due to the connection limit.
pub const SESSIONS_REJECTED_TOTAL: &str = "slothold_sessions_rejected_total";

/// Counter: spectators that fell behind their room and were resent a snapshot.
pub const ROOM_LAGGED_TOTAL: &str = "slothold_room_lagged_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "slothold_tenants_active";

/// Counter: requests with missing or bad credentials.
pub const AUTH_FAILURES_TOTAL: &str = "slothold_auth_failures_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
