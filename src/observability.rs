use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "innkeep_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "innkeep_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "innkeep_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "innkeep_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "innkeep_connections_rejected_total";

/// Gauge: number of open facilities (loaded engines).
pub const FACILITIES_ACTIVE: &str = "innkeep_facilities_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (commands per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeep_wal_flush_batch_size";

// ── Booking domain ──────────────────────────────────────────────

/// Counter: bookings written.
pub const BOOKINGS_CREATED_TOTAL: &str = "innkeep_bookings_created_total";

/// Counter: create requests refused because the room was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "innkeep_booking_conflicts_total";

/// Counter: status transitions. Labels: status.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "innkeep_booking_transitions_total";

/// Counter: calendar events that could not be published.
pub const CALENDAR_FAILURES_TOTAL: &str = "innkeep_calendar_failures_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        tracing::error!("failed to install Prometheus metrics exporter: {e}");
        return;
    }
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectConflicts { .. } => "select_conflicts",
        Command::SelectBookings { .. } => "select_bookings",
        Command::CreateBooking(_) => "create_booking",
        Command::UpdateStatus { .. } => "update_status",
        Command::AnnounceLease(_) => "announce_lease",
    }
}
