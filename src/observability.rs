use std::net::SocketAddr;

use crate::protocol::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "salonbook_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "salonbook_request_duration_seconds";

/// Counter: booking attempts. Labels: op (create/edit), outcome (accepted or error kind).
pub const BOOKINGS_TOTAL: &str = "salonbook_bookings_total";

/// Counter: administrative status changes. Labels: status.
pub const STATUS_CHANGES_TOTAL: &str = "salonbook_status_changes_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "salonbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "salonbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "salonbook_connections_rejected_total";

/// Gauge: open watch subscriptions.
pub const WATCHERS_ACTIVE: &str = "salonbook_watchers_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "salonbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "salonbook_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "salonbook_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a request, for metrics.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::Services => "services",
        Request::Slots { .. } => "slots",
        Request::Check { .. } => "check",
        Request::Book { .. } => "book",
        Request::SetStatus { .. } => "set_status",
        Request::ClientAppointments { .. } => "client_appointments",
        Request::DayAppointments { .. } => "day_appointments",
        Request::Watch { .. } => "watch",
    }
}
