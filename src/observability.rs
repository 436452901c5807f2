use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "covers_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "covers_query_duration_seconds";

/// Counter: booking attempts that passed validation. Labels: outcome.
pub const BOOKINGS_TOTAL: &str = "covers_bookings_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "covers_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "covers_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "covers_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "covers_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "covers_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectAvailabilityReport { .. } => "select_availability_report",
        Command::SelectSettings => "select_settings",
        Command::UpsertSettings { .. } => "upsert_settings",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::SelectReservations { .. } => "select_reservations",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::InsertOverrides { .. } => "insert_overrides",
        Command::DeleteOverride { .. } => "delete_override",
        Command::SelectSchedule { .. } => "select_schedule",
        Command::ImportLegacyDay { .. } => "import_legacy_day",
    }
}
