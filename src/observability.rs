use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "clashd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "clashd_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "clashd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "clashd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "clashd_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "clashd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "clashd_wal_flush_batch_size";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: unforced writes rejected because of a clash.
pub const CLASHES_DETECTED_TOTAL: &str = "clashd_clashes_detected_total";

/// Counter: events written as tentative by a forced override.
pub const TENTATIVE_WRITES_TOTAL: &str = "clashd_tentative_writes_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertVenue { .. } => "insert_venue",
        Command::UpdateVenue { .. } => "update_venue",
        Command::DeleteVenue { .. } => "delete_venue",
        Command::SelectVenues { .. } => "select_venues",
        Command::InsertEvent { .. } => "insert_event",
        Command::UpdateEvent { .. } => "update_event",
        Command::CancelEvent { .. } => "cancel_event",
        Command::DeleteEvent { .. } => "delete_event",
        Command::SelectEvents { .. } => "select_events",
        Command::SelectConflicts { .. } => "select_conflicts",
        Command::SelectClashes { .. } => "select_clashes",
        Command::SelectSuggestions { .. } => "select_suggestions",
    }
}
