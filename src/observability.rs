use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "hotelcal_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "hotelcal_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "hotelcal_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "hotelcal_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "hotelcal_connections_rejected_total";

/// Gauge: number of open properties (loaded engines).
pub const PROPERTIES_ACTIVE: &str = "hotelcal_properties_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "hotelcal_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "hotelcal_wal_flush_batch_size";

// ── Calendar ────────────────────────────────────────────────────

/// Counter: gated reservations refused because a night was unavailable.
pub const RESERVATIONS_REJECTED: &str = "hotelcal_reservations_rejected_total";

/// Counter: calendar rows written by bulk weekday rules.
pub const BULK_ROWS_UPSERTED: &str = "hotelcal_bulk_rows_upserted_total";

/// Install the Prometheus exporter on `port`. No-op without a port.
pub fn init(port: Option<u16>) -> Result<(), String> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus exporter: {e}"))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a command, used on query metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::UpsertRoom { .. } => "upsert_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::ReplaceSurcharges { .. } => "replace_surcharges",
        Command::ClearSurcharges { .. } => "clear_surcharges",
        Command::SetDay { .. } => "set_day",
        Command::ApplyDailyRules { .. } => "apply_daily_rules",
        Command::Reserve { .. } => "reserve",
        Command::Release { .. } => "release",
        Command::SelectRooms => "select_rooms",
        Command::SelectSurcharges { .. } => "select_surcharges",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectPrices { .. } => "select_prices",
        Command::SelectQuote { .. } => "select_quote",
        Command::SelectCalendar { .. } => "select_calendar",
        Command::Listen { .. } => "listen",
    }
}
