use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::engine::EngineError;
use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roomledger_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roomledger_query_duration_seconds";

/// Counter: reservation lifecycle outcomes. Labels: op, outcome.
pub const RESERVATION_OPS_TOTAL: &str = "roomledger_reservation_ops_total";

/// Histogram: rooms assigned per created reservation.
pub const ROOMS_PER_RESERVATION: &str = "roomledger_rooms_per_reservation";

/// Counter: statements refused by the capability layer. Labels: command.
pub const ACCESS_DENIED_TOTAL: &str = "roomledger_access_denied_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "roomledger_connections_active";
pub const CONNECTIONS_TOTAL: &str = "roomledger_connections_total";
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomledger_connections_rejected_total";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "roomledger_auth_failures_total";

/// Gauge: hotels with a loaded ledger.
pub const HOTELS_ACTIVE: &str = "roomledger_hotels_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomledger_wal_flush_duration_seconds";

/// Histogram: events per WAL group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomledger_wal_flush_batch_size";

/// Counter: background compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "roomledger_wal_compactions_total";

/// Install the Prometheus exporter. No-op without an address.
pub fn init(addr: Option<SocketAddr>) -> Result<(), BuildError> {
    let Some(addr) = addr else { return Ok(()) };
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://{addr}/metrics");
    Ok(())
}

/// Short, stable label for an engine error kind.
pub fn error_label(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidRange(_) => "invalid_range",
        EngineError::InvalidParty(_) => "invalid_party",
        EngineError::InsufficientCapacity { .. } => "insufficient_capacity",
        EngineError::RoomUnavailable(_) => "room_unavailable",
        EngineError::ReservationNotFound(_) => "reservation_not_found",
        EngineError::RoomNotFound(_) => "room_not_found",
        EngineError::ReservationExists(_) => "reservation_exists",
        EngineError::RoomExists(_) => "room_exists",
        EngineError::RoomInUse(_) => "room_in_use",
        EngineError::PriceMismatch { .. } => "price_mismatch",
        EngineError::LimitExceeded(_) => "limit_exceeded",
        EngineError::WalError(_) => "wal_error",
    }
}

pub fn record_outcome<T>(op: &'static str, result: &Result<T, EngineError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => error_label(e),
    };
    metrics::counter!(RESERVATION_OPS_TOTAL, "op" => op, "outcome" => outcome).increment(1);
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom { .. } => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::DeleteRoom { .. } => "delete_room",
        Command::SelectRooms { .. } => "select_rooms",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::PayReservation { .. } => "pay_reservation",
        Command::ReplaceRoom { .. } => "replace_room",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectRoomCandidates { .. } => "select_room_candidates",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn error_labels_are_distinct() {
        let errors = [
            EngineError::InvalidRange("x"),
            EngineError::InvalidParty(0),
            EngineError::InsufficientCapacity { party_size: 1, available: 0 },
            EngineError::RoomUnavailable(1),
            EngineError::ReservationNotFound(Ulid::nil()),
            EngineError::RoomNotFound(1),
            EngineError::ReservationExists(Ulid::nil()),
            EngineError::RoomExists(1),
            EngineError::RoomInUse(1),
            EngineError::PriceMismatch { expected: 1, got: 2 },
            EngineError::LimitExceeded("x"),
            EngineError::WalError("x".into()),
        ];
        let mut labels: Vec<_> = errors.iter().map(error_label).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), errors.len());
    }
}
