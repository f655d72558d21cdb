use std::net::SocketAddr;

// ── Booking lifecycle ───────────────────────────────────────────

/// Counter: bookings accepted.
pub const BOOKINGS_CREATED_TOTAL: &str = "roombook_bookings_created_total";

/// Counter: booking requests rejected on a clash. Labels: reason
/// (timetable, booking, slot_index).
pub const BOOKING_CONFLICTS_TOTAL: &str = "roombook_booking_conflicts_total";

/// Counter: admin status transitions. Labels: to.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "roombook_booking_transitions_total";

/// Counter: bookings completed by the expiry sweep.
pub const SWEEP_COMPLETED_TOTAL: &str = "roombook_sweep_completed_total";

/// Counter: derived room status changes. Labels: status.
pub const ROOM_SYNCS_TOTAL: &str = "roombook_room_syncs_total";

/// Counter: accepted timetable uploads.
pub const TIMETABLE_UPLOADS_TOTAL: &str = "roombook_timetable_uploads_total";

/// Counter: mail deliveries that failed.
pub const MAIL_FAILURES_TOTAL: &str = "roombook_mail_failures_total";

/// Histogram: operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "roombook_operation_duration_seconds";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "roombook_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
