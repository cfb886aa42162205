use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings committed through the reservation protocol.
pub const BOOKINGS_COMMITTED_TOTAL: &str = "valet_bookings_committed_total";

/// Counter: commits rejected because the slot was taken at write time.
pub const BOOKING_CONFLICTS_TOTAL: &str = "valet_booking_conflicts_total";

/// Counter: commits rejected by a daily/hourly/visitor cap.
pub const CAP_REJECTIONS_TOTAL: &str = "valet_cap_rejections_total";

/// Counter: bookings cancelled (user request, relocation, compensation).
pub const BOOKINGS_CANCELLED_TOTAL: &str = "valet_bookings_cancelled_total";

/// Counter: relocation offers opened.
pub const RELOCATIONS_OPENED_TOTAL: &str = "valet_relocations_opened_total";

/// Counter: relocations accepted (booking moved).
pub const RELOCATIONS_ACCEPTED_TOTAL: &str = "valet_relocations_accepted_total";

/// Counter: relocations declined (coupon issued).
pub const RELOCATIONS_DECLINED_TOTAL: &str = "valet_relocations_declined_total";

/// Counter: relocations blocked — no replacement slot anywhere.
pub const RELOCATIONS_BLOCKED_TOTAL: &str = "valet_relocations_blocked_total";

/// Counter: reminder notifications suppressed by the deduplicator.
pub const NOTIFICATIONS_SUPPRESSED_TOTAL: &str = "valet_notifications_suppressed_total";

/// Counter: overstay fines settled (payment acknowledged).
pub const FINES_SETTLED_TOTAL: &str = "valet_fines_settled_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of active garages (loaded engines).
pub const GARAGES_ACTIVE: &str = "valet_garages_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "valet_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (transactions per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "valet_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if
/// `port` is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Install a default fmt tracing subscriber. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}
