use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings created.
pub const BOOKINGS_CREATED_TOTAL: &str = "fieldbook_bookings_created_total";

/// Counter: status transitions. Labels: target, status.
pub const TRANSITIONS_TOTAL: &str = "fieldbook_transitions_total";

/// Counter: payments recorded.
pub const PAYMENTS_TOTAL: &str = "fieldbook_payments_total";

/// Counter: reservations and blocks rejected on overlap.
pub const SLOT_CONFLICTS_TOTAL: &str = "fieldbook_slot_conflicts_total";

/// Counter: manual slots blocked.
pub const SLOTS_BLOCKED_TOTAL: &str = "fieldbook_slots_blocked_total";

/// Counter: notifications handed to the dispatcher.
pub const NOTIFICATIONS_TOTAL: &str = "fieldbook_notifications_total";

/// Counter: invoice issuing failures (logged, not fatal).
pub const INVOICE_FAILURES_TOTAL: &str = "fieldbook_invoice_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: worker schedules resident in memory.
pub const SCHEDULES_ACTIVE: &str = "fieldbook_schedules_active";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "fieldbook_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "fieldbook_journal_flush_batch_size";

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
