use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking admissions committed.
pub const BOOKINGS_ADMITTED_TOTAL: &str = "larder_bookings_admitted_total";

/// Counter: admissions rejected. Labels: reason (capacity, duplicate).
pub const BOOKINGS_REJECTED_TOTAL: &str = "larder_bookings_rejected_total";

/// Counter: bookings cancelled.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "larder_bookings_cancelled_total";

/// Counter: HTTP requests served. Labels: op, status.
pub const HTTP_REQUESTS_TOTAL: &str = "larder_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: op.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "larder_http_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: notices handed to the delivery worker.
pub const NOTICES_SENT_TOTAL: &str = "larder_notices_sent_total";

/// Counter: notices dropped because the outbox was full or closed.
pub const NOTICES_DROPPED_TOTAL: &str = "larder_notices_dropped_total";

/// Counter: overdue bookings swept to no-show.
pub const SWEEPER_NO_SHOWS_TOTAL: &str = "larder_sweeper_no_shows_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "larder_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "larder_wal_flush_batch_size";

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
