use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;
use crate::model::Outcome;

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that marks overdue approved bookings as no-shows.
/// This is the scheduled-job leg of the status lifecycle: clients who never
/// arrived stop looking like open appointments.
pub async fn run_sweeper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let today = chrono::Utc::now().date_naive();
        let overdue = engine.collect_overdue(today);
        for booking_id in overdue {
            match engine.record_outcome(booking_id, Outcome::NoShow).await {
                Ok(_) => {
                    metrics::counter!(crate::observability::SWEEPER_NO_SHOWS_TOTAL).increment(1);
                    info!("swept overdue booking {booking_id} to no-show");
                }
                Err(e) => {
                    // Staff may have closed it between collect and record — that's fine
                    tracing::debug!("sweeper skip {booking_id}: {e}");
                }
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("compacted WAL after {appends} appends"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}
