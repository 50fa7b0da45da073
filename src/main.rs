use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use larder::auth::StaffKey;
use larder::engine::Engine;
use larder::http::{self, AppState};
use larder::notify::NotifyHub;
use larder::outbox::{self, Outbox};
use larder::reaper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("LARDER_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    larder::observability::init(metrics_port);

    let port = std::env::var("LARDER_PORT").unwrap_or_else(|_| "8080".into());
    let bind = std::env::var("LARDER_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("LARDER_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let staff_key = std::env::var("LARDER_STAFF_KEY").unwrap_or_else(|_| "larder".into());
    let compact_threshold: u64 = std::env::var("LARDER_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("larder.wal");

    let notify = Arc::new(NotifyHub::new());
    let (outbox, outbox_rx) = Outbox::channel();
    tokio::spawn(outbox::run_outbox(outbox_rx));

    let engine = Arc::new(Engine::new(wal_path, notify, outbox)?);

    tokio::spawn(reaper::run_sweeper(engine.clone()));
    tokio::spawn(reaper::run_compactor(engine.clone(), compact_threshold));

    let state = AppState {
        engine,
        staff_key: StaffKey(staff_key),
    };
    let app = http::router(state);

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("larder listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight requests
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
        info!("shutdown signal received, stopping accept loop");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("larder stopped");
    Ok(())
}
