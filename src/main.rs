use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use roombook::config::Config;
use roombook::engine::{Collaborators, Engine, EngineSettings};
use roombook::notify::NotifyHub;
use roombook::reaper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    roombook::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let hub = Arc::new(NotifyHub::new());
    let collaborators = Collaborators {
        publisher: hub.clone(),
        ..Collaborators::default()
    };
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        EngineSettings::from(&config),
        collaborators,
    )?);

    info!("roombook started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  working day: {}", config.working_day);
    info!("  sweep interval: {:?}", config.sweep_interval);
    info!("  compact threshold: {}", config.compact_threshold);
    info!(
        "  admin email: {}",
        config.admin_email.as_deref().unwrap_or("disabled")
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let sweeper = tokio::spawn(reaper::run_sweeper(engine.clone(), config.sweep_interval));
    let compactor = tokio::spawn(reaper::run_compactor(engine.clone(), config.compact_threshold));

    // Stand-in for the socket fan-out: log every change event.
    let mut events = hub.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(channel = event.channel(), payload = %event.payload(), "change"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "change log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("cannot register SIGTERM handler: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    shutdown.await;
    info!("shutdown signal received");

    sweeper.abort();
    compactor.abort();
    event_log.abort();

    // Leave a compact log behind for the next start.
    if let Err(e) = engine.compact_wal().await {
        warn!("final compaction failed: {e}");
    }

    info!("roombook stopped");
    Ok(())
}
