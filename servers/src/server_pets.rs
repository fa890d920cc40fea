use anyhow::Result;
use lib_common::core::{BoundedStore, FieldExtractor, JsonFileStore, Tracker};
use std::sync::Arc;
use tokio::signal;

mod pets_logic;
use pets_logic::{config, downstream, logger, state, upstream};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let settings = config::load_config()?;
    logger::setup_logging(&settings.log_dir, &settings.log_level)?;
    settings.config_file.log();

    let tracker = Arc::new(Tracker::new(
        FieldExtractor::default().with_job_id_precedence(settings.job_id_precedence),
        Arc::new(BoundedStore::new(settings.capacity)),
        Arc::new(JsonFileStore::new(&settings.store_path)),
        settings.channel_id.clone(),
    ));
    let restored = tracker.restore();
    log::info!("Loaded {} pet servers from {}", restored, settings.store_path.display());

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let app_state = state::AppState::new(tracker, settings.recent_window);

    let mut upstream_handle = tokio::spawn(upstream::run(
        settings.clone(),
        app_state.clone(),
        shutdown_tx.subscribe(),
    ));

    let downstream_state = app_state.clone();
    let downstream_shutdown = shutdown_tx.subscribe();
    let port = settings.port;
    let downstream_handle = tokio::spawn(async move {
        if let Err(e) = downstream::run(port, downstream_state, downstream_shutdown).await {
            log::error!("Downstream server failed: {}", e);
        }
    });

    // Wait for a shutdown signal, or for ingestion to stop on its own (e.g. a rejected token)
    let upstream_done = tokio::select! {
        _ = shutdown_signal() => false,
        res = &mut upstream_handle => {
            if let Err(e) = res {
                log::error!("Upstream task failed: {}", e);
            }
            log::warn!("Upstream ingestion ended, initiating shutdown.");
            true
        }
    };

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());

    // Wait for components to shut down
    if !upstream_done {
        let _ = upstream_handle.await;
    }
    let _ = downstream_handle.await;

    log::info!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => log::info!("Ctrl-C received, initiating shutdown."),
            Err(e) => {
                log::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
                log::info!("SIGTERM received, initiating shutdown.");
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    // On non-unix platforms, just wait forever.
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
