//! proxychecker — entry point.
//!
//! Starts the Manager (Worker fleet + scheduler) and the control-plane API
//! server, with graceful shutdown on Ctrl+C / SIGTERM.

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod assertion;
mod config;
mod database;
mod error;
mod ingest;
mod manager;
mod models;
mod prober;
mod store;
mod transport;
mod worker;

use api::ApiServer;
use config::Config;
use database::Database;
use store::Store;

#[tokio::main]
async fn main() -> error::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proxychecker=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting proxychecker");

    let config = Config::from_env()?;
    info!("configuration loaded");

    let db = Database::new(&config).await?;
    info!("connected to database");

    db.run_migrations().await?;
    info!("database migrations complete");

    let store = Store::new(db.pool().clone());

    let manager_handle = manager::spawn(store.clone(), config.manager.clone(), config.prober.clone());
    info!(worker_count = config.manager.worker_count, "manager started");

    let (api_shutdown_tx, api_shutdown_rx) = watch::channel(false);
    let api_server = ApiServer::new(config.control_plane.clone(), store);

    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown_rx).await {
            error!(error = %e, "control plane error");
        }
    });

    info!(addr = %config.control_plane_addr(), "control plane started");

    shutdown_signal().await;
    info!("shutdown signal received");

    let _ = api_shutdown_tx.send(true);
    manager_handle.stop();
    if let Err(e) = manager_handle.wait_stop().await {
        error!(error = %e, "manager stopped with a persistent worker failure");
    }

    let _ = api_task.await;
    db.close().await;

    info!("proxychecker stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
