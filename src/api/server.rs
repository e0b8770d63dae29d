//! Control-plane server using Axum.

use std::net::SocketAddr;
use std::time::Instant;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::ControlPlaneConfig;
use crate::error::Result;
use crate::store::Store;

use super::middleware::cors_layer;
use super::routes;

/// Shared state for control-plane handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub started_at: Instant,
}

pub struct ApiServer {
    config: ControlPlaneConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ControlPlaneConfig, store: Store) -> Self {
        let state = AppState {
            store,
            started_at: Instant::now(),
        };

        Self { config, state }
    }

    fn build_router(&self) -> Router {
        let cors = cors_layer(&self.config.cors_origins);

        routes::create_router(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .expect("invalid control-plane address");

        let router = self.build_router();

        info!("control plane listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| crate::error::CheckerError::Internal(e.to_string()))?;

        info!("control plane shut down");
        Ok(())
    }
}
