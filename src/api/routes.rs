//! Control-plane route table (spec §4.6).

use axum::routing::{delete, get, post};
use axum::Router;

use super::handlers;
use super::server::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api", api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/proxies", get(handlers::proxy::list))
        .route("/proxies", post(handlers::proxy::add))
        .route("/proxies/:id", delete(handlers::proxy::remove))
        .route(
            "/proxies/:proxy_id/checks/:check_id",
            post(handlers::proxy::add_proxy_check),
        )
        .route(
            "/proxies/:proxy_id/checks",
            delete(handlers::proxy::remove_proxy_check),
        )
        .route("/checks", post(handlers::check::add_check))
        .route("/checks/:id_or_name", get(handlers::check::list_check))
        .route("/checks/:id_or_name", delete(handlers::check::remove_check))
}
