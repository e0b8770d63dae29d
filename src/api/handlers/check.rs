//! CheckDefinition management handlers (spec §4.6: `add_check`, `list_check`,
//! `remove_check`).

use axum::extract::{Path, State};
use axum::Json;
use serde_json::Value;
use tracing::info;

use crate::api::envelope;
use crate::api::server::AppState;
use crate::error::Result;
use crate::models::NewCheckDefinition;

/// `add_check(definition, name?) → id | error{conflict}`.
pub async fn add_check(
    State(state): State<AppState>,
    Json(req): Json<NewCheckDefinition>,
) -> Result<Json<Value>> {
    let url = req.url.clone();
    let id = state.store.add_check(req).await?;
    info!(check_id = id, url = %url, "check definition added");
    Ok(Json(envelope(id)))
}

/// `list_check(id | name) → definition | not_exists`.
pub async fn list_check(
    State(state): State<AppState>,
    Path(id_or_name): Path<String>,
) -> Result<Json<Value>> {
    let check = state.store.get_check(&id_or_name).await?;
    Ok(Json(envelope(check)))
}

/// `remove_check(id | name) → {ok, not_exists}`.
pub async fn remove_check(
    State(state): State<AppState>,
    Path(id_or_name): Path<String>,
) -> Result<Json<Value>> {
    state.store.remove_check(&id_or_name).await?;
    Ok(Json(envelope(true)))
}
