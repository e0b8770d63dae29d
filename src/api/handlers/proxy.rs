//! Proxy management handlers (spec §4.6: `list`, `add`, `remove`,
//! `add_proxy_check`, `remove_proxy_check`).

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::api::envelope;
use crate::api::server::AppState;
use crate::error::{CheckerError, Result};
use crate::ingest::expand_proxy_spec;
use crate::store::ProxyFilter;

#[derive(Debug, Deserialize, Default)]
pub struct ListProxiesQuery {
    #[serde(default)]
    pub alive_only: bool,
}

/// `list(filter) → [ProxyRow]`.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListProxiesQuery>,
) -> Result<Json<Value>> {
    let filter = if query.alive_only {
        ProxyFilter::AliveOnly
    } else {
        ProxyFilter::All
    };
    let rows = state.store.list_proxies(filter).await?;
    Ok(Json(envelope(rows)))
}

#[derive(Debug, Deserialize)]
pub struct AddProxyRequest {
    /// `[scheme://]host:port`, expanded per SPEC_FULL §11.1.
    pub spec: String,
    pub recheck_every: Option<i64>,
}

/// `add(host, port, protocol?, recheck_every) → id | error{conflict}`.
pub async fn add(
    State(state): State<AppState>,
    Json(req): Json<AddProxyRequest>,
) -> Result<Json<Value>> {
    let candidates = expand_proxy_spec(&req.spec, req.recheck_every)?;

    let mut ids = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let id = state.store.get_or_create_proxy(candidate).await?;
        ids.push(id);
    }

    info!(spec = %req.spec, ids = ?ids, "proxy added");
    Ok(Json(envelope(ids)))
}

/// `remove(id) → {ok, not_exists}`.
pub async fn remove(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Value>> {
    state.store.remove_proxy(id).await?;
    Ok(Json(envelope(true)))
}

/// `add_proxy_check(proxy_id, check_id | check_name) → {ok, not_exists}`,
/// idempotent (spec §4.6).
pub async fn add_proxy_check(
    State(state): State<AppState>,
    Path((proxy_id, check_id_or_name)): Path<(i64, String)>,
) -> Result<Json<Value>> {
    let check = state.store.get_check(&check_id_or_name).await?;
    state.store.associate(proxy_id, check.id).await?;
    Ok(Json(envelope(true)))
}

#[derive(Debug, Deserialize)]
pub struct RemoveProxyCheckQuery {
    pub check: String,
}

/// `remove_proxy_check(proxy_id, check_id | check_name) → {ok, not_exists}`.
pub async fn remove_proxy_check(
    State(state): State<AppState>,
    Path(proxy_id): Path<i64>,
    Query(query): Query<RemoveProxyCheckQuery>,
) -> Result<Json<Value>> {
    if query.check.is_empty() {
        return Err(CheckerError::InvalidRequest("missing check identifier".into()));
    }
    state.store.disassociate(proxy_id, &query.check).await?;
    Ok(Json(envelope(true)))
}
