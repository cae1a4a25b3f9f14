//! Session status and teardown API.

use crate::{ApiError, AppState};
use axum::extract::{Extension, Path, Query};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// Handler for `GET /api/sessions`.
pub async fn list_sessions_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Json<Value> {
    let sessions = state.engine.registry().list(query.limit);
    Json(json!({ "sessions": sessions }))
}

/// Handler for `GET /api/sessions/{id}`.
pub async fn get_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = state.engine.registry().get(&session_id)?;
    Ok(Json(json!({ "session": session })))
}

/// Handler for `DELETE /api/sessions/{id}`.
///
/// Ends the session and asks the carrier to hang up the leg. A carrier
/// hangup failure is logged and ignored — it never blocks local
/// teardown.
pub async fn end_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = state.engine.registry().get(&session_id)?;

    if let Some(call_id) = &session.call_id {
        if let Some(adapter) = state.adapter_for_call(call_id) {
            if let Err(e) = adapter.end_call(call_id).await {
                tracing::warn!(
                    carrier = adapter.carrier(),
                    %call_id,
                    error = %e,
                    "carrier hangup failed, continuing local teardown"
                );
            }
        }
    }

    state.engine.end_session(&session_id, "operator_request").await;
    let session = state.engine.registry().get(&session_id)?;
    Ok(Json(json!({ "session": session })))
}

/// Handler for `GET /api/sessions/{id}/events`: the persisted event log
/// for one session, oldest first.
///
/// When the store is degraded this returns an empty log rather than an
/// error — live state is still available from the registry endpoints.
pub async fn session_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let Some(pool) = state.pool.clone() else {
        return Ok(Json(json!({ "events": [], "store_degraded": true })));
    };

    let rows = tokio::task::spawn_blocking(move || -> Result<_, trunkline_db::StoreError> {
        let conn = pool.get()?;
        trunkline_db::list_session_events(&conn, &session_id, 500)
    })
    .await
    .map_err(|e| trunkline_db::StoreError::Unavailable(format!("blocking task failed: {e}")))??;

    let events: Vec<Value> = rows
        .into_iter()
        .map(|row| {
            json!({
                "seq": row.seq,
                "event_type": row.event_type,
                "payload": serde_json::from_str::<Value>(&row.payload_json)
                    .unwrap_or(Value::Null),
                "occurred_at": row.occurred_at,
            })
        })
        .collect();
    Ok(Json(json!({ "events": events })))
}

/// Handler for `GET /api/providers`: health snapshots for every
/// configured provider instance.
pub async fn list_providers_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<Value> {
    let providers: Vec<Value> = state
        .engine
        .health()
        .snapshot_all()
        .into_iter()
        .map(|(entry, health)| {
            json!({
                "name": entry.name,
                "kind": entry.kind,
                "strategy": entry.strategy,
                "priority": entry.priority,
                "is_enabled": entry.is_enabled,
                "health": health,
            })
        })
        .collect();
    Json(json!({ "providers": providers }))
}
