//! Plain HTTP handlers: health and post-hoc transcript retrieval.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

/// Liveness probe.
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "service": "polyvoice",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
    }))
}

/// Returns every persisted translation row of a session, for transcript
/// export after the meeting.
pub async fn session_transcripts(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Value>> {
    let session = state
        .sessions
        .get_session(&session_id)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    if session.is_none() {
        return Err(AppError::NotFound(format!("session {session_id}")));
    }

    let records = state
        .translations
        .list_for_session(&session_id)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;

    Ok(Json(json!({
        "sessionId": session_id,
        "count": records.len(),
        "translations": records,
    })))
}
