use std::sync::Arc;

use axum::{routing::get, Router};

use crate::handlers::api::{health_check, session_transcripts};
use crate::state::AppState;

/// Plain HTTP routes.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(health_check))
        .route("/sessions/{session_id}/transcripts", get(session_transcripts))
}
