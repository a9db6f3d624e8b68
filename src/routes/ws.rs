use std::sync::Arc;

use axum::{routing::get, Router};

use crate::handlers::ws::ws_handler;
use crate::state::AppState;

/// WebSocket routes: the single duplex endpoint.
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_handler))
}
