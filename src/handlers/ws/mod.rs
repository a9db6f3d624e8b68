//! WebSocket transport adapter: upgrade handling, control-message
//! dispatch, binary audio ingress, per-connection state.

pub mod handler;
pub mod messages;
pub mod processor;
pub mod state;

pub use handler::ws_handler;
