//! Axum WebSocket handler: the transport adapter.
//!
//! Each connection gets one reader task (this function) and one writer task
//! owning a bounded outbound queue. Text frames are parsed as JSON control
//! messages; binary frames are passed verbatim to the bound speaker stream.
//! Ping/pong is handled by axum; disconnects run room and presence cleanup.
//! Session teardown cancels the connection's token, which both tasks watch:
//! the writer drains what is already queued (the final `session-ended`
//! broadcast included), sends a close frame, and the reader exits.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::rooms::OUTBOUND_QUEUE_CAPACITY;
use crate::state::AppState;

use super::processor::{handle_audio_frame, handle_control_message, handle_disconnect};
use super::state::ConnectionState;

/// How long to wait for the writer to flush and close after the reader
/// stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, app: Arc<AppState>) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    info!(connection_id = %connection_id, "websocket connection established");

    let (mut sender, mut receiver) = socket.split();

    let mut conn = ConnectionState::new(connection_id);
    let cancel = conn.cancel.clone();

    // The writer owns the bounded outbound queue. Broadcasts that find it
    // full are dropped for this listener only. On cancellation it delivers
    // whatever is already queued, then closes the socket.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Arc<str>>(OUTBOUND_QUEUE_CAPACITY);
    let writer_cancel = cancel.clone();
    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                json = outbound_rx.recv() => {
                    match json {
                        Some(json) => {
                            if let Err(e) =
                                sender.send(Message::Text(json.to_string().into())).await
                            {
                                debug!(error = %e, "websocket send failed, stopping writer");
                                return;
                            }
                        }
                        None => break,
                    }
                }
                _ = writer_cancel.cancelled() => {
                    while let Ok(json) = outbound_rx.try_recv() {
                        if sender
                            .send(Message::Text(json.to_string().into()))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    break;
                }
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    loop {
        let frame = tokio::select! {
            frame = receiver.next() => frame,
            _ = cancel.cancelled() => {
                debug!(
                    connection_id = %conn.connection_id,
                    "session teardown, closing connection"
                );
                break;
            }
        };

        let Some(frame) = frame else {
            break;
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(
                    connection_id = %conn.connection_id,
                    error = %e,
                    "websocket receive error"
                );
                break;
            }
        };

        let keep_going = match frame {
            Message::Text(text) => {
                handle_control_message(text.as_str(), &mut conn, &outbound_tx, &app).await
            }
            Message::Binary(data) => handle_audio_frame(data, &mut conn, &app).await,
            Message::Ping(_) | Message::Pong(_) => true,
            Message::Close(_) => {
                debug!(connection_id = %conn.connection_id, "close frame received");
                false
            }
        };

        if !keep_going {
            break;
        }
    }

    handle_disconnect(&conn, &app).await;

    // Releasing the reader's sender (the room's clone went with the room)
    // lets the writer drain and exit; the timeout guards against a peer
    // that never reads.
    drop(outbound_tx);
    cancel.cancel();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        debug!(connection_id = %conn.connection_id, "writer drain timed out");
        writer.abort();
    }

    info!(connection_id = %conn.connection_id, "websocket connection terminated");
}
