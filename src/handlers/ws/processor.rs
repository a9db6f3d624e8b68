//! Control-message dispatch and the binary audio path.
//!
//! Protocol errors (oversized payloads, malformed JSON, frames without a
//! bound speaker, rate-limit excess) drop the offending frame and keep the
//! connection alive. Authorization failures (unknown session, expired
//! session, wrong participant) are ignored with a warning.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::to_value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::rooms::{ListenerHandle, ParticipantEventPayload, ServerMessage};
use crate::core::speaker::SpeakerContext;
use crate::state::AppState;
use crate::store::Participant;

use super::messages::ClientMessage;
use super::state::{BoundSpeaker, ConnectionState};

/// Frames larger than this are rejected outright.
pub const MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Handles one JSON control frame. Returns false when the connection
/// should close.
pub async fn handle_control_message(
    text: &str,
    conn: &mut ConnectionState,
    outbound: &mpsc::Sender<Arc<str>>,
    app: &Arc<AppState>,
) -> bool {
    if text.len() > MAX_MESSAGE_BYTES {
        warn!(
            connection_id = %conn.connection_id,
            bytes = text.len(),
            "oversized control message rejected"
        );
        return true;
    }

    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            // Unknown types and malformed payloads get the same treatment:
            // logged and ignored.
            warn!(
                connection_id = %conn.connection_id,
                error = %e,
                "unrecognized control message ignored"
            );
            return true;
        }
    };

    match message {
        ClientMessage::JoinSession(payload) => {
            join_session(conn, outbound, app, payload.session_id, payload.participant_id).await;
        }
        ClientMessage::AudioMetadata(payload) => {
            let Some(participant) =
                authorize_speaker(conn, app, &payload.participant_id).await
            else {
                return true;
            };

            conn.speaker = Some(BoundSpeaker {
                participant_id: participant.participant_id.clone(),
                speaker_name: participant.name.clone(),
            });
            conn.sample_rate = payload.sample_rate;
            conn.language = payload.target_language.clone();
            let _ = app
                .participants
                .set_connected(&participant.participant_id, true)
                .await;

            if let Some(session_id) = &conn.session_id {
                let stream = app.streams.get_or_create(
                    SpeakerContext {
                        session_id: session_id.clone(),
                        participant_id: participant.participant_id.clone(),
                        speaker_name: participant.name.clone(),
                    },
                    payload.sample_rate,
                    payload.target_language.clone(),
                );
                // At most one reconfiguration per message; a config change
                // restarts the underlying STT stream, a repeat does not.
                stream
                    .configure(payload.sample_rate, payload.target_language)
                    .await;
            }
        }
        ClientMessage::AudioChunkMetadata { data } => {
            let Some(participant) = authorize_speaker(conn, app, &data.participant_id).await
            else {
                return true;
            };

            conn.speaker = Some(BoundSpeaker {
                participant_id: participant.participant_id.clone(),
                speaker_name: data
                    .speaker_name
                    .unwrap_or_else(|| participant.name.clone()),
            });
        }
        ClientMessage::SpeakerStatus { data } => {
            relay(conn, app, |value| ServerMessage::SpeakerStatus { data: value }, &data);
        }
        ClientMessage::HandRaise { data } => {
            if let Err(e) = app
                .participants
                .set_hand_raised(&data.participant_id, data.hand_raised)
                .await
            {
                warn!(error = %e, "hand-raise flag not persisted");
            }
            relay(conn, app, |value| ServerMessage::HandRaise { data: value }, &data);
        }
        ClientMessage::SpeakPermission { data } => {
            if let Err(e) = app
                .participants
                .set_speaking(&data.participant_id, data.is_speaking)
                .await
            {
                warn!(error = %e, "speak-permission flag not persisted");
            }
            relay(conn, app, |value| ServerMessage::SpeakPermission { data: value }, &data);
        }
        ClientMessage::EndSession { data } => {
            end_session(conn, app, &data.session_id).await;
        }
    }

    true
}

/// Handles one binary audio frame: rate limit, binding check, forward to
/// the speaker stream. Never interprets the payload.
pub async fn handle_audio_frame(
    frame: Bytes,
    conn: &mut ConnectionState,
    app: &Arc<AppState>,
) -> bool {
    if frame.len() > MAX_MESSAGE_BYTES {
        warn!(
            connection_id = %conn.connection_id,
            bytes = frame.len(),
            "oversized audio frame rejected"
        );
        return true;
    }

    let Some(session_id) = conn.session_id.clone() else {
        debug!(
            connection_id = %conn.connection_id,
            "audio frame before join-session dropped"
        );
        return true;
    };
    let Some(speaker) = conn.speaker.clone() else {
        debug!(
            connection_id = %conn.connection_id,
            "audio frame without a bound speaker dropped"
        );
        return true;
    };

    if !conn.admit_frame() {
        // Rate-limit excess is dropped silently, not errored.
        return true;
    }

    let stream = app.streams.get_or_create(
        SpeakerContext {
            session_id,
            participant_id: speaker.participant_id,
            speaker_name: speaker.speaker_name,
        },
        conn.sample_rate,
        conn.language.clone(),
    );
    stream.write_frame(frame);

    true
}

/// Disconnect cleanup: leave the room, tell the others, mark the
/// participant absent. The speaker stream is left to the inactivity reaper;
/// it is independent of listener connections.
pub async fn handle_disconnect(conn: &ConnectionState, app: &Arc<AppState>) {
    if let Some(session_id) = &conn.session_id {
        app.rooms.leave(session_id, &conn.connection_id);

        if let Some(participant_id) = &conn.joined_participant_id {
            let _ = app.participants.set_connected(participant_id, false).await;

            if let Some(room) = app.rooms.get(session_id) {
                let name = match app.participants.get_participant(participant_id).await {
                    Ok(Some(p)) => p.name,
                    _ => String::new(),
                };
                room.broadcast(&ServerMessage::ParticipantLeft {
                    data: ParticipantEventPayload {
                        session_id: session_id.clone(),
                        participant_id: participant_id.clone(),
                        participant_name: name,
                    },
                });
            }
        }
    }
}

async fn join_session(
    conn: &mut ConnectionState,
    outbound: &mpsc::Sender<Arc<str>>,
    app: &Arc<AppState>,
    session_id: String,
    participant_id: Option<String>,
) {
    let session = match app.sessions.get_session(&session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            warn!(session_id = %session_id, "join-session for unknown session ignored");
            return;
        }
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "session lookup failed");
            return;
        }
    };
    if session.is_expired() {
        warn!(session_id = %session_id, "join-session for expired session ignored");
        return;
    }

    let mut listener = ListenerHandle::new(
        conn.connection_id.clone(),
        outbound.clone(),
        conn.cancel.clone(),
    );

    let mut joined_participant: Option<Participant> = None;
    if let Some(participant_id) = participant_id {
        match app.participants.get_participant(&participant_id).await {
            Ok(Some(participant)) if participant.session_id == session_id => {
                let _ = app.participants.set_connected(&participant_id, true).await;
                listener = listener.with_participant(participant_id.clone());
                conn.joined_participant_id = Some(participant_id);
                joined_participant = Some(participant);
            }
            Ok(_) => {
                warn!(
                    session_id = %session_id,
                    participant_id = %participant_id,
                    "join-session with a participant outside the session; joining as listener only"
                );
            }
            Err(e) => {
                warn!(error = %e, "participant lookup failed during join");
            }
        }
    }

    let room = app.rooms.join(&session_id, listener);
    conn.session_id = Some(session_id.clone());
    info!(
        connection_id = %conn.connection_id,
        session_id = %session_id,
        listeners = room.listener_count(),
        "connection joined session"
    );

    if let Some(participant) = joined_participant {
        room.broadcast(&ServerMessage::ParticipantJoined {
            data: ParticipantEventPayload {
                session_id,
                participant_id: participant.participant_id,
                participant_name: participant.name,
            },
        });
    }
}

/// Checks that `participant_id` may emit audio on this connection: the
/// connection is in a session, the participant belongs to it, and it either
/// has speaking permission or is the host (hosts are auto-promoted on their
/// first audio binding).
async fn authorize_speaker(
    conn: &ConnectionState,
    app: &Arc<AppState>,
    participant_id: &str,
) -> Option<Participant> {
    let Some(session_id) = &conn.session_id else {
        warn!(
            connection_id = %conn.connection_id,
            "speaker binding before join-session ignored"
        );
        return None;
    };

    let participant = match app.participants.get_participant(participant_id).await {
        Ok(Some(participant)) => participant,
        Ok(None) => {
            warn!(participant_id, "speaker binding for unknown participant ignored");
            return None;
        }
        Err(e) => {
            warn!(participant_id, error = %e, "participant lookup failed");
            return None;
        }
    };

    if &participant.session_id != session_id {
        warn!(
            participant_id,
            session_id = %session_id,
            "speaker binding for participant outside this session ignored"
        );
        return None;
    }

    if !participant.may_speak() {
        warn!(
            participant_id,
            "speaker binding without speaking permission ignored"
        );
        return None;
    }

    if participant.is_host() && !participant.is_speaking {
        info!(participant_id, "auto-promoting host to speaking");
        let _ = app.participants.set_speaking(participant_id, true).await;
        let mut promoted = participant;
        promoted.is_speaking = true;
        return Some(promoted);
    }

    Some(participant)
}

fn relay<T: serde::Serialize>(
    conn: &ConnectionState,
    app: &Arc<AppState>,
    build: impl FnOnce(serde_json::Value) -> ServerMessage,
    payload: &T,
) {
    let Some(session_id) = &conn.session_id else {
        warn!(
            connection_id = %conn.connection_id,
            "relay before join-session ignored"
        );
        return;
    };
    let Some(room) = app.rooms.get(session_id) else {
        return;
    };
    match to_value(payload) {
        Ok(value) => {
            room.broadcast(&build(value));
        }
        Err(e) => warn!(error = %e, "failed to serialize relay payload"),
    }
}

/// Host-only teardown: stops every speaker stream of the session, removes
/// the room after a final `session-ended` broadcast, and clears the
/// synthesis cache.
async fn end_session(conn: &ConnectionState, app: &Arc<AppState>, session_id: &str) {
    if conn.session_id.as_deref() != Some(session_id) {
        warn!(session_id, "end-session from a connection outside the session ignored");
        return;
    }

    let host_id = match app.sessions.get_session(session_id).await {
        Ok(Some(session)) => session.host_participant_id,
        _ => {
            warn!(session_id, "end-session for unknown session ignored");
            return;
        }
    };

    let caller = conn
        .joined_participant_id
        .as_deref()
        .or(conn.speaker.as_ref().map(|s| s.participant_id.as_str()));
    if caller != Some(host_id.as_str()) {
        warn!(session_id, "end-session from non-host ignored");
        return;
    }

    info!(session_id, "host ended session");
    app.streams.stop_session(session_id).await;

    if let Some(room) = app.rooms.end_session(session_id) {
        room.broadcast(&ServerMessage::SessionEnded {
            data: ParticipantEventPayload {
                session_id: session_id.to_string(),
                participant_id: host_id,
                participant_name: String::new(),
            },
        });
        room.close_connections();
    }

    app.cache.clear();
}
