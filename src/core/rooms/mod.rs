//! Session rooms and the broadcast fabric.
//!
//! A room is the set of listener connections of one session. Rooms are
//! created lazily on the first successful join and destroyed when the last
//! connection leaves or the session is ended. Broadcasting serializes a
//! message once and hands it to each listener's bounded outbound queue;
//! a full queue drops the message for that listener only, so a slow
//! consumer can never stall the audio pipeline.
//!
//! Ownership: the transport adapter owns the connection; the room holds a
//! non-owning handle keyed by connection id and is told when the connection
//! closes. The room never owns the connection back.

pub mod messages;

pub use messages::{
    AudioSynthesizedPayload, InterimTranscriptPayload, ParticipantEventPayload, ServerMessage,
    TranslationPayload,
};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of each listener's outbound queue. Honest clients drain far
/// faster than the pipeline produces; the bound exists to shed slow ones.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Non-owning handle to one connected listener.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    pub connection_id: String,
    /// Participant this connection authenticated as, once known.
    pub participant_id: Option<String>,
    sender: mpsc::Sender<Arc<str>>,
    /// Cancelling this tells the connection's transport tasks to close the
    /// socket; session teardown fires it for every listener in the room.
    cancel: CancellationToken,
}

impl ListenerHandle {
    pub fn new(
        connection_id: String,
        sender: mpsc::Sender<Arc<str>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connection_id,
            participant_id: None,
            sender,
            cancel,
        }
    }

    pub fn with_participant(mut self, participant_id: String) -> Self {
        self.participant_id = Some(participant_id);
        self
    }
}

/// Outcome of one broadcast, mostly for logs and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    /// Listeners whose queue was full; the message was dropped for them.
    pub dropped: usize,
    /// Listeners whose channel was closed; they were removed from the room.
    pub disconnected: usize,
}

/// All currently connected listeners of one session.
#[derive(Debug)]
pub struct SessionRoom {
    session_id: String,
    listeners: RwLock<HashMap<String, ListenerHandle>>,
}

impl SessionRoom {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            listeners: RwLock::new(HashMap::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn add_listener(&self, listener: ListenerHandle) {
        let mut listeners = self.listeners.write();
        listeners.insert(listener.connection_id.clone(), listener);
        debug!(
            session_id = %self.session_id,
            listeners = listeners.len(),
            "listener joined room"
        );
    }

    /// Removes a listener; returns how many remain.
    pub fn remove_listener(&self, connection_id: &str) -> usize {
        let mut listeners = self.listeners.write();
        listeners.remove(connection_id);
        listeners.len()
    }

    /// Updates the participant binding of a connection already in the room.
    pub fn bind_participant(&self, connection_id: &str, participant_id: &str) {
        if let Some(listener) = self.listeners.write().get_mut(connection_id) {
            listener.participant_id = Some(participant_id.to_string());
        }
    }

    /// Signals every listener's transport to close its socket. Called after
    /// the final broadcast of a session teardown; already-queued messages
    /// are still delivered before the close frame goes out.
    pub fn close_connections(&self) {
        let listeners = self.listeners.read();
        info!(
            session_id = %self.session_id,
            listeners = listeners.len(),
            "closing all listener connections"
        );
        for listener in listeners.values() {
            listener.cancel.cancel();
        }
    }

    /// Serializes `message` once and dispatches to every listener whose
    /// queue has room. Closed listeners are pruned on the way.
    pub fn broadcast(&self, message: &ServerMessage) -> BroadcastOutcome {
        let json = match serde_json::to_string(message) {
            Ok(json) => Arc::<str>::from(json),
            Err(e) => {
                warn!(error = %e, "failed to serialize broadcast message");
                return BroadcastOutcome::default();
            }
        };
        self.broadcast_raw(json)
    }

    fn broadcast_raw(&self, json: Arc<str>) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();
        let mut closed: Vec<String> = Vec::new();

        {
            let listeners = self.listeners.read();
            for listener in listeners.values() {
                match listener.sender.try_send(json.clone()) {
                    Ok(()) => outcome.delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        outcome.dropped += 1;
                        warn!(
                            session_id = %self.session_id,
                            connection_id = %listener.connection_id,
                            "outbound queue full, dropping message for listener"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        outcome.disconnected += 1;
                        closed.push(listener.connection_id.clone());
                    }
                }
            }
        }

        if !closed.is_empty() {
            let mut listeners = self.listeners.write();
            for connection_id in &closed {
                listeners.remove(connection_id);
            }
        }

        outcome
    }

}

/// Process-wide registry of live rooms. Constructed once at startup and
/// passed to handlers explicitly.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<SessionRoom>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionRoom>> {
        self.rooms.read().get(session_id).cloned()
    }

    /// Adds a listener, creating the room on first join.
    pub fn join(&self, session_id: &str, listener: ListenerHandle) -> Arc<SessionRoom> {
        let room = {
            let mut rooms = self.rooms.write();
            rooms
                .entry(session_id.to_string())
                .or_insert_with(|| {
                    info!(session_id, "creating session room");
                    Arc::new(SessionRoom::new(session_id.to_string()))
                })
                .clone()
        };
        room.add_listener(listener);
        room
    }

    /// Removes a listener and destroys the room if it became empty.
    /// Returns true when the room was destroyed.
    pub fn leave(&self, session_id: &str, connection_id: &str) -> bool {
        let Some(room) = self.get(session_id) else {
            return false;
        };

        if room.remove_listener(connection_id) == 0 {
            self.rooms.write().remove(session_id);
            info!(session_id, "destroyed empty session room");
            true
        } else {
            false
        }
    }

    /// Removes the room outright (explicit session end), returning it so the
    /// caller can broadcast a final message and close its connections.
    pub fn end_session(&self, session_id: &str) -> Option<Arc<SessionRoom>> {
        let room = self.rooms.write().remove(session_id);
        if room.is_some() {
            info!(session_id, "session room ended");
        }
        room
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }

    /// Session ids of all live rooms, for shutdown.
    pub fn session_ids(&self) -> Vec<String> {
        self.rooms.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener(id: &str, capacity: usize) -> (ListenerHandle, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            ListenerHandle::new(id.to_string(), tx, CancellationToken::new()),
            rx,
        )
    }

    fn error_message(text: &str) -> ServerMessage {
        ServerMessage::Error {
            message: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_listener_once() {
        let registry = RoomRegistry::new();
        let (l1, mut rx1) = listener("c1", 8);
        let (l2, mut rx2) = listener("c2", 8);

        let room = registry.join("s1", l1);
        registry.join("s1", l2);

        let outcome = room.broadcast(&error_message("hello"));
        assert_eq!(outcome.delivered, 2);

        assert!(rx1.recv().await.unwrap().contains("hello"));
        assert!(rx2.recv().await.unwrap().contains("hello"));
        assert!(rx1.try_recv().is_err(), "exactly one copy per listener");
    }

    #[tokio::test]
    async fn test_broadcast_does_not_cross_rooms() {
        let registry = RoomRegistry::new();
        let (l1, _rx1) = listener("c1", 8);
        let (l2, mut rx2) = listener("c2", 8);

        let room1 = registry.join("s1", l1);
        registry.join("s2", l2);

        room1.broadcast(&error_message("only-s1"));
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_for_that_listener_only() {
        let registry = RoomRegistry::new();
        let (slow, mut slow_rx) = listener("slow", 2);
        let (fast, mut fast_rx) = listener("fast", 16);

        let room = registry.join("s1", slow);
        registry.join("s1", fast);

        for i in 0..10 {
            room.broadcast(&error_message(&format!("m{i}")));
        }

        let mut fast_count = 0;
        while fast_rx.try_recv().is_ok() {
            fast_count += 1;
        }
        let mut slow_count = 0;
        while slow_rx.try_recv().is_ok() {
            slow_count += 1;
        }

        assert_eq!(fast_count, 10, "fast listener sees everything");
        assert_eq!(slow_count, 2, "slow listener capped at its queue depth");
    }

    #[tokio::test]
    async fn test_closed_listener_is_pruned() {
        let registry = RoomRegistry::new();
        let (l1, rx1) = listener("c1", 8);
        let (l2, _rx2) = listener("c2", 8);

        let room = registry.join("s1", l1);
        registry.join("s1", l2);
        drop(rx1);

        let outcome = room.broadcast(&error_message("x"));
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.disconnected, 1);
        assert_eq!(room.listener_count(), 1);
    }

    #[tokio::test]
    async fn test_room_destroyed_when_last_listener_leaves() {
        let registry = RoomRegistry::new();
        let (l1, _rx1) = listener("c1", 8);
        registry.join("s1", l1);
        assert_eq!(registry.room_count(), 1);

        assert!(registry.leave("s1", "c1"));
        assert_eq!(registry.room_count(), 0);
        assert!(registry.get("s1").is_none());
    }

    #[tokio::test]
    async fn test_end_session_removes_room() {
        let registry = RoomRegistry::new();
        let (l1, _rx1) = listener("c1", 8);
        registry.join("s1", l1);

        let room = registry.end_session("s1").unwrap();
        assert_eq!(room.listener_count(), 1);
        assert!(registry.get("s1").is_none());
        assert!(registry.end_session("s1").is_none());
    }

    #[tokio::test]
    async fn test_close_connections_cancels_every_listener() {
        let registry = RoomRegistry::new();
        let (tx1, _rx1) = mpsc::channel(8);
        let (tx2, _rx2) = mpsc::channel(8);
        let cancel1 = CancellationToken::new();
        let cancel2 = CancellationToken::new();

        let room = registry.join(
            "s1",
            ListenerHandle::new("c1".to_string(), tx1, cancel1.clone()),
        );
        registry.join(
            "s1",
            ListenerHandle::new("c2".to_string(), tx2, cancel2.clone()),
        );

        room.close_connections();
        assert!(cancel1.is_cancelled());
        assert!(cancel2.is_cancelled());
    }

    #[tokio::test]
    async fn test_bind_participant() {
        let registry = RoomRegistry::new();
        let (l1, _rx1) = listener("c1", 8);
        let room = registry.join("s1", l1);

        room.bind_participant("c1", "p9");
        let listeners = room.listeners.read();
        assert_eq!(
            listeners.get("c1").unwrap().participant_id.as_deref(),
            Some("p9")
        );
    }
}
