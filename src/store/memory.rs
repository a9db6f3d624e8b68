//! In-memory store implementations for tests and single-node deployments.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use super::{
    Participant, Session, SessionStore, StoreError, ParticipantStore, TranslationRecord,
    TranslationStore,
};

/// Sessions held in a map; insertable from setup code.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Session) {
        self.sessions
            .write()
            .insert(session.session_id.clone(), session);
    }

    pub fn remove(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().get(session_id).cloned())
    }
}

/// Participants plus a connected-id set per session.
#[derive(Debug, Default)]
pub struct MemoryParticipantStore {
    participants: RwLock<HashMap<String, Participant>>,
    connected: RwLock<HashSet<String>>,
}

impl MemoryParticipantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, participant: Participant) {
        self.participants
            .write()
            .insert(participant.participant_id.clone(), participant);
    }
}

#[async_trait::async_trait]
impl ParticipantStore for MemoryParticipantStore {
    async fn get_participant(
        &self,
        participant_id: &str,
    ) -> Result<Option<Participant>, StoreError> {
        Ok(self.participants.read().get(participant_id).cloned())
    }

    async fn list_connected(&self, session_id: &str) -> Result<Vec<Participant>, StoreError> {
        let connected = self.connected.read();
        Ok(self
            .participants
            .read()
            .values()
            .filter(|p| p.session_id == session_id && connected.contains(&p.participant_id))
            .cloned()
            .collect())
    }

    async fn set_connected(&self, participant_id: &str, connected: bool) -> Result<(), StoreError> {
        if connected {
            self.connected.write().insert(participant_id.to_string());
        } else {
            self.connected.write().remove(participant_id);
        }
        Ok(())
    }

    async fn set_speaking(&self, participant_id: &str, speaking: bool) -> Result<(), StoreError> {
        match self.participants.write().get_mut(participant_id) {
            Some(participant) => {
                participant.is_speaking = speaking;
                Ok(())
            }
            None => Err(StoreError::NotFound(participant_id.to_string())),
        }
    }

    async fn set_hand_raised(
        &self,
        participant_id: &str,
        hand_raised: bool,
    ) -> Result<(), StoreError> {
        match self.participants.write().get_mut(participant_id) {
            Some(participant) => {
                participant.hand_raised = hand_raised;
                Ok(())
            }
            None => Err(StoreError::NotFound(participant_id.to_string())),
        }
    }
}

/// Translation rows appended to a vector; tests read them back.
#[derive(Debug, Default)]
pub struct MemoryTranslationStore {
    records: RwLock<Vec<TranslationRecord>>,
}

impl MemoryTranslationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records_for_session(&self, session_id: &str) -> Vec<TranslationRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait::async_trait]
impl TranslationStore for MemoryTranslationStore {
    async fn append(&self, record: TranslationRecord) -> Result<(), StoreError> {
        self.records.write().push(record);
        Ok(())
    }

    async fn list_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<TranslationRecord>, StoreError> {
        Ok(self.records_for_session(session_id))
    }
}
