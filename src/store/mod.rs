//! Persistence collaborators consumed by the core as narrow interfaces.
//!
//! Signup, session CRUD and moderation live in a separate service; the
//! interpretation core only needs to look sessions and participants up,
//! flip a few runtime flags, and append translation rows. In-memory
//! implementations back tests and single-node deployments.

pub mod memory;

pub use memory::{MemoryParticipantStore, MemorySessionStore, MemoryTranslationStore};

use serde::{Deserialize, Serialize};

use crate::core::now_millis;

/// What a participant can do in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Participant,
    Guest,
}

/// How a participant wants to receive interpreted speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferredOutput {
    Voice,
    Text,
}

/// Immutable description of a live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub host_participant_id: String,
    /// Epoch milliseconds after which the room must be destroyed.
    pub expires_at: u64,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        now_millis() >= self.expires_at
    }
}

/// One person in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub participant_id: String,
    pub session_id: String,
    pub name: String,
    pub role: Role,
    /// Display name of the participant's language ("English", "Arabic").
    pub language: String,
    pub preferred_output: PreferredOutput,
    /// Permission to emit audio. True for hosts by construction on their
    /// first audio frame; granted by a host for everyone else.
    pub is_speaking: bool,
    pub hand_raised: bool,
}

impl Participant {
    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    /// Whether audio frames from this participant may reach transcription.
    pub fn may_speak(&self) -> bool {
        self.is_speaking || self.is_host()
    }
}

/// Append-only row persisted per target language per sentence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRecord {
    pub session_id: String,
    pub participant_id: String,
    pub original_text: String,
    pub original_language: String,
    pub target_language: String,
    pub translated_text: String,
    pub confidence: f32,
    pub timestamp: u64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Session lookup.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError>;
}

/// Participant lookup and the few runtime flags the core mutates.
#[async_trait::async_trait]
pub trait ParticipantStore: Send + Sync {
    async fn get_participant(
        &self,
        participant_id: &str,
    ) -> Result<Option<Participant>, StoreError>;

    /// Participants of the session currently holding a live connection.
    /// Drives the `need_text` / `need_voice` fan-out sets.
    async fn list_connected(&self, session_id: &str) -> Result<Vec<Participant>, StoreError>;

    /// Marks a participant's connection presence.
    async fn set_connected(&self, participant_id: &str, connected: bool) -> Result<(), StoreError>;

    /// Grants or revokes speaking permission.
    async fn set_speaking(&self, participant_id: &str, speaking: bool) -> Result<(), StoreError>;

    /// Records the hand-raise flag relayed through the room.
    async fn set_hand_raised(
        &self,
        participant_id: &str,
        hand_raised: bool,
    ) -> Result<(), StoreError>;
}

/// Translation persistence: append-only writes off the critical path,
/// plus post-hoc retrieval for transcript export.
#[async_trait::async_trait]
pub trait TranslationStore: Send + Sync {
    async fn append(&self, record: TranslationRecord) -> Result<(), StoreError>;

    async fn list_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<TranslationRecord>, StoreError>;
}
