//! Registry of speaker streams keyed by `(session, participant)`.
//!
//! The manager owns exactly one speaker stream per speaking participant,
//! wires its event channels into the translation fan-out and the room
//! fabric, and reaps streams that have gone quiet. Constructed once at
//! startup and passed to handlers explicitly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::fanout::TranslationFanout;
use crate::core::rooms::{InterimTranscriptPayload, RoomRegistry, ServerMessage};
use crate::core::stt::StreamingStt;

use super::stream::{SpeakerStream, SpeakerStreamConfig};
use super::{SpeakerContext, SpeakerEvents};

/// A stream with no audio for this long is destroyed.
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the reaper sweeps.
const REAPER_INTERVAL: Duration = Duration::from_secs(30);

type StreamKey = (String, String);

/// Provider facts every new speaker stream starts from.
#[derive(Debug, Clone)]
pub struct StreamDefaults {
    pub credentials: String,
    pub model: String,
}

pub struct StreamManager {
    streams: RwLock<HashMap<StreamKey, Arc<SpeakerStream>>>,
    provider: Arc<dyn StreamingStt>,
    fanout: Arc<TranslationFanout>,
    rooms: Arc<RoomRegistry>,
    defaults: StreamDefaults,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl StreamManager {
    pub fn new(
        provider: Arc<dyn StreamingStt>,
        fanout: Arc<TranslationFanout>,
        rooms: Arc<RoomRegistry>,
        defaults: StreamDefaults,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            streams: RwLock::new(HashMap::new()),
            provider,
            fanout,
            rooms,
            defaults,
            reaper: Mutex::new(None),
        });
        manager.start_reaper();
        manager
    }

    /// Returns the existing stream for the speaker or constructs one,
    /// wiring its events into fan-out and room broadcast.
    pub fn get_or_create(
        &self,
        context: SpeakerContext,
        sample_rate: u32,
        language: String,
    ) -> Arc<SpeakerStream> {
        let key = (context.session_id.clone(), context.participant_id.clone());

        if let Some(existing) = self.streams.read().get(&key) {
            return existing.clone();
        }

        let mut streams = self.streams.write();
        // Re-check under the write lock; two frames can race here.
        if let Some(existing) = streams.get(&key) {
            return existing.clone();
        }

        info!(
            session_id = %context.session_id,
            participant_id = %context.participant_id,
            "creating speaker stream"
        );

        let config = SpeakerStreamConfig {
            credentials: self.defaults.credentials.clone(),
            model: self.defaults.model.clone(),
            sample_rate,
            language,
        };
        let (stream, events) = SpeakerStream::spawn(context, config, self.provider.clone());
        let stream = Arc::new(stream);

        tokio::spawn(pump_events(
            events,
            self.fanout.clone(),
            self.rooms.clone(),
        ));

        streams.insert(key, stream.clone());
        stream
    }

    pub fn get(&self, session_id: &str, participant_id: &str) -> Option<Arc<SpeakerStream>> {
        self.streams
            .read()
            .get(&(session_id.to_string(), participant_id.to_string()))
            .cloned()
    }

    /// Stops and removes one speaker's stream.
    pub async fn stop_stream(&self, session_id: &str, participant_id: &str) {
        let removed = self
            .streams
            .write()
            .remove(&(session_id.to_string(), participant_id.to_string()));
        if let Some(stream) = removed {
            debug!(session_id, participant_id, "stopping speaker stream");
            stream.stop().await;
        }
    }

    /// Stops every stream of one session (session end).
    pub async fn stop_session(&self, session_id: &str) {
        let removed: Vec<Arc<SpeakerStream>> = {
            let mut streams = self.streams.write();
            let keys: Vec<StreamKey> = streams
                .keys()
                .filter(|(session, _)| session == session_id)
                .cloned()
                .collect();
            keys.iter().filter_map(|k| streams.remove(k)).collect()
        };

        for stream in removed {
            stream.stop().await;
        }
    }

    /// Stops everything; called on shutdown.
    pub async fn destroy(&self) {
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }

        let all: Vec<Arc<SpeakerStream>> = self.streams.write().drain().map(|(_, s)| s).collect();
        info!(streams = all.len(), "destroying stream manager");
        for stream in all {
            stream.stop().await;
        }
    }

    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }

    fn start_reaper(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAPER_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.reap_idle().await;
            }
        });
        *self.reaper.lock() = Some(handle);
    }

    async fn reap_idle(&self) {
        let idle: Vec<(StreamKey, Arc<SpeakerStream>)> = self
            .streams
            .read()
            .iter()
            .filter(|(_, stream)| stream.idle_for() > INACTIVITY_TIMEOUT)
            .map(|(key, stream)| (key.clone(), stream.clone()))
            .collect();

        if idle.is_empty() {
            return;
        }

        {
            let mut streams = self.streams.write();
            for (key, _) in &idle {
                streams.remove(key);
            }
        }

        for ((session_id, participant_id), stream) in idle {
            warn!(
                session_id = %session_id,
                participant_id = %participant_id,
                "reaping inactive speaker stream"
            );
            stream.stop().await;
        }
    }
}

/// Forwards one speaker's events for the lifetime of its stream: sentences
/// into the fan-out, interims to the room, errors to the log.
async fn pump_events(
    mut events: SpeakerEvents,
    fanout: Arc<TranslationFanout>,
    rooms: Arc<RoomRegistry>,
) {
    loop {
        tokio::select! {
            sentence = events.sentences.recv() => {
                match sentence {
                    Some(sentence) => fanout.handle_sentence(&sentence).await,
                    None => break,
                }
            }
            interim = events.interims.recv() => {
                let Some(interim) = interim else { break };
                if let Some(room) = rooms.get(&interim.session_id) {
                    room.broadcast(&ServerMessage::InterimTranscript {
                        data: InterimTranscriptPayload {
                            text: interim.text,
                            participant_id: interim.participant_id,
                            speaker_name: interim.speaker_name,
                            session_id: interim.session_id,
                        },
                    });
                }
            }
            error = events.errors.recv() => {
                let Some(error) = error else { break };
                warn!(error = %error, "speaker stream error");
            }
        }
    }
}
