//! Translation fan-out: one emitted sentence becomes text in every language
//! the room currently needs, plus synthesized audio for the subset of
//! listeners who asked for voice.
//!
//! Cost pruning: a session may declare many languages, but only the
//! languages of currently connected participants are translated
//! (`need_text`) and only those with a voice preference are synthesized
//! (`need_voice`). Translation failures degrade to passthrough of the
//! source text; synthesis failures drop the audio event for that language
//! only. Persistence happens per translated row, off the broadcast path.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::core::cache::SynthesisCache;
use crate::core::languages;
use crate::core::rooms::{
    AudioSynthesizedPayload, RoomRegistry, ServerMessage, TranslationPayload,
};
use crate::core::speaker::SentenceEvent;
use crate::core::translate::Translator;
use crate::core::tts::SpeechSynthesizer;
use crate::store::{ParticipantStore, PreferredOutput, TranslationRecord, TranslationStore};

/// Deadline for a single translation call, including its retries.
const TRANSLATION_TIMEOUT: Duration = Duration::from_secs(10);

/// One translated language, with whether the provider actually succeeded.
struct TranslatedText {
    language: String,
    text: String,
    failed: bool,
}

/// Fans one sentence out to translation, synthesis, broadcast and
/// persistence. Constructed once at startup.
pub struct TranslationFanout {
    participants: Arc<dyn ParticipantStore>,
    translations: Arc<dyn TranslationStore>,
    translator: Arc<dyn Translator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    cache: Arc<SynthesisCache>,
    rooms: Arc<RoomRegistry>,
}

impl TranslationFanout {
    pub fn new(
        participants: Arc<dyn ParticipantStore>,
        translations: Arc<dyn TranslationStore>,
        translator: Arc<dyn Translator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        cache: Arc<SynthesisCache>,
        rooms: Arc<RoomRegistry>,
    ) -> Self {
        Self {
            participants,
            translations,
            translator,
            synthesizer,
            cache,
            rooms,
        }
    }

    /// Processes one sentence end to end. Infallible by design: every
    /// failure mode degrades (passthrough text, omitted audio) rather than
    /// surfacing to the speaker pipeline.
    pub async fn handle_sentence(&self, sentence: &SentenceEvent) {
        let participants = match self.participants.list_connected(&sentence.session_id).await {
            Ok(participants) => participants,
            Err(e) => {
                warn!(
                    session_id = %sentence.session_id,
                    error = %e,
                    "participant lookup failed, skipping fan-out"
                );
                return;
            }
        };

        if participants.is_empty() {
            debug!(
                session_id = %sentence.session_id,
                "no connected participants, skipping fan-out"
            );
            return;
        }

        // BTreeSet for deterministic fan-out order in logs and tests.
        let need_text: BTreeSet<String> =
            participants.iter().map(|p| p.language.clone()).collect();
        let need_voice: BTreeSet<String> = participants
            .iter()
            .filter(|p| p.preferred_output == PreferredOutput::Voice)
            .map(|p| p.language.clone())
            .collect();

        debug!(
            session_id = %sentence.session_id,
            text_languages = need_text.len(),
            voice_languages = need_voice.len(),
            "fanning out sentence"
        );

        let translated = self.translate_all(sentence, &need_text).await;
        let error_count = translated.iter().filter(|t| t.failed).count() as u32;

        let translations_map: HashMap<String, String> = translated
            .iter()
            .map(|t| (t.language.clone(), t.text.clone()))
            .collect();

        self.broadcast(
            &sentence.session_id,
            &ServerMessage::Translation {
                data: TranslationPayload {
                    session_id: sentence.session_id.clone(),
                    participant_id: sentence.participant_id.clone(),
                    speaker_name: sentence.speaker_name.clone(),
                    original_text: sentence.text.clone(),
                    original_language: sentence.source_language.clone(),
                    translations: translations_map.clone(),
                    timestamp: sentence.emitted_at,
                    has_errors: error_count > 0,
                    error_count,
                },
            },
        );

        self.synthesize_all(sentence, &need_voice, &translations_map)
            .await;

        self.persist_all(sentence, &translated).await;
    }

    /// Translates into every `need_text` language in parallel. A failed or
    /// timed-out call degrades to the original text.
    async fn translate_all(
        &self,
        sentence: &SentenceEvent,
        need_text: &BTreeSet<String>,
    ) -> Vec<TranslatedText> {
        let tasks = need_text.iter().map(|language| {
            let translator = self.translator.clone();
            let text = sentence.text.clone();
            let source = sentence.source_language.clone();
            let language = language.clone();
            async move {
                if languages::same_language(&source, &language) {
                    return TranslatedText {
                        language,
                        text,
                        failed: false,
                    };
                }

                let result = tokio::time::timeout(
                    TRANSLATION_TIMEOUT,
                    translator.translate(&text, &source, &language),
                )
                .await;

                match result {
                    Ok(Ok(translated)) => TranslatedText {
                        language,
                        text: translated,
                        failed: false,
                    },
                    Ok(Err(e)) => {
                        warn!(
                            target_language = %language,
                            error = %e,
                            "translation failed, passing source text through"
                        );
                        TranslatedText {
                            language,
                            text,
                            failed: true,
                        }
                    }
                    Err(_) => {
                        warn!(
                            target_language = %language,
                            "translation timed out, passing source text through"
                        );
                        TranslatedText {
                            language,
                            text,
                            failed: true,
                        }
                    }
                }
            }
        });

        join_all(tasks).await
    }

    /// Synthesizes each `need_voice` language in parallel, consulting the
    /// cache first. Each success broadcasts its own audio message; a failure
    /// drops the event for that language only.
    async fn synthesize_all(
        &self,
        sentence: &SentenceEvent,
        need_voice: &BTreeSet<String>,
        translations: &HashMap<String, String>,
    ) {
        let tasks = need_voice.iter().map(|language| {
            let synthesizer = self.synthesizer.clone();
            let cache = self.cache.clone();
            let language = language.clone();
            let text = translations
                .get(&language)
                .cloned()
                .unwrap_or_else(|| sentence.text.clone());
            async move {
                let voice_locale = languages::voice_locale_for(&language);

                if let Some(audio) = cache.get(&text, voice_locale) {
                    debug!(%language, "synthesis cache hit");
                    return Some((language, text, audio));
                }

                match synthesizer.synthesize(&text, &language, None).await {
                    Ok(audio) => {
                        cache.insert(&text, voice_locale, audio.clone());
                        Some((language, text, audio))
                    }
                    Err(e) => {
                        warn!(
                            %language,
                            error = %e,
                            "synthesis failed, omitting audio for language"
                        );
                        None
                    }
                }
            }
        });

        for synthesized in join_all(tasks).await.into_iter().flatten() {
            let (language, text, audio) = synthesized;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&audio);
            self.broadcast(
                &sentence.session_id,
                &ServerMessage::AudioSynthesized {
                    data: AudioSynthesizedPayload {
                        language,
                        audio_content: encoded,
                        participant_id: sentence.participant_id.clone(),
                        speaker_name: sentence.speaker_name.clone(),
                        text,
                        timestamp: sentence.emitted_at,
                    },
                },
            );
        }
    }

    /// One row per target language, passthrough rows included.
    async fn persist_all(&self, sentence: &SentenceEvent, translated: &[TranslatedText]) {
        for entry in translated {
            let record = TranslationRecord {
                session_id: sentence.session_id.clone(),
                participant_id: sentence.participant_id.clone(),
                original_text: sentence.text.clone(),
                original_language: sentence.source_language.clone(),
                target_language: entry.language.clone(),
                translated_text: entry.text.clone(),
                confidence: sentence.confidence,
                timestamp: sentence.emitted_at,
            };
            if let Err(e) = self.translations.append(record).await {
                warn!(
                    session_id = %sentence.session_id,
                    target_language = %entry.language,
                    error = %e,
                    "failed to persist translation row"
                );
            }
        }
    }

    fn broadcast(&self, session_id: &str, message: &ServerMessage) {
        match self.rooms.get(session_id) {
            Some(room) => {
                let outcome = room.broadcast(message);
                debug!(
                    session_id,
                    delivered = outcome.delivered,
                    dropped = outcome.dropped,
                    "fan-out broadcast"
                );
            }
            None => {
                info!(session_id, "room gone before fan-out broadcast");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use crate::core::now_millis;
    use crate::core::rooms::ListenerHandle;
    use crate::core::translate::TranslateError;
    use crate::core::tts::TtsError;
    use crate::store::{
        MemoryParticipantStore, MemoryTranslationStore, Participant, Role,
    };

    /// Translator that uppercases, records calls, and can be told to fail.
    struct FakeTranslator {
        calls: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Translator for FakeTranslator {
        async fn translate(
            &self,
            text: &str,
            from: &str,
            to: &str,
        ) -> Result<String, TranslateError> {
            self.calls.lock().push((from.to_string(), to.to_string()));
            if self.fail {
                return Err(TranslateError::ApiError {
                    status: 403,
                    message: "denied".into(),
                });
            }
            Ok(format!("[{to}] {text}"))
        }
    }

    struct FakeSynthesizer {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl SpeechSynthesizer for FakeSynthesizer {
        async fn synthesize(
            &self,
            _text: &str,
            language: &str,
            _voice: Option<&str>,
        ) -> Result<Bytes, TtsError> {
            self.calls.lock().push(language.to_string());
            if self.fail {
                return Err(TtsError::ApiError {
                    status: 400,
                    message: "bad voice".into(),
                });
            }
            Ok(Bytes::from_static(b"mp3-bytes"))
        }
    }

    struct Fixture {
        fanout: TranslationFanout,
        participants: Arc<MemoryParticipantStore>,
        translations: Arc<MemoryTranslationStore>,
        translator: Arc<FakeTranslator>,
        synthesizer: Arc<FakeSynthesizer>,
        rooms: Arc<RoomRegistry>,
        cache: Arc<SynthesisCache>,
    }

    fn fixture(translate_fails: bool, synth_fails: bool) -> Fixture {
        let participants = Arc::new(MemoryParticipantStore::new());
        let translations = Arc::new(MemoryTranslationStore::new());
        let translator = Arc::new(FakeTranslator {
            calls: Mutex::new(Vec::new()),
            fail: translate_fails,
        });
        let synthesizer = Arc::new(FakeSynthesizer {
            calls: Mutex::new(Vec::new()),
            fail: synth_fails,
        });
        let rooms = Arc::new(RoomRegistry::new());
        let cache = Arc::new(SynthesisCache::new());

        let fanout = TranslationFanout::new(
            participants.clone(),
            translations.clone(),
            translator.clone(),
            synthesizer.clone(),
            cache.clone(),
            rooms.clone(),
        );

        Fixture {
            fanout,
            participants,
            translations,
            translator,
            synthesizer,
            rooms,
            cache,
        }
    }

    async fn add_participant(
        fixture: &Fixture,
        id: &str,
        language: &str,
        output: PreferredOutput,
    ) {
        fixture.participants.insert(Participant {
            participant_id: id.to_string(),
            session_id: "s1".to_string(),
            name: format!("name-{id}"),
            role: Role::Participant,
            language: language.to_string(),
            preferred_output: output,
            is_speaking: false,
            hand_raised: false,
        });
        fixture
            .participants
            .set_connected(id, true)
            .await
            .unwrap();
    }

    fn join_listener(fixture: &Fixture, connection_id: &str) -> mpsc::Receiver<Arc<str>> {
        let (tx, rx) = mpsc::channel(32);
        fixture.rooms.join(
            "s1",
            ListenerHandle::new(
                connection_id.to_string(),
                tx,
                tokio_util::sync::CancellationToken::new(),
            ),
        );
        rx
    }

    fn sentence(text: &str) -> SentenceEvent {
        SentenceEvent {
            text: text.to_string(),
            source_language: "English".to_string(),
            participant_id: "p-speaker".to_string(),
            speaker_name: "Ada".to_string(),
            session_id: "s1".to_string(),
            confidence: 0.9,
            emitted_at: now_millis(),
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(json) = rx.try_recv() {
            out.push(serde_json::from_str(&json).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_multi_language_fan_out() {
        let fixture = fixture(false, false);
        add_participant(&fixture, "a", "English", PreferredOutput::Text).await;
        add_participant(&fixture, "b", "Spanish", PreferredOutput::Voice).await;
        add_participant(&fixture, "c", "French", PreferredOutput::Voice).await;
        let mut rx = join_listener(&fixture, "c1");

        fixture.fanout.handle_sentence(&sentence("Good morning.")).await;

        let messages = drain(&mut rx);
        let translation = messages
            .iter()
            .find(|m| m["type"] == "translation")
            .expect("one translation message");
        let translations = translation["data"]["translations"].as_object().unwrap();
        assert_eq!(translations.len(), 3);
        assert_eq!(translations["English"], "Good morning.");
        assert_eq!(translations["Spanish"], "[Spanish] Good morning.");

        let audio_languages: BTreeSet<String> = messages
            .iter()
            .filter(|m| m["type"] == "audio-synthesized")
            .map(|m| m["data"]["language"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            audio_languages,
            BTreeSet::from(["Spanish".to_string(), "French".to_string()]),
            "voice only for the voice-preferring languages"
        );
    }

    #[tokio::test]
    async fn test_fan_out_minimality() {
        let fixture = fixture(false, false);
        add_participant(&fixture, "a", "English", PreferredOutput::Text).await;
        add_participant(&fixture, "b", "Spanish", PreferredOutput::Text).await;
        let _rx = join_listener(&fixture, "c1");

        fixture.fanout.handle_sentence(&sentence("Hello.")).await;

        // English is the source: passthrough, no provider call.
        let translator_calls = fixture.translator.calls.lock();
        assert_eq!(translator_calls.len(), 1);
        assert_eq!(translator_calls[0].1, "Spanish");

        // Nobody asked for voice: no synthesis at all.
        assert!(fixture.synthesizer.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_translation_failure_degrades_to_passthrough() {
        let fixture = fixture(true, false);
        add_participant(&fixture, "b", "Spanish", PreferredOutput::Text).await;
        let mut rx = join_listener(&fixture, "c1");

        fixture.fanout.handle_sentence(&sentence("Hello there.")).await;

        let messages = drain(&mut rx);
        let translation = &messages[0];
        assert_eq!(translation["data"]["translations"]["Spanish"], "Hello there.");
        assert_eq!(translation["data"]["hasErrors"], true);
        assert_eq!(translation["data"]["errorCount"], 1);

        // Passthrough rows are persisted too.
        let rows = fixture.translations.records_for_session("s1");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].translated_text, "Hello there.");
    }

    #[tokio::test]
    async fn test_synthesis_failure_omits_audio_only() {
        let fixture = fixture(false, true);
        add_participant(&fixture, "b", "Spanish", PreferredOutput::Voice).await;
        let mut rx = join_listener(&fixture, "c1");

        fixture.fanout.handle_sentence(&sentence("Hello.")).await;

        let messages = drain(&mut rx);
        assert!(messages.iter().any(|m| m["type"] == "translation"));
        assert!(
            !messages.iter().any(|m| m["type"] == "audio-synthesized"),
            "failed synthesis produces no audio event"
        );
    }

    #[tokio::test]
    async fn test_synthesis_cache_round_trip() {
        let fixture = fixture(false, false);
        add_participant(&fixture, "b", "Spanish", PreferredOutput::Voice).await;
        let _rx = join_listener(&fixture, "c1");

        fixture.fanout.handle_sentence(&sentence("Hello.")).await;
        fixture.fanout.handle_sentence(&sentence("Hello.")).await;

        assert_eq!(
            fixture.synthesizer.calls.lock().len(),
            1,
            "second sentence served from cache"
        );
        let (hits, ..) = fixture.cache.metrics().snapshot();
        assert_eq!(hits, 1);
    }

    #[tokio::test]
    async fn test_persistence_one_row_per_language() {
        let fixture = fixture(false, false);
        add_participant(&fixture, "a", "English", PreferredOutput::Text).await;
        add_participant(&fixture, "b", "Spanish", PreferredOutput::Text).await;
        add_participant(&fixture, "c", "French", PreferredOutput::Text).await;
        let _rx = join_listener(&fixture, "c1");

        fixture.fanout.handle_sentence(&sentence("Hi everyone.")).await;

        let rows = fixture.translations.records_for_session("s1");
        assert_eq!(rows.len(), 3);
        let languages: BTreeSet<String> =
            rows.iter().map(|r| r.target_language.clone()).collect();
        assert_eq!(
            languages,
            BTreeSet::from([
                "English".to_string(),
                "Spanish".to_string(),
                "French".to_string()
            ])
        );
    }

    #[tokio::test]
    async fn test_no_participants_no_work() {
        let fixture = fixture(false, false);
        let _rx = join_listener(&fixture, "c1");

        fixture.fanout.handle_sentence(&sentence("Hello.")).await;

        assert!(fixture.translator.calls.lock().is_empty());
        assert!(fixture.translations.is_empty());
    }

    #[tokio::test]
    async fn test_shared_language_deduplicated() {
        let fixture = fixture(false, false);
        add_participant(&fixture, "a", "Spanish", PreferredOutput::Text).await;
        add_participant(&fixture, "b", "Spanish", PreferredOutput::Text).await;
        let _rx = join_listener(&fixture, "c1");

        fixture.fanout.handle_sentence(&sentence("Hello.")).await;

        assert_eq!(
            fixture.translator.calls.lock().len(),
            1,
            "two listeners sharing a language cost one translation"
        );
    }
}
