//! The per-speaker streaming-transcription state machine.
//!
//! Each speaker owns one worker task driven by three inputs: audio frames
//! from the transport, events from the live STT stream, and timers. The
//! worker is the single writer of all speaker state, so the sentence
//! accumulator needs no locks.
//!
//! ```text
//! IDLE ──start()──▶ STARTING ──(stream opened)──▶ ACTIVE
//! ACTIVE ──(age ≥ 4 min)──▶ ROTATING ──(new stream open, old drained)──▶ ACTIVE
//! ACTIVE/ROTATING ──stop()/error(permanent)──▶ STOPPED
//! ACTIVE ──error(transient)──▶ IDLE ──(≤5 s since last activity)──▶ STARTING
//! ```
//!
//! The provider closes streams after ~5 minutes. Rotation opens a successor
//! at the 4 minute mark, moves subsequent frames onto it, and leaves the old
//! stream open for 2 more seconds to drain its last finals. Finals arriving
//! on the new stream inside that window are buffered and replayed once the
//! old stream closes, keeping one speaker's sentences in order across the
//! seam; the drain is best-effort and new-stream interims pass through live.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::core::languages;
use crate::core::now_millis;
use crate::core::retry::{classify, ErrorClass};
use crate::core::stt::{
    SttError, SttEvent, SttStreamConfig, SttStreamHandle, StreamingStt, TranscriptFragment,
};
use crate::core::vad::EnergyVad;

use super::aggregator::{AggregatedSentence, SentenceAggregator};
use super::{InterimEvent, SentenceEvent, SpeakerContext, SpeakerEvents};

/// Stream age at which rotation begins, comfortably before the provider's
/// ~5 minute session cap.
pub const ROTATION_AGE: Duration = Duration::from_secs(4 * 60);

/// How often the worker checks whether rotation is due.
pub const ROTATION_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// How long the old stream stays open after rotation to drain finals.
pub const DRAIN_WINDOW: Duration = Duration::from_secs(2);

/// Pause before reopening after a transient stream failure.
const RESTART_DELAY: Duration = Duration::from_millis(500);

/// A restart only happens if audio arrived this recently.
const RESTART_ACTIVITY_WINDOW: Duration = Duration::from_secs(5);

/// Frames buffered while the stream is STARTING. Oldest frames fall off
/// first once the ring is full.
const PENDING_RING_CAPACITY: usize = 64;

/// Command channel depth between transport and worker.
const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Provider-facing configuration of one speaker stream.
#[derive(Debug, Clone)]
pub struct SpeakerStreamConfig {
    /// Credential string handed to the STT provider.
    pub credentials: String,
    /// Recognition model identifier.
    pub model: String,
    /// PCM sample rate of incoming frames.
    pub sample_rate: u32,
    /// Display name of the speaker's language.
    pub language: String,
}

impl SpeakerStreamConfig {
    fn to_stt_config(&self) -> SttStreamConfig {
        SttStreamConfig {
            credentials: self.credentials.clone(),
            sample_rate: self.sample_rate,
            primary_language: languages::locale_for(&self.language).to_string(),
            alternative_languages: Vec::new(),
            model: self.model.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Starting,
    Active,
    Rotating,
    Stopped,
}

enum Command {
    Frame(Bytes),
    Configure { sample_rate: u32, language: String },
    Stop,
}

/// Handle to a running speaker stream. Cloneable across the transport and
/// the manager; the worker lives until `stop()` or the handle set drops.
pub struct SpeakerStream {
    context: SpeakerContext,
    cmd_tx: mpsc::Sender<Command>,
    last_activity: Arc<Mutex<Instant>>,
}

impl SpeakerStream {
    /// Spawns the worker and returns the handle plus the event receivers.
    pub fn spawn(
        context: SpeakerContext,
        config: SpeakerStreamConfig,
        provider: Arc<dyn StreamingStt>,
    ) -> (Self, SpeakerEvents) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (sentence_tx, sentences) = mpsc::unbounded_channel();
        let (interim_tx, interims) = mpsc::unbounded_channel();
        let (error_tx, errors) = mpsc::unbounded_channel();
        let last_activity = Arc::new(Mutex::new(Instant::now()));

        let worker = Worker {
            context: context.clone(),
            config,
            provider,
            cmd_rx,
            sentence_tx,
            interim_tx,
            error_tx,
            last_activity: last_activity.clone(),
            state: State::Idle,
            vad: EnergyVad::new(),
            aggregator: SentenceAggregator::new(),
            pending: std::collections::VecDeque::new(),
            live: None,
            draining: None,
            drain_deadline: None,
            rotation_finals: Vec::new(),
            opening: None,
            opening_for_rotation: false,
            restart_at: None,
            restart_disabled: false,
            frames_forwarded: 0,
        };
        tokio::spawn(worker.run());

        (
            Self {
                context,
                cmd_tx,
                last_activity,
            },
            SpeakerEvents {
                sentences,
                interims,
                errors,
            },
        )
    }

    pub fn context(&self) -> &SpeakerContext {
        &self.context
    }

    /// Feeds one PCM frame. Non-blocking: if the worker's queue is full the
    /// frame is dropped, which only happens when a client floods far beyond
    /// the ingress rate limit.
    pub fn write_frame(&self, frame: Bytes) {
        *self.last_activity.lock() = Instant::now();
        if let Err(mpsc::error::TrySendError::Full(_)) = self.cmd_tx.try_send(Command::Frame(frame))
        {
            debug!(
                participant_id = %self.context.participant_id,
                "speaker command queue full, dropping frame"
            );
        }
    }

    /// Applies a new audio configuration; a change restarts the underlying
    /// STT stream, a repeat of the current config is a no-op.
    pub async fn configure(&self, sample_rate: u32, language: String) {
        let _ = self
            .cmd_tx
            .send(Command::Configure {
                sample_rate,
                language,
            })
            .await;
    }

    /// Stops the stream: cancels the provider stream, flushes the sentence
    /// accumulator, and ends the worker.
    pub async fn stop(&self) {
        let _ = self.cmd_tx.send(Command::Stop).await;
    }

    /// Time since the last audio frame; drives the inactivity reaper.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }
}

struct Worker {
    context: SpeakerContext,
    config: SpeakerStreamConfig,
    provider: Arc<dyn StreamingStt>,
    cmd_rx: mpsc::Receiver<Command>,
    sentence_tx: mpsc::UnboundedSender<SentenceEvent>,
    interim_tx: mpsc::UnboundedSender<InterimEvent>,
    error_tx: mpsc::UnboundedSender<SttError>,
    last_activity: Arc<Mutex<Instant>>,

    state: State,
    vad: EnergyVad,
    aggregator: SentenceAggregator,
    /// Frames queued while STARTING, drained after the stream opens.
    pending: std::collections::VecDeque<Bytes>,
    live: Option<SttStreamHandle>,
    /// Old stream during rotation, kept open to drain its finals.
    draining: Option<SttStreamHandle>,
    drain_deadline: Option<Instant>,
    /// Finals from the new stream buffered until the old stream closes.
    rotation_finals: Vec<TranscriptFragment>,
    opening: Option<oneshot::Receiver<Result<SttStreamHandle, SttError>>>,
    opening_for_rotation: bool,
    restart_at: Option<Instant>,
    restart_disabled: bool,
    frames_forwarded: u64,
}

impl Worker {
    async fn run(mut self) {
        let mut rotation_check = tokio::time::interval(ROTATION_CHECK_INTERVAL);
        rotation_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let sentence_deadline = self.aggregator.deadline();
            let drain_deadline = self.drain_deadline;
            let restart_at = self.restart_at;

            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Frame(frame)) => self.on_frame(frame).await,
                        Some(Command::Configure { sample_rate, language }) => {
                            self.on_configure(sample_rate, language).await;
                        }
                        Some(Command::Stop) | None => {
                            self.shutdown().await;
                            break;
                        }
                    }
                }

                result = async { self.opening.as_mut().expect("guarded").await },
                    if self.opening.is_some() =>
                {
                    self.opening = None;
                    let result = result.unwrap_or_else(|_| {
                        Err(SttError::ConnectionFailed("open task dropped".to_string()))
                    });
                    self.on_opened(result).await;
                }

                event = async { self.live.as_mut().expect("guarded").next_event().await },
                    if self.live.is_some() =>
                {
                    self.on_live_event(event).await;
                }

                event = async { self.draining.as_mut().expect("guarded").next_event().await },
                    if self.draining.is_some() =>
                {
                    self.on_drain_event(event);
                }

                _ = tokio::time::sleep_until(drain_deadline.unwrap_or_else(Instant::now)),
                    if drain_deadline.is_some() =>
                {
                    self.finish_drain();
                }

                _ = rotation_check.tick() => {
                    self.maybe_rotate();
                }

                _ = tokio::time::sleep_until(sentence_deadline.unwrap_or_else(Instant::now)),
                    if sentence_deadline.is_some() =>
                {
                    self.flush_sentence();
                }

                _ = tokio::time::sleep_until(restart_at.unwrap_or_else(Instant::now)),
                    if restart_at.is_some() =>
                {
                    self.restart_at = None;
                    self.try_restart();
                }
            }

            if self.state == State::Stopped {
                self.shutdown().await;
                break;
            }
        }

        debug!(
            participant_id = %self.context.participant_id,
            frames = self.frames_forwarded,
            "speaker worker terminated"
        );
    }

    async fn on_frame(&mut self, frame: Bytes) {
        match self.state {
            State::Stopped => {}
            State::Idle => {
                // Lazy start on the first frame.
                self.push_pending(frame);
                self.begin_open(false);
            }
            State::Starting => self.push_pending(frame),
            State::Active | State::Rotating => self.forward_frame(frame).await,
        }
    }

    fn push_pending(&mut self, frame: Bytes) {
        if self.pending.len() >= PENDING_RING_CAPACITY {
            self.pending.pop_front();
        }
        self.pending.push_back(frame);
    }

    async fn forward_frame(&mut self, frame: Bytes) {
        if !self.vad.should_forward(&frame) {
            return;
        }
        if let Some(live) = &self.live {
            if let Err(e) = live.send_audio(frame).await {
                warn!(
                    participant_id = %self.context.participant_id,
                    error = %e,
                    "failed to forward frame to STT stream"
                );
                return;
            }
            self.frames_forwarded += 1;
        }
    }

    async fn on_configure(&mut self, sample_rate: u32, language: String) {
        if self.config.sample_rate == sample_rate && self.config.language == language {
            return;
        }

        info!(
            participant_id = %self.context.participant_id,
            sample_rate,
            language = %language,
            "speaker reconfigured, restarting STT stream"
        );

        self.config.sample_rate = sample_rate;
        self.config.language = language;
        self.vad.reset();

        // Drop any in-flight stream and reopen with the new config.
        self.live = None;
        self.draining = None;
        self.drain_deadline = None;
        self.rotation_finals.clear();
        self.opening = None;
        self.opening_for_rotation = false;

        if self.state != State::Stopped {
            self.state = State::Idle;
            self.begin_open(false);
        }
    }

    fn begin_open(&mut self, for_rotation: bool) {
        if self.restart_disabled {
            return;
        }

        let (tx, rx) = oneshot::channel();
        let provider = self.provider.clone();
        let stt_config = self.config.to_stt_config();
        tokio::spawn(async move {
            let _ = tx.send(provider.open_stream(&stt_config).await);
        });

        self.opening = Some(rx);
        self.opening_for_rotation = for_rotation;
        if !for_rotation {
            self.state = State::Starting;
        }
    }

    async fn on_opened(&mut self, result: Result<SttStreamHandle, SttError>) {
        let for_rotation = std::mem::take(&mut self.opening_for_rotation);

        match result {
            Ok(handle) => {
                if for_rotation {
                    if self.state == State::Stopped {
                        return;
                    }
                    // Old stream drains while the new one takes the frames.
                    // If it already died mid-rotation, the new stream simply
                    // becomes the live one.
                    self.draining = self.live.take();
                    self.drain_deadline = self
                        .draining
                        .as_ref()
                        .map(|_| Instant::now() + DRAIN_WINDOW);
                    self.live = Some(handle);
                    self.restart_at = None;
                    self.state = if self.draining.is_some() {
                        State::Rotating
                    } else {
                        State::Active
                    };
                    info!(
                        participant_id = %self.context.participant_id,
                        "rotated STT stream, draining predecessor"
                    );
                } else {
                    self.live = Some(handle);
                    self.state = State::Active;
                    debug!(
                        participant_id = %self.context.participant_id,
                        pending = self.pending.len(),
                        "STT stream active, draining pending frames"
                    );
                    while let Some(frame) = self.pending.pop_front() {
                        self.forward_frame(frame).await;
                    }
                }
            }
            Err(e) => {
                let _ = self.error_tx.send(e.clone());
                if for_rotation {
                    // Keep the old stream; rotation retries on the next check.
                    warn!(
                        participant_id = %self.context.participant_id,
                        error = %e,
                        "rotation open failed, keeping current stream"
                    );
                    if self.state == State::Rotating {
                        self.state = State::Active;
                    }
                } else {
                    self.handle_stream_failure(e);
                }
            }
        }
    }

    async fn on_live_event(&mut self, event: Option<SttEvent>) {
        match event {
            Some(SttEvent::Transcript(fragment)) => {
                if fragment.is_final {
                    if self.draining.is_some() {
                        // Hold new-stream finals until the old stream drains
                        // so one speaker's sentences stay in order.
                        self.rotation_finals.push(fragment);
                    } else {
                        self.accept_final(fragment);
                    }
                } else {
                    self.emit_interim(fragment.text);
                }
            }
            Some(SttEvent::Error(e)) => {
                error!(
                    participant_id = %self.context.participant_id,
                    error = %e,
                    "STT stream error"
                );
                let _ = self.error_tx.send(e.clone());
                self.live = None;
                self.handle_stream_failure(e);
            }
            Some(SttEvent::Ended) | None => {
                debug!(
                    participant_id = %self.context.participant_id,
                    "STT stream ended"
                );
                self.live = None;
                if self.state == State::Active || self.state == State::Rotating {
                    self.state = State::Idle;
                    self.restart_at = Some(Instant::now() + RESTART_DELAY);
                }
            }
        }
    }

    fn on_drain_event(&mut self, event: Option<SttEvent>) {
        match event {
            Some(SttEvent::Transcript(fragment)) if fragment.is_final => {
                self.accept_final(fragment);
            }
            // Stale interims from the outgoing stream are not re-broadcast.
            Some(SttEvent::Transcript(_)) => {}
            Some(SttEvent::Error(_)) | Some(SttEvent::Ended) | None => {
                self.finish_drain();
            }
        }
    }

    fn finish_drain(&mut self) {
        self.draining = None;
        self.drain_deadline = None;
        let buffered = std::mem::take(&mut self.rotation_finals);
        for fragment in buffered {
            self.accept_final(fragment);
        }
        if self.state == State::Rotating {
            self.state = State::Active;
        }
        debug!(
            participant_id = %self.context.participant_id,
            "rotation drain complete"
        );
    }

    fn maybe_rotate(&mut self) {
        if self.state != State::Active || self.opening.is_some() {
            return;
        }
        let Some(live) = &self.live else {
            return;
        };
        if live.age() < ROTATION_AGE {
            return;
        }

        info!(
            participant_id = %self.context.participant_id,
            age_secs = live.age().as_secs(),
            "STT stream approaching provider cap, rotating"
        );
        self.state = State::Rotating;
        self.begin_open(true);
    }

    fn handle_stream_failure(&mut self, error: SttError) {
        if error.is_quota() {
            // Quota exhaustion would turn automatic restarts into a tight
            // retry loop; disable the speaker instead.
            warn!(
                participant_id = %self.context.participant_id,
                "quota exhausted, disabling speaker stream restarts"
            );
            self.restart_disabled = true;
            self.state = State::Stopped;
            return;
        }

        match classify(&error) {
            ErrorClass::Transient => {
                self.state = State::Idle;
                self.restart_at = Some(Instant::now() + RESTART_DELAY);
            }
            ErrorClass::Permanent => {
                self.state = State::Stopped;
            }
        }
    }

    fn try_restart(&mut self) {
        if self.state != State::Idle || self.restart_disabled {
            return;
        }
        if self.last_activity.lock().elapsed() > RESTART_ACTIVITY_WINDOW {
            debug!(
                participant_id = %self.context.participant_id,
                "skipping restart, no recent audio"
            );
            return;
        }
        info!(
            participant_id = %self.context.participant_id,
            "restarting STT stream after transient failure"
        );
        self.begin_open(false);
    }

    fn accept_final(&mut self, fragment: TranscriptFragment) {
        if let Some(sentence) = self.aggregator.push_final(&fragment) {
            self.emit_sentence(sentence);
        }
    }

    fn flush_sentence(&mut self) {
        if let Some(sentence) = self.aggregator.flush() {
            self.emit_sentence(sentence);
        }
    }

    fn emit_sentence(&mut self, sentence: AggregatedSentence) {
        let source_language = languages::display_name_for(&sentence.language_code)
            .map(str::to_string)
            .unwrap_or_else(|| self.config.language.clone());

        let event = SentenceEvent {
            text: sentence.text,
            source_language,
            participant_id: self.context.participant_id.clone(),
            speaker_name: self.context.speaker_name.clone(),
            session_id: self.context.session_id.clone(),
            confidence: sentence.confidence,
            emitted_at: now_millis(),
        };

        debug!(
            participant_id = %event.participant_id,
            chars = event.text.len(),
            confidence = event.confidence,
            "sentence emitted"
        );
        let _ = self.sentence_tx.send(event);
    }

    fn emit_interim(&mut self, text: String) {
        let _ = self.interim_tx.send(InterimEvent {
            text,
            participant_id: self.context.participant_id.clone(),
            speaker_name: self.context.speaker_name.clone(),
            session_id: self.context.session_id.clone(),
        });
    }

    async fn shutdown(&mut self) {
        self.flush_sentence();
        self.live = None;
        self.draining = None;
        self.drain_deadline = None;
        self.rotation_finals.clear();
        self.opening = None;
        self.pending.clear();
        self.state = State::Stopped;
    }
}
