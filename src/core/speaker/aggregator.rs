//! Sentence aggregation over finalized transcript fragments.
//!
//! Finals arrive as fragments ("Hello", "there", "friend.") and are joined
//! into emittable sentences. A sentence is emitted on whichever trigger
//! fires first:
//!
//! 1. the newest fragment ends with terminal punctuation and the buffer has
//!    at least [`MIN_TOKENS`] tokens,
//! 2. the buffer reaches [`MAX_TOKENS`] tokens (forward progress through an
//!    unpunctuated monologue),
//! 3. [`SENTENCE_SILENCE_THRESHOLD`] elapses after the last final with no
//!    successor (the owner polls [`deadline`](SentenceAggregator::deadline)
//!    and calls [`flush`](SentenceAggregator::flush)).
//!
//! Interims never enter the aggregator; they are live feedback only.

use tokio::time::Instant;

use crate::core::stt::TranscriptFragment;

/// Silence after the last final before the buffer is flushed.
pub const SENTENCE_SILENCE_THRESHOLD: std::time::Duration = std::time::Duration::from_millis(500);

/// Minimum tokens for the punctuation trigger.
pub const MIN_TOKENS: usize = 3;

/// Token ceiling that forces emission.
pub const MAX_TOKENS: usize = 20;

/// A finalized, emittable unit of transcribed speech.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedSentence {
    pub text: String,
    /// Locale the recognizer attributed the sentence to.
    pub language_code: String,
    /// Mean confidence over the contributing finals.
    pub confidence: f32,
}

#[derive(Debug, Default)]
pub struct SentenceAggregator {
    parts: Vec<String>,
    language_code: String,
    confidence_sum: f32,
    confidence_count: u32,
    deadline: Option<Instant>,
}

impl SentenceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a finalized fragment. Returns the sentence if a trigger
    /// fired, otherwise (re)arms the silence deadline.
    pub fn push_final(&mut self, fragment: &TranscriptFragment) -> Option<AggregatedSentence> {
        let text = fragment.text.trim();
        if text.is_empty() {
            return None;
        }

        self.parts.push(text.to_string());
        if fragment.confidence > 0.0 {
            self.confidence_sum += fragment.confidence;
            self.confidence_count += 1;
        }
        if !fragment.language_code.is_empty() {
            self.language_code = fragment.language_code.clone();
        }

        let tokens = self.token_count();
        let punctuated = ends_sentence(text);

        if (punctuated && tokens >= MIN_TOKENS) || tokens >= MAX_TOKENS {
            return self.flush();
        }

        self.deadline = Some(Instant::now() + SENTENCE_SILENCE_THRESHOLD);
        None
    }

    /// Emits whatever has accumulated; used by the silence timer and on
    /// speaker stop. Clears the buffer and cancels the deadline.
    pub fn flush(&mut self) -> Option<AggregatedSentence> {
        self.deadline = None;
        if self.parts.is_empty() {
            return None;
        }

        let text = self.parts.join(" ");
        let confidence = if self.confidence_count > 0 {
            self.confidence_sum / self.confidence_count as f32
        } else {
            0.0
        };
        let language_code = std::mem::take(&mut self.language_code);

        self.parts.clear();
        self.confidence_sum = 0.0;
        self.confidence_count = 0;

        Some(AggregatedSentence {
            text,
            language_code,
            confidence,
        })
    }

    /// When the silence trigger should fire, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn token_count(&self) -> usize {
        self.parts.iter().map(|p| p.split_whitespace().count()).sum()
    }
}

/// Terminal punctuation check, tolerating trailing whitespace.
fn ends_sentence(text: &str) -> bool {
    matches!(text.trim_end().chars().last(), Some('.') | Some('!') | Some('?'))
}
