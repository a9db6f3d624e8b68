//! Energy-based voice-activity detection over raw PCM frames.
//!
//! Computes RMS energy on little-endian signed 16-bit mono samples and
//! applies hysteretic silence suppression: a frame is dropped only after 40
//! consecutive sub-threshold frames, while any voiced frame passes and
//! resets the counter. The asymmetry keeps the leading edge of speech intact
//! and avoids starving the transcription provider into an idle timeout.

use tracing::trace;

/// RMS value (on the scaled 0..10000 range) below which a frame counts as
/// silent.
pub const SILENCE_THRESHOLD: f64 = 5.0;

/// Consecutive silent frames required before suppression kicks in.
pub const SILENT_FRAME_FLOOR: u32 = 40;

/// Per-speaker energy gate. Single-writer: owned by the speaker worker, no
/// internal locking needed.
#[derive(Debug)]
pub struct EnergyVad {
    consecutive_silent_frames: u32,
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new()
    }
}

impl EnergyVad {
    pub fn new() -> Self {
        Self {
            consecutive_silent_frames: 0,
        }
    }

    /// Decides whether `frame` should be forwarded to the transcriber.
    ///
    /// Returns `true` for every voiced frame and for silent frames until the
    /// suppression floor is reached.
    pub fn should_forward(&mut self, frame: &[u8]) -> bool {
        let rms = rms_energy(frame);

        if rms < SILENCE_THRESHOLD {
            self.consecutive_silent_frames = self.consecutive_silent_frames.saturating_add(1);
            let suppress = self.consecutive_silent_frames >= SILENT_FRAME_FLOOR;
            if suppress {
                trace!(
                    rms,
                    silent_frames = self.consecutive_silent_frames,
                    "suppressing silent frame"
                );
            }
            !suppress
        } else {
            self.consecutive_silent_frames = 0;
            true
        }
    }

    /// Current run length of sub-threshold frames.
    pub fn silent_frames(&self) -> u32 {
        self.consecutive_silent_frames
    }

    /// Clears the silence run, e.g. after a stream restart.
    pub fn reset(&mut self) {
        self.consecutive_silent_frames = 0;
    }
}

/// RMS energy of a little-endian i16 PCM frame, scaled to 0..10000.
///
/// Odd-length frames lose their trailing byte; the samples are assembled
/// pairwise so unaligned input never causes a misread.
pub fn rms_energy(frame: &[u8]) -> f64 {
    let sample_count = frame.len() / 2;
    if sample_count == 0 {
        return 0.0;
    }

    let mut sum_squares = 0.0f64;
    for pair in frame.chunks_exact(2) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        let normalized = f64::from(sample) / 32768.0;
        sum_squares += normalized * normalized;
    }

    (sum_squares / sample_count as f64).sqrt() * 10000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn silent_frame() -> Vec<u8> {
        pcm(&[0i16; 160])
    }

    fn voiced_frame() -> Vec<u8> {
        // Alternating full-ish swing is far above any silence threshold.
        pcm(&[12000i16, -12000].repeat(80))
    }

    #[test]
    fn test_rms_of_silence_is_zero() {
        assert_eq!(rms_energy(&silent_frame()), 0.0);
    }

    #[test]
    fn test_rms_of_voice_exceeds_threshold() {
        assert!(rms_energy(&voiced_frame()) > SILENCE_THRESHOLD);
    }

    #[test]
    fn test_rms_empty_frame() {
        assert_eq!(rms_energy(&[]), 0.0);
    }

    #[test]
    fn test_rms_odd_length_does_not_panic() {
        let mut frame = voiced_frame();
        frame.push(0x7f);
        let rms = rms_energy(&frame);
        assert!(rms.is_finite());
        assert!(rms > SILENCE_THRESHOLD);
    }

    #[test]
    fn test_single_byte_frame() {
        assert_eq!(rms_energy(&[0x12]), 0.0);
    }

    #[test]
    fn test_voiced_frames_always_forwarded() {
        let mut vad = EnergyVad::new();
        for _ in 0..100 {
            assert!(vad.should_forward(&voiced_frame()));
        }
        assert_eq!(vad.silent_frames(), 0);
    }

    #[test]
    fn test_silence_suppressed_after_floor() {
        let mut vad = EnergyVad::new();
        let frame = silent_frame();

        // Frames 1..=39 pass; frame 40 is the first suppressed one.
        for i in 1..SILENT_FRAME_FLOOR {
            assert!(vad.should_forward(&frame), "frame {i} should pass");
        }
        assert!(!vad.should_forward(&frame));
        assert!(!vad.should_forward(&frame));
    }

    #[test]
    fn test_voice_resets_silence_counter() {
        let mut vad = EnergyVad::new();
        let silent = silent_frame();

        for _ in 0..SILENT_FRAME_FLOOR + 5 {
            vad.should_forward(&silent);
        }
        assert!(vad.silent_frames() >= SILENT_FRAME_FLOOR);

        assert!(vad.should_forward(&voiced_frame()));
        assert_eq!(vad.silent_frames(), 0);

        // Suppression starts over from a clean slate.
        assert!(vad.should_forward(&silent));
    }

    #[test]
    fn test_41_silent_frames_forward_at_most_40() {
        let mut vad = EnergyVad::new();
        let silent = silent_frame();

        let forwarded = (0..41).filter(|_| vad.should_forward(&silent)).count();
        assert!(forwarded <= 40, "forwarded {forwarded} of 41 silent frames");

        // The next voiced frame still goes through.
        assert!(vad.should_forward(&voiced_frame()));
    }

    #[test]
    fn test_reset_clears_run() {
        let mut vad = EnergyVad::new();
        for _ in 0..10 {
            vad.should_forward(&silent_frame());
        }
        assert_eq!(vad.silent_frames(), 10);
        vad.reset();
        assert_eq!(vad.silent_frames(), 0);
    }
}
