//! Speech classification using WebRTC VAD
//!
//! The barge-in monitor only needs a probability that a frame is speech.
//! WebRTC VAD answers per 10ms window, so the probability is the share of
//! voiced windows in the frame.

use crate::error::{VoiceError, VoiceResult};
use tracing::{debug, info};
use webrtc_vad::{SampleRate, Vad, VadMode};

/// Speech probability model used by the voice activity monitor.
///
/// Implementations need not be `Send`; the monitor builds its classifier on
/// its own thread.
pub trait SpeechClassifier {
    /// Probability in [0, 1] that `frame` (samples in [-1, 1]) contains speech.
    fn speech_probability(&mut self, frame: &[f32], sample_rate: u32) -> VoiceResult<f32>;
}

/// WebRTC VAD classifier
pub struct WebRtcClassifier {
    vad: Vad,
    sample_rate: u32,
    window: usize,
}

impl WebRtcClassifier {
    /// Create a classifier for `sample_rate` with aggressiveness `mode` (0-3, 3 most aggressive)
    pub fn new(sample_rate: u32, mode: u8) -> VoiceResult<Self> {
        info!("🎙️ Initializing WebRTC VAD (sample_rate: {}Hz, mode: {})", sample_rate, mode);

        let rate = match sample_rate {
            8000 => SampleRate::Rate8kHz,
            16000 => SampleRate::Rate16kHz,
            32000 => SampleRate::Rate32kHz,
            48000 => SampleRate::Rate48kHz,
            other => {
                return Err(VoiceError::VadInit(format!(
                    "WebRTC VAD only supports 8000, 16000, 32000, or 48000 Hz, got {}",
                    other
                )))
            }
        };

        let vad_mode = match mode {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            3 => VadMode::VeryAggressive,
            other => return Err(VoiceError::VadInit(format!("VAD mode must be 0-3, got {}", other))),
        };

        let mut vad = Vad::new();
        vad.set_mode(vad_mode);
        vad.set_sample_rate(rate);

        Ok(Self {
            vad,
            sample_rate,
            // 10ms windows
            window: sample_rate as usize / 100,
        })
    }
}

impl SpeechClassifier for WebRtcClassifier {
    fn speech_probability(&mut self, frame: &[f32], sample_rate: u32) -> VoiceResult<f32> {
        if sample_rate != self.sample_rate {
            return Err(VoiceError::VadProcessing(format!(
                "Classifier runs at {}Hz, got {}Hz audio",
                self.sample_rate, sample_rate
            )));
        }

        let mut voiced = 0usize;
        let mut windows = 0usize;
        for chunk in frame.chunks_exact(self.window) {
            let audio_i16: Vec<i16> = chunk
                .iter()
                .map(|&sample| (sample.clamp(-1.0, 1.0) * 32767.0) as i16)
                .collect();
            let is_speech = self
                .vad
                .is_voice_segment(&audio_i16)
                .map_err(|e| VoiceError::VadProcessing(format!("VAD processing failed: {:?}", e)))?;
            windows += 1;
            if is_speech {
                voiced += 1;
            }
        }

        if windows == 0 {
            return Err(VoiceError::VadProcessing(format!(
                "Frame of {} samples is shorter than one {}-sample window",
                frame.len(),
                self.window
            )));
        }

        let probability = voiced as f32 / windows as f32;
        debug!("VAD: {}/{} windows voiced", voiced, windows);
        Ok(probability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_sample_rate() {
        assert!(WebRtcClassifier::new(44100, 3).is_err());
    }

    #[test]
    fn test_invalid_mode() {
        assert!(WebRtcClassifier::new(16000, 4).is_err());
    }

    #[test]
    fn test_silence_is_not_speech() {
        let mut classifier = WebRtcClassifier::new(16000, 3).unwrap();
        let p = classifier.speech_probability(&[0.0; 512], 16000).unwrap();
        assert_eq!(p, 0.0);
    }

    #[test]
    fn test_short_frame_rejected() {
        let mut classifier = WebRtcClassifier::new(16000, 3).unwrap();
        assert!(classifier.speech_probability(&[0.0; 100], 16000).is_err());
    }

    #[test]
    fn test_rate_mismatch_rejected() {
        let mut classifier = WebRtcClassifier::new(16000, 3).unwrap();
        assert!(classifier.speech_probability(&[0.0; 960], 48000).is_err());
    }
}
