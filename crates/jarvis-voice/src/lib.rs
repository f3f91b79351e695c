//! jarvis-voice: microphone capture, barge-in detection, sentence
//! segmentation, streaming synthesis and the turn loop that ties them to the
//! [`jarvis_core::Brain`].

pub mod audio;
pub mod capture;
pub mod devices;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod playback;
pub mod prompt;
pub mod segmenter;
pub mod stt;
pub mod synthesis;
pub mod vad;

pub use audio::{list_input_devices, AudioInput, AudioOutput, CpalInput, RodioOutput, SampleQueue};
pub use capture::{CaptureOutcome, DetectorEvent, Utterance, UtteranceDetector, UtteranceRecorder};
pub use devices::{restart_process, AudioDevices, DeviceFactory, SystemAudio};
pub use error::{VoiceError, VoiceResult};
pub use monitor::{BargeInDetector, BargeInWatcher, VoiceActivityMonitor};
pub use orchestrator::{classify_transcript, Collaborators, TranscriptAction, TurnOrchestrator, TurnState};
pub use playback::{speak_response, speak_text, SpeechOutcome, Voice};
pub use prompt::{select_microphone, select_ollama_model, suggest_device};
pub use segmenter::{segment, SentenceSegmenter, SpeakableUnit, TextNormalizer};
pub use stt::{create_best_stt, OpenAiStt, PlaceholderStt, SttBackend};
pub use synthesis::{SynthesisEngine, SynthesisSession, WebSocketSynthesis};
pub use vad::{SpeechClassifier, WebRtcClassifier};

#[cfg(feature = "whisper")]
pub use stt::WhisperStt;
