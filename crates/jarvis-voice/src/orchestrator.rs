//! The turn loop: listen, transcribe, answer out loud, repeat.
//!
//! ```text
//! Idle -> Listening -> Transcribing -> GeneratingSpeaking -> Listening
//!                                   -> ResetMemory        -> Listening
//! any state -> Shutdown (Ctrl+C)
//! ```
//!
//! The microphone stays open while Jarvis speaks so the barge-in watcher can
//! hear the user; a barge-in cancels the turn's token, which stops playback,
//! synthesis and generation together.

use crate::capture::{CaptureOutcome, UtteranceRecorder};
use crate::devices::AudioDevices;
use crate::error::{VoiceError, VoiceResult};
use crate::monitor::BargeInDetector;
use crate::playback::{speak_response, speak_text, SpeechOutcome, Voice};
use crate::stt::SttBackend;
use crate::synthesis::SynthesisEngine;
use jarvis_core::{Brain, JarvisConfig, LanguageSettings, MemoryStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Listening,
    Transcribing,
    GeneratingSpeaking,
    ResetMemory,
    Shutdown,
}

/// What to do with a transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptAction {
    /// Too short or a known recognition artifact.
    Discard,
    /// Wipe memory and history, then reopen the audio devices.
    Reset,
    /// Delete the memory closest to this text.
    Forget(String),
    Respond(String),
}

/// Sort a transcript into an action. Command words match case-insensitively.
pub fn classify_transcript(text: &str, language: &LanguageSettings) -> TranscriptAction {
    let text = text.trim();
    if text.chars().count() < language.min_transcript_chars {
        return TranscriptAction::Discard;
    }
    let lower = text.to_lowercase();
    if language
        .transcript_artifacts
        .iter()
        .any(|a| lower.contains(&a.to_lowercase()))
    {
        return TranscriptAction::Discard;
    }
    if language.reset_commands.iter().any(|c| lower.contains(&c.to_lowercase())) {
        return TranscriptAction::Reset;
    }
    let prefix = language.forget_prefix.to_lowercase();
    if !prefix.is_empty() {
        if let Some(pos) = lower.find(&prefix) {
            let subject = lower[pos + prefix.len()..]
                .trim()
                .trim_end_matches(['.', '!', '?'])
                .trim();
            if !subject.is_empty() {
                return TranscriptAction::Forget(subject.to_string());
            }
        }
    }
    TranscriptAction::Respond(text.to_string())
}

/// Everything the turn loop talks to besides the audio devices.
pub struct Collaborators {
    pub brain: Brain,
    pub memory: Arc<dyn MemoryStore>,
    pub stt: Arc<dyn SttBackend>,
    pub synthesis: Arc<dyn SynthesisEngine>,
    pub barge_in: Arc<dyn BargeInDetector>,
}

pub struct TurnOrchestrator {
    devices: AudioDevices,
    recorder: UtteranceRecorder,
    parts: Collaborators,
    language: LanguageSettings,
    voice_id: String,
    min_unit_chars: usize,
    calibrate: bool,
    state: TurnState,
    shutdown: CancellationToken,
}

impl TurnOrchestrator {
    /// `shutdown` ends the loop at the next safe point when cancelled.
    pub fn new(config: &JarvisConfig, devices: AudioDevices, parts: Collaborators, shutdown: CancellationToken) -> Self {
        let recorder = UtteranceRecorder::new(devices.input(), config.capture.clone());
        Self {
            devices,
            recorder,
            parts,
            language: config.language.clone(),
            voice_id: config.synthesis.voice_id.clone(),
            min_unit_chars: config.segmenter.min_unit_chars,
            calibrate: config.capture.calibrate,
            state: TurnState::Idle,
            shutdown,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    fn set_state(&mut self, state: TurnState) {
        if self.state != state {
            debug!(target: "jarvis::turn", from = ?self.state, to = ?state, "State change");
            self.state = state;
        }
    }

    /// Run turns until shutdown. Devices are released and memory flushed on the way out.
    ///
    /// Returns [`VoiceError::DeviceResetFailed`] if the devices could not be
    /// reopened after a memory reset; the caller should restart the process.
    pub async fn run(&mut self) -> VoiceResult<()> {
        if self.calibrate {
            info!("🤫 Calibrating...");
            if let Err(e) = self.recorder.calibrate().await {
                warn!("Calibration failed, keeping threshold {:.0}: {}", self.recorder.threshold(), e);
            }
        }
        info!("✅ SPEAK NOW!");

        let result = loop {
            if self.shutdown.is_cancelled() {
                break Ok(());
            }
            match self.run_turn().await {
                Ok(TurnState::Shutdown) => break Ok(()),
                Ok(_) => {}
                Err(e @ VoiceError::DeviceResetFailed(_)) => {
                    error!("Audio devices lost: {}", e);
                    break Err(e);
                }
                Err(e) => {
                    error!("Turn failed: {}", e);
                    self.set_state(TurnState::Listening);
                }
            }
        };

        self.set_state(TurnState::Shutdown);
        self.devices.shutdown();
        self.parts.brain.settle().await;
        if let Err(e) = self.parts.memory.flush().await {
            warn!("Memory flush failed: {}", e);
        }
        info!("👋 Jarvis stopped");
        result
    }

    /// One pass from Listening back to Listening (or Shutdown).
    pub async fn run_turn(&mut self) -> VoiceResult<TurnState> {
        self.set_state(TurnState::Listening);
        info!("👂 Listening...");

        let utterance = match self.recorder.record(&self.shutdown).await? {
            CaptureOutcome::Utterance(u) => u,
            CaptureOutcome::Timeout => return Ok(TurnState::Listening),
            CaptureOutcome::Cancelled => return Ok(TurnState::Shutdown),
        };
        self.devices.input().stop();

        self.set_state(TurnState::Transcribing);
        debug!(target: "jarvis::turn", duration = ?utterance.duration(), "Transcribing");
        let transcript = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return Ok(TurnState::Shutdown),
            t = self.parts.stt.transcribe(&utterance) => t,
        };
        let text = match transcript {
            Ok(text) => text,
            Err(e) => {
                warn!("Transcription failed: {}", e);
                self.set_state(TurnState::Listening);
                return Ok(TurnState::Listening);
            }
        };

        self.handle_transcript(&text).await
    }

    /// Act on one transcript and return the next state.
    pub async fn handle_transcript(&mut self, text: &str) -> VoiceResult<TurnState> {
        match classify_transcript(text, &self.language) {
            TranscriptAction::Discard => debug!(target: "jarvis::turn", %text, "Transcript discarded"),
            TranscriptAction::Reset => self.reset_memory().await?,
            TranscriptAction::Forget(subject) => self.forget(&subject).await?,
            TranscriptAction::Respond(text) => {
                self.respond(&text).await?;
            }
        }

        if self.shutdown.is_cancelled() {
            self.set_state(TurnState::Shutdown);
            return Ok(TurnState::Shutdown);
        }
        self.set_state(TurnState::Listening);
        Ok(TurnState::Listening)
    }

    async fn respond(&mut self, text: &str) -> VoiceResult<SpeechOutcome> {
        info!("👤 User: {}", text);
        self.set_state(TurnState::GeneratingSpeaking);

        let turn = self.shutdown.child_token();
        let input = self.devices.input();
        input.start();
        self.parts.barge_in.arm(turn.clone());

        let fragments = self.parts.brain.generate(text, turn.clone());
        let output = self.devices.output();
        let voice = Voice {
            engine: self.parts.synthesis.as_ref(),
            output: output.as_ref(),
            voice_id: &self.voice_id,
            min_unit_chars: self.min_unit_chars,
        };
        let outcome = speak_response(fragments, &voice, &turn).await;

        self.parts.barge_in.disarm();
        turn.cancel();
        input.stop();

        let outcome = outcome?;
        match outcome {
            SpeechOutcome::Interrupted { units } => info!("🛑 Interrupted after {} units", units),
            SpeechOutcome::Completed { units } => debug!(target: "jarvis::turn", units, "Answer spoken"),
        }
        Ok(outcome)
    }

    async fn reset_memory(&mut self) -> VoiceResult<()> {
        self.set_state(TurnState::ResetMemory);
        self.parts.brain.settle().await;
        let removed = self.parts.memory.reset().await?;
        self.parts.brain.clear_history().await;
        info!("🧹 Memory wiped ({} records)", removed);

        let ack = self.language.reset_ack.clone();
        self.say(&ack).await;
        self.devices.reset()
    }

    async fn forget(&mut self, subject: &str) -> VoiceResult<()> {
        let reply = match self.parts.memory.forget(subject).await? {
            Some(record) => {
                info!("🗑️ Forgot: {}", record.text);
                self.language.forget_ack.clone()
            }
            None => self.language.forget_miss.clone(),
        };
        self.say(&reply).await;
        Ok(())
    }

    /// Speak a fixed phrase. Failures are logged only; shutdown cuts it short.
    async fn say(&self, text: &str) {
        let output = self.devices.output();
        let voice = Voice {
            engine: self.parts.synthesis.as_ref(),
            output: output.as_ref(),
            voice_id: &self.voice_id,
            min_unit_chars: self.min_unit_chars,
        };
        if let Err(e) = speak_text(text, &voice, &self.shutdown.child_token()).await {
            warn!("Could not speak '{}': {}", text, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lang() -> LanguageSettings {
        LanguageSettings::default()
    }

    #[test]
    fn test_short_and_artifact_transcripts_are_discarded() {
        assert_eq!(classify_transcript(" a ", &lang()), TranscriptAction::Discard);
        assert_eq!(
            classify_transcript("Sottotitoli creati dalla comunità Amara.org", &lang()),
            TranscriptAction::Discard
        );
    }

    #[test]
    fn test_reset_commands() {
        assert_eq!(classify_transcript("Jarvis, dimentica tutto!", &lang()), TranscriptAction::Reset);
        assert_eq!(classify_transcript("Facciamo tabula rasa", &lang()), TranscriptAction::Reset);
    }

    #[test]
    fn test_forget_command_extracts_subject() {
        assert_eq!(
            classify_transcript("Dimentica che mi piace il jazz.", &lang()),
            TranscriptAction::Forget("mi piace il jazz".to_string())
        );
        assert_eq!(
            classify_transcript("dimentica che", &lang()),
            TranscriptAction::Respond("dimentica che".to_string())
        );
    }

    #[test]
    fn test_everything_else_is_a_question() {
        assert_eq!(
            classify_transcript("  Che ore sono?  ", &lang()),
            TranscriptAction::Respond("Che ore sono?".to_string())
        );
    }
}
