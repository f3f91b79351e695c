//! Error types for the Jarvis voice pipeline

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the voice pipeline
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("VAD initialization failed: {0}")]
    VadInit(String),

    #[error("VAD processing error: {0}")]
    VadProcessing(String),

    #[error("Audio stream error: {0}")]
    AudioStream(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Audio devices could not be reopened: {0}")]
    DeviceResetFailed(String),

    #[error("Core error: {0}")]
    Core(#[from] jarvis_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<rodio::StreamError> for VoiceError {
    fn from(err: rodio::StreamError) -> Self {
        VoiceError::Playback(err.to_string())
    }
}

impl From<rodio::PlayError> for VoiceError {
    fn from(err: rodio::PlayError) -> Self {
        VoiceError::Playback(err.to_string())
    }
}
