//! **Speech-to-Text (STT)**: turn a recorded [`Utterance`] into text.
//!
//! Every backend is pinned to the configured language. Implementations are
//! async; local inference runs on the blocking pool.

use crate::capture::Utterance;
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use jarvis_core::SttSettings;
use std::io::Cursor;
use std::time::Duration;
use tracing::{info, warn};

/// Backend for converting an utterance to text.
#[async_trait]
pub trait SttBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Transcribe one utterance. Returns an empty string if nothing was recognised.
    async fn transcribe(&self, utterance: &Utterance) -> VoiceResult<String>;
}

/// Encode mono i16 PCM as a 16-bit WAV file for API upload.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> VoiceResult<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut bytes = Vec::with_capacity(44 + samples.len() * 2);
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec)
            .map_err(|e| VoiceError::Stt(format!("WAV encode failed: {}", e)))?;
        for &s in samples {
            writer
                .write_sample(s)
                .map_err(|e| VoiceError::Stt(format!("WAV encode failed: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| VoiceError::Stt(format!("WAV encode failed: {}", e)))?;
    }
    Ok(bytes)
}

/// Placeholder STT: returns a fixed string (empty by default). Use for testing the loop.
#[derive(Debug, Default)]
pub struct PlaceholderStt {
    /// If set, return this instead of the empty transcript.
    pub response: Option<String>,
}

impl PlaceholderStt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(s: impl Into<String>) -> Self {
        Self { response: Some(s.into()) }
    }
}

#[async_trait]
impl SttBackend for PlaceholderStt {
    fn name(&self) -> &str {
        "placeholder"
    }

    async fn transcribe(&self, _utterance: &Utterance) -> VoiceResult<String> {
        Ok(self.response.clone().unwrap_or_default())
    }
}

/// OpenAI-compatible transcription API (OpenAI Whisper, local whisper servers, etc.).
#[derive(Debug, Clone)]
pub struct OpenAiStt {
    base_url: String,
    api_key: String,
    model: String,
    language: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiStt {
    pub fn new(client: reqwest::Client, settings: &SttSettings, api_key: impl Into<String>, language: &str) -> Self {
        Self {
            base_url: settings.api_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: settings.model.clone(),
            language: language.to_string(),
            timeout: Duration::from_secs(settings.timeout_secs),
            client,
        }
    }
}

#[async_trait]
impl SttBackend for OpenAiStt {
    fn name(&self) -> &str {
        "openai"
    }

    async fn transcribe(&self, utterance: &Utterance) -> VoiceResult<String> {
        if utterance.samples.is_empty() {
            return Ok(String::new());
        }
        let wav = encode_wav(&utterance.samples, utterance.sample_rate)?;
        let url = format!("{}/audio/transcriptions", self.base_url);
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", self.language.clone());
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Stt(format!("STT API error {}: {}", status, body)));
        }
        let json: serde_json::Value = res.json().await.map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string())
    }
}

// -----------------------------------------------------------------------------
// Local Whisper STT (optional feature). Requires whisper.cpp/ggml.
// -----------------------------------------------------------------------------
#[cfg(feature = "whisper")]
mod whisper_stt {
    use super::*;
    use std::sync::{Arc, Mutex};
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    /// Local Whisper STT: loads a ggml model (e.g. ggml-small.bin) and runs
    /// inference on-device. Audio must be 16 kHz mono.
    pub struct WhisperStt {
        #[allow(dead_code)]
        context: WhisperContext,
        state: Arc<Mutex<whisper_rs::WhisperState>>,
        language: String,
    }

    impl WhisperStt {
        pub fn new(model_path: &str, language: &str) -> VoiceResult<Self> {
            let params = WhisperContextParameters::default();
            let context = WhisperContext::new_with_params(model_path, params)
                .map_err(|e| VoiceError::Stt(format!("Whisper load failed: {}", e)))?;
            let state = context
                .create_state()
                .map_err(|e| VoiceError::Stt(format!("Whisper state init failed: {}", e)))?;
            Ok(Self {
                context,
                state: Arc::new(Mutex::new(state)),
                language: language.to_string(),
            })
        }
    }

    #[async_trait]
    impl SttBackend for WhisperStt {
        fn name(&self) -> &str {
            "whisper"
        }

        async fn transcribe(&self, utterance: &Utterance) -> VoiceResult<String> {
            if utterance.samples.is_empty() {
                return Ok(String::new());
            }
            if utterance.sample_rate != 16000 {
                return Err(VoiceError::Stt(format!(
                    "Whisper expects 16 kHz; got {} Hz",
                    utterance.sample_rate
                )));
            }
            let samples: Vec<f32> = utterance.samples.iter().map(|s| *s as f32 / 32768.0).collect();
            let state = self.state.clone();
            let language = self.language.clone();

            tokio::task::spawn_blocking(move || {
                let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
                params.set_print_progress(false);
                params.set_print_realtime(false);
                params.set_no_timestamps(true);
                params.set_language(Some(&language));

                let mut state = state
                    .lock()
                    .map_err(|e| VoiceError::Stt(format!("Whisper lock poisoned: {}", e)))?;
                state
                    .full(params, &samples)
                    .map_err(|e| VoiceError::Stt(format!("Whisper inference failed: {}", e)))?;
                let text = state
                    .as_iter()
                    .filter_map(|seg| seg.to_str().ok().map(|s| s.to_string()))
                    .collect::<Vec<_>>()
                    .join(" ")
                    .trim()
                    .to_string();
                Ok(text)
            })
            .await
            .map_err(|e| VoiceError::Stt(format!("Whisper task failed: {}", e)))?
        }
    }
}

#[cfg(feature = "whisper")]
pub use whisper_stt::WhisperStt;

/// Create the best available STT backend.
///
/// Priority: (1) local Whisper if `whisper_model_path` is set and loads (requires
/// the `whisper` feature), (2) the transcription API if an API key is set,
/// (3) [`PlaceholderStt`].
pub fn create_best_stt(settings: &SttSettings, locale: &str, client: reqwest::Client) -> Box<dyn SttBackend> {
    #[cfg(feature = "whisper")]
    {
        if let Some(path) = settings.whisper_model_path.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            match whisper_stt::WhisperStt::new(path, locale) {
                Ok(w) => {
                    info!("📝 STT: local Whisper ({})", path);
                    return Box::new(w);
                }
                Err(e) => warn!("Whisper model unavailable: {}", e),
            }
        }
    }
    if let Some(key) = settings.api_key.as_deref().filter(|k| !k.is_empty()) {
        info!("📝 STT: {} via {} (language: {})", settings.model, settings.api_url, locale);
        return Box::new(OpenAiStt::new(client, settings, key, locale));
    }
    warn!("No STT backend configured; set STT_API_KEY or WHISPER_MODEL_PATH. Transcripts will be empty.");
    Box::new(PlaceholderStt::new())
}
