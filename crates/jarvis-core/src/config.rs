//! Jarvis configuration loaded from `jarvis.toml` and the environment.
//!
//! Every section is optional: a missing file or key falls back to the defaults below.
//! Environment overrides use the `JARVIS__SECTION__KEY` form, e.g.
//! `JARVIS__BRAIN__BACKEND=gemini` or `JARVIS__MONITOR__VOLUME_GATE=3000`.
//!
//! Secrets are never read from the file; they come from the process environment
//! (usually populated from `.env` by the binary):
//!
//! | Env | Used by |
//! |-----|---------|
//! | GEMINI_API_KEY | Gemini backend |
//! | GOOGLE_SEARCH_API_KEY / GOOGLE_SEARCH_CX | `web_search` tool |
//! | STT_API_KEY / STT_API_URL / STT_MODEL | remote transcription |
//! | WHISPER_MODEL_PATH | local transcription (feature `whisper`) |
//! | EMBEDDINGS_API_KEY / EMBEDDINGS_API_URL | remote embeddings for memory |

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file, relative to the working directory. Override with `JARVIS_CONFIG`.
pub const DEFAULT_CONFIG_FILE: &str = "jarvis.toml";

/// Top-level configuration. Each section is deserialized with its own defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JarvisConfig {
    pub audio: AudioSettings,
    pub capture: CaptureSettings,
    pub monitor: MonitorSettings,
    pub synthesis: SynthesisSettings,
    pub segmenter: SegmenterSettings,
    pub stt: SttSettings,
    pub brain: BrainSettings,
    pub memory: MemorySettings,
    pub tools: ToolSettings,
    pub language: LanguageSettings,
}

impl JarvisConfig {
    /// Load from `JARVIS_CONFIG` (or `./jarvis.toml`), then environment overrides and secrets.
    pub fn load() -> CoreResult<Self> {
        let path = std::env::var("JARVIS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load from an explicit file path. The file may be absent.
    pub fn load_from(path: &Path) -> CoreResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("JARVIS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: JarvisConfig = settings.try_deserialize()?;
        cfg.apply_env_secrets();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Fill secrets that are unset in the file from their well-known environment variables.
    pub fn apply_env_secrets(&mut self) {
        fill_from_env(&mut self.brain.gemini_api_key, "GEMINI_API_KEY");
        fill_from_env(&mut self.tools.google_api_key, "GOOGLE_SEARCH_API_KEY");
        fill_from_env(&mut self.tools.google_cx, "GOOGLE_SEARCH_CX");
        fill_from_env(&mut self.stt.api_key, "STT_API_KEY");
        fill_from_env(&mut self.stt.whisper_model_path, "WHISPER_MODEL_PATH");
        fill_from_env(&mut self.memory.embeddings_api_key, "EMBEDDINGS_API_KEY");
        fill_from_env(&mut self.memory.embeddings_url, "EMBEDDINGS_API_URL");
        if let Ok(url) = std::env::var("STT_API_URL") {
            if !url.trim().is_empty() {
                self.stt.api_url = url.trim().to_string();
            }
        }
        if let Ok(model) = std::env::var("STT_MODEL") {
            if !model.trim().is_empty() {
                self.stt.model = model.trim().to_string();
            }
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.monitor.frame_size == 0 {
            return Err(CoreError::Config("monitor.frame_size must be greater than 0".into()));
        }
        if !(0.0..=1.0).contains(&self.monitor.confidence) {
            return Err(CoreError::Config(format!(
                "monitor.confidence must be within 0.0..=1.0, got {}",
                self.monitor.confidence
            )));
        }
        if !matches!(self.audio.input_sample_rate, 8000 | 16000 | 32000 | 48000) {
            return Err(CoreError::Config(format!(
                "audio.input_sample_rate must be 8000, 16000, 32000 or 48000 Hz, got {}",
                self.audio.input_sample_rate
            )));
        }
        if self.brain.history_turns == 0 {
            return Err(CoreError::Config("brain.history_turns must be at least 1".into()));
        }
        if self.memory.dedup_distance > self.memory.retrieval_distance {
            return Err(CoreError::Config(
                "memory.dedup_distance must not exceed memory.retrieval_distance".into(),
            ));
        }
        if self.synthesis.read_timeout_ms == 0 {
            return Err(CoreError::Config("synthesis.read_timeout_ms must be positive".into()));
        }
        if !self.synthesis.server_url.starts_with("ws://") && !self.synthesis.server_url.starts_with("wss://") {
            return Err(CoreError::Config(format!(
                "synthesis.server_url must be a ws:// or wss:// URL, got {}",
                self.synthesis.server_url
            )));
        }
        Ok(())
    }
}

fn fill_from_env(slot: &mut Option<String>, var: &str) {
    if slot.as_deref().map(str::trim).unwrap_or("").is_empty() {
        *slot = std::env::var(var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
    }
}

/// Device and sample format settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Capture rate for recognition and voice activity (Hz).
    pub input_sample_rate: u32,
    /// Rate of the PCM16 frames produced by the synthesis engine (Hz).
    pub output_sample_rate: u32,
    /// Input device index; `None` prompts at startup.
    pub input_device: Option<usize>,
    /// Substrings that make a device the suggested default in the startup prompt.
    pub device_hints: Vec<String>,
    /// Skip interactive prompts and take the suggested defaults.
    pub non_interactive: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            input_device: None,
            device_hints: vec!["Fifine".into(), "USB".into()],
            non_interactive: false,
        }
    }
}

/// Utterance capture: energy gate, end-of-speech pause and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// RMS energy above which a chunk counts as speech.
    pub energy_threshold: f32,
    /// Raise the threshold to the ambient level measured at startup.
    pub calibrate: bool,
    pub calibration_ms: u64,
    /// Trailing silence that ends an utterance.
    pub pause_ms: u64,
    /// Hard cap on utterance length.
    pub phrase_limit_ms: u64,
    /// Give up waiting for speech to start after this long.
    pub wait_timeout_ms: u64,
    /// Analysis chunk length.
    pub chunk_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            energy_threshold: 300.0,
            calibrate: true,
            calibration_ms: 1000,
            pause_ms: 1000,
            phrase_limit_ms: 10_000,
            wait_timeout_ms: 2000,
            chunk_ms: 30,
        }
    }
}

impl CaptureSettings {
    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    pub fn phrase_limit(&self) -> Duration {
        Duration::from_millis(self.phrase_limit_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

/// Barge-in monitor thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Samples read per poll.
    pub frame_size: usize,
    /// Mean absolute amplitude (i16 scale) below which the classifier is skipped.
    pub volume_gate: f32,
    /// Speech probability that counts as a barge-in (strictly greater).
    pub confidence: f32,
    pub poll_interval_ms: u64,
    /// WebRTC VAD aggressiveness, 0-3.
    pub vad_mode: u8,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            frame_size: 512,
            volume_gate: 1500.0,
            confidence: 0.9,
            poll_interval_ms: 10,
            vad_mode: 3,
        }
    }
}

/// Streaming synthesis endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisSettings {
    /// Websocket endpoint; `text` and `voice` are appended as query parameters.
    pub server_url: String,
    pub voice_id: String,
    pub connect_timeout_ms: u64,
    /// A unit ends if the server sends nothing for this long.
    pub read_timeout_ms: u64,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8000/stream".into(),
            voice_id: "it-Spk1_man".into(),
            connect_timeout_ms: 5000,
            read_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterSettings {
    /// A unit must be strictly longer than this (trimmed chars) unless it is the final flush.
    pub min_unit_chars: usize,
}

impl Default for SegmenterSettings {
    fn default() -> Self {
        Self { min_unit_chars: 5 }
    }
}

/// Speech recognition backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttSettings {
    /// OpenAI-compatible base URL for `/audio/transcriptions`.
    pub api_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub whisper_model_path: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SttSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1".into(),
            model: "whisper-1".into(),
            api_key: None,
            whisper_model_path: None,
            timeout_secs: 30,
        }
    }
}

/// Which language-model flavour drives the generation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Built-in function calling (`generateContent`).
    Gemini,
    /// Local `/api/chat` with declared tool schemas.
    #[default]
    Ollama,
}

/// Generation loop and backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainSettings {
    pub backend: BackendKind,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub gemini_api_key: Option<String>,
    pub ollama_url: String,
    /// `None` picks the first installed model (or prompts at startup).
    pub ollama_model: Option<String>,
    /// Used when no model is configured and none are installed.
    pub ollama_fallback_model: String,
    pub tool_temperature: f32,
    pub answer_temperature: f32,
    /// Completed turns replayed to the backend.
    pub history_turns: usize,
    /// Tool-call rounds per turn before the fallback answer is spoken.
    pub max_tool_rounds: usize,
    /// Timeout for the non-streaming tool-decision request.
    pub tool_timeout_secs: u64,
    /// Timeout for answer requests and for each streamed chunk.
    pub request_timeout_secs: u64,
    /// Without history, the Ollama tool round only runs when the text mentions one of these.
    pub tool_keywords: Vec<String>,
}

impl Default for BrainSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            gemini_model: "gemini-2.0-flash".into(),
            gemini_api_key: None,
            ollama_url: "http://localhost:11434".into(),
            ollama_model: None,
            ollama_fallback_model: "llama3.1".into(),
            tool_temperature: 0.1,
            answer_temperature: 0.7,
            history_turns: 3,
            max_tool_rounds: 5,
            tool_timeout_secs: 8,
            request_timeout_secs: 30,
            tool_keywords: ["ora", "calcola", "ricordi", "cerca", "sai di me", "web", "meteo", "file", "cartella"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl BrainSettings {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Semantic memory settings. Distances are squared L2 over unit vectors (0.0..=4.0).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    pub path: PathBuf,
    /// Records farther than this are not recalled.
    pub retrieval_distance: f32,
    /// A save closer than this to an existing record is skipped.
    pub dedup_distance: f32,
    pub search_limit: usize,
    /// Dimensions of the local hashing embedder.
    pub dimensions: usize,
    /// OpenAI-compatible embeddings endpoint; unset uses the local hashing embedder.
    pub embeddings_url: Option<String>,
    pub embeddings_model: String,
    pub embeddings_api_key: Option<String>,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./memoria_db"),
            retrieval_distance: 1.4,
            dedup_distance: 0.3,
            search_limit: 3,
            dimensions: 384,
            embeddings_url: None,
            embeddings_model: "text-embedding-3-small".into(),
            embeddings_api_key: None,
        }
    }
}

/// Tool table settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    /// Sandbox directory for file tools; `None` resolves to the user's Desktop.
    pub sandbox_root: Option<PathBuf>,
    pub max_listed_files: usize,
    pub max_read_chars: usize,
    pub google_api_key: Option<String>,
    pub google_cx: Option<String>,
    pub search_results: usize,
    pub search_retries: usize,
    pub search_retry_delay_ms: u64,
    pub max_search_chars: usize,
    /// Country and language restriction passed to the search API.
    pub search_country: String,
    pub search_language: String,
    pub weather_timeout_secs: u64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            sandbox_root: None,
            max_listed_files: 30,
            max_read_chars: 2000,
            google_api_key: None,
            google_cx: None,
            search_results: 3,
            search_retries: 3,
            search_retry_delay_ms: 1500,
            max_search_chars: 1500,
            search_country: "it".into(),
            search_language: "lang_it".into(),
            weather_timeout_secs: 3,
        }
    }
}

/// Locale, fixed phrases and command words. Defaults are Italian.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageSettings {
    /// Recognition language and prompt language.
    pub locale: String,
    pub apology: String,
    pub timeout_apology: String,
    pub tool_fallback: String,
    pub reset_ack: String,
    pub forget_ack: String,
    pub forget_miss: String,
    pub reset_commands: Vec<String>,
    pub forget_prefix: String,
    /// Hallucinated transcripts produced from silence.
    pub transcript_artifacts: Vec<String>,
    pub min_transcript_chars: usize,
}

impl Default for LanguageSettings {
    fn default() -> Self {
        Self {
            locale: "it".into(),
            apology: "Ho avuto un problema tecnico. Riprova tra poco.".into(),
            timeout_apology: "Il modello ha impiegato troppo tempo per rispondere.".into(),
            tool_fallback: "Non sono riuscito a completare la richiesta con i miei strumenti.".into(),
            reset_ack: "Ho cancellato tutte le informazioni memorizzate su di te. Ho fatto tabula rasa!".into(),
            forget_ack: "Fatto, l'ho dimenticato.".into(),
            forget_miss: "Non ho trovato nulla da dimenticare.".into(),
            reset_commands: vec!["dimentica tutto".into(), "tabula rasa".into(), "cancella tutto".into()],
            forget_prefix: "dimentica che".into(),
            transcript_artifacts: vec!["sottotitoli".into()],
            min_transcript_chars: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_pipeline_constants() {
        let cfg = JarvisConfig::default();
        assert_eq!(cfg.audio.input_sample_rate, 16000);
        assert_eq!(cfg.audio.output_sample_rate, 24000);
        assert_eq!(cfg.monitor.frame_size, 512);
        assert_eq!(cfg.monitor.volume_gate, 1500.0);
        assert_eq!(cfg.brain.max_tool_rounds, 5);
        assert_eq!(cfg.memory.search_limit, 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = JarvisConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.synthesis.voice_id, "it-Spk1_man");
    }

    #[test]
    fn test_file_overrides_single_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jarvis.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[brain]\nbackend = \"gemini\"\nmax_tool_rounds = 2\n\n[monitor]\nvolume_gate = 3000.0").unwrap();

        let cfg = JarvisConfig::load_from(&path).unwrap();
        assert_eq!(cfg.brain.backend, BackendKind::Gemini);
        assert_eq!(cfg.brain.max_tool_rounds, 2);
        assert_eq!(cfg.monitor.volume_gate, 3000.0);
        assert_eq!(cfg.monitor.frame_size, 512);
        assert_eq!(cfg.brain.history_turns, 3);
    }

    #[test]
    fn test_invalid_confidence_rejected() {
        let mut cfg = JarvisConfig::default();
        cfg.monitor.confidence = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_non_websocket_synthesis_url_rejected() {
        let mut cfg = JarvisConfig::default();
        cfg.synthesis.server_url = "http://127.0.0.1:8000/stream".into();
        assert!(cfg.validate().is_err());
    }
}
