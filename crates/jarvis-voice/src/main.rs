//! Jarvis: spoken assistant with barge-in.
//!
//! Configuration comes from `jarvis.toml` (or `JARVIS_CONFIG`), `JARVIS__*`
//! environment overrides and API keys in `.env`. Press Ctrl+C to stop.

use anyhow::Context;
use jarvis_core::{
    create_backend, create_embedder, list_ollama_models, BackendKind, Brain, BrainOptions, GeminiBackend,
    JarvisConfig, LlmBackend, MemoryStore, SledMemoryStore,
};
use jarvis_skills::Toolbox;
use jarvis_voice::{
    create_best_stt, list_input_devices, restart_process, select_microphone, select_ollama_model, suggest_device,
    AudioDevices, BargeInWatcher, Collaborators, SystemAudio, TurnOrchestrator, VoiceError, WebRtcClassifier,
    WebSocketSynthesis,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = JarvisConfig::load().context("loading configuration")?;
    let client = reqwest::Client::new();

    let backend = build_backend(&mut config, &client).await?;
    let mic = choose_microphone(&config).await?;

    let embedder = create_embedder(&config.memory, client.clone());
    let memory: Arc<dyn MemoryStore> =
        Arc::new(SledMemoryStore::open(&config.memory, embedder).context("opening memory store")?);
    let toolbox = Toolbox::new(&config, client.clone(), memory.clone()).context("building toolbox")?;
    let brain = Brain::new(BrainOptions::from_config(&config), backend, Arc::new(toolbox), memory.clone());

    let stt = create_best_stt(&config.stt, &config.language.locale, client.clone());
    let factory = Arc::new(SystemAudio {
        input_rate: config.audio.input_sample_rate,
        output_rate: config.audio.output_sample_rate,
    });
    let devices = AudioDevices::open(factory, mic).context("opening audio devices")?;

    let (vad_rate, vad_mode) = (config.audio.input_sample_rate, config.monitor.vad_mode);
    let watcher = Arc::new(BargeInWatcher::spawn(devices.input(), &config.monitor, move || {
        WebRtcClassifier::new(vad_rate, vad_mode)
    })?);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Ctrl+C received, shutting down");
            signal.cancel();
        }
    });

    let parts = Collaborators {
        brain,
        memory,
        stt: Arc::from(stt),
        synthesis: Arc::new(WebSocketSynthesis::new(&config.synthesis)),
        barge_in: watcher.clone(),
    };
    let mut orchestrator = TurnOrchestrator::new(&config, devices, parts, shutdown);

    info!(
        "🚀 JARVIS ready ({:?} backend, voice {}, synthesis at {})",
        config.brain.backend, config.synthesis.voice_id, config.synthesis.server_url
    );
    let result = orchestrator.run().await;
    watcher.shutdown();

    match result {
        Ok(()) => Ok(()),
        Err(VoiceError::DeviceResetFailed(reason)) => {
            error!("Audio devices could not be reopened ({}); restarting", reason);
            Err(restart_process()).context("restarting process")
        }
        Err(e) => Err(e.into()),
    }
}

async fn build_backend(config: &mut JarvisConfig, client: &reqwest::Client) -> anyhow::Result<Arc<dyn LlmBackend>> {
    match config.brain.backend {
        BackendKind::Gemini => {
            let key = config
                .brain
                .gemini_api_key
                .clone()
                .context("brain.backend = gemini requires GEMINI_API_KEY")?;
            let gemini = GeminiBackend::new(client.clone(), &config.brain, key);
            if let Err(e) = gemini.warm_up().await {
                warn!("Gemini warm-up failed, continuing: {}", e);
            }
            Ok(Arc::new(gemini))
        }
        BackendKind::Ollama => {
            if config.brain.ollama_model.is_none() {
                info!("🔎 Looking for Ollama models at {}", config.brain.ollama_url);
                let models = list_ollama_models(client, &config.brain.ollama_url)
                    .await
                    .with_context(|| format!("Ollama is not running at {}; start `ollama serve`", config.brain.ollama_url))?;
                let chosen = if config.audio.non_interactive {
                    models.first().cloned()
                } else {
                    tokio::task::spawn_blocking(move || {
                        let stdin = std::io::stdin();
                        select_ollama_model(&models, &mut stdin.lock(), &mut std::io::stdout())
                    })
                    .await??
                };
                match chosen {
                    Some(model) => config.brain.ollama_model = Some(model),
                    None => warn!(
                        "⚠️ No Ollama models installed; using '{}' (pull it first)",
                        config.brain.ollama_fallback_model
                    ),
                }
            }
            Ok(create_backend(&config.brain, client.clone())?)
        }
    }
}

async fn choose_microphone(config: &JarvisConfig) -> anyhow::Result<Option<usize>> {
    if let Some(index) = config.audio.input_device {
        return Ok(Some(index));
    }
    let names = match list_input_devices() {
        Ok(names) if !names.is_empty() => names,
        Ok(_) => return Ok(None),
        Err(e) => {
            warn!("Could not list input devices, using the default: {}", e);
            return Ok(None);
        }
    };
    let hints = config.audio.device_hints.clone();
    if config.audio.non_interactive {
        let index = suggest_device(&names, &hints);
        info!("🎙️ Using microphone [{}] {}", index, names[index]);
        return Ok(Some(index));
    }
    let index = tokio::task::spawn_blocking(move || {
        let stdin = std::io::stdin();
        select_microphone(&names, &hints, &mut stdin.lock(), &mut std::io::stdout())
    })
    .await??;
    Ok(Some(index))
}
