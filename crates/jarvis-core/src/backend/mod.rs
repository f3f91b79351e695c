//! Language-model backends behind one strategy trait.
//!
//! The generation loop only sees [`LlmBackend::respond`]: given the prompt and the tool
//! table it gets back either tool calls to dispatch or a (possibly streamed) answer.

pub mod gemini;
pub mod ollama;

use crate::config::{BackendKind, BrainSettings};
use crate::error::{CoreError, CoreResult};
use crate::shared::{ChatMessage, ToolRequest, ToolSpec};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

pub use gemini::GeminiBackend;
pub use ollama::{list_ollama_models, OllamaBackend};

/// Incremental answer text. An `Err` item ends the answer early.
pub type TextStream = Pin<Box<dyn Stream<Item = CoreResult<String>> + Send>>;

/// Everything a backend needs for one request.
#[derive(Debug, Clone, Copy)]
pub struct BackendRequest<'a> {
    /// System instruction first, then history, then the (augmented) user text and any tool traffic.
    pub messages: &'a [ChatMessage],
    pub tools: &'a [ToolSpec],
    /// Tool rounds already completed in this turn.
    pub round: usize,
    /// Whether earlier turns were replayed in `messages`.
    pub has_history: bool,
}

impl BackendRequest<'_> {
    /// Text of the last user message, if any.
    pub fn user_text(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            ChatMessage::User(text) => Some(text.as_str()),
            _ => None,
        })
    }
}

/// What the model wants next.
pub enum BackendReply {
    ToolCalls(Vec<ToolRequest>),
    Answer(TextStream),
}

impl std::fmt::Debug for BackendReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendReply::ToolCalls(calls) => f.debug_tuple("ToolCalls").field(calls).finish(),
            BackendReply::Answer(_) => f.write_str("Answer(..)"),
        }
    }
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn respond(&self, request: &BackendRequest<'_>) -> CoreResult<BackendReply>;
}

/// Build the configured backend. Gemini requires `GEMINI_API_KEY`.
pub fn create_backend(settings: &BrainSettings, client: reqwest::Client) -> CoreResult<Arc<dyn LlmBackend>> {
    match settings.backend {
        BackendKind::Gemini => {
            let key = settings
                .gemini_api_key
                .clone()
                .ok_or_else(|| CoreError::Config("brain.backend = gemini requires GEMINI_API_KEY".into()))?;
            Ok(Arc::new(GeminiBackend::new(client, settings, key)))
        }
        BackendKind::Ollama => Ok(Arc::new(OllamaBackend::new(client, settings))),
    }
}
