//! jarvis-core: configuration, conversation types, semantic memory and the
//! tool-augmented generation loop behind the Jarvis voice agent.

pub mod backend;
pub mod brain;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod memory;
pub mod prompts;
pub mod shared;

pub use backend::{
    create_backend, list_ollama_models, BackendReply, BackendRequest, GeminiBackend, LlmBackend, OllamaBackend,
    TextStream,
};
pub use brain::{Brain, BrainOptions};
pub use config::{
    AudioSettings, BackendKind, BrainSettings, CaptureSettings, JarvisConfig, LanguageSettings, MemorySettings,
    MonitorSettings, SegmenterSettings, SttSettings, SynthesisSettings, ToolSettings,
};
pub use embeddings::{create_embedder, squared_distance, Embedder, HashingEmbedder, OpenAiEmbedder};
pub use error::{CoreError, CoreResult};
pub use memory::{MemoryRecord, MemoryStore, SaveOutcome, ScoredRecord, SledMemoryStore, Speaker};
pub use shared::{
    normalize_arguments, ChatMessage, ConversationHistory, ToolExecutor, ToolInvocation, ToolRequest, ToolSpec, Turn,
};
