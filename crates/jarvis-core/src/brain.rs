//! The tool-augmented generation loop.
//!
//! [`Brain::generate`] runs one turn on a spawned task and hands back the answer as a
//! lazy stream of text chunks:
//!
//! 1. recall up to `recall_limit` memories closer than `retrieval_distance`
//! 2. send system instruction + history + (augmented) user text + tool table
//! 3. dispatch requested tools in order and resubmit, at most `max_tool_rounds` times
//! 4. forward the answer chunk by chunk
//! 5. on success, record the turn in history and save `U: ..` / `AI: ..` memories
//!
//! Backend failures and timeouts end the turn with a spoken apology. Cancellation (or
//! dropping the stream) stops the turn at the next suspension point and persists nothing.

use crate::backend::{BackendReply, BackendRequest, LlmBackend};
use crate::config::JarvisConfig;
use crate::memory::{MemoryStore, SaveOutcome, Speaker};
use crate::prompts;
use crate::shared::{ChatMessage, ConversationHistory, ToolExecutor, ToolInvocation, Turn};
use chrono::{Local, Utc};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CHUNK_BUFFER: usize = 32;

/// Tunables for the generation loop, usually taken from [`JarvisConfig`].
#[derive(Debug, Clone)]
pub struct BrainOptions {
    pub locale: String,
    pub apology: String,
    pub timeout_apology: String,
    pub tool_fallback: String,
    pub retrieval_distance: f32,
    pub recall_limit: usize,
    pub max_tool_rounds: usize,
    pub request_timeout: Duration,
    pub history_turns: usize,
}

impl BrainOptions {
    pub fn from_config(config: &JarvisConfig) -> Self {
        Self {
            locale: config.language.locale.clone(),
            apology: config.language.apology.clone(),
            timeout_apology: config.language.timeout_apology.clone(),
            tool_fallback: config.language.tool_fallback.clone(),
            retrieval_distance: config.memory.retrieval_distance,
            recall_limit: config.memory.search_limit,
            max_tool_rounds: config.brain.max_tool_rounds,
            request_timeout: config.brain.request_timeout(),
            history_turns: config.brain.history_turns,
        }
    }
}

impl Default for BrainOptions {
    fn default() -> Self {
        Self::from_config(&JarvisConfig::default())
    }
}

enum TurnEnd {
    Completed,
    /// Tool round cap hit; the fallback answer was spoken.
    Exhausted,
    Failed(String),
    Cancelled,
}

/// Generation loop. Cheap to clone; clones share history.
#[derive(Clone)]
pub struct Brain {
    backend: Arc<dyn LlmBackend>,
    tools: Arc<dyn ToolExecutor>,
    memory: Arc<dyn MemoryStore>,
    history: Arc<Mutex<ConversationHistory>>,
    options: Arc<BrainOptions>,
    /// Turn memories still being written.
    saves: Arc<Mutex<JoinSet<()>>>,
}

impl Brain {
    pub fn new(
        options: BrainOptions,
        backend: Arc<dyn LlmBackend>,
        tools: Arc<dyn ToolExecutor>,
        memory: Arc<dyn MemoryStore>,
    ) -> Self {
        info!(
            "🧠 Brain ready (backend: {}, history: {} turns, tool rounds: {})",
            backend.name(),
            options.history_turns,
            options.max_tool_rounds
        );
        Self {
            backend,
            tools,
            memory,
            history: Arc::new(Mutex::new(ConversationHistory::new(options.history_turns))),
            options: Arc::new(options),
            saves: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Start one turn. The stream ends when the turn completes, fails or is cancelled.
    pub fn generate(&self, user_text: &str, cancel: CancellationToken) -> ReceiverStream<String> {
        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        let brain = self.clone();
        let user_text = user_text.trim().to_string();
        tokio::spawn(async move { brain.run_turn(user_text, tx, cancel).await });
        ReceiverStream::new(rx)
    }

    /// Completed turns currently replayed to the backend, oldest first.
    pub async fn history(&self) -> Vec<Turn> {
        self.history.lock().await.turns().cloned().collect()
    }

    pub async fn clear_history(&self) {
        self.history.lock().await.clear();
    }

    /// Wait until every turn memory saved so far has landed in the store.
    ///
    /// Call before wiping memory so a late save cannot bring a record back.
    pub async fn settle(&self) {
        let mut saves = std::mem::take(&mut *self.saves.lock().await);
        while let Some(res) = saves.join_next().await {
            if let Err(e) = res {
                warn!(target: "jarvis::memory", error = %e, "Turn memory task failed");
            }
        }
    }

    async fn recall(&self, user_text: &str) -> Vec<String> {
        match self.memory.search(user_text, self.options.recall_limit).await {
            Ok(hits) => hits
                .into_iter()
                .filter(|h| h.distance < self.options.retrieval_distance)
                .map(|h| h.record.text)
                .collect(),
            Err(e) => {
                warn!(target: "jarvis::brain", error = %e, "Memory recall failed");
                Vec::new()
            }
        }
    }

    async fn run_turn(self, user_text: String, tx: mpsc::Sender<String>, cancel: CancellationToken) {
        let opts = self.options.clone();
        let started_at = Utc::now();

        let memories = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            m = self.recall(&user_text) => m,
        };
        if !memories.is_empty() {
            info!("🔍 Recalled {} memories", memories.len());
        }

        let (mut messages, has_history) = {
            let history = self.history.lock().await;
            let mut messages = vec![ChatMessage::System(prompts::system_instruction(&opts.locale, Local::now()))];
            messages.extend(history.messages());
            (messages, !history.is_empty())
        };
        messages.push(ChatMessage::User(prompts::with_memories(&opts.locale, &memories, &user_text)));

        let specs = self.tools.specs();
        let mut invocations: Vec<ToolInvocation> = Vec::new();
        let mut answer = String::new();
        let mut round = 0usize;

        let end = 'turn: loop {
            let request = BackendRequest {
                messages: &messages,
                tools: &specs,
                round,
                has_history,
            };
            let reply = tokio::select! {
                biased;
                () = cancel.cancelled() => break 'turn TurnEnd::Cancelled,
                r = tokio::time::timeout(opts.request_timeout, self.backend.respond(&request)) => r,
            };
            let reply = match reply {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => {
                    warn!(target: "jarvis::brain", error = %e, "Backend request failed");
                    break 'turn TurnEnd::Failed(opts.apology.clone());
                }
                Err(_) => {
                    warn!(target: "jarvis::brain", timeout = ?opts.request_timeout, "Backend request timed out");
                    break 'turn TurnEnd::Failed(opts.timeout_apology.clone());
                }
            };

            match reply {
                BackendReply::ToolCalls(calls) => {
                    if round >= opts.max_tool_rounds {
                        warn!(target: "jarvis::brain", rounds = round, "Tool round limit reached");
                        answer = opts.tool_fallback.clone();
                        if tx.send(answer.clone()).await.is_err() {
                            break 'turn TurnEnd::Cancelled;
                        }
                        break 'turn TurnEnd::Exhausted;
                    }
                    round += 1;
                    let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
                    info!("🛠️ Tool round {}: {}", round, names.join(", "));

                    messages.push(ChatMessage::ToolCalls(calls.clone()));
                    for call in calls {
                        let result = tokio::select! {
                            biased;
                            () = cancel.cancelled() => break 'turn TurnEnd::Cancelled,
                            r = self.tools.execute(&call) => r,
                        };
                        debug!(target: "jarvis::brain", tool = %call.name, %result, "Tool result");
                        messages.push(ChatMessage::ToolResult {
                            name: call.name.clone(),
                            content: result.clone(),
                        });
                        invocations.push(ToolInvocation { request: call, result });
                    }
                }
                BackendReply::Answer(mut stream) => loop {
                    let next = tokio::select! {
                        biased;
                        () = cancel.cancelled() => break 'turn TurnEnd::Cancelled,
                        n = tokio::time::timeout(opts.request_timeout, stream.next()) => n,
                    };
                    match next {
                        Ok(Some(Ok(chunk))) => {
                            if chunk.is_empty() {
                                continue;
                            }
                            answer.push_str(&chunk);
                            if tx.send(chunk).await.is_err() {
                                break 'turn TurnEnd::Cancelled;
                            }
                        }
                        Ok(None) => break 'turn TurnEnd::Completed,
                        Ok(Some(Err(e))) => {
                            warn!(target: "jarvis::brain", error = %e, "Answer stream failed");
                            break 'turn TurnEnd::Failed(opts.apology.clone());
                        }
                        Err(_) => {
                            warn!(target: "jarvis::brain", "Answer stream stalled");
                            break 'turn TurnEnd::Failed(opts.timeout_apology.clone());
                        }
                    }
                },
            }
        };

        match end {
            TurnEnd::Completed if !answer.trim().is_empty() => {
                self.history.lock().await.push(Turn {
                    user_text: user_text.clone(),
                    invocations,
                    answer: answer.clone(),
                    started_at,
                    finished_at: Utc::now(),
                });
                self.remember(&user_text, &answer).await;
            }
            TurnEnd::Completed => debug!(target: "jarvis::brain", "Empty answer, nothing recorded"),
            TurnEnd::Exhausted => {}
            TurnEnd::Failed(apology) => {
                let _ = tx.send(apology).await;
            }
            TurnEnd::Cancelled => info!("⏹️ Generation cancelled"),
        }
    }

    /// Save both sides of a completed turn without blocking the next one.
    /// The task is tracked so [`Brain::settle`] can wait for it.
    async fn remember(&self, user_text: &str, answer: &str) {
        let memory = self.memory.clone();
        let entries = [
            (format!("U: {user_text}"), Speaker::User),
            (format!("AI: {answer}"), Speaker::Ai),
        ];
        let mut saves = self.saves.lock().await;
        while saves.try_join_next().is_some() {}
        saves.spawn(async move {
            for (text, speaker) in entries {
                match memory.save(&text, speaker, Utc::now()).await {
                    Ok(SaveOutcome::Stored(id)) => debug!(target: "jarvis::memory", %id, "Saved turn memory"),
                    Ok(SaveOutcome::Duplicate { distance, .. }) => {
                        debug!(target: "jarvis::memory", distance, "Turn memory already known")
                    }
                    Err(e) => warn!(target: "jarvis::memory", error = %e, "Failed to save turn memory"),
                }
            }
        });
    }
}
