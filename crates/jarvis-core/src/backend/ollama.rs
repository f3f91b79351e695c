//! Ollama `/api/chat` backend with explicit tool schemas.
//!
//! Each round is a non-streaming tool-decision request (low temperature). When the model
//! asks for no tools, the answer is requested again in streaming mode and parsed from
//! NDJSON as it arrives.

use super::{BackendReply, BackendRequest, LlmBackend, TextStream};
use crate::config::BrainSettings;
use crate::error::{CoreError, CoreResult};
use crate::shared::{ChatMessage, ToolRequest, ToolSpec};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    tool_temperature: f32,
    answer_temperature: f32,
    tool_timeout: Duration,
    request_timeout: Duration,
    tool_keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ResponseMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ResponseToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

/// Installed model names, as reported by `/api/tags`.
pub async fn list_ollama_models(client: &reqwest::Client, base_url: &str) -> CoreResult<Vec<String>> {
    let url = format!("{}/api/tags", base_url.trim_end_matches('/'));
    let res = client.get(&url).timeout(Duration::from_secs(5)).send().await?;
    if !res.status().is_success() {
        return Err(CoreError::Backend(format!("Ollama /api/tags returned {}", res.status())));
    }
    let tags: TagsResponse = res.json().await?;
    Ok(tags.models.into_iter().map(|m| m.name).collect())
}

impl OllamaBackend {
    pub fn new(client: reqwest::Client, settings: &BrainSettings) -> Self {
        let model = settings
            .ollama_model
            .clone()
            .unwrap_or_else(|| settings.ollama_fallback_model.clone());
        info!("🦙 Ollama backend at {} using {}", settings.ollama_url, model);
        Self {
            client,
            base_url: settings.ollama_url.trim_end_matches('/').to_string(),
            model,
            tool_temperature: settings.tool_temperature,
            answer_temperature: settings.answer_temperature,
            tool_timeout: settings.tool_timeout(),
            request_timeout: settings.request_timeout(),
            tool_keywords: settings.tool_keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// A first-turn request with no tool keyword goes straight to the streamed answer.
    fn wants_tool_round(&self, request: &BackendRequest<'_>) -> bool {
        if request.tools.is_empty() {
            return false;
        }
        if request.round > 0 || request.has_history {
            return true;
        }
        let text = request.user_text().unwrap_or_default().to_lowercase();
        self.tool_keywords.iter().any(|k| text.contains(k.as_str()))
    }

    async fn decide_tools(&self, request: &BackendRequest<'_>) -> CoreResult<Vec<ToolRequest>> {
        let body = json!({
            "model": self.model,
            "messages": messages_json(request.messages),
            "stream": false,
            "tools": tools_json(request.tools),
            "options": {"temperature": self.tool_temperature},
        });
        let res = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(self.tool_timeout)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(CoreError::Backend(format!("Ollama API error {status}: {text}")));
        }
        let parsed: ChatResponse = res.json().await?;
        Ok(tool_requests(parsed))
    }

    async fn stream_answer(&self, request: &BackendRequest<'_>) -> CoreResult<TextStream> {
        let body = json!({
            "model": self.model,
            "messages": messages_json(request.messages),
            "stream": true,
            "options": {"temperature": self.answer_temperature},
        });
        let send = self.client.post(format!("{}/api/chat", self.base_url)).json(&body).send();
        let res = tokio::time::timeout(self.request_timeout, send)
            .await
            .map_err(|_| CoreError::Timeout(self.request_timeout))??;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(CoreError::Backend(format!("Ollama API error {status}: {text}")));
        }
        Ok(ndjson_content_stream(res.bytes_stream()))
    }
}

fn tool_requests(response: ChatResponse) -> Vec<ToolRequest> {
    response
        .message
        .unwrap_or_default()
        .tool_calls
        .into_iter()
        .map(|tc| ToolRequest::new(tc.function.name, tc.function.arguments))
        .collect()
}

pub(crate) fn messages_json(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match m {
            ChatMessage::System(text) => json!({"role": "system", "content": text}),
            ChatMessage::User(text) => json!({"role": "user", "content": text}),
            ChatMessage::Assistant(text) => json!({"role": "assistant", "content": text}),
            ChatMessage::ToolCalls(calls) => json!({
                "role": "assistant",
                "content": "",
                "tool_calls": calls
                    .iter()
                    .map(|c| json!({"function": {"name": c.name, "arguments": c.arguments}}))
                    .collect::<Vec<_>>(),
            }),
            ChatMessage::ToolResult { name, content } => {
                json!({"role": "tool", "tool_name": name, "content": content})
            }
        })
        .collect()
}

fn tools_json(tools: &[ToolSpec]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {"name": t.name, "description": t.description, "parameters": t.parameters},
            })
        })
        .collect()
}

/// Content of one NDJSON line, with reasoning tags removed. Unparseable or empty lines yield `None`.
fn chunk_content(line: &[u8]) -> Option<String> {
    let line = std::str::from_utf8(line).ok()?.trim();
    if line.is_empty() {
        return None;
    }
    let parsed: ChatResponse = serde_json::from_str(line).ok()?;
    let content = parsed
        .message?
        .content
        .replace("<think>", "")
        .replace("</think>", "");
    (!content.is_empty()).then_some(content)
}

/// Split a byte stream into NDJSON lines and yield each line's message content.
pub(crate) fn ndjson_content_stream<S, B, E>(bytes: S) -> TextStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<CoreError> + Send + 'static,
{
    let state = (Box::pin(bytes), Vec::<u8>::new(), false);
    let stream = futures::stream::unfold(state, |(mut bytes, mut buf, mut done)| async move {
        loop {
            if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                if let Some(content) = chunk_content(&line) {
                    return Some((Ok(content), (bytes, buf, done)));
                }
                continue;
            }
            if done {
                if buf.is_empty() {
                    return None;
                }
                let line = std::mem::take(&mut buf);
                return chunk_content(&line).map(|content| (Ok(content), (bytes, buf, done)));
            }
            match bytes.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    buf.clear();
                    done = true;
                    return Some((Err(e.into()), (bytes, buf, done)));
                }
                None => done = true,
            }
        }
    });
    Box::pin(stream)
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn respond(&self, request: &BackendRequest<'_>) -> CoreResult<BackendReply> {
        if self.wants_tool_round(request) {
            debug!(target: "jarvis::ollama", round = request.round, "Tool decision request");
            match self.decide_tools(request).await {
                Ok(calls) if !calls.is_empty() => return Ok(BackendReply::ToolCalls(calls)),
                Ok(_) => {}
                Err(e) => warn!(target: "jarvis::ollama", error = %e, "Tool decision failed, answering without tools"),
            }
        }
        Ok(BackendReply::Answer(self.stream_answer(request).await?))
    }
}
