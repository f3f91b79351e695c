//! Gemini `generateContent` backend with built-in function calling.
//!
//! One request per tool round; the final answer arrives whole and is yielded as a
//! single chunk.

use super::{BackendReply, BackendRequest, LlmBackend};
use crate::config::BrainSettings;
use crate::error::{CoreError, CoreResult};
use crate::shared::{ChatMessage, ToolRequest, ToolSpec};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

impl GeminiBackend {
    pub fn new(client: reqwest::Client, settings: &BrainSettings, api_key: String) -> Self {
        Self {
            client,
            base_url: settings.gemini_base_url.trim_end_matches('/').to_string(),
            model: settings.gemini_model.clone(),
            api_key,
            timeout: settings.request_timeout(),
        }
    }

    /// Check the key and model once before the loop starts.
    pub async fn warm_up(&self) -> CoreResult<()> {
        let url = format!("{}/models/{}", self.base_url, self.model);
        let res = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .timeout(self.timeout)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CoreError::Config(format!("Gemini rejected model {}: {} {}", self.model, status, body)));
        }
        info!("✅ Gemini backend ready ({})", self.model);
        Ok(())
    }
}

/// Request body for `generateContent`.
pub(crate) fn build_body(messages: &[ChatMessage], tools: &[ToolSpec]) -> Value {
    let mut system = Vec::new();
    let mut contents: Vec<Value> = Vec::new();

    for message in messages {
        match message {
            ChatMessage::System(text) => system.push(text.clone()),
            ChatMessage::User(text) => contents.push(json!({"role": "user", "parts": [{"text": text}]})),
            ChatMessage::Assistant(text) => contents.push(json!({"role": "model", "parts": [{"text": text}]})),
            ChatMessage::ToolCalls(calls) => {
                let parts: Vec<Value> = calls
                    .iter()
                    .map(|c| json!({"functionCall": {"name": c.name, "args": c.arguments}}))
                    .collect();
                contents.push(json!({"role": "model", "parts": parts}));
            }
            ChatMessage::ToolResult { name, content } => {
                let part = json!({"functionResponse": {"name": name, "response": {"result": content}}});
                // All responses of one round travel in a single content block.
                let extends_previous = contents.last().is_some_and(|c| {
                    c["role"] == "user" && c["parts"][0].get("functionResponse").is_some()
                });
                if extends_previous {
                    if let Some(parts) = contents.last_mut().and_then(|c| c["parts"].as_array_mut()) {
                        parts.push(part);
                    }
                } else {
                    contents.push(json!({"role": "user", "parts": [part]}));
                }
            }
        }
    }

    let mut body = json!({ "contents": contents });
    if !system.is_empty() {
        body["systemInstruction"] = json!({"parts": [{"text": system.join("\n\n")}]});
    }
    if !tools.is_empty() {
        let declarations: Vec<Value> = tools.iter().map(declaration).collect();
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
    }
    body
}

fn declaration(spec: &ToolSpec) -> Value {
    let mut decl = json!({"name": spec.name, "description": spec.description});
    // Gemini rejects OBJECT schemas without properties.
    let has_properties = spec.parameters["properties"].as_object().is_some_and(|p| !p.is_empty());
    if has_properties {
        decl["parameters"] = spec.parameters.clone();
    }
    decl
}

fn parse_reply(response: GenerateResponse) -> CoreResult<BackendReply> {
    let parts = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .ok_or_else(|| CoreError::Protocol("Gemini returned no candidates".into()))?;

    let calls: Vec<ToolRequest> = parts
        .iter()
        .filter_map(|p| p.function_call.as_ref())
        .map(|fc| ToolRequest::new(fc.name.clone(), fc.args.clone()))
        .collect();
    if !calls.is_empty() {
        return Ok(BackendReply::ToolCalls(calls));
    }

    let text: String = parts.into_iter().filter_map(|p| p.text).collect();
    Ok(BackendReply::Answer(Box::pin(futures::stream::once(async move { Ok(text) }))))
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn respond(&self, request: &BackendRequest<'_>) -> CoreResult<BackendReply> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = build_body(request.messages, request.tools);
        debug!(target: "jarvis::gemini", round = request.round, "generateContent");

        let res = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CoreError::Backend(format!("Gemini API error {status}: {body}")));
        }
        let parsed: GenerateResponse = res.json().await?;
        parse_reply(parsed)
    }
}
