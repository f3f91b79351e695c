//! Shared conversation types used by the generation loop, the backends and the tool table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::VecDeque;

/// One message in the prompt sent to a language-model backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    System(String),
    User(String),
    Assistant(String),
    /// The model asked for these tools, in this order.
    ToolCalls(Vec<ToolRequest>),
    /// Result of one tool call, fed back to the model.
    ToolResult { name: String, content: String },
}

/// A tool call requested by the model. Arguments are always a flat JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolRequest {
    /// Build a request from whatever shape the backend sent for the arguments.
    pub fn new(name: impl Into<String>, raw_arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments: normalize_arguments(raw_arguments),
        }
    }

    /// String argument by key, trimmed. Numbers and booleans are rendered as text.
    pub fn str_arg(&self, key: &str) -> Option<String> {
        match self.arguments.get(key)? {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Reduce model-produced arguments to the innermost flat mapping.
///
/// Models sometimes send `{"args": {"city": "Roma"}}`, a JSON-encoded string
/// (`"{\"city\": \"Roma\"}"`), or nothing useful at all. A single-entry object whose
/// value is itself an object (or a string holding one) is unwrapped repeatedly; a
/// string is parsed as JSON; anything that is not an object ends up as an empty map.
pub fn normalize_arguments(raw: Value) -> Map<String, Value> {
    let mut current = raw;
    loop {
        match current {
            Value::String(s) => match serde_json::from_str::<Value>(s.trim()) {
                Ok(parsed @ Value::Object(_)) => current = parsed,
                _ => return Map::new(),
            },
            Value::Object(map) => {
                let inner = if map.len() == 1 {
                    map.values().next().and_then(nested_object)
                } else {
                    None
                };
                match inner {
                    Some(inner) => current = inner,
                    None => return map,
                }
            }
            _ => return Map::new(),
        }
    }
}

fn nested_object(value: &Value) -> Option<Value> {
    match value {
        Value::Object(_) => Some(value.clone()),
        Value::String(s) if s.trim_start().starts_with('{') => {
            serde_json::from_str::<Value>(s.trim()).ok().filter(Value::is_object)
        }
        _ => None,
    }
}

/// Declaration of a tool offered to the model (JSON-schema parameters).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A dispatched tool call and its textual result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub request: ToolRequest,
    pub result: String,
}

/// One completed exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub user_text: String,
    pub invocations: Vec<ToolInvocation>,
    pub answer: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Rolling window over the most recent completed turns.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<Turn>,
    capacity: usize,
}

impl ConversationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append a completed turn, evicting the oldest one past capacity.
    pub fn push(&mut self, turn: Turn) {
        if self.turns.len() == self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Replay as alternating user/assistant messages, oldest first.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .flat_map(|t| {
                [
                    ChatMessage::User(t.user_text.clone()),
                    ChatMessage::Assistant(t.answer.clone()),
                ]
            })
            .collect()
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// The fixed tool table as seen by the generation loop.
///
/// `execute` never fails: unknown tools, bad arguments and tool errors all come back
/// as text so the model can read them on the next round.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tools currently offered to the model.
    fn specs(&self) -> Vec<ToolSpec>;

    async fn execute(&self, request: &ToolRequest) -> String;
}
