//! The fixed tool table.
//!
//! Model requests are parsed into [`Tool`] (typed arguments, aliases accepted) and run
//! by [`Toolbox`]. Names the table does not know become [`Tool::Unrecognized`] and get a
//! textual answer like any other tool.

use crate::calculator;
use crate::error::{ToolError, ToolResult};
use crate::fs_tools::Sandbox;
use crate::weather::WeatherClient;
use crate::web_browser::WebSearch;
use async_trait::async_trait;
use chrono::{Local, Utc};
use jarvis_core::{JarvisConfig, MemoryStore, SaveOutcome, Speaker, ToolExecutor, ToolRequest, ToolSpec};
use once_cell::sync::Lazy;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const GET_TIME: &str = "get_time";
pub const CALCULATE: &str = "calculate";
pub const LIST_FILES: &str = "list_files";
pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";
pub const CREATE_FOLDER: &str = "create_folder";
pub const GET_WEATHER: &str = "get_weather";
pub const WEB_SEARCH: &str = "web_search";
pub const SAVE_MEMORY: &str = "save_memory";
pub const SEARCH_MEMORY: &str = "search_memory";

/// A parsed tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum Tool {
    GetTime,
    Calculate { expression: String },
    ListFiles,
    ReadFile { filename: String },
    WriteFile { filename: String, content: String },
    CreateFolder { foldername: String },
    GetWeather { city: String },
    WebSearch { query: String },
    SaveMemory { info: String },
    SearchMemory { query: String },
    Unrecognized { name: String },
}

fn required(request: &ToolRequest, keys: &[&str]) -> ToolResult<String> {
    keys.iter()
        .find_map(|k| request.str_arg(k).filter(|v| !v.is_empty()))
        .ok_or_else(|| ToolError::InvalidArguments(format!("{} requires '{}'", request.name, keys[0])))
}

impl Tool {
    /// Parse a request. Short legacy names (`calc`, `get_t`, `read_f`, ...) are accepted.
    pub fn from_request(request: &ToolRequest) -> ToolResult<Self> {
        let tool = match request.name.trim() {
            GET_TIME | "get_t" => Tool::GetTime,
            CALCULATE | "calc" => Tool::Calculate {
                expression: required(request, &["expression", "expr"])?,
            },
            LIST_FILES | "list_f" => Tool::ListFiles,
            READ_FILE | "read_f" => Tool::ReadFile {
                filename: required(request, &["filename", "file", "path"])?,
            },
            WRITE_FILE | "write_f" => Tool::WriteFile {
                filename: required(request, &["filename", "file", "path"])?,
                content: request.str_arg("content").unwrap_or_default(),
            },
            CREATE_FOLDER | "create_dir" => Tool::CreateFolder {
                foldername: required(request, &["foldername", "folder", "path", "name"])?,
            },
            GET_WEATHER | "get_weather_at" => Tool::GetWeather {
                city: required(request, &["city", "location"])?,
            },
            WEB_SEARCH | "search_web" => Tool::WebSearch {
                query: required(request, &["query", "q"])?,
            },
            SAVE_MEMORY | "save_mem" => Tool::SaveMemory {
                info: required(request, &["info", "text", "fact"])?,
            },
            SEARCH_MEMORY => Tool::SearchMemory {
                query: required(request, &["query", "q"])?,
            },
            other => Tool::Unrecognized { name: other.to_string() },
        };
        Ok(tool)
    }

    pub fn name(&self) -> &str {
        match self {
            Tool::GetTime => GET_TIME,
            Tool::Calculate { .. } => CALCULATE,
            Tool::ListFiles => LIST_FILES,
            Tool::ReadFile { .. } => READ_FILE,
            Tool::WriteFile { .. } => WRITE_FILE,
            Tool::CreateFolder { .. } => CREATE_FOLDER,
            Tool::GetWeather { .. } => GET_WEATHER,
            Tool::WebSearch { .. } => WEB_SEARCH,
            Tool::SaveMemory { .. } => SAVE_MEMORY,
            Tool::SearchMemory { .. } => SEARCH_MEMORY,
            Tool::Unrecognized { name } => name,
        }
    }
}

fn spec(name: &str, description: &str, properties: serde_json::Value, required: &[&str]) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        description: description.to_string(),
        parameters: json!({"type": "object", "properties": properties, "required": required}),
    }
}

static TOOL_SPECS: Lazy<Vec<ToolSpec>> = Lazy::new(|| {
    let text = |d: &str| json!({"type": "string", "description": d});
    vec![
        spec(GET_TIME, "Current local date and time.", json!({}), &[]),
        spec(
            CALCULATE,
            "Evaluate an arithmetic expression with numbers, + - * / ^ and parentheses.",
            json!({"expression": text("Expression, e.g. (3+4)*2^3")}),
            &["expression"],
        ),
        spec(LIST_FILES, "List the files on the user's Desktop.", json!({}), &[]),
        spec(
            READ_FILE,
            "Read a text file from the user's Desktop.",
            json!({"filename": text("File name relative to the Desktop")}),
            &["filename"],
        ),
        spec(
            WRITE_FILE,
            "Create or overwrite a text file on the user's Desktop.",
            json!({"filename": text("File name relative to the Desktop"), "content": text("Text to write")}),
            &["filename", "content"],
        ),
        spec(
            CREATE_FOLDER,
            "Create a folder on the user's Desktop.",
            json!({"foldername": text("Folder name relative to the Desktop")}),
            &["foldername"],
        ),
        spec(
            GET_WEATHER,
            "Current weather for a city.",
            json!({"city": text("City name")}),
            &["city"],
        ),
        spec(
            WEB_SEARCH,
            "Search the internet. Use only when the user explicitly asks to search online.",
            json!({"query": text("Short, direct search query")}),
            &["query"],
        ),
        spec(
            SAVE_MEMORY,
            "Remember an explicit, important personal fact about the user.",
            json!({"info": text("The fact to remember")}),
            &["info"],
        ),
        spec(
            SEARCH_MEMORY,
            "Look up what is remembered about the user.",
            json!({"query": text("What to look for")}),
            &["query"],
        ),
    ]
});

/// Declared tools; `web_search` only when it is configured.
pub fn tool_specs(web_search_enabled: bool) -> Vec<ToolSpec> {
    TOOL_SPECS
        .iter()
        .filter(|s| web_search_enabled || s.name != WEB_SEARCH)
        .cloned()
        .collect()
}

/// Runs [`Tool`]s against the sandbox, the network services and the memory store.
pub struct Toolbox {
    sandbox: Sandbox,
    weather: WeatherClient,
    web: Option<WebSearch>,
    memory: Arc<dyn MemoryStore>,
    recall_limit: usize,
    retrieval_distance: f32,
}

impl Toolbox {
    pub fn new(config: &JarvisConfig, client: reqwest::Client, memory: Arc<dyn MemoryStore>) -> ToolResult<Self> {
        let sandbox = Sandbox::from_settings(&config.tools)?;
        let weather = WeatherClient::new(
            client.clone(),
            Duration::from_secs(config.tools.weather_timeout_secs),
            config.language.locale.clone(),
        );
        let web = WebSearch::from_settings(&config.tools, client);
        if web.is_none() {
            warn!("🔍 Web search disabled: set GOOGLE_SEARCH_API_KEY and GOOGLE_SEARCH_CX to enable it");
        }
        info!("🧰 Toolbox ready ({} tools)", tool_specs(web.is_some()).len());
        Ok(Self {
            sandbox,
            weather,
            web,
            memory,
            recall_limit: config.memory.search_limit,
            retrieval_distance: config.memory.retrieval_distance,
        })
    }

    pub async fn run(&self, tool: Tool) -> ToolResult<String> {
        match tool {
            Tool::GetTime => Ok(Local::now().format("It is %H:%M on %A %d/%m/%Y.").to_string()),
            Tool::Calculate { expression } => {
                let value = calculator::evaluate(&expression)?;
                Ok(format!("{expression} = {}", calculator::format_number(value)))
            }
            Tool::ListFiles => {
                let names = self.sandbox.list()?;
                if names.is_empty() {
                    Ok("The Desktop is empty.".to_string())
                } else {
                    Ok(format!("Files: {}", names.join(", ")))
                }
            }
            Tool::ReadFile { filename } => self.sandbox.read(&filename),
            Tool::WriteFile { filename, content } => {
                self.sandbox.write(&filename, &content)?;
                Ok(format!("File '{filename}' saved."))
            }
            Tool::CreateFolder { foldername } => {
                self.sandbox.create_folder(&foldername)?;
                Ok(format!("Folder '{foldername}' created."))
            }
            Tool::GetWeather { city } => Ok(self.weather.current_weather(&city).await?.to_string()),
            Tool::WebSearch { query } => match &self.web {
                Some(web) => web.search(&query).await,
                None => Err(ToolError::NotAvailable(
                    "web search is not configured (GOOGLE_SEARCH_API_KEY / GOOGLE_SEARCH_CX)".into(),
                )),
            },
            Tool::SaveMemory { info } => match self.memory.save(&info, Speaker::User, Utc::now()).await? {
                SaveOutcome::Stored(_) => Ok("Saved to memory.".to_string()),
                SaveOutcome::Duplicate { .. } => Ok("Already in memory.".to_string()),
            },
            Tool::SearchMemory { query } => {
                let facts: Vec<String> = self
                    .memory
                    .search(&query, self.recall_limit)
                    .await?
                    .into_iter()
                    .filter(|h| h.distance < self.retrieval_distance)
                    .map(|h| format!("- {}", h.record.text))
                    .collect();
                if facts.is_empty() {
                    Ok("Nothing relevant in memory.".to_string())
                } else {
                    Ok(facts.join("\n"))
                }
            }
            Tool::Unrecognized { name } => {
                let known: Vec<String> = self.specs().into_iter().map(|s| s.name).collect();
                Ok(format!("Unknown tool '{name}'. Available tools: {}.", known.join(", ")))
            }
        }
    }
}

#[async_trait]
impl ToolExecutor for Toolbox {
    fn specs(&self) -> Vec<ToolSpec> {
        tool_specs(self.web.is_some())
    }

    async fn execute(&self, request: &ToolRequest) -> String {
        let tool = match Tool::from_request(request) {
            Ok(tool) => tool,
            Err(e) => {
                warn!(target: "jarvis::tools", tool = %request.name, error = %e, "Rejected tool call");
                return format!("Error: {e}");
            }
        };
        let name = tool.name().to_string();
        match self.run(tool).await {
            Ok(result) => result,
            Err(e) => {
                warn!(target: "jarvis::tools", tool = %name, error = %e, "Tool failed");
                format!("Error: {e}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(name: &str, args: serde_json::Value) -> ToolRequest {
        ToolRequest::new(name, args)
    }

    #[test]
    fn test_parse_typed_arguments() {
        assert_eq!(
            Tool::from_request(&req("calculate", json!({"expression": "1+1"}))).unwrap(),
            Tool::Calculate { expression: "1+1".into() }
        );
        assert_eq!(
            Tool::from_request(&req("get_weather_at", json!({"city": "Torino"}))).unwrap(),
            Tool::GetWeather { city: "Torino".into() }
        );
        assert_eq!(Tool::from_request(&req("get_t", json!({}))).unwrap(), Tool::GetTime);
    }

    #[test]
    fn test_missing_argument_is_error() {
        assert!(matches!(
            Tool::from_request(&req("read_file", json!({}))),
            Err(ToolError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_unknown_name_is_unrecognized() {
        assert_eq!(
            Tool::from_request(&req("launch_rocket", json!({}))).unwrap(),
            Tool::Unrecognized { name: "launch_rocket".into() }
        );
    }

    #[test]
    fn test_specs_omit_disabled_web_search() {
        let names = |enabled| tool_specs(enabled).into_iter().map(|s| s.name).collect::<Vec<_>>();
        assert!(!names(false).contains(&WEB_SEARCH.to_string()));
        assert!(names(true).contains(&WEB_SEARCH.to_string()));
        assert_eq!(names(true).len(), 10);
    }
}
