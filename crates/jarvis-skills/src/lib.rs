//! jarvis-skills: the tools Jarvis can call while answering.

pub mod calculator;
pub mod error;
pub mod fs_tools;
pub mod tools;
pub mod weather;
pub mod web_browser;

pub use error::{ToolError, ToolResult};
pub use fs_tools::Sandbox;
pub use tools::{tool_specs, Tool, Toolbox};
pub use weather::{WeatherClient, WeatherReport};
pub use web_browser::WebSearch;
