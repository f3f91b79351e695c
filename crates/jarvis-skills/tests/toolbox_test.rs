//! Toolbox dispatch over a temporary sandbox and an in-memory store.

use jarvis_core::{HashingEmbedder, JarvisConfig, MemorySettings, MemoryStore, SledMemoryStore, ToolExecutor, ToolRequest};
use jarvis_skills::Toolbox;
use serde_json::json;
use std::sync::Arc;

struct Fixture {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    memory: Arc<SledMemoryStore>,
    toolbox: Toolbox,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("Desktop");
    let mut config = JarvisConfig::default();
    config.tools.sandbox_root = Some(root.clone());
    config.tools.google_api_key = None;
    config.tools.google_cx = None;

    let memory = Arc::new(
        SledMemoryStore::temporary(&MemorySettings::default(), Arc::new(HashingEmbedder::default())).unwrap(),
    );
    let toolbox = Toolbox::new(&config, reqwest::Client::new(), memory.clone()).expect("toolbox");
    Fixture {
        _dir: dir,
        root,
        memory,
        toolbox,
    }
}

async fn call(fx: &Fixture, name: &str, args: serde_json::Value) -> String {
    fx.toolbox.execute(&ToolRequest::new(name, args)).await
}

#[tokio::test]
async fn test_calculate_nested_arguments() {
    let fx = fixture();
    let out = call(&fx, "calculate", json!({"args": {"expression": "(3+4)*2^3"}})).await;
    assert_eq!(out, "(3+4)*2^3 = 56");
}

#[tokio::test]
async fn test_calculate_rejects_code() {
    let fx = fixture();
    let out = call(&fx, "calculate", json!({"expression": "__import__('os').system('ls')"})).await;
    assert!(out.starts_with("Error:"));
}

#[tokio::test]
async fn test_file_tools_stay_in_sandbox() {
    let fx = fixture();

    assert_eq!(call(&fx, "create_folder", json!({"foldername": "progetti"})).await, "Folder 'progetti' created.");
    let saved = call(&fx, "write_file", json!({"filename": "progetti/idea.txt", "content": "robot"})).await;
    assert_eq!(saved, "File 'progetti/idea.txt' saved.");
    assert_eq!(call(&fx, "read_file", json!({"filename": "progetti/idea.txt"})).await, "robot");
    assert!(fx.root.join("progetti/idea.txt").is_file());

    let listing = call(&fx, "list_files", json!({})).await;
    assert_eq!(listing, "Files: progetti");

    let escape = call(&fx, "write_file", json!({"filename": "../fuori.txt", "content": "x"})).await;
    assert!(escape.starts_with("Error: Permission denied"));
    assert!(!fx.root.parent().unwrap().join("fuori.txt").exists());
}

#[tokio::test]
async fn test_memory_tools_share_the_store() {
    let fx = fixture();

    assert_eq!(call(&fx, "save_memory", json!({"info": "my birthday is on 3 May"})).await, "Saved to memory.");
    assert_eq!(call(&fx, "save_mem", json!({"info": "My birthday is on 3 May."})).await, "Already in memory.");
    assert_eq!(fx.memory.count().await.unwrap(), 1);

    let found = call(&fx, "search_memory", json!({"query": "birthday"})).await;
    assert_eq!(found, "- my birthday is on 3 May");
}

#[tokio::test]
async fn test_unknown_tool_gets_textual_answer() {
    let fx = fixture();
    let out = call(&fx, "launch_rocket", json!({"target": "moon"})).await;
    assert!(out.starts_with("Unknown tool 'launch_rocket'"));
    assert!(out.contains("calculate"));
    assert!(!out.contains("web_search"));
}

#[tokio::test]
async fn test_web_search_disabled_without_keys() {
    let fx = fixture();
    assert!(fx.toolbox.specs().iter().all(|s| s.name != "web_search"));
    let out = call(&fx, "web_search", json!({"query": "rust"})).await;
    assert!(out.starts_with("Error: Tool not available"));
}
