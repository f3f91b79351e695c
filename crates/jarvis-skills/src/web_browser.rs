//! Web search summary via the Google Custom Search JSON API.
//!
//! Requires `GOOGLE_SEARCH_API_KEY` and `GOOGLE_SEARCH_CX`; without them the tool is
//! left out of the table entirely.

use crate::error::{ToolError, ToolResult};
use jarvis_core::ToolSettings;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
}

pub struct WebSearch {
    client: reqwest::Client,
    api_key: String,
    cx: String,
    results: usize,
    retries: usize,
    retry_delay: Duration,
    max_chars: usize,
    country: String,
    language: String,
}

impl WebSearch {
    /// `None` when either key is missing.
    pub fn from_settings(settings: &ToolSettings, client: reqwest::Client) -> Option<Self> {
        let api_key = settings.google_api_key.clone()?;
        let cx = settings.google_cx.clone()?;
        Some(Self {
            client,
            api_key,
            cx,
            results: settings.search_results.clamp(1, 10),
            retries: settings.search_retries.max(1),
            retry_delay: Duration::from_millis(settings.search_retry_delay_ms),
            max_chars: settings.max_search_chars,
            country: settings.search_country.clone(),
            language: settings.search_language.clone(),
        })
    }

    /// Summary lines `- title: snippet`. Empty result pages are retried.
    pub async fn search(&self, query: &str) -> ToolResult<String> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidArguments("a search query is required".into()));
        }

        for attempt in 1..=self.retries {
            let items = self.fetch(query).await?;
            if !items.is_empty() {
                debug!(target: "jarvis::web_search", %query, results = items.len(), "Search ok");
                return Ok(format_results(&items, self.max_chars));
            }
            if attempt < self.retries {
                warn!(target: "jarvis::web_search", %query, attempt, "No results, retrying");
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        Ok(format!("No results found for '{query}'."))
    }

    async fn fetch(&self, query: &str) -> ToolResult<Vec<SearchItem>> {
        let num = self.results.to_string();
        let res = self
            .client
            .get(SEARCH_URL)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.cx.as_str()),
                ("q", query),
                ("num", num.as_str()),
                ("gl", self.country.as_str()),
                ("lr", self.language.as_str()),
            ])
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ToolError::Upstream(format!("search API error {status}: {body}")));
        }
        let parsed: SearchResponse = res.json().await?;
        Ok(parsed.items)
    }
}

/// One line per hit, whitespace collapsed, capped at `max_chars` characters.
pub fn format_results(items: &[SearchItem], max_chars: usize) -> String {
    let text = items
        .iter()
        .map(|item| {
            let snippet: String = item.snippet.split_whitespace().collect::<Vec<_>>().join(" ");
            format!("- {}: {}", item.title.trim(), snippet)
        })
        .collect::<Vec<_>>()
        .join("\n");
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, snippet: &str) -> SearchItem {
        SearchItem {
            title: title.into(),
            snippet: snippet.into(),
        }
    }

    #[test]
    fn test_format_lines() {
        let out = format_results(&[item("Rust", "A language\n empowering  everyone"), item("Tokio", "Async")], 1500);
        assert_eq!(out, "- Rust: A language empowering everyone\n- Tokio: Async");
    }

    #[test]
    fn test_format_truncates() {
        let out = format_results(&[item("Title", &"x".repeat(5000))], 1500);
        assert_eq!(out.chars().count(), 1500);
    }

    #[test]
    fn test_disabled_without_keys() {
        let mut settings = ToolSettings::default();
        assert!(WebSearch::from_settings(&settings, reqwest::Client::new()).is_none());
        settings.google_api_key = Some("key".into());
        assert!(WebSearch::from_settings(&settings, reqwest::Client::new()).is_none());
        settings.google_cx = Some("cx".into());
        assert!(WebSearch::from_settings(&settings, reqwest::Client::new()).is_some());
    }
}
