//! Text embeddings for the memory store.
//!
//! All embedders return unit-length vectors, so [`squared_distance`] ranges over 0.0..=4.0
//! and the configured retrieval/dedup thresholds mean the same thing for every backend.

use crate::config::MemorySettings;
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Turns text into a fixed-size unit vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>>;
}

/// Squared euclidean distance. Vectors of different length are maximally distant.
pub fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

/// Offline embedder: signed feature hashing of lowercase words and their character trigrams.
///
/// Lexically close sentences land close together, which is what deduplication and
/// recall of short personal facts need. No model download, fully deterministic.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(16),
        }
    }

    fn features(text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        let mut features = Vec::new();
        for word in lower.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            features.push(format!("w:{word}"));
            let chars: Vec<char> = word.chars().collect();
            for gram in chars.windows(3) {
                features.push(format!("g:{}", gram.iter().collect::<String>()));
            }
        }
        features
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for feature in Self::features(text) {
            let h = fnv1a(feature.as_bytes());
            let idx = (h % self.dimensions as u64) as usize;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        normalize(v)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes.iter().fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}

/// Remote embedder for any OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let mut req = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(15))
            .json(&serde_json::json!({ "model": self.model, "input": text }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CoreError::Embedding(format!("embeddings API error {status}: {body}")));
        }
        let parsed: EmbeddingsResponse = res.json().await?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| CoreError::Embedding("empty embeddings response".into()))?;
        Ok(normalize(embedding))
    }
}

/// Remote embedder when an endpoint is configured, otherwise the local hashing embedder.
pub fn create_embedder(settings: &MemorySettings, client: reqwest::Client) -> Arc<dyn Embedder> {
    match settings.embeddings_url.as_deref() {
        Some(url) => {
            info!("🧬 Using remote embeddings at {} ({})", url, settings.embeddings_model);
            Arc::new(OpenAiEmbedder::new(
                client,
                url,
                settings.embeddings_api_key.clone(),
                settings.embeddings_model.clone(),
                settings.dimensions,
            ))
        }
        None => {
            info!("🧬 Using local hashing embeddings ({} dims)", settings.dimensions);
            Arc::new(HashingEmbedder::new(settings.dimensions))
        }
    }
}
