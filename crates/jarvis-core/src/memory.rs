//! Long-term semantic memory: Sled for persistence, DashMap as the hot search index.
//!
//! Every record is stored once in the `user_memories` tree (JSON, keyed by uuid) and
//! mirrored in memory for brute-force nearest-neighbour search. Writes that depend on
//! a prior read (dedup-then-insert, forget, reset) are serialized by one async mutex.

use crate::config::MemorySettings;
use crate::embeddings::{squared_distance, Embedder};
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

const MEMORY_TREE: &str = "user_memories";

/// Who a memory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Ai,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Ai => write!(f, "ai"),
        }
    }
}

/// One persisted memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub text: String,
    pub speaker: Speaker,
    pub timestamp: DateTime<Utc>,
    pub embedding: Vec<f32>,
}

/// A search hit. Lower distance is closer.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    pub distance: f32,
}

/// Result of a save attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Stored(String),
    /// An existing record was within the dedup distance; nothing was written.
    Duplicate { existing_id: String, distance: f32 },
}

/// Semantic memory used by the generation loop and the memory tools.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn save(&self, text: &str, speaker: Speaker, timestamp: DateTime<Utc>) -> CoreResult<SaveOutcome>;

    /// Up to `limit` nearest records, closest first. No distance cutoff.
    async fn search(&self, query: &str, limit: usize) -> CoreResult<Vec<ScoredRecord>>;

    /// Delete the record nearest to `query`, if it is within the retrieval distance.
    async fn forget(&self, query: &str) -> CoreResult<Option<MemoryRecord>>;

    /// Delete everything. Returns how many records were removed.
    async fn reset(&self) -> CoreResult<usize>;

    async fn count(&self) -> CoreResult<usize>;

    /// Make all completed writes durable.
    async fn flush(&self) -> CoreResult<()>;
}

/// Sled-backed [`MemoryStore`].
pub struct SledMemoryStore {
    db: sled::Db,
    tree: sled::Tree,
    index: DashMap<String, MemoryRecord>,
    embedder: Arc<dyn Embedder>,
    write_lock: Mutex<()>,
    dedup_distance: f32,
    forget_distance: f32,
}

impl SledMemoryStore {
    /// Opens or creates the store at `settings.path`.
    pub fn open(settings: &MemorySettings, embedder: Arc<dyn Embedder>) -> CoreResult<Self> {
        Self::open_path(&settings.path, settings, embedder)
    }

    pub fn open_path<P: AsRef<Path>>(
        path: P,
        settings: &MemorySettings,
        embedder: Arc<dyn Embedder>,
    ) -> CoreResult<Self> {
        let db = sled::open(path.as_ref())?;
        let store = Self::from_db(db, settings, embedder)?;
        info!(
            "🧠 Memory store opened at {} ({} records)",
            path.as_ref().display(),
            store.index.len()
        );
        Ok(store)
    }

    /// In-memory store that is discarded on drop.
    pub fn temporary(settings: &MemorySettings, embedder: Arc<dyn Embedder>) -> CoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, settings, embedder)
    }

    fn from_db(db: sled::Db, settings: &MemorySettings, embedder: Arc<dyn Embedder>) -> CoreResult<Self> {
        let tree = db.open_tree(MEMORY_TREE)?;
        let index = DashMap::new();
        for entry in tree.iter() {
            let (_, value) = entry?;
            let record: MemoryRecord = serde_json::from_slice(&value)?;
            index.insert(record.id.clone(), record);
        }
        Ok(Self {
            db,
            tree,
            index,
            embedder,
            write_lock: Mutex::new(()),
            dedup_distance: settings.dedup_distance,
            forget_distance: settings.retrieval_distance,
        })
    }

    fn nearest(&self, embedding: &[f32], limit: usize) -> Vec<ScoredRecord> {
        let mut scored: Vec<ScoredRecord> = self
            .index
            .iter()
            .map(|entry| ScoredRecord {
                distance: squared_distance(embedding, &entry.value().embedding),
                record: entry.value().clone(),
            })
            .collect();
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(limit);
        scored
    }
}

#[async_trait]
impl MemoryStore for SledMemoryStore {
    async fn save(&self, text: &str, speaker: Speaker, timestamp: DateTime<Utc>) -> CoreResult<SaveOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CoreError::Memory("refusing to store an empty memory".into()));
        }
        let embedding = self.embedder.embed(text).await?;

        let _guard = self.write_lock.lock().await;
        if let Some(closest) = self.nearest(&embedding, 1).into_iter().next() {
            if closest.distance < self.dedup_distance {
                debug!(target: "jarvis::memory", distance = closest.distance, "Skipping near-duplicate memory");
                return Ok(SaveOutcome::Duplicate {
                    existing_id: closest.record.id,
                    distance: closest.distance,
                });
            }
        }

        let record = MemoryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.to_string(),
            speaker,
            timestamp,
            embedding,
        };
        self.tree.insert(record.id.as_bytes(), serde_json::to_vec(&record)?)?;
        let id = record.id.clone();
        self.index.insert(id.clone(), record);
        debug!(target: "jarvis::memory", %id, %speaker, "Memory stored");
        Ok(SaveOutcome::Stored(id))
    }

    async fn search(&self, query: &str, limit: usize) -> CoreResult<Vec<ScoredRecord>> {
        if query.trim().is_empty() || limit == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(query).await?;
        Ok(self.nearest(&embedding, limit))
    }

    async fn forget(&self, query: &str) -> CoreResult<Option<MemoryRecord>> {
        if query.trim().is_empty() {
            return Ok(None);
        }
        let embedding = self.embedder.embed(query).await?;

        let _guard = self.write_lock.lock().await;
        let Some(closest) = self.nearest(&embedding, 1).into_iter().next() else {
            return Ok(None);
        };
        if closest.distance >= self.forget_distance {
            return Ok(None);
        }
        self.tree.remove(closest.record.id.as_bytes())?;
        self.index.remove(&closest.record.id);
        info!("🗑️ Forgot memory: {}", closest.record.text);
        Ok(Some(closest.record))
    }

    async fn reset(&self) -> CoreResult<usize> {
        let _guard = self.write_lock.lock().await;
        let removed = self.index.len();
        self.tree.clear()?;
        self.index.clear();
        self.db.flush_async().await?;
        info!("🧹 Memory reset ({} records removed)", removed);
        Ok(removed)
    }

    async fn count(&self) -> CoreResult<usize> {
        Ok(self.index.len())
    }

    async fn flush(&self) -> CoreResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;

    fn store() -> SledMemoryStore {
        SledMemoryStore::temporary(&MemorySettings::default(), Arc::new(HashingEmbedder::default())).unwrap()
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let s = store();
        assert!(s.save("   ", Speaker::User, Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_search_orders_by_distance() {
        let s = store();
        s.save("I live in Turin", Speaker::User, Utc::now()).await.unwrap();
        s.save("My dog is called Argo", Speaker::User, Utc::now()).await.unwrap();

        let hits = s.search("what is my dog called", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].record.text.contains("Argo"));
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[tokio::test]
    async fn test_forget_ignores_unrelated_query() {
        let s = store();
        s.save("I live in Turin", Speaker::User, Utc::now()).await.unwrap();
        assert!(s.forget("xylophone zebra").await.unwrap().is_none());
        assert_eq!(s.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let settings = MemorySettings::default();
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::default());
        {
            let s = SledMemoryStore::open_path(dir.path(), &settings, embedder.clone()).unwrap();
            s.save("I play the guitar", Speaker::User, Utc::now()).await.unwrap();
            s.flush().await.unwrap();
        }
        let s = SledMemoryStore::open_path(dir.path(), &settings, embedder).unwrap();
        assert_eq!(s.count().await.unwrap(), 1);
    }
}
