//! Semantic memory behaviour over a real Sled database.

use chrono::Utc;
use jarvis_core::{Embedder, HashingEmbedder, MemorySettings, MemoryStore, SaveOutcome, SledMemoryStore, Speaker};
use std::sync::Arc;

fn open(dir: &tempfile::TempDir) -> SledMemoryStore {
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::default());
    SledMemoryStore::open_path(dir.path().join("memoria_db"), &MemorySettings::default(), embedder)
        .expect("Failed to open memory store")
}

#[tokio::test]
async fn test_near_duplicate_saves_keep_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);

    let first = store.save("U: the user likes coffee", Speaker::User, Utc::now()).await.unwrap();
    let second = store.save("U: The user likes coffee!", Speaker::User, Utc::now()).await.unwrap();

    assert!(matches!(first, SaveOutcome::Stored(_)));
    assert!(matches!(second, SaveOutcome::Duplicate { .. }));
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_distinct_facts_are_both_kept() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);

    store.save("U: my sister lives in Naples", Speaker::User, Utc::now()).await.unwrap();
    store.save("AI: the train leaves at nine", Speaker::Ai, Utc::now()).await.unwrap();

    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_search_after_reset_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);

    store.save("U: I was born in Bologna", Speaker::User, Utc::now()).await.unwrap();
    store.save("U: my cat is called Miso", Speaker::User, Utc::now()).await.unwrap();
    assert!(!store.search("Bologna", 3).await.unwrap().is_empty());

    let removed = store.reset().await.unwrap();
    assert_eq!(removed, 2);
    assert!(store.search("Bologna", 3).await.unwrap().is_empty());
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_reset_is_durable() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(&dir);
        store.save("U: I drive a red car", Speaker::User, Utc::now()).await.unwrap();
        store.reset().await.unwrap();
    }
    let store = open(&dir);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_forget_removes_nearest_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);

    store.save("U: my favourite colour is green", Speaker::User, Utc::now()).await.unwrap();
    store.save("U: I work as a nurse", Speaker::User, Utc::now()).await.unwrap();

    let forgotten = store.forget("favourite colour green").await.unwrap();
    assert!(forgotten.unwrap().text.contains("green"));
    assert_eq!(store.count().await.unwrap(), 1);
    let left = store.search("nurse", 3).await.unwrap();
    assert!(left[0].record.text.contains("nurse"));
}

#[tokio::test]
async fn test_concurrent_duplicate_saves_serialize() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open(&dir));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.save("U: I am allergic to peanuts", Speaker::User, Utc::now()).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(store.count().await.unwrap(), 1);
}
