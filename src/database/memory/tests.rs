use super::*;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};

fn chunk_set(key: SourceKey, chatbot_id: i64, texts: &[&str], vector: &[f32]) -> Vec<ChunkRecord> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| ChunkRecord {
            key,
            chatbot_id,
            chunk_index: i as u32,
            text: (*text).to_string(),
            embedding: vector.to_vec(),
            metadata: serde_json::json!({ "filename": "notes.txt" }),
            updated_at: Utc::now(),
        })
        .collect()
}

#[tokio::test]
async fn replace_swaps_whole_set() {
    let store = MemoryVectorStore::new();
    let key = SourceKey::document(1, 42);

    let stored = store
        .replace_chunks(&key, chunk_set(key, 5, &["a", "b", "c"], &[1.0, 0.0]))
        .await
        .expect("should store chunks");
    assert_eq!(stored, 3);

    store
        .replace_chunks(&key, chunk_set(key, 5, &["d"], &[0.0, 1.0]))
        .await
        .expect("should replace chunks");

    let chunks = store.chunks_for_key(&key).await.expect("should list chunks");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "d");
    assert_eq!(store.count_by_key(&key).await.expect("should count"), 1);
}

#[tokio::test]
async fn replace_rejects_foreign_chunks() {
    let store = MemoryVectorStore::new();
    let key = SourceKey::document(1, 42);
    let other = SourceKey::document(1, 43);

    let result = store
        .replace_chunks(&key, chunk_set(other, 5, &["x"], &[1.0]))
        .await;

    assert!(matches!(result, Err(SyncError::Consistency(_))));
    assert_eq!(store.count_by_key(&key).await.expect("should count"), 0);
}

#[tokio::test]
async fn delete_by_key_is_idempotent() {
    let store = MemoryVectorStore::new();
    let key = SourceKey::link(1, 9);

    store
        .replace_chunks(&key, chunk_set(key, 5, &["a", "b"], &[1.0, 1.0]))
        .await
        .expect("should store chunks");

    assert_eq!(store.delete_by_key(&key).await.expect("should delete"), 2);
    assert_eq!(store.delete_by_key(&key).await.expect("should delete"), 0);
}

#[tokio::test]
async fn delete_by_chatbot_and_tenant() {
    let store = MemoryVectorStore::new();
    let bot_five = SourceKey::document(1, 1);
    let bot_six = SourceKey::document(1, 2);
    let other_tenant = SourceKey::document(2, 1);

    for (key, chatbot) in [(bot_five, 5), (bot_six, 6), (other_tenant, 5)] {
        store
            .replace_chunks(&key, chunk_set(key, chatbot, &["a", "b"], &[1.0, 0.0]))
            .await
            .expect("should store chunks");
    }

    assert_eq!(store.count_by_chatbot(1, 5).await.expect("should count"), 2);
    assert_eq!(store.delete_by_chatbot(1, 5).await.expect("should delete"), 2);
    assert_eq!(store.count_by_key(&bot_six).await.expect("should count"), 2);
    assert_eq!(store.count_by_key(&other_tenant).await.expect("should count"), 2);

    assert_eq!(store.delete_by_tenant(1).await.expect("should delete"), 2);
    let counts = store.source_chunk_counts().await.expect("should count");
    assert_eq!(counts.len(), 1);
    assert_eq!(counts.get(&other_tenant), Some(&2));
}

#[tokio::test]
async fn search_is_tenant_scoped_and_thresholded() {
    let store = MemoryVectorStore::new();
    let close = SourceKey::document(1, 1);
    let far = SourceKey::document(1, 2);
    let foreign = SourceKey::document(2, 1);

    store
        .replace_chunks(&close, chunk_set(close, 5, &["close"], &[1.0, 0.1]))
        .await
        .expect("should store chunks");
    store
        .replace_chunks(&far, chunk_set(far, 5, &["far"], &[0.0, 1.0]))
        .await
        .expect("should store chunks");
    store
        .replace_chunks(&foreign, chunk_set(foreign, 5, &["foreign"], &[1.0, 0.0]))
        .await
        .expect("should store chunks");

    let hits = store
        .search(1, &[1.0, 0.0], 10, &SearchFilters::default())
        .await
        .expect("should search");
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].chunk.text, "close");
    assert!(hits.iter().all(|h| h.chunk.key.tenant_id == 1));

    let filtered = store
        .search(1, &[1.0, 0.0], 10, &SearchFilters::for_chatbot(5).with_min_score(0.7))
        .await
        .expect("should search");
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].chunk.text, "close");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_search_never_sees_mixed_versions() {
    let store = Arc::new(MemoryVectorStore::new());
    let key = SourceKey::document(1, 42);
    let old = chunk_set(key, 5, &["old", "old", "old", "old"], &[1.0, 0.0]);
    let new = chunk_set(key, 5, &["new", "new"], &[1.0, 0.0]);
    store
        .replace_chunks(&key, old.clone())
        .await
        .expect("should store chunks");

    let done = Arc::new(AtomicBool::new(false));
    let writer = {
        let store = Arc::clone(&store);
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            for i in 0..200 {
                let set = if i % 2 == 0 { new.clone() } else { old.clone() };
                store
                    .replace_chunks(&key, set)
                    .await
                    .expect("should replace chunks");
                tokio::task::yield_now().await;
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    while !done.load(Ordering::SeqCst) {
        let hits = store
            .search(1, &[1.0, 0.0], 10, &SearchFilters::default())
            .await
            .expect("should search");
        let olds = hits.iter().filter(|h| h.chunk.text == "old").count();
        let news = hits.iter().filter(|h| h.chunk.text == "new").count();
        assert!(
            (olds == 4 && news == 0) || (olds == 0 && news == 2),
            "observed mixed or partial chunk set: {} old, {} new",
            olds,
            news
        );
        tokio::task::yield_now().await;
    }

    writer.await.expect("writer should finish");
}
