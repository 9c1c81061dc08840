//! In-memory [`Store`] implementation for tests.
//!
//! Uses `Vec`s and a `HashMap` behind `std::sync::RwLock`. Locks are always
//! taken in the order matches, documents, chunks, vectors. The vector backend starts
//! enabled and can be switched off to exercise the lexical fallback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{Chunk, Document, MatchRecord, NewMatchRecord};

use super::Store;

pub struct InMemoryStore {
    matches: RwLock<Vec<MatchRecord>>,
    documents: RwLock<Vec<Document>>,
    chunks: RwLock<Vec<Chunk>>,
    vectors: RwLock<HashMap<i64, Vec<f32>>>,
    next_id: AtomicI64,
    vector_backend: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            matches: RwLock::new(Vec::new()),
            documents: RwLock::new(Vec::new()),
            chunks: RwLock::new(Vec::new()),
            vectors: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            vector_backend: AtomicBool::new(true),
        }
    }

    /// Store with the vector backend switched on or off.
    pub fn with_vector_backend(enabled: bool) -> Self {
        let store = Self::new();
        store.set_vector_backend(enabled);
        store
    }

    pub fn set_vector_backend(&self, enabled: bool) {
        self.vector_backend.store(enabled, Ordering::SeqCst);
    }

    /// Number of stored vectors.
    pub fn vector_count(&self) -> usize {
        self.vectors.read().map(|v| v.len()).unwrap_or(0)
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

/// Ids of documents owned by `match_id`, or `None` for no filter.
fn documents_of(documents: &[Document], match_id: Option<i64>) -> Option<Vec<i64>> {
    match_id.map(|m| {
        documents
            .iter()
            .filter(|d| d.match_id == Some(m))
            .map(|d| d.id)
            .collect()
    })
}

fn in_scope(scope: &Option<Vec<i64>>, chunk: &Chunk) -> bool {
    scope
        .as_ref()
        .map_or(true, |ids| ids.contains(&chunk.document_id))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_match(&self, record: &NewMatchRecord) -> Result<i64> {
        let id = self.next_id();
        let now = chrono::Utc::now().timestamp();
        write(&self.matches)?.push(MatchRecord::from_new(id, record, now));
        Ok(id)
    }

    async fn find_match_by_file(&self, file_name: &str, file_mtime: i64) -> Result<Option<i64>> {
        Ok(read(&self.matches)?
            .iter()
            .find(|m| m.file_name == file_name && m.file_mtime == file_mtime)
            .map(|m| m.id))
    }

    async fn get_match(&self, id: i64) -> Result<Option<MatchRecord>> {
        Ok(read(&self.matches)?.iter().find(|m| m.id == id).cloned())
    }

    async fn list_matches(&self) -> Result<Vec<MatchRecord>> {
        Ok(read(&self.matches)?.clone())
    }

    async fn delete_match(&self, id: i64) -> Result<()> {
        let mut matches = write(&self.matches)?;
        let mut documents = write(&self.documents)?;
        let mut chunks = write(&self.chunks)?;
        let mut vectors = write(&self.vectors)?;

        matches.retain(|m| m.id != id);
        let owned = documents_of(&documents, Some(id)).unwrap_or_default();
        documents.retain(|d| !owned.contains(&d.id));
        chunks.retain(|c| {
            if owned.contains(&c.document_id) {
                vectors.remove(&c.id);
                false
            } else {
                true
            }
        });
        Ok(())
    }

    async fn insert_document(&self, match_id: Option<i64>, source: &str, text: &str) -> Result<i64> {
        let id = self.next_id();
        write(&self.documents)?.push(Document {
            id,
            match_id,
            source: source.to_string(),
            text: text.to_string(),
            created_at: chrono::Utc::now().timestamp(),
        });
        Ok(id)
    }

    async fn get_document(&self, id: i64) -> Result<Option<Document>> {
        Ok(read(&self.documents)?.iter().find(|d| d.id == id).cloned())
    }

    async fn replace_chunks(&self, document_id: i64, texts: &[String]) -> Result<Vec<Chunk>> {
        if !read(&self.documents)?.iter().any(|d| d.id == document_id) {
            bail!("document {} does not exist", document_id);
        }

        let mut chunks = write(&self.chunks)?;
        let mut vectors = write(&self.vectors)?;
        chunks.retain(|c| {
            if c.document_id == document_id {
                vectors.remove(&c.id);
                false
            } else {
                true
            }
        });

        let mut created = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            let chunk = Chunk {
                id: self.next_id(),
                document_id,
                chunk_index: i as i64,
                text: text.clone(),
            };
            chunks.push(chunk.clone());
            created.push(chunk);
        }
        Ok(created)
    }

    async fn insert_embeddings(&self, embeddings: &[(i64, Vec<f32>)]) -> Result<()> {
        if !self.vector_backend.load(Ordering::SeqCst) {
            bail!("vector backend is not available");
        }
        let chunks = read(&self.chunks)?;
        let mut vectors = write(&self.vectors)?;
        for (chunk_id, vector) in embeddings {
            if !chunks.iter().any(|c| c.id == *chunk_id) {
                bail!("chunk {} does not exist", chunk_id);
            }
            vectors.insert(*chunk_id, vector.clone());
        }
        Ok(())
    }

    async fn vector_backend_available(&self) -> Result<bool> {
        Ok(self.vector_backend.load(Ordering::SeqCst))
    }

    async fn list_chunks(&self, match_id: Option<i64>) -> Result<Vec<Chunk>> {
        let scope = documents_of(&read(&self.documents)?, match_id);
        Ok(read(&self.chunks)?
            .iter()
            .filter(|c| in_scope(&scope, c))
            .cloned()
            .collect())
    }

    async fn vector_candidates(&self, match_id: Option<i64>) -> Result<Vec<(Chunk, Vec<f32>)>> {
        let scope = documents_of(&read(&self.documents)?, match_id);
        let chunks = read(&self.chunks)?;
        let vectors = read(&self.vectors)?;
        Ok(chunks
            .iter()
            .filter(|c| in_scope(&scope, c))
            .filter_map(|c| vectors.get(&c.id).map(|v| (c.clone(), v.clone())))
            .collect())
    }

    async fn chunks_missing_embeddings(&self, limit: usize) -> Result<Vec<Chunk>> {
        let chunks = read(&self.chunks)?;
        let vectors = read(&self.vectors)?;
        Ok(chunks
            .iter()
            .filter(|c| !vectors.contains_key(&c.id))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WinLoss;

    fn record(file_name: &str, mtime: i64) -> NewMatchRecord {
        NewMatchRecord {
            file_name: file_name.to_string(),
            start_date: None,
            character: Some("2".to_string()),
            opponent: Some("20".to_string()),
            stage: Some("31".to_string()),
            duration: 7200,
            stocks_taken: 4,
            openings_per_kill: 3.25,
            win_loss: WinLoss::Win,
            content_hash: "abc".to_string(),
            file_mtime: mtime,
        }
    }

    #[tokio::test]
    async fn test_match_roundtrip_and_dedup_lookup() {
        let store = InMemoryStore::new();
        let id = store.insert_match(&record("Game_1.slp", 100)).await.unwrap();
        assert_eq!(store.find_match_by_file("Game_1.slp", 100).await.unwrap(), Some(id));
        assert_eq!(store.find_match_by_file("Game_1.slp", 101).await.unwrap(), None);
        let stored = store.get_match(id).await.unwrap().unwrap();
        assert_eq!(stored.stocks_taken, 4);
        assert_eq!(store.list_matches().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_chunks_drops_old_chunks_and_vectors() {
        let store = InMemoryStore::new();
        let doc = store.insert_document(None, "user-note", "abc").await.unwrap();
        let first = store
            .replace_chunks(doc, &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        store
            .insert_embeddings(&[(first[0].id, vec![1.0]), (first[1].id, vec![2.0])])
            .await
            .unwrap();
        assert_eq!(store.vector_count(), 2);

        let second = store.replace_chunks(doc, &["c".to_string()]).await.unwrap();
        assert_eq!(store.vector_count(), 0);
        let listed = store.list_chunks(None).await.unwrap();
        assert_eq!(listed, second);
        assert_eq!(listed[0].chunk_index, 0);
    }

    #[tokio::test]
    async fn test_chunks_for_missing_document_rejected() {
        let store = InMemoryStore::new();
        assert!(store.replace_chunks(42, &["x".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn test_embeddings_rejected_without_backend() {
        let store = InMemoryStore::with_vector_backend(false);
        let doc = store.insert_document(None, "user-note", "abc").await.unwrap();
        let chunks = store.replace_chunks(doc, &["abc".to_string()]).await.unwrap();
        assert!(!store.vector_backend_available().await.unwrap());
        assert!(store
            .insert_embeddings(&[(chunks[0].id, vec![1.0])])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_match_scope_and_missing_embeddings() {
        let store = InMemoryStore::new();
        let m1 = store.insert_match(&record("a.slp", 1)).await.unwrap();
        let m2 = store.insert_match(&record("b.slp", 2)).await.unwrap();
        let d1 = store.insert_document(Some(m1), "match-stats", "one").await.unwrap();
        let d2 = store.insert_document(Some(m2), "match-stats", "two").await.unwrap();
        let c1 = store.replace_chunks(d1, &["one".to_string()]).await.unwrap();
        store.replace_chunks(d2, &["two".to_string()]).await.unwrap();
        store.insert_embeddings(&[(c1[0].id, vec![0.5])]).await.unwrap();

        let scoped = store.list_chunks(Some(m2)).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].text, "two");

        let candidates = store.vector_candidates(None).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].0.text, "one");
        assert!(store.vector_candidates(Some(m2)).await.unwrap().is_empty());

        let missing = store.chunks_missing_embeddings(10).await.unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].text, "two");
    }
}
