//! Document indexing and similarity search over the [`Store`] trait.
//!
//! The engine picks one of two modes per call:
//!
//! ```text
//!  [capability probe] --unavailable--> LEXICAL
//!  [capability probe] --available----> VECTOR
//! ```
//!
//! **Vector** mode embeds the query, ranks chunk vectors by ascending cosine
//! distance, and reports the cosine similarity as the score. **Lexical**
//! mode scores a chunk `1` when its lowercase text contains the lowercase
//! query and `0` otherwise, keeping insertion order among equal scores.
//!
//! The probe is the store's [`vector_backend_available`](Store::vector_backend_available)
//! plus a configured embedder. It is not cached: the vector index can be
//! created or dropped while the process runs.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

use crate::chunk::{ChunkingParams, ChunkingParamsError};
use crate::embedding::{cosine_similarity, embed_batch, embed_query, Embedder};
use crate::models::Chunk;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Vector,
    Lexical,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Vector => f.write_str("vector"),
            SearchMode::Lexical => f.write_str("lexical"),
        }
    }
}

/// One ranked chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Chunk id.
    pub id: i64,
    pub document_id: i64,
    pub text: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub mode: SearchMode,
    pub hits: Vec<SearchHit>,
}

/// Result of indexing one document.
#[derive(Debug, Clone, Serialize)]
pub struct UpsertOutcome {
    pub document_id: i64,
    pub chunk_ids: Vec<i64>,
    pub embeddings_written: usize,
    /// Why vectors were not written, when embedding was attempted and failed.
    pub embedding_error: Option<String>,
}

pub struct RetrievalEngine<'a, S: Store + ?Sized> {
    store: &'a S,
    embedder: Option<&'a dyn Embedder>,
    chunking: ChunkingParams,
}

impl<'a, S: Store + ?Sized> RetrievalEngine<'a, S> {
    /// Engine without an embedder: always lexical.
    pub fn new(store: &'a S, chunking: ChunkingParams) -> Result<Self, ChunkingParamsError> {
        chunking.validate()?;
        Ok(Self {
            store,
            embedder: None,
            chunking,
        })
    }

    pub fn with_embedder(mut self, embedder: &'a dyn Embedder) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Run the capability probe.
    pub async fn mode(&self) -> Result<SearchMode> {
        if self.embedder.is_none() {
            return Ok(SearchMode::Lexical);
        }
        let available = self
            .store
            .vector_backend_available()
            .await
            .context("vector backend probe failed")?;
        Ok(if available {
            SearchMode::Vector
        } else {
            SearchMode::Lexical
        })
    }

    /// Create a document, chunk it, and embed the chunks when vector mode
    /// is available. An embedding failure leaves the chunks in place.
    pub async fn upsert_document(
        &self,
        match_id: Option<i64>,
        source: &str,
        text: &str,
    ) -> Result<UpsertOutcome> {
        let document_id = self
            .store
            .insert_document(match_id, source, text)
            .await
            .context("failed to insert document")?;
        let outcome = self.index(document_id, text).await?;
        tracing::info!(
            document_id,
            source,
            chunks = outcome.chunk_ids.len(),
            embeddings = outcome.embeddings_written,
            "indexed document"
        );
        Ok(outcome)
    }

    /// Regenerate the chunks (and vectors) of an existing document.
    pub async fn reindex_document(&self, document_id: i64) -> Result<UpsertOutcome> {
        let Some(doc) = self.store.get_document(document_id).await? else {
            bail!("document {} not found", document_id);
        };
        self.index(doc.id, &doc.text).await
    }

    async fn index(&self, document_id: i64, text: &str) -> Result<UpsertOutcome> {
        let texts = self.chunking.chunk(text);
        let chunks = self
            .store
            .replace_chunks(document_id, &texts)
            .await
            .with_context(|| format!("failed to store chunks for document {}", document_id))?;

        let mut outcome = UpsertOutcome {
            document_id,
            chunk_ids: chunks.iter().map(|c| c.id).collect(),
            embeddings_written: 0,
            embedding_error: None,
        };

        let embedder = match (self.mode().await?, self.embedder) {
            (SearchMode::Vector, Some(embedder)) => embedder,
            _ => return Ok(outcome),
        };
        match embed_batch(embedder, &texts).await {
            Ok(vectors) => {
                let pairs: Vec<(i64, Vec<f32>)> = chunks.iter().map(|c| c.id).zip(vectors).collect();
                self.store
                    .insert_embeddings(&pairs)
                    .await
                    .context("failed to store embeddings")?;
                outcome.embeddings_written = pairs.len();
            }
            Err(e) => {
                tracing::warn!(document_id, error = %e, "embedding failed; chunks kept without vectors");
                outcome.embedding_error = Some(e.to_string());
            }
        }
        Ok(outcome)
    }

    /// Top-`k` chunks for `query`, optionally limited to one match.
    pub async fn semantic_search(
        &self,
        query: &str,
        k: usize,
        match_id: Option<i64>,
    ) -> Result<SearchResponse> {
        let mode = self.mode().await?;
        if query.trim().is_empty() || k == 0 {
            return Ok(SearchResponse {
                mode,
                hits: Vec::new(),
            });
        }

        if let (SearchMode::Vector, Some(embedder)) = (mode, self.embedder) {
            match embed_query(embedder, query).await {
                Ok(query_vec) => {
                    let candidates = self.store.vector_candidates(match_id).await?;
                    return Ok(SearchResponse {
                        mode: SearchMode::Vector,
                        hits: rank_by_distance(&query_vec, candidates, k),
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "query embedding failed; using lexical search");
                }
            }
        }

        let chunks = self.store.list_chunks(match_id).await?;
        Ok(SearchResponse {
            mode: SearchMode::Lexical,
            hits: rank_lexical(query, chunks, k),
        })
    }
}

/// Substring scoring with a stable sort, so ties keep insertion order.
pub fn rank_lexical(query: &str, chunks: Vec<Chunk>, k: usize) -> Vec<SearchHit> {
    let needle = query.to_lowercase();
    let mut hits: Vec<SearchHit> = chunks
        .into_iter()
        .map(|c| {
            let score = if c.text.to_lowercase().contains(&needle) {
                1.0
            } else {
                0.0
            };
            hit(c, score)
        })
        .collect();
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    hits.truncate(k);
    hits
}

/// Rank by ascending cosine distance; the score is the similarity.
pub fn rank_by_distance(query_vec: &[f32], candidates: Vec<(Chunk, Vec<f32>)>, k: usize) -> Vec<SearchHit> {
    let mut scored: Vec<(f32, Chunk)> = candidates
        .into_iter()
        .map(|(c, v)| (cosine_similarity(query_vec, &v), c))
        .collect();
    scored.sort_by(|a, b| {
        let (da, db) = (1.0 - a.0, 1.0 - b.0);
        da.partial_cmp(&db).unwrap_or(Ordering::Equal)
    });
    scored
        .into_iter()
        .take(k)
        .map(|(sim, c)| hit(c, f64::from(sim)))
        .collect()
}

fn hit(chunk: Chunk, score: f64) -> SearchHit {
    SearchHit {
        id: chunk.id,
        document_id: chunk.document_id,
        text: chunk.text,
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingError;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;

    /// Two keyword counts plus a small constant component.
    struct KeywordEmbedder;

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keyword"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![t.matches("fox").count() as f32, t.matches("marth").count() as f32, 0.1]
                })
                .collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Unavailable("OPENAI_API_KEY not set".to_string()))
        }
    }

    #[tokio::test]
    async fn test_degraded_retrieval_scores_substring_matches() {
        let store = InMemoryStore::with_vector_backend(false);
        let engine = RetrievalEngine::new(&store, ChunkingParams::default())
            .unwrap()
            .with_embedder(&KeywordEmbedder);
        for text in ["first note", "second has ABC inside", "third note", "fourth"] {
            engine.upsert_document(None, "user-note", text).await.unwrap();
        }

        let response = engine.semantic_search("abc", 5, None).await.unwrap();
        assert_eq!(response.mode, SearchMode::Lexical);
        let texts: Vec<&str> = response.hits.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["second has ABC inside", "first note", "third note", "fourth"]);
        let scores: Vec<f64> = response.hits.iter().map(|h| h.score).collect();
        assert_eq!(scores, vec![1.0, 0.0, 0.0, 0.0]);

        let top2 = engine.semantic_search("abc", 2, None).await.unwrap();
        assert_eq!(top2.hits.len(), 2);
        assert_eq!(top2.hits[1].text, "first note");
    }

    #[tokio::test]
    async fn test_upsert_3000_chars_writes_three_chunks_and_vectors() {
        let store = InMemoryStore::new();
        let engine = RetrievalEngine::new(&store, ChunkingParams::default())
            .unwrap()
            .with_embedder(&KeywordEmbedder);
        let text = "fox ".repeat(750);
        assert_eq!(text.chars().count(), 3000);

        let outcome = engine.upsert_document(Some(1), "match-stats", &text).await.unwrap();
        assert_eq!(outcome.chunk_ids.len(), 3);
        assert_eq!(outcome.embeddings_written, 3);
        assert!(outcome.embedding_error.is_none());

        let chunks = store.list_chunks(None).await.unwrap();
        let indices: Vec<i64> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        let vectored: Vec<i64> = store
            .vector_candidates(None)
            .await
            .unwrap()
            .iter()
            .map(|(c, _)| c.id)
            .collect();
        assert_eq!(vectored, outcome.chunk_ids);
    }

    #[tokio::test]
    async fn test_embedding_failure_keeps_chunks_searchable() {
        let store = InMemoryStore::new();
        let engine = RetrievalEngine::new(&store, ChunkingParams::default())
            .unwrap()
            .with_embedder(&FailingEmbedder);
        let outcome = engine
            .upsert_document(None, "user-note", "practice ledge dash")
            .await
            .unwrap();
        assert_eq!(outcome.chunk_ids.len(), 1);
        assert_eq!(outcome.embeddings_written, 0);
        assert!(outcome.embedding_error.unwrap().contains("OPENAI_API_KEY"));
        assert_eq!(store.vector_count(), 0);

        // Probe says vector, but the query cannot be embedded.
        let response = engine.semantic_search("ledge", 5, None).await.unwrap();
        assert_eq!(response.mode, SearchMode::Lexical);
        assert_eq!(response.hits[0].score, 1.0);
    }

    #[tokio::test]
    async fn test_vector_ranking_by_distance() {
        let store = InMemoryStore::new();
        let engine = RetrievalEngine::new(&store, ChunkingParams::default())
            .unwrap()
            .with_embedder(&KeywordEmbedder);
        engine.upsert_document(None, "user-note", "marth marth").await.unwrap();
        engine.upsert_document(None, "user-note", "fox fox fox").await.unwrap();
        engine.upsert_document(None, "user-note", "fox and marth").await.unwrap();

        let response = engine.semantic_search("fox", 2, None).await.unwrap();
        assert_eq!(response.mode, SearchMode::Vector);
        assert_eq!(response.hits.len(), 2);
        assert_eq!(response.hits[0].text, "fox fox fox");
        assert_eq!(response.hits[1].text, "fox and marth");
        assert!(response.hits[0].score > response.hits[1].score);
        assert!(response.hits[0].score <= 1.0 + 1e-6);
    }

    #[tokio::test]
    async fn test_match_scope_applies_in_both_modes() {
        let store = InMemoryStore::new();
        let engine = RetrievalEngine::new(&store, ChunkingParams::default())
            .unwrap()
            .with_embedder(&KeywordEmbedder);
        engine.upsert_document(Some(1), "match-stats", "fox game one").await.unwrap();
        engine.upsert_document(Some(2), "match-stats", "fox game two").await.unwrap();
        engine.upsert_document(None, "user-note", "fox general").await.unwrap();

        let vector = engine.semantic_search("fox", 10, Some(2)).await.unwrap();
        assert_eq!(vector.mode, SearchMode::Vector);
        assert_eq!(vector.hits.len(), 1);
        assert_eq!(vector.hits[0].text, "fox game two");

        store.set_vector_backend(false);
        let lexical = engine.semantic_search("fox", 10, Some(1)).await.unwrap();
        assert_eq!(lexical.mode, SearchMode::Lexical);
        assert_eq!(lexical.hits.len(), 1);
        assert_eq!(lexical.hits[0].text, "fox game one");
    }

    #[tokio::test]
    async fn test_empty_query_and_zero_k_return_nothing() {
        let store = InMemoryStore::with_vector_backend(false);
        let engine = RetrievalEngine::new(&store, ChunkingParams::default()).unwrap();
        engine.upsert_document(None, "user-note", "anything").await.unwrap();
        assert!(engine.semantic_search("   ", 5, None).await.unwrap().hits.is_empty());
        assert!(engine.semantic_search("any", 0, None).await.unwrap().hits.is_empty());
    }

    #[tokio::test]
    async fn test_reindex_replaces_chunks_and_vectors() {
        let store = InMemoryStore::new();
        let engine = RetrievalEngine::new(&store, ChunkingParams::new(10, 2).unwrap())
            .unwrap()
            .with_embedder(&KeywordEmbedder);
        let first = engine
            .upsert_document(None, "user-note", "fox fox fox fox fox")
            .await
            .unwrap();
        let second = engine.reindex_document(first.document_id).await.unwrap();
        assert_eq!(second.chunk_ids.len(), first.chunk_ids.len());
        assert!(second.chunk_ids.iter().all(|id| !first.chunk_ids.contains(id)));
        assert_eq!(store.vector_count(), second.chunk_ids.len());

        assert!(engine.reindex_document(9999).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_document_has_no_chunks() {
        let store = InMemoryStore::new();
        let engine = RetrievalEngine::new(&store, ChunkingParams::default())
            .unwrap()
            .with_embedder(&KeywordEmbedder);
        let outcome = engine.upsert_document(None, "user-note", "").await.unwrap();
        assert!(outcome.chunk_ids.is_empty());
        assert_eq!(outcome.embeddings_written, 0);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_keep_chunk_sequences_apart() {
        let store = InMemoryStore::new();
        let params = ChunkingParams { size: 30, overlap: 5 };
        let engine = RetrievalEngine::new(&store, params)
            .unwrap()
            .with_embedder(&KeywordEmbedder);
        let texts: Vec<String> = ["fox ", "marth ", "fox marth "]
            .iter()
            .map(|w| w.repeat(25))
            .collect();

        // A reader racing the writers sees each document whole or not at all.
        let reader = async {
            for _ in 0..10 {
                let chunks = store.list_chunks(None).await.unwrap();
                for doc in document_ids(&chunks) {
                    let text = store.get_document(doc).await.unwrap().unwrap().text;
                    let n = chunks.iter().filter(|c| c.document_id == doc).count();
                    assert_eq!(n, params.chunk(&text).len());
                }
                tokio::task::yield_now().await;
            }
        };
        let (a, b, c, ()) = tokio::join!(
            engine.upsert_document(Some(1), "match-stats", &texts[0]),
            engine.upsert_document(Some(2), "match-stats", &texts[1]),
            engine.upsert_document(None, "user-note", &texts[2]),
            reader,
        );

        let all = store.list_chunks(None).await.unwrap();
        for (outcome, text) in [a.unwrap(), b.unwrap(), c.unwrap()].iter().zip(&texts) {
            let expected = params.chunk(text);
            let own: Vec<&Chunk> = all
                .iter()
                .filter(|c| c.document_id == outcome.document_id)
                .collect();
            let indices: Vec<i64> = own.iter().map(|c| c.chunk_index).collect();
            assert_eq!(indices, (0..expected.len() as i64).collect::<Vec<_>>());
            let got: Vec<&str> = own.iter().map(|c| c.text.as_str()).collect();
            assert_eq!(got, expected);
            assert_eq!(outcome.embeddings_written, expected.len());
        }
        assert_eq!(store.vector_count(), all.len());
    }

    fn document_ids(chunks: &[Chunk]) -> Vec<i64> {
        let mut ids: Vec<i64> = chunks.iter().map(|c| c.document_id).collect();
        ids.dedup();
        ids
    }

    #[test]
    fn test_invalid_chunking_rejected_at_construction() {
        let store = InMemoryStore::new();
        assert!(RetrievalEngine::new(&store, ChunkingParams { size: 5, overlap: 5 }).is_err());
    }
}
