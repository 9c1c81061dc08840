//! Storage abstraction for MidSet.
//!
//! The [`Store`] trait covers the persistence the core pipeline needs:
//! match records, documents, chunks, and chunk vectors. The application
//! crate implements it over SQLite; [`memory::InMemoryStore`] backs tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`insert_match`](Store::insert_match) | Persist a summarized match |
//! | [`find_match_by_file`](Store::find_match_by_file) | Dedup lookup by file name and mtime |
//! | [`delete_match`](Store::delete_match) | Remove a match and everything indexed under it |
//! | [`insert_document`](Store::insert_document) | Persist a document body |
//! | [`replace_chunks`](Store::replace_chunks) | Atomically replace a document's chunks |
//! | [`insert_embeddings`](Store::insert_embeddings) | Key vectors to chunk ids |
//! | [`vector_backend_available`](Store::vector_backend_available) | Capability probe |
//! | [`list_chunks`](Store::list_chunks) | Lexical candidates in insertion order |
//! | [`vector_candidates`](Store::vector_candidates) | Chunks that carry a vector |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, Document, MatchRecord, NewMatchRecord};

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a match record, returning its id.
    async fn insert_match(&self, record: &NewMatchRecord) -> Result<i64>;

    /// Id of the match already recorded for this file name and mtime.
    async fn find_match_by_file(&self, file_name: &str, file_mtime: i64) -> Result<Option<i64>>;

    async fn get_match(&self, id: i64) -> Result<Option<MatchRecord>>;

    /// Remove a match together with its documents, their chunks and
    /// vectors, and any notes attached to it. Unknown ids are a no-op.
    async fn delete_match(&self, id: i64) -> Result<()>;

    /// All match records, oldest first.
    async fn list_matches(&self) -> Result<Vec<MatchRecord>>;

    /// Insert a document, returning its id.
    async fn insert_document(&self, match_id: Option<i64>, source: &str, text: &str) -> Result<i64>;

    async fn get_document(&self, id: i64) -> Result<Option<Document>>;

    /// Replace every chunk of `document_id` with `texts` (index = position)
    /// and drop the vectors of the replaced chunks. Readers see either the
    /// old set or the new set, never a mix.
    async fn replace_chunks(&self, document_id: i64, texts: &[String]) -> Result<Vec<Chunk>>;

    /// Store `(chunk_id, vector)` pairs, replacing any existing vector.
    async fn insert_embeddings(&self, embeddings: &[(i64, Vec<f32>)]) -> Result<()>;

    /// Whether the vector index exists and can be used. Checked per call.
    async fn vector_backend_available(&self) -> Result<bool>;

    /// Chunks in insertion order, optionally limited to documents of one match.
    async fn list_chunks(&self, match_id: Option<i64>) -> Result<Vec<Chunk>>;

    /// Chunks that have a vector, with the vector, in insertion order.
    async fn vector_candidates(&self, match_id: Option<i64>) -> Result<Vec<(Chunk, Vec<f32>)>>;

    /// Up to `limit` chunks without a vector, oldest first.
    async fn chunks_missing_embeddings(&self, limit: usize) -> Result<Vec<Chunk>>;
}
