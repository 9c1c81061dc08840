//! Embedding trait, error taxonomy, and vector utilities.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement.
//! Concrete backends (OpenAI, Ollama) live in the `midset` app crate;
//! this module only fixes the contract:
//!
//! - one backend call per [`embed_batch`] invocation, no internal retry;
//! - output vector `i` corresponds to input text `i`;
//! - a missing credential or disabled backend is reported as
//!   [`EmbeddingError::Unavailable`], distinct from a failed remote call.

use async_trait::async_trait;
use thiserror::Error;

/// Failure of an embedding call. Always recoverable for the caller:
/// retrieval and ingestion keep working without vectors.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// No credential, or the backend is disabled by configuration.
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),
    /// Transport failure or non-success HTTP status.
    #[error("embedding request failed: {0}")]
    Remote(String),
    /// The backend answered, but not with one vector per input.
    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

impl EmbeddingError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, EmbeddingError::Unavailable(_))
    }
}

/// Trait for embedding backends.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts in a single backend call.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Embed `texts` with one backend call, checking the order/length contract.
///
/// An empty batch returns immediately without contacting the backend.
pub async fn embed_batch(
    embedder: &dyn Embedder,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let vectors = embedder.embed(texts).await?;
    if vectors.len() != texts.len() {
        return Err(EmbeddingError::Malformed(format!(
            "expected {} vectors, got {}",
            texts.len(),
            vectors.len()
        )));
    }
    Ok(vectors)
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    embed_batch(embedder, &[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| EmbeddingError::Malformed("empty embedding response".to_string()))
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use midset_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Trailing bytes that do not
/// form a whole `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors,
/// vectors of different lengths, and zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encodes each input's position into its vector.
    struct IndexEmbedder;

    #[async_trait]
    impl Embedder for IndexEmbedder {
        fn model_name(&self) -> &str {
            "index"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts
                .iter()
                .enumerate()
                .map(|(i, t)| vec![i as f32, t.len() as f32])
                .collect())
        }
    }

    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        fn model_name(&self) -> &str {
            "short"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(vec![vec![1.0]])
        }
    }

    #[tokio::test]
    async fn test_embed_batch_preserves_order() {
        let texts: Vec<String> = (0..7).map(|i| "t".repeat(i + 1)).collect();
        let vectors = embed_batch(&IndexEmbedder, &texts).await.unwrap();
        assert_eq!(vectors.len(), texts.len());
        for (i, v) in vectors.iter().enumerate() {
            assert_eq!(v[0], i as f32);
            assert_eq!(v[1], texts[i].len() as f32);
        }
    }

    #[tokio::test]
    async fn test_embed_batch_rejects_count_mismatch() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let err = embed_batch(&ShortEmbedder, &texts).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Malformed(_)));
        assert!(!err.is_unavailable());
    }

    #[tokio::test]
    async fn test_embed_batch_empty_skips_backend() {
        let vectors = embed_batch(&ShortEmbedder, &[]).await.unwrap();
        assert!(vectors.is_empty());
    }

    #[test]
    fn test_cosine_identical() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_blob_ignores_trailing_bytes() {
        let mut blob = vec_to_blob(&[0.5, 4.0]);
        blob.push(0xFF);
        assert_eq!(blob_to_vec(&blob), vec![0.5, 4.0]);
    }
}
