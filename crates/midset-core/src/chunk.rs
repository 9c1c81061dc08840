//! Fixed-size, overlapping text chunker.
//!
//! Splits a document body into windows of `size` characters, each starting
//! `size - overlap` characters after the previous one. Windows are measured
//! in Unicode scalar values, so a multi-byte character is never split.
//!
//! # Algorithm
//!
//! Chunk `i` starts at character offset `i × (size − overlap)` and runs for
//! `min(size, remaining)` characters. Chunking stops once the start offset
//! reaches the end of the text, so empty text yields no chunks.
//!
//! # Example
//!
//! ```rust
//! use midset_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("abcdefghij", 4, 1);
//! assert_eq!(chunks, vec!["abcd", "defg", "ghij", "j"]);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default window size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1200;
/// Default overlap between consecutive windows, in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Rejected `(size, overlap)` combinations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkingParamsError {
    #[error("chunk size must be > 0")]
    ZeroSize,
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}

/// Window size and overlap, validated at the call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingParams {
    pub size: usize,
    pub overlap: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingParams {
    pub fn new(size: usize, overlap: usize) -> Result<Self, ChunkingParamsError> {
        let params = Self { size, overlap };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ChunkingParamsError> {
        if self.size == 0 {
            return Err(ChunkingParamsError::ZeroSize);
        }
        if self.overlap >= self.size {
            return Err(ChunkingParamsError::OverlapTooLarge {
                size: self.size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }

    /// Distance between the start offsets of consecutive chunks.
    pub fn stride(&self) -> usize {
        self.size - self.overlap
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        chunk_text(text, self.size, self.overlap)
    }
}

/// Split `text` into overlapping windows of `size` characters.
///
/// # Panics
///
/// Panics if `overlap >= size`. Callers validate with
/// [`ChunkingParams::validate`] before reaching this function.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    assert!(
        overlap < size,
        "chunk overlap ({}) must be smaller than chunk size ({})",
        overlap,
        size
    );

    // Byte offset of every character, plus the end of the text.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_len = bounds.len() - 1;
    let stride = size - overlap;

    let mut chunks = Vec::with_capacity(char_len / stride + 1);
    let mut start = 0;
    while start < char_len {
        let end = (start + size).min(char_len);
        chunks.push(text[bounds[start]..bounds[end]].to_string());
        start += stride;
    }
    chunks
}
