//! # MidSet Core
//!
//! Shared, I/O-free logic for MidSet: replay decoding, match summaries,
//! text chunking, the embedding trait, the store abstraction, and the
//! retrieval engine that ties them together.
//!
//! This crate contains no tokio, sqlx, HTTP clients, or filesystem access.
//! The `midset` application crate supplies concrete storage and embedding
//! backends and passes them in explicitly.
//!
//! ## Data Flow
//!
//! ```text
//! bytes ──▶ replay::decode ──▶ summary::summarize ──▶ describe::describe_match
//!                                                            │
//!                                                            ▼
//! question ──▶ RetrievalEngine::semantic_search ◀── RetrievalEngine::upsert_document
//!                        │                                   │
//!                        └────────── Store + Embedder ◀──────┘
//! ```

pub mod chunk;
pub mod describe;
pub mod embedding;
pub mod models;
pub mod names;
pub mod replay;
pub mod retrieval;
pub mod store;
pub mod summary;
