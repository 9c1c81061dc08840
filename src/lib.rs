//! # MidSet
//!
//! Local-first statistics and retrieval over Slippi replay files.
//!
//! Replays are decoded and summarized by [`midset_core`]; this crate adds
//! everything that touches the outside world: TOML configuration, the
//! SQLite database, HTTP embedding backends, filesystem scanning, and the
//! `midset` CLI.
//!
//! ## Data flow
//!
//! ```text
//! .slp files ──▶ ingest ──▶ matches ──▶ "match-stats" document ─┐
//! notes ──────────────────────────────▶ "user-note" document ───┤
//!                                                               ▼
//!                                          chunks (+ chunk_vectors)
//!                                                               │
//!                                     search ◀── vector | lexical
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Schema creation and full reset |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` trait |
//! | [`embedding`] | Disabled, OpenAI, and Ollama embedding backends |
//! | [`context`] | Per-command store, embedder, and engine wiring |
//! | [`ingest`] | Replay scanning, dedup, decoding, and storage |
//! | [`matches`] | Match listing and detail |
//! | [`notes`] | Free-text and transcribed notes |
//! | [`search`] | Query entry point |
//! | [`embed_cmd`] | Vector backfill with retry |

pub mod config;
pub mod context;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod ingest;
pub mod matches;
pub mod migrate;
pub mod notes;
pub mod search;
pub mod sqlite_store;

pub use midset_core::{models, store};
