//! Per-command wiring: the database pool, the SQLite store, the configured
//! embedder, and retrieval engines borrowing them.

use anyhow::Result;
use midset_core::chunk::ChunkingParams;
use midset_core::embedding::Embedder;
use midset_core::retrieval::RetrievalEngine;

use crate::config::Config;
use crate::db;
use crate::embedding::optional_embedder;
use crate::sqlite_store::SqliteStore;

pub struct AppContext {
    pub store: SqliteStore,
    embedder: Option<Box<dyn Embedder>>,
    chunking: ChunkingParams,
}

impl AppContext {
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        Ok(Self {
            store: SqliteStore::new(pool),
            embedder: optional_embedder(&config.embedding)?,
            chunking: config.chunking.params(),
        })
    }

    pub fn embedder(&self) -> Option<&dyn Embedder> {
        self.embedder.as_deref()
    }

    pub fn engine(&self) -> Result<RetrievalEngine<'_, SqliteStore>> {
        let engine = RetrievalEngine::new(&self.store, self.chunking)?;
        Ok(match self.embedder() {
            Some(embedder) => engine.with_embedder(embedder),
            None => engine,
        })
    }

    pub async fn close(self) {
        self.store.pool().close().await;
    }
}
