//! `midset embed pending`: backfill vectors for chunks stored without one.
//! `midset embed reindex`: re-chunk one stored document and embed it again.
//!
//! Embedders make exactly one request per call, so the retry loop lives
//! here: transient failures back off exponentially (1s, 2s, 4s, ...
//! capped at 32s) up to `max_retries` times. `Unavailable` is not retried.

use anyhow::{bail, Result};
use std::time::Duration;

use midset_core::embedding::{embed_batch, Embedder, EmbeddingError};
use midset_core::store::Store;

use crate::config::Config;
use crate::context::AppContext;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EmbedReport {
    pub total: usize,
    pub embedded: usize,
    pub failed: usize,
}

/// Retry schedule for one batch.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }
}

/// Embed `texts`, retrying transient failures per `policy`.
pub async fn embed_with_retry(
    embedder: &dyn Embedder,
    texts: &[String],
    policy: RetryPolicy,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let mut attempt = 0;
    loop {
        match embed_batch(embedder, texts).await {
            Ok(vectors) => return Ok(vectors),
            Err(e) if e.is_unavailable() || attempt >= policy.max_retries => return Err(e),
            Err(e) => {
                attempt += 1;
                let delay = policy.delay(attempt);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "embedding batch failed; retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

pub async fn embed_pending<S: Store + ?Sized>(
    store: &S,
    embedder: &dyn Embedder,
    batch_size: usize,
    limit: Option<usize>,
    policy: RetryPolicy,
) -> Result<EmbedReport> {
    if !store.vector_backend_available().await? {
        bail!("Vector table is missing. Run `midset init` with an embedding provider configured.");
    }

    let pending = store
        .chunks_missing_embeddings(limit.unwrap_or(usize::MAX))
        .await?;
    let mut report = EmbedReport {
        total: pending.len(),
        ..EmbedReport::default()
    };

    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        match embed_with_retry(embedder, &texts, policy).await {
            Ok(vectors) => {
                let pairs: Vec<(i64, Vec<f32>)> = batch.iter().map(|c| c.id).zip(vectors).collect();
                store.insert_embeddings(&pairs).await?;
                report.embedded += pairs.len();
            }
            Err(e) => {
                tracing::warn!(chunks = batch.len(), error = %e, "embedding batch failed");
                report.failed += batch.len();
                if e.is_unavailable() {
                    report.failed += pending.len() - report.embedded - report.failed;
                    break;
                }
            }
        }
    }

    Ok(report)
}

/// CLI entry point.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let ctx = AppContext::open(config).await?;
    if dry_run {
        let pending = ctx
            .store
            .chunks_missing_embeddings(limit.unwrap_or(usize::MAX))
            .await;
        ctx.close().await;
        println!("embed pending (dry-run)");
        println!("  chunks needing embeddings: {}", pending?.len());
        return Ok(());
    }

    let Some(embedder) = ctx.embedder() else {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    };
    let policy = RetryPolicy {
        max_retries: config.embedding.max_retries,
        base_delay: Duration::from_secs(1),
    };
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);
    let report = embed_pending(&ctx.store, embedder, batch_size, limit, policy).await;
    ctx.close().await;
    let report = report?;

    println!("embed pending");
    println!("  total pending: {}", report.total);
    println!("  embedded: {}", report.embedded);
    println!("  failed: {}", report.failed);
    Ok(())
}

/// CLI entry point for `midset embed reindex`. Uses the current `[chunking]`
/// settings; vectors are written only when the vector backend is present.
pub async fn run_embed_reindex(config: &Config, document_id: i64) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let outcome = match ctx.engine() {
        Ok(engine) => engine.reindex_document(document_id).await,
        Err(e) => Err(e),
    };
    ctx.close().await;
    let outcome = outcome?;

    println!("embed reindex");
    println!("  document: {}", outcome.document_id);
    println!("  chunks: {}", outcome.chunk_ids.len());
    println!("  embeddings written: {}", outcome.embeddings_written);
    if let Some(err) = &outcome.embedding_error {
        println!("  embedding error: {}", err);
    }
    Ok(())
}
