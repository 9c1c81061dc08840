//! Replay ingestion.
//!
//! ```text
//! paths ──walk + globs──▶ files ──dedup (name, mtime)──▶ decode + summarize
//!        ──▶ matches row ──▶ "match-stats" document ──▶ chunks (+ vectors)
//! ```
//!
//! A file that fails at any step is logged and counted as failed; it never
//! aborts the batch. A match whose document cannot be indexed is deleted
//! again so the file is picked up by the next run.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use midset_core::describe::describe_match;
use midset_core::models::{NewMatchRecord, SOURCE_MATCH_STATS};
use midset_core::retrieval::RetrievalEngine;
use midset_core::store::Store;
use midset_core::summary::{inspect_replay, summarize_replay};

use crate::config::{Config, ReplaysConfig};
use crate::context::AppContext;

/// Per-batch counters printed by `midset ingest`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub found: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub chunks_written: usize,
    pub embeddings_written: usize,
}

/// Replay files under `paths`. Directories are walked recursively and
/// filtered by the include/exclude globs; files named explicitly are taken
/// as given.
pub fn collect_replays(paths: &[PathBuf], replays: &ReplaysConfig) -> Result<Vec<PathBuf>> {
    let include_set = build_globset(&replays.include_globs)?;
    let exclude_set = build_globset(&replays.exclude_globs)?;

    let mut files = Vec::new();
    for root in paths {
        if !root.exists() {
            bail!("Replay path does not exist: {}", root.display());
        }
        if root.is_file() {
            files.push(root.clone());
            continue;
        }

        for entry in WalkDir::new(root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if exclude_set.is_match(&rel_str) {
                continue;
            }
            if !include_set.is_match(&rel_str) {
                continue;
            }
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Lowercase hex SHA-256 of a file's bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn mtime_secs(path: &Path) -> Result<i64> {
    let modified = std::fs::metadata(path)?
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH);
    Ok(modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Ingest `files` through `engine`. With `dry_run`, files are decoded and
/// counted but nothing is written.
pub async fn ingest_files<S: Store + ?Sized>(
    store: &S,
    engine: &RetrievalEngine<'_, S>,
    files: &[PathBuf],
    dry_run: bool,
) -> Result<IngestReport> {
    let mut report = IngestReport {
        found: files.len(),
        ..IngestReport::default()
    };

    for path in files {
        let name = file_name(path);
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "cannot read replay");
                report.failed += 1;
                continue;
            }
        };
        let mtime = match mtime_secs(path) {
            Ok(mtime) => mtime,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "cannot stat replay");
                report.failed += 1;
                continue;
            }
        };

        match store.find_match_by_file(&name, mtime).await {
            Ok(Some(_)) => {
                tracing::debug!(file = %name, "already ingested");
                report.skipped += 1;
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "dedup lookup failed");
                report.failed += 1;
                continue;
            }
        }

        let summary = match summarize_replay(&bytes) {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "failed to decode replay");
                report.failed += 1;
                continue;
            }
        };
        if !summary.degraded.is_empty() {
            tracing::debug!(file = %name, degraded = ?summary.degraded, "summary used defaults");
        }

        if dry_run {
            report.processed += 1;
            continue;
        }

        let record = NewMatchRecord::from_summary(&summary, &name, &content_hash(&bytes), mtime);
        let match_id = match store.insert_match(&record).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "failed to store match");
                report.failed += 1;
                continue;
            }
        };
        let outcome = match engine
            .upsert_document(
                Some(match_id),
                SOURCE_MATCH_STATS,
                &describe_match(match_id, &summary),
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(file = %name, match_id, error = %e, "failed to index match, rolling back");
                // Without the match row the file is retried on the next run.
                if let Err(e) = store.delete_match(match_id).await {
                    tracing::warn!(match_id, error = %e, "rollback failed");
                }
                report.failed += 1;
                continue;
            }
        };

        tracing::info!(file = %name, match_id, result = %summary.win_loss, "ingested replay");
        report.processed += 1;
        report.chunks_written += outcome.chunk_ids.len();
        report.embeddings_written += outcome.embeddings_written;
    }

    Ok(report)
}

/// CLI entry point for `midset ingest`.
pub async fn run_ingest(config: &Config, paths: Vec<PathBuf>, dry_run: bool) -> Result<()> {
    let roots = if paths.is_empty() {
        match &config.replays.root {
            Some(root) => vec![root.clone()],
            None => bail!("No replay paths given and [replays] root is not configured"),
        }
    } else {
        paths
    };
    let files = collect_replays(&roots, &config.replays)?;

    let ctx = AppContext::open(config).await?;
    let report = ingest_files(&ctx.store, &ctx.engine()?, &files, dry_run).await?;
    ctx.close().await;

    if dry_run {
        println!("ingest (dry-run)");
    } else {
        println!("ingest");
    }
    println!("  files found: {}", report.found);
    println!("  processed: {}", report.processed);
    println!("  skipped: {}", report.skipped);
    println!("  failed: {}", report.failed);
    if !dry_run {
        println!("  chunks written: {}", report.chunks_written);
        if config.embedding.is_enabled() {
            println!("  embeddings written: {}", report.embeddings_written);
        }
    }
    println!("ok");
    Ok(())
}

/// CLI entry point for `midset inspect`.
pub fn run_inspect(path: &Path) -> Result<()> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let inspection =
        inspect_replay(&bytes).with_context(|| format!("Failed to decode {}", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&inspection)?);
    Ok(())
}
