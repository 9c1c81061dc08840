//! `midset search`: top-k chunks for a query.
//!
//! The mode (vector or lexical) is decided per call by the retrieval
//! engine's capability probe; this wrapper handles config, connection,
//! and output formatting.

use anyhow::{bail, Result};

use midset_core::retrieval::{SearchMode, SearchResponse};
use midset_core::store::Store;

use crate::config::Config;
use crate::context::AppContext;

pub async fn search(
    ctx: &AppContext,
    query: &str,
    k: usize,
    match_id: Option<i64>,
) -> Result<SearchResponse> {
    if let Some(id) = match_id {
        if ctx.store.get_match(id).await?.is_none() {
            bail!("match not found: {}", id);
        }
    }
    ctx.engine()?.semantic_search(query, k, match_id).await
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    }
}

fn unembedded_hint(missing: i64) -> Option<String> {
    match missing {
        0 => None,
        1 => Some("1 chunk has no vector yet and was not searched; run `midset embed pending`.".to_string()),
        n => Some(format!(
            "{} chunks have no vector yet and were not searched; run `midset embed pending`.",
            n
        )),
    }
}

pub async fn run_search(
    config: &Config,
    query: &str,
    k: Option<usize>,
    match_id: Option<i64>,
) -> Result<()> {
    let k = k.unwrap_or(config.retrieval.default_k);
    let ctx = AppContext::open(config).await?;
    let result = async {
        let response = search(&ctx, query, k, match_id).await?;
        let missing = match response.mode {
            SearchMode::Vector => ctx.store.count_missing_embeddings().await?,
            SearchMode::Lexical => 0,
        };
        anyhow::Ok((response, missing))
    }
    .await;
    ctx.close().await;
    let (response, missing) = result?;

    println!("Search: mode={}, k={}", response.mode, k);
    if let Some(hint) = unembedded_hint(missing) {
        println!("{}", hint);
    }
    if response.hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    println!();
    for (i, hit) in response.hits.iter().enumerate() {
        println!("{}. [{:.3}] chunk {} (document {})", i + 1, hit.score, hit.id, hit.document_id);
        println!("    excerpt: \"{}\"", excerpt(&hit.text, 200));
        println!();
    }
    Ok(())
}
