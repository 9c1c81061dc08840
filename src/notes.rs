//! Free-text notes.
//!
//! A note is stored twice: as a `notes` row (for listing next to its
//! match) and as a retrievable document tagged `user-note`, or
//! `audio-transcript` when the text came from a transcribed recording.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use midset_core::models::{SOURCE_AUDIO_TRANSCRIPT, SOURCE_USER_NOTE};
use midset_core::retrieval::UpsertOutcome;
use midset_core::store::Store;

use crate::config::Config;
use crate::context::AppContext;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Note {
    pub id: i64,
    pub match_id: Option<i64>,
    pub document_id: Option<i64>,
    pub source: String,
    pub text: String,
    pub created_at: i64,
}

/// Save a note and index it for search.
pub async fn add_note(
    ctx: &AppContext,
    match_id: Option<i64>,
    text: &str,
    transcript: bool,
) -> Result<(Note, UpsertOutcome)> {
    let text = text.trim();
    if text.is_empty() {
        bail!("Note text is empty");
    }
    if let Some(id) = match_id {
        if ctx.store.get_match(id).await?.is_none() {
            bail!("match not found: {}", id);
        }
    }

    let source = if transcript {
        SOURCE_AUDIO_TRANSCRIPT
    } else {
        SOURCE_USER_NOTE
    };
    let outcome = ctx.engine()?.upsert_document(match_id, source, text).await?;

    let created_at = chrono::Utc::now().timestamp();
    let result = sqlx::query(
        "INSERT INTO notes (match_id, document_id, source, text, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(match_id)
    .bind(outcome.document_id)
    .bind(source)
    .bind(text)
    .bind(created_at)
    .execute(ctx.store.pool())
    .await?;

    let note = Note {
        id: result.last_insert_rowid(),
        match_id,
        document_id: Some(outcome.document_id),
        source: source.to_string(),
        text: text.to_string(),
        created_at,
    };
    Ok((note, outcome))
}

/// Notes oldest first, optionally for one match.
pub async fn list_notes(pool: &SqlitePool, match_id: Option<i64>) -> Result<Vec<Note>> {
    let rows = sqlx::query(
        r#"
        SELECT id, match_id, document_id, source, text, created_at
        FROM notes
        WHERE (? IS NULL OR match_id = ?)
        ORDER BY id
        "#,
    )
    .bind(match_id)
    .bind(match_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(Note {
                id: row.try_get("id")?,
                match_id: row.try_get("match_id")?,
                document_id: row.try_get("document_id")?,
                source: row.try_get("source")?,
                text: row.try_get("text")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}

pub(crate) fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

pub(crate) fn print_note(note: &Note) {
    let scope = note
        .match_id
        .map_or_else(|| "general".to_string(), |m| format!("game #{}", m));
    println!(
        "[{}] {} ({}, {})",
        note.id,
        format_ts(note.created_at),
        note.source,
        scope
    );
    for line in note.text.lines() {
        println!("    {}", line);
    }
}

pub async fn run_note_add(
    config: &Config,
    match_id: Option<i64>,
    text: &str,
    transcript: bool,
) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let result = add_note(&ctx, match_id, text, transcript).await;
    ctx.close().await;
    let (note, outcome) = result?;

    println!("note {} saved", note.id);
    println!("  document: {}", outcome.document_id);
    println!("  chunks written: {}", outcome.chunk_ids.len());
    if config.embedding.is_enabled() {
        println!("  embeddings written: {}", outcome.embeddings_written);
        if let Some(err) = &outcome.embedding_error {
            println!("  embedding error: {}", err);
        }
    }
    Ok(())
}

pub async fn run_note_list(config: &Config, match_id: Option<i64>) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let notes = list_notes(ctx.store.pool(), match_id).await;
    ctx.close().await;
    let notes = notes?;

    if notes.is_empty() {
        println!("No notes.");
        return Ok(());
    }
    for note in &notes {
        print_note(note);
    }
    Ok(())
}
