//! SQLite-backed [`Store`] implementation.
//!
//! Vectors live in `chunk_vectors` as little-endian f32 BLOBs. That table
//! exists only when `midset init` ran with an embedding provider
//! configured, and its presence is the vector backend probe.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use midset_core::embedding::{blob_to_vec, vec_to_blob};
use midset_core::models::{Chunk, Document, MatchRecord, NewMatchRecord, WinLoss};
use midset_core::store::Store;

use crate::migrate::table_exists;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Chunks without a vector. These are invisible to vector search until
    /// `midset embed pending` fills them in. Requires `chunk_vectors`.
    pub async fn count_missing_embeddings(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks c LEFT JOIN chunk_vectors cv ON cv.chunk_id = c.id \
             WHERE cv.chunk_id IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }
}

pub(crate) const MATCH_COLUMNS: &str = "id, file_name, start_date, character, opponent, stage, \
     duration, stocks_taken, openings_per_kill, win_loss, content_hash, file_mtime, created_at";

pub(crate) fn match_from_row(row: &SqliteRow) -> Result<MatchRecord> {
    let win_loss: String = row.try_get("win_loss")?;
    Ok(MatchRecord {
        id: row.try_get("id")?,
        file_name: row.try_get("file_name")?,
        start_date: row.try_get("start_date")?,
        character: row.try_get("character")?,
        opponent: row.try_get("opponent")?,
        stage: row.try_get("stage")?,
        duration: row.try_get("duration")?,
        stocks_taken: row.try_get("stocks_taken")?,
        openings_per_kill: row.try_get("openings_per_kill")?,
        win_loss: win_loss.parse::<WinLoss>()?,
        content_hash: row.try_get("content_hash")?,
        file_mtime: row.try_get("file_mtime")?,
        created_at: row.try_get("created_at")?,
    })
}

fn chunk_from_row(row: &SqliteRow) -> Result<Chunk> {
    Ok(Chunk {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        chunk_index: row.try_get("chunk_index")?,
        text: row.try_get("text")?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_match(&self, record: &NewMatchRecord) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO matches (file_name, start_date, character, opponent, stage,
                                 duration, stocks_taken, openings_per_kill, win_loss,
                                 content_hash, file_mtime, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.file_name)
        .bind(&record.start_date)
        .bind(&record.character)
        .bind(&record.opponent)
        .bind(&record.stage)
        .bind(record.duration)
        .bind(record.stocks_taken)
        .bind(record.openings_per_kill)
        .bind(record.win_loss.as_str())
        .bind(&record.content_hash)
        .bind(record.file_mtime)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert match for {}", record.file_name))?;

        Ok(result.last_insert_rowid())
    }

    async fn find_match_by_file(&self, file_name: &str, file_mtime: i64) -> Result<Option<i64>> {
        let id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM matches WHERE file_name = ? AND file_mtime = ?")
                .bind(file_name)
                .bind(file_mtime)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id)
    }

    async fn get_match(&self, id: i64) -> Result<Option<MatchRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM matches WHERE id = ?", MATCH_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(match_from_row).transpose()
    }

    async fn list_matches(&self) -> Result<Vec<MatchRecord>> {
        let rows = sqlx::query(&format!("SELECT {} FROM matches ORDER BY id", MATCH_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(match_from_row).collect()
    }

    async fn delete_match(&self, id: i64) -> Result<()> {
        let with_vectors = table_exists(&self.pool, "chunk_vectors").await?;
        let mut tx = self.pool.begin().await?;

        if with_vectors {
            sqlx::query(
                "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT c.id FROM chunks c \
                 JOIN documents d ON d.id = c.document_id WHERE d.match_id = ?)",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            "DELETE FROM chunks WHERE document_id IN (SELECT id FROM documents WHERE match_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM notes WHERE match_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE match_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM matches WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit()
            .await
            .with_context(|| format!("Failed to delete match {}", id))
    }

    async fn insert_document(&self, match_id: Option<i64>, source: &str, text: &str) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO documents (match_id, source, text, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(match_id)
        .bind(source)
        .bind(text)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to insert document")?;

        Ok(result.last_insert_rowid())
    }

    async fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, match_id, source, text, created_at FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Document {
                id: row.try_get("id")?,
                match_id: row.try_get("match_id")?,
                source: row.try_get("source")?,
                text: row.try_get("text")?,
                created_at: row.try_get("created_at")?,
            })),
            None => Ok(None),
        }
    }

    async fn replace_chunks(&self, document_id: i64, texts: &[String]) -> Result<Vec<Chunk>> {
        let with_vectors = table_exists(&self.pool, "chunk_vectors").await?;
        let mut tx = self.pool.begin().await?;

        // The first statement must write: a deferred transaction that reads
        // first cannot be upgraded once another writer has committed.
        if with_vectors {
            sqlx::query(
                "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
            )
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_one(&mut *tx)
            .await?;
        if !exists {
            anyhow::bail!("document {} does not exist", document_id);
        }

        let mut created = Vec::with_capacity(texts.len());
        for (i, text) in texts.iter().enumerate() {
            let result = sqlx::query(
                "INSERT INTO chunks (document_id, chunk_index, text) VALUES (?, ?, ?)",
            )
            .bind(document_id)
            .bind(i as i64)
            .bind(text)
            .execute(&mut *tx)
            .await?;

            created.push(Chunk {
                id: result.last_insert_rowid(),
                document_id,
                chunk_index: i as i64,
                text: text.clone(),
            });
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn insert_embeddings(&self, embeddings: &[(i64, Vec<f32>)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (chunk_id, vector) in embeddings {
            let blob = vec_to_blob(vector);
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, embedding)
                VALUES (?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    embedding = excluded.embedding
                "#,
            )
            .bind(chunk_id)
            .bind(&blob)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to store vector for chunk {}", chunk_id))?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn vector_backend_available(&self) -> Result<bool> {
        table_exists(&self.pool, "chunk_vectors").await
    }

    async fn list_chunks(&self, match_id: Option<i64>) -> Result<Vec<Chunk>> {
        let rows = match match_id {
            Some(m) => {
                sqlx::query(
                    r#"
                    SELECT c.id, c.document_id, c.chunk_index, c.text
                    FROM chunks c
                    JOIN documents d ON d.id = c.document_id
                    WHERE d.match_id = ?
                    ORDER BY c.id
                    "#,
                )
                .bind(m)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT id, document_id, chunk_index, text FROM chunks ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(chunk_from_row).collect()
    }

    async fn vector_candidates(&self, match_id: Option<i64>) -> Result<Vec<(Chunk, Vec<f32>)>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.text, cv.embedding
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            JOIN documents d ON d.id = c.document_id
            WHERE (? IS NULL OR d.match_id = ?)
            ORDER BY c.id
            "#,
        )
        .bind(match_id)
        .bind(match_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let blob: Vec<u8> = row.try_get("embedding")?;
                Ok((chunk_from_row(row)?, blob_to_vec(&blob)))
            })
            .collect()
    }

    async fn chunks_missing_embeddings(&self, limit: usize) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.text
            FROM chunks c
            LEFT JOIN chunk_vectors cv ON cv.chunk_id = c.id
            WHERE cv.chunk_id IS NULL
            ORDER BY c.id
            LIMIT ?
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chunk_from_row).collect()
    }
}
