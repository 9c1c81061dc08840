//! Schema creation and full-database reset.
//!
//! `chunk_vectors` is created only when an embedding provider is configured;
//! its presence is what [`SqliteStore`](crate::sqlite_store::SqliteStore)
//! reports as the vector backend.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Tables in delete order (children first).
const TABLES: [&str; 5] = ["chunk_vectors", "chunks", "notes", "documents", "matches"];

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool, config.embedding.is_enabled()).await?;
    pool.close().await;
    Ok(())
}

pub async fn create_schema(pool: &SqlitePool, with_vectors: bool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS matches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_name TEXT NOT NULL,
            start_date TEXT,
            character TEXT,
            opponent TEXT,
            stage TEXT,
            duration INTEGER NOT NULL,
            stocks_taken INTEGER NOT NULL,
            openings_per_kill REAL NOT NULL,
            win_loss TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            file_mtime INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(file_name, file_mtime)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create matches table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            match_id INTEGER,
            source TEXT NOT NULL,
            text TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (match_id) REFERENCES matches(id)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create documents table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            match_id INTEGER,
            document_id INTEGER,
            source TEXT NOT NULL,
            text TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (match_id) REFERENCES matches(id),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create notes table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create chunks table")?;

    if with_vectors {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunk_vectors (
                chunk_id INTEGER PRIMARY KEY,
                embedding BLOB NOT NULL,
                FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await
        .context("Failed to create chunk_vectors table")?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_match_id ON documents(match_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_notes_match_id ON notes(match_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_matches_start_date ON matches(start_date DESC)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn table_exists(pool: &SqlitePool, name: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Delete every row from every table in one transaction. Returns the
/// number of rows removed per table.
pub async fn reset_database(pool: &SqlitePool) -> Result<Vec<(&'static str, u64)>> {
    let mut present = Vec::new();
    for table in TABLES {
        if table_exists(pool, table).await? {
            present.push(table);
        }
    }

    let mut tx = pool.begin().await?;
    let mut removed = Vec::with_capacity(present.len());
    for table in present {
        let result = sqlx::query(&format!("DELETE FROM {}", table))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to clear {}", table))?;
        removed.push((table, result.rows_affected()));
    }
    tx.commit().await?;
    Ok(removed)
}

/// CLI entry point for `midset reset`.
pub async fn run_reset(config: &Config, confirmed: bool) -> Result<()> {
    if !confirmed {
        anyhow::bail!("Refusing to delete all data without --yes");
    }

    let pool = db::connect(config).await?;
    let removed = reset_database(&pool).await?;
    pool.close().await;

    println!("reset");
    for (table, rows) in removed {
        println!("  {}: {} rows deleted", table, rows);
    }
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;
    use tempfile::TempDir;

    async fn pool(tmp: &TempDir) -> SqlitePool {
        let path = tmp.path().join("schema.sqlite");
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .unwrap()
            .create_if_missing(true);
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_vector_table_only_when_requested() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;

        create_schema(&pool, false).await.unwrap();
        assert!(table_exists(&pool, "chunks").await.unwrap());
        assert!(!table_exists(&pool, "chunk_vectors").await.unwrap());

        // Re-running with vectors adds the table to an existing schema.
        create_schema(&pool, true).await.unwrap();
        assert!(table_exists(&pool, "chunk_vectors").await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_skips_missing_tables_and_counts_rows() {
        let tmp = TempDir::new().unwrap();
        let pool = pool(&tmp).await;
        create_schema(&pool, false).await.unwrap();

        sqlx::query("INSERT INTO documents (source, text, created_at) VALUES ('user-note', 'a', 0)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO chunks (document_id, chunk_index, text) VALUES (1, 0, 'a')")
            .execute(&pool)
            .await
            .unwrap();

        let removed = reset_database(&pool).await.unwrap();
        assert_eq!(
            removed,
            vec![("chunks", 1), ("notes", 0), ("documents", 1), ("matches", 0)]
        );

        let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(left, 0);
    }
}
