use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table if missing. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per indexed repository
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repositories (
            full_name TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            revision_id TEXT,
            last_indexed_at TEXT,
            file_count INTEGER NOT NULL DEFAULT 0,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            download_status TEXT NOT NULL DEFAULT 'not_started',
            chunking_status TEXT NOT NULL DEFAULT 'not_started',
            embedding_status TEXT NOT NULL DEFAULT 'not_started'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Searchable chunks with their vectors
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            repository TEXT NOT NULL,
            position INTEGER NOT NULL,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_repository ON chunks(repository)")
        .execute(pool)
        .await?;

    // Output of the last successful chunk stage, awaiting embedding
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staged_chunks (
            repository TEXT NOT NULL,
            position INTEGER NOT NULL,
            id TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (repository, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Marks a staged set as present, even when it holds no chunks
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staged_sets (
            repository TEXT PRIMARY KEY,
            chunk_count INTEGER NOT NULL,
            staged_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Who is indexing which repository, shared by every process on this file
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_leases (
            full_name TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
