//! SQLite-backed [`RecordStore`] and [`VectorStore`].
//!
//! Records, searchable chunks, and staged chunks live in one database so a
//! single file holds the whole index. Vectors are stored as little-endian
//! `f32` BLOBs and searched by brute-force cosine similarity.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use reposearch_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use reposearch_core::models::{Chunk, RepositoryRecord, SearchResult};
use reposearch_core::store::{dedup_embedded, rank, RecordStore, VectorStore};

/// SQLite implementation of both store traits.
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
}

fn record_from_row(row: &SqliteRow) -> Result<RepositoryRecord> {
    let last_indexed_at: Option<String> = row.get("last_indexed_at");
    let last_indexed_at = last_indexed_at
        .map(|ts| DateTime::parse_from_rfc3339(&ts).map(|dt| dt.with_timezone(&Utc)))
        .transpose()
        .context("Invalid last_indexed_at")?;
    let file_count: i64 = row.get("file_count");
    let chunk_count: i64 = row.get("chunk_count");
    let download: String = row.get("download_status");
    let chunking: String = row.get("chunking_status");
    let embedding: String = row.get("embedding_status");

    Ok(RepositoryRecord {
        owner: row.get("owner"),
        name: row.get("name"),
        url: row.get("url"),
        revision_id: row.get("revision_id"),
        last_indexed_at,
        file_count: file_count.max(0) as u64,
        chunk_count: chunk_count.max(0) as u64,
        download: download.parse()?,
        chunking: chunking.parse()?,
        embedding: embedding.parse()?,
    })
}

fn chunk_from_row(row: &SqliteRow, with_embedding: bool) -> Result<Chunk> {
    let metadata_json: String = row.get("metadata_json");
    let metadata: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(&metadata_json).context("Invalid chunk metadata")?;
    let embedding = if with_embedding {
        let blob: Vec<u8> = row.get("embedding");
        Some(blob_to_vec(&blob))
    } else {
        None
    };
    Ok(Chunk {
        id: row.get("id"),
        repository: row.get("repository"),
        content: row.get("content"),
        metadata,
        embedding,
    })
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get_record(&self, full_name: &str) -> Result<Option<RepositoryRecord>> {
        let row = sqlx::query("SELECT * FROM repositories WHERE full_name = ?")
            .bind(full_name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn put_record(&self, record: &RepositoryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO repositories (full_name, owner, name, url, revision_id,
                                      last_indexed_at, file_count, chunk_count,
                                      download_status, chunking_status, embedding_status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(full_name) DO UPDATE SET
                url = excluded.url,
                revision_id = excluded.revision_id,
                last_indexed_at = excluded.last_indexed_at,
                file_count = excluded.file_count,
                chunk_count = excluded.chunk_count,
                download_status = excluded.download_status,
                chunking_status = excluded.chunking_status,
                embedding_status = excluded.embedding_status
            "#,
        )
        .bind(record.full_name())
        .bind(&record.owner)
        .bind(&record.name)
        .bind(&record.url)
        .bind(&record.revision_id)
        .bind(record.last_indexed_at.map(|dt| dt.to_rfc3339()))
        .bind(record.file_count as i64)
        .bind(record.chunk_count as i64)
        .bind(record.download.as_str())
        .bind(record.chunking.as_str())
        .bind(record.embedding.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_record(&self, full_name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM repositories WHERE full_name = ?")
            .bind(full_name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_records(&self) -> Result<Vec<RepositoryRecord>> {
        let rows = sqlx::query("SELECT * FROM repositories ORDER BY full_name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn try_acquire_lease(
        &self,
        full_name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let expires_at = now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));

        // The conflict branch only fires for our own or an expired lease;
        // otherwise nothing changes and no row is affected.
        let result = sqlx::query(
            r#"
            INSERT INTO index_leases (full_name, holder, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(full_name) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE index_leases.holder = excluded.holder
               OR index_leases.expires_at <= ?
            "#,
        )
        .bind(full_name)
        .bind(holder)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_lease(&self, full_name: &str, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM index_leases WHERE full_name = ? AND holder = ?")
            .bind(full_name)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn stage_chunks(&self, repository: &str, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM staged_chunks WHERE repository = ?")
            .bind(repository)
            .execute(&mut *tx)
            .await?;

        for (position, chunk) in chunks.iter().enumerate() {
            sqlx::query(
                "INSERT INTO staged_chunks (repository, position, id, content, metadata_json) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(repository)
            .bind(position as i64)
            .bind(&chunk.id)
            .bind(&chunk.content)
            .bind(serde_json::to_string(&chunk.metadata)?)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO staged_sets (repository, chunk_count, staged_at)
            VALUES (?, ?, ?)
            ON CONFLICT(repository) DO UPDATE SET
                chunk_count = excluded.chunk_count,
                staged_at = excluded.staged_at
            "#,
        )
        .bind(repository)
        .bind(chunks.len() as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn staged_chunks(&self, repository: &str) -> Result<Option<Vec<Chunk>>> {
        let staged: Option<i64> =
            sqlx::query_scalar("SELECT chunk_count FROM staged_sets WHERE repository = ?")
                .bind(repository)
                .fetch_optional(&self.pool)
                .await?;
        if staged.is_none() {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT id, repository, content, metadata_json FROM staged_chunks \
             WHERE repository = ? ORDER BY position",
        )
        .bind(repository)
        .fetch_all(&self.pool)
        .await?;

        let chunks = rows
            .iter()
            .map(|row| chunk_from_row(row, false))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(chunks))
    }

    async fn store(&self, repository: &str, chunks: &[Chunk]) -> Result<usize> {
        let batch = dedup_embedded(chunks)?;
        let written = batch.len();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE repository = ?")
            .bind(repository)
            .execute(&mut *tx)
            .await?;

        for (position, chunk) in batch.into_iter().enumerate() {
            let vector = chunk.embedding.as_deref().unwrap_or(&[]);
            sqlx::query(
                r#"
                INSERT INTO chunks (id, repository, position, content, metadata_json, embedding, dims)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    repository = excluded.repository,
                    position = excluded.position,
                    content = excluded.content,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding,
                    dims = excluded.dims
                "#,
            )
            .bind(&chunk.id)
            .bind(repository)
            .bind(position as i64)
            .bind(&chunk.content)
            .bind(serde_json::to_string(&chunk.metadata)?)
            .bind(vec_to_blob(vector))
            .bind(vector.len() as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn search(
        &self,
        query_vec: &[f32],
        repository: Option<&str>,
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let rows = match repository {
            Some(repo) => {
                sqlx::query("SELECT * FROM chunks WHERE repository = ?")
                    .bind(repo)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM chunks")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = chunk_from_row(row, true)?;
            let score = chunk
                .embedding
                .as_deref()
                .map(|v| cosine_similarity(query_vec, v))
                .unwrap_or(0.0);
            results.push(SearchResult { chunk, score });
        }

        Ok(rank(results, limit, score_threshold))
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query("SELECT * FROM chunks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(|r| chunk_from_row(r, true)).transpose()
    }

    async fn delete_chunks(&self, repository: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["chunks", "staged_chunks", "staged_sets"] {
            sqlx::query(&format!("DELETE FROM {} WHERE repository = ?", table))
                .bind(repository)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
