//! Storage abstraction for RepoSearch.
//!
//! Two traits split the storage contract:
//!
//! - [`RecordStore`] keeps one [`RepositoryRecord`] per repository, keyed by
//!   `owner/name`.
//! - [`VectorStore`] keeps chunks with their embeddings and answers
//!   nearest-neighbour queries. It also holds the *staged* chunk set of each
//!   repository: the output of the last successful chunk stage, which an
//!   embed-only rerun consumes without re-reading the working directory.
//!
//! Backends usually implement both over the same database. Implementations
//! must be `Send + Sync` to work with async runtimes.
//!
//! # Leases
//!
//! A lease marks a repository as being indexed by one holder. It lives in
//! the store, so every process sharing the store sees it. Leases expire
//! after their TTL so a crashed holder cannot block a repository forever.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`get_record`](RecordStore::get_record) | Load a record by full name |
//! | [`put_record`](RecordStore::put_record) | Atomic, durable upsert |
//! | [`delete_record`](RecordStore::delete_record) | Remove a record |
//! | [`list_records`](RecordStore::list_records) | Every record, by full name |
//! | [`try_acquire_lease`](RecordStore::try_acquire_lease) | Claim or renew the indexing lease |
//! | [`release_lease`](RecordStore::release_lease) | Give the indexing lease up |
//! | [`stage_chunks`](VectorStore::stage_chunks) | Replace the staged chunk set |
//! | [`staged_chunks`](VectorStore::staged_chunks) | Read the staged chunk set |
//! | [`store`](VectorStore::store) | Replace the searchable chunks |
//! | [`search`](VectorStore::search) | Cosine similarity search |
//! | [`get_chunk`](VectorStore::get_chunk) | Fetch one stored chunk |
//! | [`delete_chunks`](VectorStore::delete_chunks) | Drop stored and staged chunks |

pub mod memory;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, RepositoryRecord, SearchResult};

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_record(&self, full_name: &str) -> Result<Option<RepositoryRecord>>;

    /// Insert or replace the record keyed by its full name.
    ///
    /// Must be atomic for the whole record and durable before returning;
    /// the orchestrator persists partial progress through it.
    async fn put_record(&self, record: &RepositoryRecord) -> Result<()>;

    /// Returns whether a record was removed.
    async fn delete_record(&self, full_name: &str) -> Result<bool>;

    /// All records, ordered by full name.
    async fn list_records(&self) -> Result<Vec<RepositoryRecord>>;

    /// Claim the indexing lease on `full_name` for `holder` until `ttl`
    /// from now.
    ///
    /// Succeeds when no live lease exists or `holder` already owns it, in
    /// which case the expiry is pushed out. Returns `false` while another
    /// holder's lease is live. The check and the claim must be atomic.
    async fn try_acquire_lease(&self, full_name: &str, holder: &str, ttl: Duration)
        -> Result<bool>;

    /// Drop the lease if `holder` still owns it.
    async fn release_lease(&self, full_name: &str, holder: &str) -> Result<()>;
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Replace the staged chunk set for `repository`.
    async fn stage_chunks(&self, repository: &str, chunks: &[Chunk]) -> Result<()>;

    /// The staged chunk set in production order, or `None` when the
    /// repository has never been staged.
    async fn staged_chunks(&self, repository: &str) -> Result<Option<Vec<Chunk>>>;

    /// Atomically replace every searchable chunk of `repository`.
    ///
    /// Chunks without an embedding are rejected. Duplicate IDs keep the
    /// first occurrence. Returns the number of chunks written.
    async fn store(&self, repository: &str, chunks: &[Chunk]) -> Result<usize>;

    /// Nearest chunks to `query_vec` by cosine similarity, best first,
    /// dropping anything scoring below `score_threshold`.
    async fn search(
        &self,
        query_vec: &[f32],
        repository: Option<&str>,
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<SearchResult>>;

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>>;

    /// Remove stored and staged chunks of `repository`.
    async fn delete_chunks(&self, repository: &str) -> Result<()>;
}

/// Validate a batch for [`VectorStore::store`] and drop repeated IDs.
pub fn dedup_embedded(chunks: &[Chunk]) -> Result<Vec<&Chunk>> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        if chunk.embedding.is_none() {
            anyhow::bail!("chunk {} has no embedding", chunk.id);
        }
        if seen.insert(chunk.id.as_str()) {
            out.push(chunk);
        }
    }
    Ok(out)
}

/// Order results best-first and apply the threshold and limit.
pub fn rank(mut results: Vec<SearchResult>, limit: usize, score_threshold: f32) -> Vec<SearchResult> {
    results.retain(|r| r.score >= score_threshold);
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(limit);
    results
}
