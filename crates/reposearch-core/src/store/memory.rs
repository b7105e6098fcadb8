//! In-memory [`RecordStore`] and [`VectorStore`] for tests and embedding.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Vector search is brute-force
//! cosine similarity over all stored vectors.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, RepositoryRecord, SearchResult};

use super::{dedup_embedded, rank, RecordStore, VectorStore};

#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<BTreeMap<String, RepositoryRecord>>,
    chunks: RwLock<HashMap<String, Vec<Chunk>>>,
    staged: RwLock<HashMap<String, Vec<Chunk>>>,
    /// full name -> (holder, expiry)
    leases: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of searchable chunks for `repository`.
    pub fn chunk_count(&self, repository: &str) -> usize {
        self.chunks
            .read()
            .unwrap()
            .get(repository)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn get_record(&self, full_name: &str) -> Result<Option<RepositoryRecord>> {
        Ok(self.records.read().unwrap().get(full_name).cloned())
    }

    async fn put_record(&self, record: &RepositoryRecord) -> Result<()> {
        self.records
            .write()
            .unwrap()
            .insert(record.full_name(), record.clone());
        Ok(())
    }

    async fn delete_record(&self, full_name: &str) -> Result<bool> {
        Ok(self.records.write().unwrap().remove(full_name).is_some())
    }

    async fn list_records(&self) -> Result<Vec<RepositoryRecord>> {
        Ok(self.records.read().unwrap().values().cloned().collect())
    }

    async fn try_acquire_lease(
        &self,
        full_name: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl)?;
        let mut leases = self.leases.lock().unwrap();
        match leases.get(full_name) {
            Some((owner, expiry)) if owner != holder && *expiry > now => Ok(false),
            _ => {
                leases.insert(full_name.to_string(), (holder.to_string(), expires_at));
                Ok(true)
            }
        }
    }

    async fn release_lease(&self, full_name: &str, holder: &str) -> Result<()> {
        let mut leases = self.leases.lock().unwrap();
        if leases.get(full_name).is_some_and(|(owner, _)| owner == holder) {
            leases.remove(full_name);
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn stage_chunks(&self, repository: &str, chunks: &[Chunk]) -> Result<()> {
        self.staged
            .write()
            .unwrap()
            .insert(repository.to_string(), chunks.to_vec());
        Ok(())
    }

    async fn staged_chunks(&self, repository: &str) -> Result<Option<Vec<Chunk>>> {
        Ok(self.staged.read().unwrap().get(repository).cloned())
    }

    async fn store(&self, repository: &str, chunks: &[Chunk]) -> Result<usize> {
        let batch: Vec<Chunk> = dedup_embedded(chunks)?.into_iter().cloned().collect();
        let written = batch.len();
        self.chunks
            .write()
            .unwrap()
            .insert(repository.to_string(), batch);
        Ok(written)
    }

    async fn search(
        &self,
        query_vec: &[f32],
        repository: Option<&str>,
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let stored = self.chunks.read().unwrap();
        let results = stored
            .iter()
            .filter(|(repo, _)| repository.map_or(true, |r| r == repo.as_str()))
            .flat_map(|(_, chunks)| chunks.iter())
            .filter_map(|chunk| {
                let vector = chunk.embedding.as_ref()?;
                Some(SearchResult {
                    chunk: chunk.clone(),
                    score: cosine_similarity(query_vec, vector),
                })
            })
            .collect();
        Ok(rank(results, limit, score_threshold))
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let stored = self.chunks.read().unwrap();
        Ok(stored
            .values()
            .flat_map(|chunks| chunks.iter())
            .find(|c| c.id == id)
            .cloned())
    }

    async fn delete_chunks(&self, repository: &str) -> Result<()> {
        self.chunks.write().unwrap().remove(repository);
        self.staged.write().unwrap().remove(repository);
        Ok(())
    }
}
