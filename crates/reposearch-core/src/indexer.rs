//! The indexing orchestrator.
//!
//! Drives one repository through Fetch → Chunk → Embed+Store, running only
//! the stages the staleness planner asks for, and keeps the repository's
//! [`RepositoryRecord`] truthful after every stage.
//!
//! # Record bookkeeping
//!
//! 1. The fetcher reports the current revision. Access errors propagate
//!    before anything is written.
//! 2. [`plan_stages`] compares it with the stored record. An empty plan
//!    returns the stored record untouched.
//! 3. Every planned stage is reset to `NotStarted` and the record is
//!    persisted once. A crash or cancellation from here on leaves those
//!    stages unsucceeded, never stale-succeeded.
//! 4. Each stage persists `Succeeded` (with its counters) immediately on
//!    success, or `Failed` before its error is returned.
//!
//! # Working directory
//!
//! Fetched content lives in a `tempfile::TempDir` owned by the invocation.
//! It is closed on every return path (removal errors are logged, not
//! raised) and removed by `Drop` if the future is cancelled.
//!
//! # Concurrency
//!
//! At most one `index` or `delete_repository` runs per repository, across
//! every process sharing the record store. A run holds the in-process
//! [`KeyedLocks`] entry and a [`StoreLease`] in the record store. Other
//! callers wait or fail with [`IndexError::ConcurrentIndexConflict`],
//! depending on [`ConflictPolicy`]. Different repositories never block each
//! other.
//!
//! The lease is renewed before every stage. A run that finds its lease
//! taken over (it outlived the TTL) stops without writing further.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use serde::Deserialize;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use crate::chunk::Chunker;
use crate::embedding::Embedder;
use crate::error::IndexError;
use crate::fetch::ContentFetcher;
use crate::locks::{unique_holder, KeyGuard, KeyedLocks, StoreLease};
use crate::models::{
    Chunk, FetchSummary, RepositoryId, RepositoryInfo, RepositoryRecord, SearchResult, Stage,
    StageStatus,
};
use crate::plan::{plan_stages, ForceFlags, StagePlan};
use crate::store::{RecordStore, VectorStore};

/// What to do when a repository is already being indexed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Queue behind the in-flight run.
    #[default]
    Wait,
    /// Fail fast with [`IndexError::ConcurrentIndexConflict`].
    Reject,
}

/// How often a waiting caller re-checks a lease held by another process.
const LEASE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Immutable orchestrator settings.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Parent for working directories. `None` uses the OS temp dir.
    pub work_dir: Option<PathBuf>,
    pub on_conflict: ConflictPolicy,
    /// Lifetime of a store lease between renewals.
    pub lease_ttl: Duration,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            on_conflict: ConflictPolicy::default(),
            lease_ttl: Duration::from_secs(3600),
        }
    }
}

/// Everything held while a repository is being worked on.
struct RunGuard {
    local: KeyGuard,
    lease: StoreLease,
}

impl RunGuard {
    async fn release(self) {
        let RunGuard { local, lease } = self;
        lease.release().await;
        drop(local);
    }
}

/// Result of an `index` call: the final record and the plan that was run.
#[derive(Debug, Clone)]
pub struct IndexOutcome {
    pub record: RepositoryRecord,
    pub plan: StagePlan,
}

pub struct IndexingOrchestrator {
    fetcher: Arc<dyn ContentFetcher>,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    records: Arc<dyn RecordStore>,
    config: IndexerConfig,
    locks: KeyedLocks,
    /// Names this orchestrator's leases.
    holder: String,
}

impl IndexingOrchestrator {
    pub fn new(
        fetcher: Arc<dyn ContentFetcher>,
        chunker: Arc<dyn Chunker>,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        records: Arc<dyn RecordStore>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            fetcher,
            chunker,
            embedder,
            vectors,
            records,
            config,
            locks: KeyedLocks::new(),
            holder: unique_holder(),
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Bring `repo` up to date and return its record.
    pub async fn index(
        &self,
        repo: &RepositoryId,
        force: ForceFlags,
    ) -> Result<RepositoryRecord, IndexError> {
        Ok(self.index_with_plan(repo, force).await?.record)
    }

    /// Like [`index`](Self::index), also reporting which stages ran.
    pub async fn index_with_plan(
        &self,
        repo: &RepositoryId,
        force: ForceFlags,
    ) -> Result<IndexOutcome, IndexError> {
        let guard = self.acquire(repo, self.config.on_conflict).await?;
        let result = self.run(repo, force, &guard.lease).await;
        guard.release().await;
        result
    }

    async fn acquire(
        &self,
        repo: &RepositoryId,
        policy: ConflictPolicy,
    ) -> Result<RunGuard, IndexError> {
        let key = repo.full_name();
        let local = match policy {
            ConflictPolicy::Wait => {
                if self.locks.is_locked(&key) {
                    debug!(repository = %key, "waiting for in-flight indexing run");
                }
                self.locks.lock(&key).await
            }
            ConflictPolicy::Reject => self
                .locks
                .try_lock(&key)
                .ok_or_else(|| IndexError::ConcurrentIndexConflict(key.clone()))?,
        };
        let lease = self.acquire_lease(&key, policy).await?;
        Ok(RunGuard { local, lease })
    }

    /// Take the store lease, polling while another process holds it.
    async fn acquire_lease(
        &self,
        key: &str,
        policy: ConflictPolicy,
    ) -> Result<StoreLease, IndexError> {
        let mut announced = false;
        loop {
            let records = Arc::clone(&self.records);
            if let Some(lease) =
                StoreLease::try_acquire(records, key, &self.holder, self.config.lease_ttl).await?
            {
                return Ok(lease);
            }
            if policy == ConflictPolicy::Reject {
                return Err(IndexError::ConcurrentIndexConflict(key.to_string()));
            }
            if !announced {
                info!(repository = %key, "repository is being indexed by another process, waiting");
                announced = true;
            }
            tokio::time::sleep(LEASE_POLL_INTERVAL).await;
        }
    }

    /// Renew the lease before a stage; losing it ends the run.
    async fn keep_lease(&self, lease: &StoreLease) -> Result<(), IndexError> {
        if lease.renew().await? {
            return Ok(());
        }
        error!(repository = %lease.key(), "indexing lease was taken over, stopping");
        Err(IndexError::ConcurrentIndexConflict(lease.key().to_string()))
    }

    async fn run(
        &self,
        repo: &RepositoryId,
        force: ForceFlags,
        lease: &StoreLease,
    ) -> Result<IndexOutcome, IndexError> {
        let name = repo.full_name();
        let info = self.fetcher.get_info(repo).await?;
        let existing = self.records.get_record(&name).await?;
        let mut plan = plan_stages(existing.as_ref(), &info, force);

        let mut record = match existing {
            Some(record) if plan.is_noop() => {
                info!(repository = %name, revision = ?record.revision_id, "already up to date");
                return Ok(IndexOutcome { record, plan });
            }
            Some(previous) if plan.is_content_change() => {
                RepositoryRecord::carry_forward(&info, &previous)
            }
            Some(mut previous) => {
                previous.url = info.url.clone();
                previous
            }
            None => RepositoryRecord::new(&info),
        };

        // An embed-only run consumes the staged chunk set; without one the
        // chunks have to be produced again.
        let mut staged = None;
        if plan.embed && !plan.chunk {
            staged = self.vectors.staged_chunks(&name).await?;
            if staged.is_none() {
                warn!(repository = %name, "no staged chunks found, re-chunking");
                plan.chunk = true;
            }
        }

        info!(
            repository = %name,
            revision = ?info.revision_id,
            reason = %plan.reason,
            fetch = plan.fetch,
            chunk = plan.chunk,
            embed = plan.embed,
            "indexing repository"
        );

        for stage in plan.stages() {
            record.set_status(stage, StageStatus::NotStarted);
        }
        self.records.put_record(&record).await?;

        let mut workspace = None;
        let result = self
            .run_stages(repo, &info, &plan, &mut record, &mut workspace, staged, lease)
            .await;
        if let Some(dir) = workspace.take() {
            release(dir);
        }
        result?;

        info!(
            repository = %name,
            files = record.file_count,
            chunks = record.chunk_count,
            "indexing finished"
        );
        Ok(IndexOutcome { record, plan })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_stages(
        &self,
        repo: &RepositoryId,
        info: &RepositoryInfo,
        plan: &StagePlan,
        record: &mut RepositoryRecord,
        workspace: &mut Option<TempDir>,
        staged: Option<Vec<Chunk>>,
        lease: &StoreLease,
    ) -> Result<(), IndexError> {
        if plan.fetch {
            self.keep_lease(lease).await?;
            debug!(repository = %repo, "fetch stage started");
            let summary = match self.materialize(repo, workspace).await {
                Ok(summary) => summary,
                Err(err) => return self.fail(record, Stage::Fetch, err).await,
            };
            if summary.revision_id.is_some() && summary.revision_id != info.revision_id {
                warn!(
                    repository = %repo,
                    expected = ?info.revision_id,
                    fetched = ?summary.revision_id,
                    "repository moved while fetching"
                );
            }
            record.revision_id = summary.revision_id.or_else(|| info.revision_id.clone());
            record.file_count = summary.file_count;
            record.download = StageStatus::Succeeded;
            self.records.put_record(record).await?;
        }

        let mut chunks = staged;
        if plan.chunk {
            self.keep_lease(lease).await?;
            debug!(repository = %repo, "chunk stage started");
            let pinned = record.revision_id.clone();
            let produced = match self.chunk_stage(repo, pinned.as_deref(), workspace).await {
                Ok(produced) => produced,
                Err(err) => return self.fail(record, Stage::Chunk, err).await,
            };
            record.chunking = StageStatus::Succeeded;
            self.records.put_record(record).await?;
            chunks = Some(produced);
        }

        if plan.embed {
            self.keep_lease(lease).await?;
            debug!(repository = %repo, "embed stage started");
            let stored = match self.embed_stage(repo, chunks).await {
                Ok(stored) => stored,
                Err(err) => return self.fail(record, Stage::Embed, err).await,
            };
            record.chunk_count = stored as u64;
            record.last_indexed_at = Some(Utc::now());
            record.embedding = StageStatus::Succeeded;
            self.records.put_record(record).await?;
        }

        Ok(())
    }

    /// Create a scoped working directory and fetch into it.
    async fn materialize(
        &self,
        repo: &RepositoryId,
        workspace: &mut Option<TempDir>,
    ) -> anyhow::Result<FetchSummary> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("reposearch_");
        let dir = match &self.config.work_dir {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        *workspace = Some(dir);
        self.fetcher.fetch_into(repo, &path).await
    }

    /// Chunk the working directory, materializing it first when this run
    /// did not fetch. Content materialized here must be at `pinned`, the
    /// revision the record says was downloaded.
    async fn chunk_stage(
        &self,
        repo: &RepositoryId,
        pinned: Option<&str>,
        workspace: &mut Option<TempDir>,
    ) -> anyhow::Result<Vec<Chunk>> {
        if workspace.is_none() {
            debug!(repository = %repo, "content not fetched in this run, materializing for chunking");
            let summary = self.materialize(repo, workspace).await?;
            if let (Some(fetched), Some(expected)) = (summary.revision_id.as_deref(), pinned) {
                if fetched != expected {
                    return Err(anyhow!(
                        "repository moved from {} to {} since it was downloaded; index again to pick up the new revision",
                        expected,
                        fetched
                    ));
                }
            }
        }
        let root = workspace
            .as_ref()
            .map(|dir| dir.path().to_path_buf())
            .ok_or_else(|| anyhow!("no working directory"))?;

        let name = repo.full_name();
        let chunker = Arc::clone(&self.chunker);
        let repository = name.clone();
        let chunks =
            tokio::task::spawn_blocking(move || chunker.chunk_directory(&root, &repository))
                .await??;

        self.vectors.stage_chunks(&name, &chunks).await?;
        debug!(repository = %name, chunks = chunks.len(), "chunks staged");
        Ok(chunks)
    }

    async fn embed_stage(
        &self,
        repo: &RepositoryId,
        chunks: Option<Vec<Chunk>>,
    ) -> anyhow::Result<usize> {
        let name = repo.full_name();
        let chunks = match chunks {
            Some(chunks) => chunks,
            None => self
                .vectors
                .staged_chunks(&name)
                .await?
                .ok_or_else(|| anyhow!("no chunks available for {}", name))?,
        };

        let embedded = self.embedder.embed(chunks).await?;
        let written = self.vectors.store(&name, &embedded).await?;
        if written < embedded.len() {
            debug!(
                repository = %name,
                duplicates = embedded.len() - written,
                "dropped chunks with repeated ids"
            );
        }
        Ok(written)
    }

    /// Persist `stage` as failed and build the error to return.
    async fn fail<T>(
        &self,
        record: &mut RepositoryRecord,
        stage: Stage,
        source: anyhow::Error,
    ) -> Result<T, IndexError> {
        let repository = record.full_name();
        error!(repository = %repository, %stage, error = %format!("{:#}", source), "stage failed");
        record.set_status(stage, StageStatus::Failed);
        if let Err(err) = self.records.put_record(record).await {
            error!(repository = %repository, error = %err, "failed to persist stage failure");
        }
        Err(IndexError::StageFailure {
            repository,
            stage,
            source,
        })
    }

    /// Semantic search over stored chunks.
    ///
    /// A blank query returns no results. Filtering by a repository that was
    /// never indexed is [`IndexError::RecordNotFound`].
    pub async fn search(
        &self,
        query: &str,
        repo: Option<&RepositoryId>,
        limit: usize,
        score_threshold: f32,
    ) -> Result<Vec<SearchResult>, IndexError> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let filter = match repo {
            Some(repo) => {
                let name = repo.full_name();
                if self.records.get_record(&name).await?.is_none() {
                    return Err(IndexError::RecordNotFound(name));
                }
                Some(name)
            }
            None => None,
        };

        let query_vec = self
            .embedder
            .embed_query(query)
            .await
            .map_err(IndexError::Search)?;

        let results = self
            .vectors
            .search(&query_vec, filter.as_deref(), limit, score_threshold)
            .await?;
        debug!(query, results = results.len(), "search finished");
        Ok(results)
    }

    pub async fn list_repositories(&self) -> Result<Vec<RepositoryRecord>, IndexError> {
        Ok(self.records.list_records().await?)
    }

    pub async fn get_repository(&self, repo: &RepositoryId) -> Result<RepositoryRecord, IndexError> {
        let name = repo.full_name();
        self.records
            .get_record(&name)
            .await?
            .ok_or(IndexError::RecordNotFound(name))
    }

    pub async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>, IndexError> {
        Ok(self.vectors.get_chunk(id).await?)
    }

    /// Remove a repository's chunks and record. Returns `false` when no
    /// record existed.
    pub async fn delete_repository(&self, repo: &RepositoryId) -> Result<bool, IndexError> {
        let guard = self.acquire(repo, ConflictPolicy::Wait).await?;
        let result = self.remove(&repo.full_name()).await;
        guard.release().await;
        result
    }

    async fn remove(&self, name: &str) -> Result<bool, IndexError> {
        self.vectors.delete_chunks(name).await?;
        let removed = self.records.delete_record(name).await?;
        if removed {
            info!(repository = %name, "repository deleted");
        }
        Ok(removed)
    }
}

fn release(dir: TempDir) {
    let path = dir.path().to_path_buf();
    if let Err(err) = dir.close() {
        warn!(path = %path.display(), error = %err, "failed to remove working directory");
    }
}
