//! Wires configuration into a ready-to-use indexing and search engine.
//!
//! [`SearchEngine`] is what every front end (CLI commands, the MCP server)
//! talks to. It owns one [`IndexingOrchestrator`] over a [`SqliteStore`].
//! Callers in one process share its in-memory locks; separate processes
//! on the same database file (a CLI `index` next to `serve mcp`) are kept
//! apart by the lease rows in `index_leases`.

use std::sync::Arc;

use anyhow::{bail, Result};

use reposearch_core::chunk::TextChunker;
use reposearch_core::embedding::Embedder;
use reposearch_core::error::IndexError;
use reposearch_core::fetch::ContentFetcher;
use reposearch_core::indexer::{IndexOutcome, IndexingOrchestrator};
use reposearch_core::models::{Chunk, RepositoryId, RepositoryRecord, SearchResult};
use reposearch_core::plan::ForceFlags;

use crate::config::{Config, GitHubConfig, RetrievalConfig};
use crate::db;
use crate::embedding::create_embedder;
use crate::git_fetcher::GitCliFetcher;
use crate::github::GitHubFetcher;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

/// Build the fetcher named by `config.fetcher`.
pub fn create_fetcher(config: &GitHubConfig) -> Result<Arc<dyn ContentFetcher>> {
    match config.fetcher.as_str() {
        "api" => Ok(Arc::new(GitHubFetcher::new(config)?)),
        "git" => Ok(Arc::new(GitCliFetcher::new(config))),
        other => bail!("Unknown github.fetcher: '{}'. Must be api or git.", other),
    }
}

pub struct SearchEngine {
    orchestrator: IndexingOrchestrator,
    store: Arc<SqliteStore>,
    retrieval: RetrievalConfig,
}

impl SearchEngine {
    /// Open the database (creating and migrating it if needed) and build
    /// the fetcher and embedder named in `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        let fetcher = create_fetcher(&config.github)?;
        let embedder = create_embedder(&config.embedding)?;
        Self::with_components(config, fetcher, embedder).await
    }

    /// Like [`open`](Self::open) with caller-supplied fetcher and embedder.
    pub async fn with_components(
        config: &Config,
        fetcher: Arc<dyn ContentFetcher>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        let store = Arc::new(SqliteStore::new(pool));
        let chunker = Arc::new(TextChunker::new(config.chunking.options())?);

        let orchestrator = IndexingOrchestrator::new(
            fetcher,
            chunker,
            embedder,
            store.clone(),
            store.clone(),
            config.indexing.indexer_config(),
        );

        Ok(Self {
            orchestrator,
            store,
            retrieval: config.retrieval.clone(),
        })
    }

    pub fn orchestrator(&self) -> &IndexingOrchestrator {
        &self.orchestrator
    }

    pub async fn index(&self, repository: &str, force: ForceFlags) -> Result<IndexOutcome, IndexError> {
        let repo = RepositoryId::parse(repository)?;
        self.orchestrator.index_with_plan(&repo, force).await
    }

    /// Semantic search. `limit` and `score_threshold` fall back to the
    /// `[retrieval]` settings.
    pub async fn search(
        &self,
        query: &str,
        repository: Option<&str>,
        limit: Option<usize>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchResult>, IndexError> {
        let repo = repository.map(RepositoryId::parse).transpose()?;
        self.orchestrator
            .search(
                query,
                repo.as_ref(),
                limit.unwrap_or(self.retrieval.max_results),
                score_threshold.unwrap_or(self.retrieval.score_threshold),
            )
            .await
    }

    pub async fn list_repositories(&self) -> Result<Vec<RepositoryRecord>, IndexError> {
        self.orchestrator.list_repositories().await
    }

    pub async fn get_repository(&self, repository: &str) -> Result<RepositoryRecord, IndexError> {
        let repo = RepositoryId::parse(repository)?;
        self.orchestrator.get_repository(&repo).await
    }

    pub async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>, IndexError> {
        self.orchestrator.get_chunk(id).await
    }

    pub async fn delete_repository(&self, repository: &str) -> Result<bool, IndexError> {
        let repo = RepositoryId::parse(repository)?;
        self.orchestrator.delete_repository(&repo).await
    }

    /// Close the connection pool, flushing the WAL.
    pub async fn close(self) {
        self.store.pool().close().await;
    }
}
