//! Content fetcher abstraction.
//!
//! A fetcher answers two questions about a repository: what revision is it
//! at right now, and what files does it contain. The orchestrator asks the
//! first on every `index` call and the second only when content is stale.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::IndexError;
use crate::models::{FetchSummary, RepositoryId, RepositoryInfo};

#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Current metadata and revision of `repo`.
    ///
    /// Fails with [`IndexError::RepositoryAccess`] when the repository does
    /// not exist or cannot be read.
    async fn get_info(&self, repo: &RepositoryId) -> Result<RepositoryInfo, IndexError>;

    /// Write the repository's file tree under `dir`, which exists and is
    /// empty.
    async fn fetch_into(&self, repo: &RepositoryId, dir: &Path) -> Result<FetchSummary>;
}
