//! Error taxonomy for indexing and retrieval.
//!
//! Collaborators (fetchers, chunkers, embedders, stores) report failures
//! as [`anyhow::Error`]; the orchestrator classifies them into
//! [`IndexError`] variants so callers can tell a missing repository from a
//! retryable stage failure.

use thiserror::Error;

use crate::models::Stage;

/// Errors surfaced by [`IndexingOrchestrator`](crate::indexer::IndexingOrchestrator).
#[derive(Debug, Error)]
pub enum IndexError {
    /// The repository does not exist or the credentials cannot see it.
    /// Not retryable without user action.
    #[error("repository {repository} is not accessible: {reason}")]
    RepositoryAccess { repository: String, reason: String },

    /// The identifier is not of the form `owner/name`.
    #[error("invalid repository identifier '{0}': expected owner/name")]
    InvalidRepositoryId(String),

    /// A pipeline stage failed. The record has been persisted with the
    /// stage marked failed, so re-invoking `index` resumes from here.
    #[error("{stage} stage failed for {repository}: {source:#}")]
    StageFailure {
        repository: String,
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    /// The operation targets a repository that has never been indexed.
    #[error("repository {0} is not indexed")]
    RecordNotFound(String),

    /// Another indexing run for the same repository is in flight.
    #[error("repository {0} is already being indexed")]
    ConcurrentIndexConflict(String),

    /// A query could not be embedded.
    #[error("search failed: {0:#}")]
    Search(#[source] anyhow::Error),

    /// The record or vector store failed outside of a stage.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl IndexError {
    /// The failed stage, for [`IndexError::StageFailure`].
    pub fn stage(&self) -> Option<Stage> {
        match self {
            IndexError::StageFailure { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether re-invoking the same operation may succeed without user
    /// intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexError::StageFailure { .. }
                | IndexError::ConcurrentIndexConflict(_)
                | IndexError::Store(_)
        )
    }
}
