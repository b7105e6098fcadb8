//! Core data models used throughout RepoSearch.
//!
//! These types represent the repositories, stage statuses, chunks, and
//! search results that flow through the indexing and retrieval pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IndexError;

/// A validated `owner/name` GitHub repository identifier.
///
/// GitHub resolves owners and names case-insensitively, so both are
/// lowercased: `Foo/Bar` and `foo/bar` share one record, chunk set and lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryId {
    owner: String,
    name: String,
}

impl RepositoryId {
    pub fn new(owner: &str, name: &str) -> Result<Self, IndexError> {
        let valid = |part: &str| {
            !part.is_empty()
                && part != "."
                && part != ".."
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        if !valid(owner) || !valid(name) {
            return Err(IndexError::InvalidRepositoryId(format!("{}/{}", owner, name)));
        }
        Ok(Self {
            owner: owner.to_ascii_lowercase(),
            name: name.to_ascii_lowercase(),
        })
    }

    /// Parse `owner/name`, also accepting a `https://github.com/` prefix and
    /// a trailing `.git`.
    pub fn parse(input: &str) -> Result<Self, IndexError> {
        let trimmed = input.trim();
        let stripped = trimmed
            .strip_prefix("https://github.com/")
            .or_else(|| trimmed.strip_prefix("http://github.com/"))
            .or_else(|| trimmed.strip_prefix("github.com/"))
            .unwrap_or(trimmed);
        let stripped = stripped.trim_end_matches('/');
        let stripped = stripped.strip_suffix(".git").unwrap_or(stripped);

        match stripped.split_once('/') {
            Some((owner, name)) if !name.contains('/') => Self::new(owner, name)
                .map_err(|_| IndexError::InvalidRepositoryId(input.to_string())),
            _ => Err(IndexError::InvalidRepositoryId(input.to_string())),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The store key, `owner/name`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn github_url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepositoryId {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// One stage of the indexing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Chunk,
    Embed,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 3] = [Stage::Fetch, Stage::Chunk, Stage::Embed];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Chunk => "chunk",
            Stage::Embed => "embed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the most recent run of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Never run, or reset at the start of a re-run that has not finished.
    #[default]
    NotStarted,
    Succeeded,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::NotStarted => "not_started",
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
        }
    }

    pub fn is_succeeded(&self) -> bool {
        *self == StageStatus::Succeeded
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(StageStatus::NotStarted),
            "succeeded" => Ok(StageStatus::Succeeded),
            "failed" => Ok(StageStatus::Failed),
            other => anyhow::bail!("unknown stage status: '{}'", other),
        }
    }
}

/// Current state of a repository as reported by a content fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryInfo {
    pub owner: String,
    pub name: String,
    pub url: String,
    /// Opaque revision token, typically the latest commit SHA.
    pub revision_id: Option<String>,
}

impl RepositoryInfo {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Durable per-repository indexing state, keyed by `owner/name`.
///
/// The three statuses are expected to form a chain (embed succeeded
/// implies chunk succeeded implies fetch succeeded), but a reader must
/// not rely on it: see [`RepositoryRecord::chain_consistent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub owner: String,
    pub name: String,
    pub url: String,
    pub revision_id: Option<String>,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub file_count: u64,
    /// Chunks stored by the last successful embed+store stage.
    pub chunk_count: u64,
    pub download: StageStatus,
    pub chunking: StageStatus,
    pub embedding: StageStatus,
}

impl RepositoryRecord {
    /// A fresh record for a repository that has never been indexed.
    ///
    /// `revision_id` stays empty until a fetch succeeds.
    pub fn new(info: &RepositoryInfo) -> Self {
        Self {
            owner: info.owner.clone(),
            name: info.name.clone(),
            url: info.url.clone(),
            revision_id: None,
            last_indexed_at: None,
            file_count: 0,
            chunk_count: 0,
            download: StageStatus::NotStarted,
            chunking: StageStatus::NotStarted,
            embedding: StageStatus::NotStarted,
        }
    }

    /// A record for a repository whose content changed upstream. Counts
    /// and timestamps from `previous` are kept as placeholders until the
    /// stages overwrite them.
    pub fn carry_forward(info: &RepositoryInfo, previous: &RepositoryRecord) -> Self {
        Self {
            revision_id: previous.revision_id.clone(),
            last_indexed_at: previous.last_indexed_at,
            file_count: previous.file_count,
            chunk_count: previous.chunk_count,
            ..Self::new(info)
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Fetch => self.download,
            Stage::Chunk => self.chunking,
            Stage::Embed => self.embedding,
        }
    }

    pub fn set_status(&mut self, stage: Stage, status: StageStatus) {
        match stage {
            Stage::Fetch => self.download = status,
            Stage::Chunk => self.chunking = status,
            Stage::Embed => self.embedding = status,
        }
    }

    pub fn download_succeeded(&self) -> bool {
        self.download.is_succeeded()
    }

    pub fn chunking_succeeded(&self) -> bool {
        self.chunking.is_succeeded()
    }

    pub fn embedding_succeeded(&self) -> bool {
        self.embedding.is_succeeded()
    }

    /// Whether every stage has succeeded.
    pub fn is_complete(&self) -> bool {
        Stage::ALL.iter().all(|s| self.status(*s).is_succeeded())
    }

    /// True when the succeeded stages form a prefix of the pipeline.
    pub fn chain_consistent(&self) -> bool {
        (!self.embedding_succeeded() || self.chunking_succeeded())
            && (!self.chunking_succeeded() || self.download_succeeded())
    }
}

/// Deterministic chunk identifier.
///
/// A UUIDv5 over `"{repository}/{file_path}:{start_line}-{end_line}"`, so
/// re-chunking identical content yields identical IDs.
pub fn chunk_id(repository: &str, file_path: &str, start_line: usize, end_line: usize) -> String {
    let key = format!("{}/{}:{}-{}", repository, file_path, start_line, end_line);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string()
}

/// Kind of content a chunk was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Code,
    Markdown,
    Text,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Code => "code",
            ChunkType::Markdown => "markdown",
            ChunkType::Text => "text",
        }
    }
}

/// A span of a repository file, the unit of indexing and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    /// Owning repository, `owner/name`.
    pub repository: String,
    pub content: String,
    /// `file_path`, `chunk_type`, `start_line`, `end_line`, `extension`,
    /// plus anything a chunker chooses to add.
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// Build a chunk with the standard positional metadata.
    ///
    /// Lines are 0-based and inclusive.
    pub fn new(
        repository: &str,
        file_path: &str,
        start_line: usize,
        end_line: usize,
        chunk_type: ChunkType,
        content: String,
    ) -> Self {
        let extension = std::path::Path::new(file_path)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        let mut metadata = BTreeMap::new();
        metadata.insert("file_path".to_string(), file_path.into());
        metadata.insert("chunk_type".to_string(), chunk_type.as_str().into());
        metadata.insert("start_line".to_string(), start_line.into());
        metadata.insert("end_line".to_string(), end_line.into());
        metadata.insert("extension".to_string(), extension.into());

        Self {
            id: chunk_id(repository, file_path, start_line, end_line),
            repository: repository.to_string(),
            content,
            metadata,
            embedding: None,
        }
    }

    pub fn file_path(&self) -> &str {
        self.metadata
            .get("file_path")
            .and_then(|v| v.as_str())
            .unwrap_or("")
    }

    pub fn start_line(&self) -> Option<u64> {
        self.metadata.get("start_line").and_then(|v| v.as_u64())
    }

    pub fn end_line(&self) -> Option<u64> {
        self.metadata.get("end_line").and_then(|v| v.as_u64())
    }

    pub fn chunk_type(&self) -> &str {
        self.metadata
            .get("chunk_type")
            .and_then(|v| v.as_str())
            .unwrap_or("text")
    }

    /// Human-readable location, `owner/name - path:start-end`.
    pub fn source(&self) -> String {
        match (self.start_line(), self.end_line()) {
            (Some(start), Some(end)) => format!(
                "{} - {}:{}-{}",
                self.repository,
                self.file_path(),
                start,
                end
            ),
            _ => format!("{} - {}", self.repository, self.file_path()),
        }
    }
}

/// A chunk paired with its similarity to the query. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    /// Cosine similarity, higher is closer.
    pub score: f32,
}

/// What a fetcher wrote into a working directory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchSummary {
    pub file_count: u64,
    /// Revision actually materialized, when the fetcher knows it. Wins over
    /// the revision reported by `get_info` if the two differ.
    pub revision_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(rev: Option<&str>) -> RepositoryInfo {
        RepositoryInfo {
            owner: "a".into(),
            name: "b".into(),
            url: "https://github.com/a/b".into(),
            revision_id: rev.map(String::from),
        }
    }

    #[test]
    fn parses_owner_and_name() {
        let id = RepositoryId::parse("rust-lang/cargo").unwrap();
        assert_eq!(id.owner(), "rust-lang");
        assert_eq!(id.name(), "cargo");
        assert_eq!(id.full_name(), "rust-lang/cargo");
    }

    #[test]
    fn parses_github_urls() {
        let id = RepositoryId::parse("https://github.com/tokio-rs/tokio.git").unwrap();
        assert_eq!(id.full_name(), "tokio-rs/tokio");
        let id: RepositoryId = "github.com/a/b/".parse().unwrap();
        assert_eq!(id.to_string(), "a/b");
    }

    #[test]
    fn ids_ignore_case() {
        let upper = RepositoryId::parse("https://github.com/Tokio-RS/Tokio").unwrap();
        let lower = RepositoryId::parse("tokio-rs/tokio").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.full_name(), "tokio-rs/tokio");
        assert_eq!(upper.github_url(), "https://github.com/tokio-rs/tokio");
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in ["", "abc", "/b", "a/", "a/b/c", "a b/c", "../x"] {
            let err = RepositoryId::parse(bad).unwrap_err();
            assert!(
                matches!(err, IndexError::InvalidRepositoryId(_)),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn chunk_ids_are_deterministic() {
        let a = chunk_id("a/b", "src/lib.rs", 0, 10);
        let b = chunk_id("a/b", "src/lib.rs", 0, 10);
        let c = chunk_id("a/b", "src/lib.rs", 11, 20);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn chunk_metadata_and_source() {
        let chunk = Chunk::new("a/b", "docs/README.md", 3, 9, ChunkType::Markdown, "x".into());
        assert_eq!(chunk.file_path(), "docs/README.md");
        assert_eq!(chunk.chunk_type(), "markdown");
        assert_eq!(chunk.metadata["extension"], ".md");
        assert_eq!(chunk.source(), "a/b - docs/README.md:3-9");
    }

    #[test]
    fn new_record_has_no_progress() {
        let record = RepositoryRecord::new(&info(Some("c1")));
        assert_eq!(record.full_name(), "a/b");
        assert_eq!(record.revision_id, None);
        assert!(!record.download_succeeded());
        assert!(record.chain_consistent());
    }

    #[test]
    fn carry_forward_keeps_counts_and_resets_statuses() {
        let mut prev = RepositoryRecord::new(&info(Some("c1")));
        prev.revision_id = Some("c1".into());
        prev.file_count = 4;
        prev.chunk_count = 12;
        for stage in Stage::ALL {
            prev.set_status(stage, StageStatus::Succeeded);
        }

        let next = RepositoryRecord::carry_forward(&info(Some("c2")), &prev);
        assert_eq!(next.file_count, 4);
        assert_eq!(next.chunk_count, 12);
        assert_eq!(next.revision_id.as_deref(), Some("c1"));
        assert!(Stage::ALL
            .iter()
            .all(|s| next.status(*s) == StageStatus::NotStarted));
    }

    #[test]
    fn chain_consistency() {
        let mut record = RepositoryRecord::new(&info(None));
        record.embedding = StageStatus::Succeeded;
        assert!(!record.chain_consistent());
        record.chunking = StageStatus::Succeeded;
        record.download = StageStatus::Succeeded;
        assert!(record.chain_consistent());
        assert!(record.is_complete());
    }

    #[test]
    fn stage_status_round_trips_through_str() {
        for status in [
            StageStatus::NotStarted,
            StageStatus::Succeeded,
            StageStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<StageStatus>().unwrap(), status);
        }
        assert!("done".parse::<StageStatus>().is_err());
    }
}
