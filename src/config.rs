//! Configuration file parsing.
//!
//! RepoSearch reads a single TOML file (default `./config/reposearch.toml`).
//! Every section is optional and falls back to the defaults below. Secrets
//! never live in the file: the OpenAI key comes from `OPENAI_API_KEY` and
//! the GitHub token from `GITHUB_TOKEN`.
//!
//! ```toml
//! [db]
//! path = "./data/reposearch.sqlite"
//!
//! [chunking]
//! chunk_size = 1000
//! chunk_overlap = 100
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [github]
//! fetcher = "api"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reposearch_core::chunk::ChunkingOptions;
use reposearch_core::indexer::{ConflictPolicy, IndexerConfig};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/reposearch.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_tokens: default_max_tokens(),
            max_file_size: default_max_file_size(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    100
}
fn default_max_tokens() -> usize {
    5000
}
fn default_max_file_size() -> u64 {
    2 * 1024 * 1024
}

impl ChunkingConfig {
    pub fn options(&self) -> ChunkingOptions {
        ChunkingOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            max_tokens: self.max_tokens,
            max_file_size: self.max_file_size,
            exclude_globs: self.exclude_globs.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Inputs longer than this many characters are cut before sending.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    /// Override for OpenAI-compatible endpoints.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            max_input_chars: default_max_input_chars(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    16
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_input_chars() -> usize {
    24_000
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default)]
    pub score_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            score_threshold: 0.0,
        }
    }
}

fn default_max_results() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitHubConfig {
    /// `api` (REST, no git binary needed) or `git` (shallow clone).
    #[serde(default = "default_fetcher")]
    pub fetcher: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_clone_base")]
    pub clone_base: String,
    #[serde(default = "default_github_timeout")]
    pub timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            fetcher: default_fetcher(),
            api_url: default_api_url(),
            clone_base: default_clone_base(),
            timeout_secs: default_github_timeout(),
        }
    }
}

fn default_fetcher() -> String {
    "api".to_string()
}
fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_clone_base() -> String {
    "https://github.com".to_string()
}
fn default_github_timeout() -> u64 {
    60
}

impl GitHubConfig {
    /// Token from `GITHUB_TOKEN`, if set and non-empty.
    pub fn token(&self) -> Option<String> {
        std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// Parent for scoped working directories; OS temp dir when unset.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    #[serde(default)]
    pub on_conflict: ConflictPolicy,
    /// How long a database indexing lease lives without being renewed.
    /// Renewed before every stage; a crashed process frees it on expiry.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            on_conflict: ConflictPolicy::default(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

fn default_lease_ttl_secs() -> u64 {
    3600
}

impl IndexingConfig {
    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            work_dir: self.work_dir.clone(),
            on_conflict: self.on_conflict,
            lease_ttl: Duration::from_secs(self.lease_ttl_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    // Validate retrieval
    if config.retrieval.max_results < 1 {
        anyhow::bail!("retrieval.max_results must be >= 1");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.score_threshold) {
        anyhow::bail!("retrieval.score_threshold must be in [-1.0, 1.0]");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.indexing.lease_ttl_secs == 0 {
        anyhow::bail!("indexing.lease_ttl_secs must be > 0");
    }

    match config.github.fetcher.as_str() {
        "api" | "git" => {}
        other => anyhow::bail!(
            "Unknown github.fetcher: '{}'. Must be api or git.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 100);
        assert_eq!(config.chunking.max_file_size, 2 * 1024 * 1024);
        assert_eq!(config.embedding.batch_size, 16);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.retrieval.max_results, 10);
        assert_eq!(config.github.fetcher, "api");
        assert_eq!(config.indexing.on_conflict, ConflictPolicy::Wait);
        assert_eq!(
            config.indexing.indexer_config().lease_ttl,
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn full_file_parses() {
        let config = parse(
            r#"
            [db]
            path = "/tmp/rs.sqlite"

            [chunking]
            chunk_size = 500
            chunk_overlap = 50
            exclude_globs = ["vendor/**"]

            [embedding]
            provider = "openai"
            model = "text-embedding-3-small"
            dims = 1536

            [retrieval]
            max_results = 5
            score_threshold = 0.3

            [github]
            fetcher = "git"

            [indexing]
            work_dir = "/tmp/work"
            on_conflict = "reject"
            lease_ttl_secs = 120

            [server]
            bind = "0.0.0.0:9000"
            "#,
        )
        .unwrap();
        assert_eq!(config.db.path, PathBuf::from("/tmp/rs.sqlite"));
        assert_eq!(config.chunking.options().exclude_globs, vec!["vendor/**"]);
        assert_eq!(config.embedding.dims, Some(1536));
        assert_eq!(config.indexing.indexer_config().on_conflict, ConflictPolicy::Reject);
        assert_eq!(config.indexing.indexer_config().lease_ttl, Duration::from_secs(120));
        assert_eq!(config.server.bind, "0.0.0.0:9000");
    }

    #[test]
    fn example_config_is_valid() {
        let config = parse(include_str!("../config/reposearch.example.toml")).unwrap();
        assert_eq!(config.embedding.provider, "openai");
        assert_eq!(config.indexing.on_conflict, ConflictPolicy::Wait);
    }

    #[test]
    fn enabled_provider_requires_model_and_dims() {
        assert!(parse("[embedding]\nprovider = \"openai\"\ndims = 8").is_err());
        assert!(parse("[embedding]\nprovider = \"openai\"\nmodel = \"m\"").is_err());
    }

    #[test]
    fn rejects_unknown_values() {
        assert!(parse("[embedding]\nprovider = \"magic\"").is_err());
        assert!(parse("[github]\nfetcher = \"ftp\"").is_err());
        assert!(parse("[indexing]\non_conflict = \"panic\"").is_err());
        assert!(parse("[indexing]\nlease_ttl_secs = 0").is_err());
        assert!(parse("[chunking]\nchunk_size = 100\nchunk_overlap = 100").is_err());
        assert!(parse("[retrieval]\nmax_results = 0").is_err());
    }
}
