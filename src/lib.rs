//! # RepoSearch
//!
//! Incremental indexing and semantic search over GitHub repositories.
//!
//! RepoSearch fetches a repository, splits its files into line-addressed
//! chunks, embeds them, and stores the vectors in SQLite. Re-indexing is
//! incremental: the pipeline core ([`reposearch_core`]) compares the
//! repository's current revision with the stored record and reruns only
//! the stages whose inputs changed.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────────┐   ┌──────────┐
//! │   Fetchers   │──▶│  IndexingOrchestrator │──▶│  SQLite  │
//! │ GitHub / git │   │ Fetch → Chunk → Embed │   │ records  │
//! └──────────────┘   └───────────────────────┘   │ + vectors│
//!                                                └────┬─────┘
//!                      ┌──────────────────────────────┤
//!                      ▼                              ▼
//!                 ┌──────────┐                  ┌──────────┐
//!                 │   CLI    │                  │   MCP    │
//!                 └──────────┘                  └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`engine`] | Config → components wiring, the facade every front end uses |
//! | [`github`] | Fetcher over the GitHub REST API |
//! | [`git_fetcher`] | Fetcher over the `git` binary |
//! | [`embedding`] | Embedding providers |
//! | [`sqlite_store`] | SQLite record and vector store |
//! | [`tools`] / [`mcp`] / [`server`] | MCP tools, protocol bridge and transports |
//! | [`db`] / [`migrate`] | Database connection and schema |

pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod get;
pub mod git_fetcher;
pub mod github;
pub mod index_cmd;
pub mod mcp;
pub mod migrate;
pub mod repos;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod tools;
