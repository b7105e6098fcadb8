//! # RepoSearch Core
//!
//! Domain logic for RepoSearch: repository records and their per-stage
//! status, the staleness planner, the text chunker, collaborator traits
//! (fetcher, embedder, stores), and the [`IndexingOrchestrator`] that drives
//! the Fetch → Chunk → Embed+Store pipeline.
//!
//! This crate contains no SQL and no HTTP. Concrete stores, fetchers and
//! embedding providers live in the `reposearch` app crate.
//!
//! [`IndexingOrchestrator`]: indexer::IndexingOrchestrator

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod fetch;
pub mod indexer;
pub mod locks;
pub mod models;
pub mod plan;
pub mod store;
