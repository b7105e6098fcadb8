//! `reposearch list` and `reposearch delete`.

use anyhow::{bail, Result};

use reposearch_core::models::RepositoryRecord;

use crate::config::Config;
use crate::engine::SearchEngine;

/// CLI entry point for `reposearch list`.
pub async fn run_list(config: &Config) -> Result<()> {
    let engine = SearchEngine::open(config).await?;
    let records = engine.list_repositories().await?;
    engine.close().await;

    if records.is_empty() {
        println!("No repositories indexed.");
        return Ok(());
    }

    for record in &records {
        print_record(record);
        println!();
    }
    Ok(())
}

/// CLI entry point for `reposearch delete`. Fails when the repository
/// is not indexed.
pub async fn run_delete(config: &Config, repository: &str) -> Result<()> {
    let engine = SearchEngine::open(config).await?;
    let removed = engine.delete_repository(repository).await;
    engine.close().await;

    if !removed? {
        bail!("repository {} is not indexed", repository);
    }
    println!("Deleted {}.", repository);
    Ok(())
}

pub fn print_record(record: &RepositoryRecord) {
    let indexed = record
        .last_indexed_at
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string());

    println!("{}", record.full_name());
    println!("    url:       {}", record.url);
    println!(
        "    revision:  {}",
        record.revision_id.as_deref().unwrap_or("(unknown)")
    );
    println!("    indexed:   {}", indexed);
    println!("    files:     {}", record.file_count);
    println!("    chunks:    {}", record.chunk_count);
    println!(
        "    stages:    download={} chunking={} embedding={}",
        record.download, record.chunking, record.embedding
    );
}
