//! `reposearch get`: print one stored chunk.

use anyhow::Result;

use crate::config::Config;
use crate::engine::SearchEngine;

/// CLI entry point. Exits with status 1 when the chunk does not exist.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let engine = SearchEngine::open(config).await?;
    let chunk = engine.get_chunk(id).await;
    engine.close().await;

    let chunk = match chunk? {
        Some(chunk) => chunk,
        None => {
            eprintln!("Error: chunk not found: {}", id);
            std::process::exit(1);
        }
    };

    println!("--- Chunk ---");
    println!("id:         {}", chunk.id);
    println!("repository: {}", chunk.repository);
    println!("file:       {}", chunk.file_path());
    if let (Some(start), Some(end)) = (chunk.start_line(), chunk.end_line()) {
        println!("lines:      {}-{}", start, end);
    }
    println!("type:       {}", chunk.chunk_type());
    println!("metadata:   {}", serde_json::to_string(&chunk.metadata)?);
    println!();
    println!("--- Content ---");
    println!("{}", chunk.content);
    Ok(())
}
