//! `reposearch search`: semantic search from the command line.

use anyhow::Result;

use crate::config::Config;
use crate::engine::SearchEngine;

/// Longest excerpt printed per result, in characters.
const EXCERPT_CHARS: usize = 240;

pub async fn run_search(
    config: &Config,
    query: &str,
    repository: Option<String>,
    limit: Option<usize>,
    score_threshold: Option<f32>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let engine = SearchEngine::open(config).await?;
    let results = engine
        .search(query, repository.as_deref(), limit, score_threshold)
        .await;
    engine.close().await;
    let results = results?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let chunk = &result.chunk;
        println!("{}. [{:.2}] {}", i + 1, result.score, chunk.source());
        println!("    type: {}", chunk.chunk_type());
        println!("    excerpt: \"{}\"", excerpt(&chunk.content));
        println!("    id: {}", chunk.id);
        println!();
    }
    Ok(())
}

fn excerpt(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_flattens_and_truncates() {
        assert_eq!(excerpt("fn main() {\n    run();\n}\n"), "fn main() { run(); }");
        let long = "x".repeat(EXCERPT_CHARS + 10);
        let cut = excerpt(&long);
        assert_eq!(cut.len(), EXCERPT_CHARS + 3);
        assert!(cut.ends_with("..."));
    }
}
