//! Embedder trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement,
//! plus pure helper functions for vector serialization and similarity
//! computation.
//!
//! Concrete providers (OpenAI, disabled) live in the `reposearch` app crate.

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::Chunk;

/// Turns text into vectors.
///
/// Implementors provide [`embed_texts`](Embedder::embed_texts); batching,
/// truncation, and retries are their own concern. The provided methods
/// adapt it to chunks and single queries.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Return `chunks` with their `embedding` filled in.
    async fn embed(&self, mut chunks: Vec<Chunk>) -> Result<Vec<Chunk>> {
        if chunks.is_empty() {
            return Ok(chunks);
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embed_texts(&texts).await?;
        if vectors.len() != chunks.len() {
            bail!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }
        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.embedding = Some(vector);
        }
        Ok(chunks)
    }

    /// Embed a single search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_texts(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use reposearch_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Trailing partial values are
/// ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors,
/// zero vectors, or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkType;

    struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        fn model_name(&self) -> &str {
            "length"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        fn model_name(&self) -> &str {
            "short"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn embed_texts(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0]])
        }
    }

    fn chunk(text: &str, line: usize) -> Chunk {
        Chunk::new("a/b", "f.txt", line, line, ChunkType::Text, text.to_string())
    }

    #[tokio::test]
    async fn embed_fills_vectors_in_order() {
        let chunks = vec![chunk("a", 0), chunk("abc", 1)];
        let out = LengthEmbedder.embed(chunks).await.unwrap();
        assert_eq!(out[0].embedding, Some(vec![1.0]));
        assert_eq!(out[1].embedding, Some(vec![3.0]));
    }

    #[tokio::test]
    async fn embed_rejects_count_mismatch() {
        let chunks = vec![chunk("a", 0), chunk("b", 1)];
        assert!(ShortEmbedder.embed(chunks).await.is_err());
    }

    #[tokio::test]
    async fn embed_query_returns_first_vector() {
        let v = LengthEmbedder.embed_query("four").await.unwrap();
        assert_eq!(v, vec![4.0]);
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
