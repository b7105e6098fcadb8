//! Embedding providers.
//!
//! Concrete [`Embedder`] implementations:
//! - **[`DisabledEmbedder`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIEmbedder`]**: calls the OpenAI embeddings API with batching, retry, and backoff.
//!
//! # Provider Selection
//!
//! Use [`create_embedder`] to instantiate the provider named in the
//! configuration:
//!
//! ```rust,no_run
//! # use reposearch::config::EmbeddingConfig;
//! # use reposearch::embedding::create_embedder;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use reposearch_core::embedding::Embedder;

use crate::config::EmbeddingConfig;

const OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";

/// Build the embedder named by `config.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// An embedder that always fails.
///
/// Used when `embedding.provider = "disabled"`. Indexing still fetches and
/// chunks; the embed stage fails and is retried once a provider is set up.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_texts(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ OpenAI Provider ============

/// Embedder using the OpenAI API.
///
/// Calls `POST /v1/embeddings` in batches of `batch_size`. Requires the
/// `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    batch_size: usize,
    max_retries: u32,
    max_input_chars: usize,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            url: config.url.clone().unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            max_input_chars: config.max_input_chars,
            client,
        })
    }

    /// One API call with retry/backoff.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let input: Vec<String> = texts
            .iter()
            .map(|t| prepare_input(t, self.max_input_chars))
            .collect();
        let body = serde_json::json!({
            "model": self.model,
            "input": input,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, delay_secs = delay.as_secs(), "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_openai_response(&json, texts.len());
                    }

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        warn!(%status, "embedding request failed, will retry");
                        last_err = Some(anyhow::anyhow!(
                            "OpenAI API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    // Client error other than 429, give up
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        debug!(texts = texts.len(), model = %self.model, "embedded texts");
        Ok(vectors)
    }
}

/// The API rejects empty strings and inputs past the model's context.
fn prepare_input(text: &str, max_chars: usize) -> String {
    if text.trim().is_empty() {
        return " ".to_string();
    }
    if max_chars == 0 || text.len() <= max_chars {
        return text.to_string();
    }
    let mut cut = max_chars;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_string()
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, vec));
    }

    if indexed.len() != expected {
        bail!(
            "Invalid OpenAI response: expected {} embeddings, got {}",
            expected,
            indexed.len()
        );
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] },
            ]
        });
        let vecs = parse_openai_response(&json, 2).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_openai_response(&serde_json::json!({}), 1).is_err());
        let json = serde_json::json!({ "data": [{ "index": 0 }] });
        assert!(parse_openai_response(&json, 1).is_err());
        let json = serde_json::json!({ "data": [{ "index": 0, "embedding": [1.0] }] });
        assert!(parse_openai_response(&json, 2).is_err());
    }

    #[test]
    fn test_prepare_input() {
        assert_eq!(prepare_input("", 10), " ");
        assert_eq!(prepare_input("  \n", 10), " ");
        assert_eq!(prepare_input("hello", 10), "hello");
        assert_eq!(prepare_input("hello world", 5), "hello");
        assert_eq!(prepare_input("ééé", 3), "é");
    }

    #[tokio::test]
    async fn test_disabled_embedder_fails() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.model_name(), "disabled");
        assert!(embedder.embed_query("hello").await.is_err());
    }

    #[test]
    fn test_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "nope".into(),
            ..Default::default()
        };
        assert!(create_embedder(&config).is_err());
    }
}
