//! Embedding client implementations.
//!
//! - **[`DisabledEmbeddingClient`]** returns errors; used when embeddings are not configured.
//! - **[`OpenAiEmbeddingClient`]** calls an OpenAI-compatible `/embeddings`
//!   endpoint with retry and backoff.
//!
//! Both implement the core [`EmbeddingClient`] trait, so the indexer and
//! retriever never see which backend is in use.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use helpdesk_agent::config::EmbeddingConfig;
//! # use helpdesk_agent::embedding::create_embedding_client;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let client = create_embedding_client(&config).unwrap();
//! assert_eq!(client.model_name(), "disabled");
//! ```
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use helpdesk_agent_core::embedding::EmbeddingClient;

use crate::config::{api_key_from_env, EmbeddingConfig};

/// An embedding client that always fails.
pub struct DisabledEmbeddingClient;

#[async_trait]
impl EmbeddingClient for DisabledEmbeddingClient {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

/// Client for an OpenAI-compatible `POST {url}/embeddings` endpoint.
pub struct OpenAiEmbeddingClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
    backoff_base: Duration,
}

impl OpenAiEmbeddingClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set, or if the API
    /// key variable is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = api_key_from_env(&config.api_key_env)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            endpoint: format!("{}/embeddings", config.url.trim_end_matches('/')),
            api_key,
            model,
            dims,
            max_retries: config.max_retries,
            backoff_base: Duration::from_secs(1),
        })
    }

    /// Override the first retry delay (doubles on each further attempt).
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff_base * (1u32 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&self.endpoint)
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
                        let vectors = parse_embedding_response(&json)?;
                        if vectors.len() != texts.len() {
                            bail!(
                                "Embedding response has {} vectors for {} inputs",
                                vectors.len(),
                                texts.len()
                            );
                        }
                        return Ok(vectors);
                    }

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        tracing::warn!(%status, attempt, "embedding request failed, will retry");
                        last_err = Some(anyhow::anyhow!(
                            "Embedding API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    // Other client errors are final
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "embedding request failed, will retry");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
    }
}

/// Parse an embeddings API response.
///
/// Extracts `data[].embedding` arrays, ordered by each item's `index`
/// when the provider supplies one.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    if let Some(err) = json.get("error").filter(|e| !e.is_null()) {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        bail!("Embedding provider error: {}", message);
    }

    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embedding response: missing embedding"))?;

        let vec = embedding
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Invalid embedding response: non-numeric value in embedding {}",
                    position
                )
            })?;

        let index = match item.get("index") {
            None => position,
            Some(i) => i.as_u64().map(|i| i as usize).ok_or_else(|| {
                anyhow::anyhow!("Invalid embedding response: bad index {}", i)
            })?,
        };
        embeddings.push((index, vec));
    }

    embeddings.sort_by_key(|(index, _)| *index);
    // Indices must be exactly 0..n
    for (expected, (index, _)) in embeddings.iter().enumerate() {
        if *index != expected {
            bail!(
                "Invalid embedding response: indices are not 0..{} (found {} at position {})",
                embeddings.len(),
                index,
                expected
            );
        }
    }
    Ok(embeddings.into_iter().map(|(_, v)| v).collect())
}

/// Create the configured [`EmbeddingClient`].
///
/// | Config Value | Client |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbeddingClient`] |
/// | `"openai"` | [`OpenAiEmbeddingClient`] |
pub fn create_embedding_client(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbeddingClient)),
        "openai" => Ok(Arc::new(OpenAiEmbeddingClient::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_orders_by_index() {
        let json = json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_embedding_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_error_object() {
        let json = json!({"error": {"message": "invalid model"}});
        let err = parse_embedding_response(&json).unwrap_err();
        assert!(err.to_string().contains("invalid model"));
    }

    #[test]
    fn test_parse_rejects_non_numeric_values() {
        let json = json!({"data": [{"index": 0, "embedding": [0.5, "oops", null]}]});
        let err = parse_embedding_response(&json).unwrap_err();
        assert!(err.to_string().contains("non-numeric"), "{}", err);
    }

    #[test]
    fn test_parse_rejects_duplicate_or_gapped_indices() {
        let duplicate = json!({
            "data": [
                {"index": 0, "embedding": [1.0]},
                {"index": 0, "embedding": [2.0]}
            ]
        });
        assert!(parse_embedding_response(&duplicate).is_err());

        let gapped = json!({
            "data": [
                {"index": 0, "embedding": [1.0]},
                {"index": 2, "embedding": [2.0]}
            ]
        });
        let err = parse_embedding_response(&gapped).unwrap_err();
        assert!(err.to_string().contains("indices"), "{}", err);
    }

    #[test]
    fn test_parse_missing_data() {
        assert!(parse_embedding_response(&json!({})).is_err());
    }

    #[tokio::test]
    async fn test_disabled_client_fails() {
        let client = create_embedding_client(&EmbeddingConfig::default()).unwrap();
        assert_eq!(client.dims(), 0);
        assert!(client.embed(&["hello".to_string()]).await.is_err());
    }
}
