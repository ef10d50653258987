//! Qdrant REST client implementing [`VectorIndex`].
//!
//! | Operation | Request |
//! |-----------|---------|
//! | existence / count | `GET /collections/{name}` |
//! | create | `PUT /collections/{name}` |
//! | upsert | `PUT /collections/{name}/points?wait=true` |
//! | delete | `POST /collections/{name}/points/delete?wait=true` |
//! | search | `POST /collections/{name}/points/search` |

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

use helpdesk_agent_core::index::{CollectionInfo, FieldMatch, PayloadFilter, VectorIndex};
use helpdesk_agent_core::models::{ChunkPayload, IndexedVector, SearchResult};

use crate::config::{api_key_from_env, VectorIndexConfig};

pub struct QdrantIndex {
    http: reqwest::Client,
    collection_url: String,
    api_key: Option<String>,
}

impl QdrantIndex {
    pub fn new(config: &VectorIndexConfig) -> Result<Self> {
        let api_key = match &config.api_key_env {
            Some(var) => Some(api_key_from_env(var)?),
            None => None,
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            collection_url: format!(
                "{}/collections/{}",
                config.url.trim_end_matches('/'),
                config.collection
            ),
            api_key,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self
            .http
            .request(method, format!("{}{}", self.collection_url, path));
        match &self.api_key {
            Some(key) => req.header("api-key", key),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> Result<Value> {
        let resp = req
            .send()
            .await
            .with_context(|| format!("Qdrant {} request failed", what))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Qdrant {} failed with {}: {}", what, status, body);
        }
        resp.json()
            .await
            .with_context(|| format!("Qdrant {} returned invalid JSON", what))
    }
}

/// Encode a filter in Qdrant's `must` / `must_not` form.
pub fn filter_body(filter: &PayloadFilter) -> Value {
    let conditions = |matches: &[FieldMatch]| -> Vec<Value> {
        matches
            .iter()
            .map(|m| json!({ "key": m.key, "match": { "value": m.value } }))
            .collect()
    };

    let mut body = json!({ "must": conditions(&filter.must) });
    if !filter.must_not.is_empty() {
        body["must_not"] = Value::Array(conditions(&filter.must_not));
    }
    body
}

fn decode_hit(hit: &Value) -> Result<SearchResult> {
    let id = match &hit["id"] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => bail!("Qdrant hit has invalid id: {}", other),
    };
    let score = hit["score"]
        .as_f64()
        .context("Qdrant hit has no score")? as f32;
    let payload: ChunkPayload = serde_json::from_value(hit["payload"].clone())
        .with_context(|| format!("Qdrant point {} has an unexpected payload", id))?;

    Ok(SearchResult { id, score, payload })
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self, dims: usize) -> Result<()> {
        if self.collection_info().await?.exists {
            return Ok(());
        }

        let body = json!({ "vectors": { "size": dims, "distance": "Cosine" } });
        self.send(
            self.request(reqwest::Method::PUT, "").json(&body),
            "create collection",
        )
        .await?;
        tracing::info!(collection = %self.collection_url, dims, "created vector collection");
        Ok(())
    }

    async fn collection_info(&self) -> Result<CollectionInfo> {
        let resp = self
            .request(reqwest::Method::GET, "")
            .send()
            .await
            .context("Qdrant collection info request failed")?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(CollectionInfo::default());
        }
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Qdrant collection info failed with {}: {}", status, body);
        }

        let json: Value = resp.json().await?;
        Ok(CollectionInfo {
            exists: true,
            points_count: json["result"]["points_count"].as_u64().unwrap_or(0),
        })
    }

    async fn upsert(&self, points: &[IndexedVector]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let points: Vec<Value> = points
            .iter()
            .map(|p| {
                json!({
                    "id": p.id,
                    "vector": p.vector,
                    "payload": p.payload,
                })
            })
            .collect();

        self.send(
            self.request(reqwest::Method::PUT, "/points?wait=true")
                .json(&json!({ "points": points })),
            "upsert",
        )
        .await?;
        Ok(())
    }

    async fn delete_by_filter(&self, filter: &PayloadFilter) -> Result<()> {
        self.send(
            self.request(reqwest::Method::POST, "/points/delete?wait=true")
                .json(&json!({ "filter": filter_body(filter) })),
            "delete",
        )
        .await?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchResult>> {
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = json!(threshold);
        }

        let json = self
            .send(
                self.request(reqwest::Method::POST, "/points/search").json(&body),
                "search",
            )
            .await?;

        json["result"]
            .as_array()
            .context("Qdrant search response has no result array")?
            .iter()
            .map(decode_hit)
            .collect()
    }
}
