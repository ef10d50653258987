#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use helpdesk_agent::db;
use helpdesk_agent::error::LlmError;
use helpdesk_agent::kb::SqliteKnowledgeBase;
use helpdesk_agent::llm::{ChatClient, ChatRequest, ChatResponse};
use helpdesk_agent::migrate;
use helpdesk_agent::support::SqliteSupportStore;
use helpdesk_agent_core::embedding::EmbeddingClient;

pub const DIMS: usize = 32;

/// Bag-of-words embedder: each lowercased word bumps one hashed bucket.
/// Texts sharing words get similar vectors.
pub struct HashEmbedder {
    fail: AtomicBool,
    /// Fail any batch containing this marker.
    poison: Option<String>,
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
            poison: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn poisoned_by(marker: &str) -> Self {
        Self {
            poison: Some(marker.to_string()),
            ..Self::new()
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0f32; DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut h: u32 = 2166136261;
            for b in word.to_lowercase().bytes() {
                h ^= b as u32;
                h = h.wrapping_mul(16777619);
            }
            v[(h as usize) % DIMS] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-test"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            bail!("embedding service unavailable");
        }
        if let Some(marker) = &self.poison {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                bail!("embedding rejected input");
            }
        }
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Chat client replaying canned responses and recording requests.
pub struct ScriptedChat {
    script: Mutex<VecDeque<ChatResponse>>,
    repeat: Option<ChatResponse>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedChat {
    pub fn new(script: Vec<ChatResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with `response`.
    pub fn repeating(response: ChatResponse) -> Self {
        Self {
            repeat: Some(response),
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> ChatRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl ChatClient for ScriptedChat {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return Ok(next);
        }
        self.repeat
            .clone()
            .ok_or_else(|| LlmError::Transport("connection refused".into()))
    }
}

pub struct TestDb {
    pub tmp: TempDir,
    pub pool: sqlx::SqlitePool,
    pub kb: Arc<SqliteKnowledgeBase>,
    pub support: Arc<SqliteSupportStore>,
}

pub async fn test_db() -> TestDb {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("data/hdx.sqlite"))
        .await
        .unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    TestDb {
        tmp,
        kb: Arc::new(SqliteKnowledgeBase::new(pool.clone())),
        support: Arc::new(SqliteSupportStore::new(pool.clone())),
        pool,
    }
}

/// Start `router` on an ephemeral local port and return its base URL.
pub async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A few hundred words of support-article prose.
pub fn article(topic: &str, sentences: usize) -> String {
    (0..sentences)
        .map(|i| {
            format!(
                "Step {} of the {} guide explains what customers should check before contacting support.",
                i + 1,
                topic
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}
