//! Wiring of long-lived clients from configuration.
//!
//! Every client is built once here and handed to the components that use
//! it. Nothing below holds global state.

use anyhow::{Context, Result};
use helpdesk_agent_core::embedding::EmbeddingClient;
use helpdesk_agent_core::index::VectorIndex;
use helpdesk_agent_core::retrieval::Retriever;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::agents::AgentRegistry;
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedding_client;
use crate::indexer::Indexer;
use crate::llm::{ChatClient, OpenAiChatClient};
use crate::kb::SqliteKnowledgeBase;
use crate::orchestrator::SupportAgent;
use crate::queue::IndexQueue;
use crate::support::SqliteSupportStore;
use crate::tools::HttpToolRunner;
use crate::vector_index::QdrantIndex;

pub struct Services {
    pub config: Config,
    pub pool: SqlitePool,
    pub kb: Arc<SqliteKnowledgeBase>,
    pub support: Arc<SqliteSupportStore>,
    pub embedder: Arc<dyn EmbeddingClient>,
    pub index: Arc<dyn VectorIndex>,
    /// `None` when embeddings are disabled.
    pub retriever: Option<Arc<Retriever>>,
    pub indexer: Arc<Indexer>,
    pub agents: AgentRegistry,
}

impl Services {
    /// Connect to SQLite and build the remote clients. No network call is
    /// made until a client is used.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        let index: Arc<dyn VectorIndex> = Arc::new(QdrantIndex::new(&config.vector_index)?);
        Self::with_index(config, pool, index)
    }

    /// Same as [`Services::open`] with a caller-supplied pool and index.
    pub fn with_index(config: Config, pool: SqlitePool, index: Arc<dyn VectorIndex>) -> Result<Self> {
        let embedder = create_embedding_client(&config.embedding)?;
        Ok(Self::assemble(config, pool, embedder, index))
    }

    pub fn assemble(
        config: Config,
        pool: SqlitePool,
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        let kb = Arc::new(SqliteKnowledgeBase::new(pool.clone()));
        let support = Arc::new(SqliteSupportStore::new(pool.clone()));
        let retriever = config.embedding.is_enabled().then(|| {
            Arc::new(Retriever::new(
                embedder.clone(),
                index.clone(),
                config.retrieval.settings(),
            ))
        });
        let indexer = Arc::new(Indexer::new(
            kb.clone(),
            embedder.clone(),
            index.clone(),
            config.chunking.options(),
        ));
        let agents = AgentRegistry::from_config(&config);

        Self {
            config,
            pool,
            kb,
            support,
            embedder,
            index,
            retriever,
            indexer,
            agents,
        }
    }

    pub fn start_queue(&self) -> IndexQueue {
        IndexQueue::start(
            self.indexer.clone(),
            self.config.indexer.workers,
            self.config.indexer.queue_capacity,
        )
    }

    /// Build the named agent against the configured LLM endpoint.
    pub fn agent(&self, name: &str) -> Result<SupportAgent> {
        let llm: Arc<dyn ChatClient> = Arc::new(OpenAiChatClient::new(&self.config.llm)?);
        self.agent_with_llm(name, llm)
    }

    pub fn agent_with_llm(&self, name: &str, llm: Arc<dyn ChatClient>) -> Result<SupportAgent> {
        let profile = self.agents.find(name).cloned().with_context(|| {
            let known: Vec<&str> = self.agents.names().collect();
            format!(
                "unknown agent '{}' (configured: {})",
                name,
                if known.is_empty() {
                    "none".to_string()
                } else {
                    known.join(", ")
                }
            )
        })?;
        let http = HttpToolRunner::new(Duration::from_secs(self.config.tools.http_timeout_secs))?;
        Ok(SupportAgent::new(
            profile,
            &self.config.llm,
            llm,
            self.support.clone(),
            self.retriever.clone(),
            http,
        ))
    }
}
