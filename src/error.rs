//! Typed errors for the failure classes callers must tell apart.
//!
//! CLI plumbing and configuration use `anyhow`. The enums here sit at the
//! boundaries where the kind of failure changes what happens next: a
//! [`ToolError`] becomes text for the model, an [`LlmError`] ends the run,
//! an [`IndexError`] is reported to whoever requested the index update.

use thiserror::Error;

/// Failure of one chat-completion call. Fatal for the orchestration run.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Transport(String),
    #[error("LLM request timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("LLM API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("LLM provider error: {0}")]
    Provider(String),
    #[error("malformed LLM response: {0}")]
    Malformed(String),
}

/// Failure of one tool execution. Always reported back to the model as
/// the tool's result text; never aborts the run.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("store failure: {0}")]
    Store(String),
    #[error("knowledge base search failed: {0}")]
    Retrieval(String),
}

/// Failure of one index operation on one document.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("document store failure: {0}")]
    Store(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("embedding count mismatch: sent {expected} texts, got {got} vectors")]
    EmbeddingCount { expected: usize, got: usize },
    #[error("vector index failure: {0}")]
    VectorIndex(String),
    #[error("stale vector cleanup failed: {0}")]
    StaleCleanup(String),
    #[error("reindex already running")]
    AlreadyRunning,
    #[error("index queue closed")]
    QueueClosed,
    #[error("index queue full")]
    QueueFull,
}

impl IndexError {
    pub fn store(err: anyhow::Error) -> Self {
        Self::Store(format!("{:#}", err))
    }
}

/// Failure of a whole orchestration run.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("failed to load conversation context: {0}")]
    Context(String),
    #[error("failed to persist conversation: {0}")]
    Persist(String),
}
