//! # Helpdesk Agent
//!
//! A retrieval-augmented, tool-calling customer-support agent.
//!
//! Knowledge-base articles are chunked, embedded and stored in a Qdrant
//! collection whenever they are published or edited. Incoming customer
//! messages are answered by an agent that calls the language model in a
//! bounded loop, searching the knowledge base and acting on the
//! conversation through tools.
//!
//! ## Architecture
//!
//! ```text
//!  publish/edit ──▶ IndexQueue ──▶ Indexer ──▶ Chunker ─▶ Embeddings ─▶ Qdrant
//!                                                                        ▲
//!  customer msg ──▶ SupportAgent ──▶ Orchestrator ◀──▶ LLM               │
//!                                        │                               │
//!                                        ▼                               │
//!                                   ToolRegistry ──▶ Retriever ──────────┘
//!                                        │
//!                                        ├──▶ SupportStore (SQLite)
//!                                        └──▶ operator HTTP endpoints
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hdx init
//! hdx kb add --title "Refunds" --body-file refunds.md --status published
//! hdx search "how do I get my money back"
//! hdx chat --agent support --conversation <id> "I want a refund"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`agents`] | Agent profiles and HTTP tool declarations |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`kb`] | Knowledge-base documents and chunk rows |
//! | [`support`] | Conversations, clients, messages, tags |
//! | [`embedding`] | OpenAI-compatible embedding client |
//! | [`vector_index`] | Qdrant REST client |
//! | [`indexer`] / [`queue`] | Index runs and the background job queue |
//! | [`llm`] | OpenAI-compatible chat client |
//! | [`tools`] | Built-in and HTTP tools |
//! | [`orchestrator`] | The tool-calling loop and [`orchestrator::SupportAgent`] |
//!
//! Chunking, the conversation model, retrieval and the collaborator traits
//! live in the `helpdesk-agent-core` crate.

pub mod agents;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod kb;
pub mod lifecycle;
pub mod llm;
pub mod migrate;
pub mod orchestrator;
pub mod progress;
pub mod queue;
pub mod status;
pub mod support;
pub mod tools;
pub mod vector_index;
