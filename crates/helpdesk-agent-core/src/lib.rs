//! # Helpdesk Agent Core
//!
//! I/O-free logic shared by every layer of the helpdesk agent: the
//! conversation model exchanged with the language model, the sentence
//! chunker, the embedding and vector-index traits, an in-memory index,
//! and the retriever that turns a query into ranked context.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. Concrete
//! embedding providers and the Qdrant client live in the `helpdesk-agent`
//! application crate and are passed in through the traits defined here.

pub mod chunk;
pub mod conversation;
pub mod embedding;
pub mod index;
pub mod models;
pub mod retrieval;
