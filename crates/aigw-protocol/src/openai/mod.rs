//! Canonical OpenAI wire shapes: the inbound contract of the gateway.

pub mod chat;
pub mod embeddings;
pub mod error;
pub mod models;
pub mod stream;
