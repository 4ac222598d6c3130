//! Interview Coach: backend for practicing interview answers.
//!
//! Users upload a spoken answer to an interview question, get a transcription
//! and an LLM-written analysis back, and can follow up in a chat tied to that
//! recording. Free accounts have per-tier quotas; premium status follows the
//! payment provider's subscription webhooks.
//!
//! - Storage: Sled trees of JSON documents, transactional multi-document writes
//! - Speech-to-text and chat completion: OpenAI-compatible HTTP API
//! - Networking: Axum REST on Tokio

pub mod ai;
pub mod auth;
pub mod billing;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod prompts;
// REST API module: Axum handlers, auth middleware and OpenAPI document
pub mod rest;
pub mod storage;
pub mod usage;
