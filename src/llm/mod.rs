//! Generation gateway for draft replies.
//!
//! The orchestrator only sees the [`Generator`] trait. The production backend
//! is [`OllamaClient`], which talks to a local Ollama chat endpoint.

pub mod ollama;
pub mod prompt;

pub use ollama::{OllamaClient, OllamaConfig};
pub use prompt::PromptTemplate;

use async_trait::async_trait;

use crate::error::GenerationError;

/// A chat-style text generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Generate a reply for a single user prompt.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}
