//! Reasoning provider abstraction.
//!
//! This module provides a trait-based abstraction over LLM providers, with an
//! OpenAI-compatible HTTP client as the primary implementation and a scripted
//! mock for tests and offline runs.
//!
//! The engine treats the provider as a plain request/response boundary: a
//! prompt plus optional structured context in, text out. Embeddings are
//! exposed separately so experience records can be indexed for similarity
//! search.

mod error;
mod mock;
mod openai;

pub use error::{classify_http_status, LlmError, LlmErrorKind};
pub use mock::MockLlm;
pub use openai::OpenAiClient;

use async_trait::async_trait;

/// Client for a text-generation and embedding provider.
///
/// Calls are never retried here; any error propagates to the caller, which
/// records it as a task failure.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion for `prompt`.
    ///
    /// `context` is provider-visible structured data (task name, goal,
    /// available tools) serialized alongside the prompt.
    async fn generate(
        &self,
        prompt: &str,
        context: Option<&serde_json::Value>,
    ) -> Result<String, LlmError>;

    /// Embed `text` into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}
