//! External providers
//!
//! BIEM consumes exactly two capabilities from the host application: an
//! embedding function and an LLM completion function. Both are modeled as
//! dyn-compatible async traits so the agent can wire in whatever clients
//! it already owns. Every call site in the engine goes through the
//! deadline and bounded-retry helpers here; a provider that hangs or
//! flaps degrades the enrichment steps without taking down the pipeline.

mod prompts;

pub use prompts::{
    consolidation_prompt, conflict_prompt, entity_prompt, parse_json_response, sentiment_prompt,
    triple_prompt, ConflictJudgement, ConsolidationSummary, EntityList, ExtractionIntent,
    RawTriple, SentimentScore, TripleExtraction,
};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RetryConfig;
use crate::error::{BiemError, Result};

// ============================================================================
// CHAT MESSAGES
// ============================================================================

/// Role of a chat message sent to the language model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instruction
    System,
    /// User turn
    User,
    /// Assistant turn
    Assistant,
}

/// A single chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Message role
    pub role: ChatRole,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// System-role message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// User-role message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

// ============================================================================
// PROVIDER TRAITS
// ============================================================================

/// Embedding function `embed(texts) -> vectors`
///
/// The dimension is fixed at engine init; providers whose output is not
/// deterministic must accept re-embedding on every update.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, one vector per input, in order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Output dimension of this provider
    fn dimensions(&self) -> usize;
}

/// LLM completion function `complete(messages, json) -> text`
///
/// Used for entity extraction, sentiment, conflict arbitration, triple
/// extraction, and consolidation summaries. `json` asks the provider to
/// constrain output to a single JSON object where it supports that.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Produce a completion for the message list
    async fn complete(&self, messages: &[ChatMessage], json: bool) -> Result<String>;
}

// ============================================================================
// DEADLINES AND RETRIES
// ============================================================================

/// Run a future under a deadline, mapping elapse to [`BiemError::Timeout`]
pub async fn with_deadline<T, F>(deadline_ms: u64, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(Duration::from_millis(deadline_ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(BiemError::Timeout(deadline_ms)),
    }
}

/// Retry a fallible operation with exponential backoff
///
/// Only transient errors are retried; validation and permanent failures
/// surface immediately. `op` names the operation in log lines.
pub async fn retry_backoff<T, F, Fut>(retry: &RetryConfig, op: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < retry.max_retries => {
                let delay = retry.base_delay_ms.saturating_mul(1u64 << attempt.min(16));
                tracing::warn!(
                    operation = op,
                    attempt = attempt + 1,
                    delay_ms = delay,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Embed a single text under the retry budget and deadline
pub async fn embed_one(
    provider: &Arc<dyn EmbeddingProvider>,
    retry: &RetryConfig,
    text: &str,
) -> Result<Vec<f32>> {
    let texts = [text.to_string()];
    let mut vectors = retry_backoff(retry, "embed", || {
        with_deadline(retry.deadline_ms, provider.embed(&texts))
    })
    .await?;

    vectors
        .pop()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BiemError::Embedding("provider returned no vector".to_string()))
}

/// One deadline-bounded completion; enrichment callers absorb the error
pub async fn complete_once(
    llm: &Arc<dyn LanguageModel>,
    retry: &RetryConfig,
    messages: &[ChatMessage],
) -> Result<String> {
    with_deadline(retry.deadline_ms, llm.complete(messages, true)).await
}

// ============================================================================
// TESTS
// ============================================================================
