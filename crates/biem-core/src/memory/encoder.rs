//! Encoder
//!
//! Turns a text fragment into an unstored memory node: deterministic id,
//! normalized embedding, extracted entities, and a sentiment score. The
//! LLM side-information is best-effort — a provider failure leaves the
//! node with the regex-extracted entities and neutral sentiment. An
//! embedding failure does not fail the call either: the node comes back
//! flagged degraded with a zero vector and the pipeline stores it anyway.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{RetryConfig, MAX_CONTENT_BYTES};
use crate::embedding::{l2_normalize, zero_vector};
use crate::error::{BiemError, Result};
use crate::memory::node::{MemoryNode, Tier};
use crate::providers::{
    complete_once, embed_one, entity_prompt, parse_json_response, sentiment_prompt,
    EmbeddingProvider, EntityList, LanguageModel, SentimentScore,
};

/// Namespace for deterministic node ids
const NODE_NAMESPACE: Uuid = Uuid::from_u128(0x8f1f_64c2_a0d4_4b2e_9c7a_55e3_21b6_d90du128);

/// Upper bound on entities kept per node
const MAX_ENTITIES: usize = 16;

// ============================================================================
// ENCODER
// ============================================================================

/// Produces unstored memory nodes from raw text
pub struct Encoder {
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LanguageModel>,
    retry: RetryConfig,
    dimensions: usize,
    entity_pattern: Regex,
}

impl Encoder {
    /// Create an encoder over the given providers
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
        retry: RetryConfig,
        dimensions: usize,
    ) -> Self {
        // Capitalized word runs ("Marie Curie", "New York City") and
        // ALL-CAPS tokens of 2+ characters (acronyms)
        let entity_pattern =
            Regex::new(r"\b(?:[A-Z][a-z0-9]+(?:[ -][A-Z][a-z0-9]+)*|[A-Z]{2,})\b")
                .expect("entity pattern is valid");
        Self {
            embedder,
            llm,
            retry,
            dimensions,
            entity_pattern,
        }
    }

    /// Encode a fragment into an unstored node
    ///
    /// Validation failures (empty or oversized content) surface before
    /// any provider call; everything downstream is best-effort.
    pub async fn encode(&self, text: &str, source: &str, scope: &str) -> Result<MemoryNode> {
        let content = text.trim();
        if content.is_empty() {
            return Err(BiemError::validation("E_EMPTY_CONTENT", "content is empty"));
        }
        if content.len() > MAX_CONTENT_BYTES {
            return Err(BiemError::validation(
                "E_CONTENT_TOO_LARGE",
                format!("content exceeds {MAX_CONTENT_BYTES} bytes"),
            ));
        }
        if scope.is_empty() {
            return Err(BiemError::validation("E_MISSING_SCOPE", "scope is required"));
        }

        let created_at = Utc::now();
        let id = node_id(scope, content, created_at);

        let (vector, degraded) = match embed_one(&self.embedder, &self.retry, content).await {
            Ok(mut vector) => {
                l2_normalize(&mut vector);
                (vector, false)
            }
            Err(err) => {
                tracing::warn!(node = %id, error = %err, "embedding failed, storing degraded node");
                (zero_vector(self.dimensions), true)
            }
        };

        let entities = self.extract_entities(content).await;
        let sentiment = self.classify_sentiment(content).await;

        Ok(MemoryNode {
            id,
            scope: scope.to_string(),
            content: content.to_string(),
            vector,
            created_at,
            last_accessed: created_at,
            entities,
            sentiment,
            source: source.to_string(),
            degraded,
            energy: 0.0,
            initial_energy: 0.0,
            tier: Tier::L2,
        })
    }

    /// Union of the LLM's entity list and the regex fallback
    async fn extract_entities(&self, text: &str) -> Vec<String> {
        let mut entities: Vec<String> = Vec::new();

        match complete_once(&self.llm, &self.retry, &entity_prompt(text)).await {
            Ok(raw) => {
                if let Some(parsed) = parse_json_response::<EntityList>(&raw) {
                    entities.extend(
                        parsed
                            .entities
                            .into_iter()
                            .map(|e| e.trim().to_string())
                            .filter(|e| !e.is_empty()),
                    );
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "entity extraction unavailable, regex only");
            }
        }

        for m in self.entity_pattern.find_iter(text) {
            entities.push(m.as_str().to_string());
        }

        dedup_preserving_order(entities, MAX_ENTITIES)
    }

    /// Sentiment in [-1, 1]; 0.0 whenever the classifier is unusable
    async fn classify_sentiment(&self, text: &str) -> f64 {
        match complete_once(&self.llm, &self.retry, &sentiment_prompt(text)).await {
            Ok(raw) => parse_json_response::<SentimentScore>(&raw)
                .map(|s| s.sentiment.clamp(-1.0, 1.0))
                .unwrap_or(0.0),
            Err(err) => {
                tracing::debug!(error = %err, "sentiment classifier unavailable");
                0.0
            }
        }
    }
}

/// Deterministic 128-bit id over (scope, content, creation instant)
///
/// The timestamp keeps repeated ingests of the same text distinct while
/// the hash keeps the id reproducible for idempotent upserts.
pub fn node_id(scope: &str, content: &str, created_at: DateTime<Utc>) -> Uuid {
    let mut name = Vec::with_capacity(scope.len() + content.len() + 20);
    name.extend_from_slice(scope.as_bytes());
    name.push(0);
    name.extend_from_slice(content.as_bytes());
    name.push(0);
    name.extend_from_slice(
        &created_at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| created_at.timestamp_micros())
            .to_le_bytes(),
    );
    Uuid::new_v5(&NODE_NAMESPACE, &name)
}

fn dedup_preserving_order(entities: Vec<String>, cap: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for entity in entities {
        let key = entity.to_lowercase();
        if seen.insert(key) {
            out.push(entity);
            if out.len() >= cap {
                break;
            }
        }
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ChatMessage;
    use async_trait::async_trait;

    struct FixedEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.fail {
                return Err(BiemError::Embedding("offline".into()));
            }
            Ok(texts.iter().map(|_| vec![3.0, 4.0, 0.0, 0.0]).collect())
        }

        fn dimensions(&self) -> usize {
            4
        }
    }

    struct ScriptedLlm {
        response: Option<String>,
    }

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn complete(&self, _messages: &[ChatMessage], _json: bool) -> Result<String> {
            self.response
                .clone()
                .ok_or_else(|| BiemError::Completion("offline".into()))
        }
    }

    fn encoder(fail_embed: bool, llm_response: Option<&str>) -> Encoder {
        Encoder::new(
            Arc::new(FixedEmbedder { fail: fail_embed }),
            Arc::new(ScriptedLlm {
                response: llm_response.map(str::to_string),
            }),
            RetryConfig {
                max_retries: 0,
                base_delay_ms: 1,
                deadline_ms: 1000,
            },
            4,
        )
    }

    #[tokio::test]
    async fn test_encode_normalizes_vector() {
        let enc = encoder(false, Some(r#"{"entities": []}"#));
        let node = enc.encode("hello world", "user", "s").await.unwrap();
        assert!(!node.degraded);
        let norm: f32 = node.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_empty_content_rejected_before_providers() {
        let enc = encoder(true, None);
        let err = enc.encode("   ", "user", "s").await.unwrap_err();
        assert_eq!(err.code(), "E_EMPTY_CONTENT");
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades() {
        let enc = encoder(true, None);
        let node = enc.encode("hello", "user", "s").await.unwrap();
        assert!(node.degraded);
        assert_eq!(node.vector, vec![0.0; 4]);
        assert_eq!(node.sentiment, 0.0);
    }

    #[tokio::test]
    async fn test_entities_union_llm_and_regex() {
        let enc = encoder(false, Some(r#"{"entities": ["mitochondrion"]}"#));
        let node = enc
            .encode("Marie Curie worked in Paris on RADIUM", "user", "s")
            .await
            .unwrap();
        assert!(node.entities.iter().any(|e| e == "mitochondrion"));
        assert!(node.entities.iter().any(|e| e == "Marie Curie"));
        assert!(node.entities.iter().any(|e| e == "RADIUM"));
    }

    #[tokio::test]
    async fn test_llm_failure_keeps_regex_entities() {
        let enc = encoder(false, None);
        let node = enc.encode("Paris is in France", "user", "s").await.unwrap();
        assert!(node.entities.iter().any(|e| e == "Paris"));
        assert!(node.entities.iter().any(|e| e == "France"));
        assert_eq!(node.sentiment, 0.0);
    }

    #[tokio::test]
    async fn test_same_content_distinct_ids() {
        let enc = encoder(false, Some(r#"{"entities": []}"#));
        let a = enc.encode("duplicate", "user", "s").await.unwrap();
        let b = enc.encode("duplicate", "user", "s").await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_node_id_deterministic() {
        let t = Utc::now();
        assert_eq!(node_id("s", "text", t), node_id("s", "text", t));
        assert_ne!(node_id("s", "text", t), node_id("other", "text", t));
    }
}
