//! Conflict checker
//!
//! LLM-arbitrated contradiction detection between a new fragment and its
//! nearest neighbours. Strictly advisory: findings are logged and handed
//! back to the ingest caller for surfacing, and neither the write nor any
//! existing node is ever touched. Arbiter failures are absorbed — a dead
//! LLM just means no conflict reports.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{ConflictConfig, RetryConfig};
use crate::index::MemoryIndex;
use crate::memory::node::MemoryNode;
use crate::providers::{
    complete_once, conflict_prompt, parse_json_response, ConflictJudgement, LanguageModel,
};

// ============================================================================
// CONFLICT REPORTS
// ============================================================================

/// An advisory contradiction report surfaced to the ingest caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryConflict {
    /// Id of the existing node involved
    pub existing_id: Uuid,
    /// Content of the existing node
    pub existing_content: String,
    /// Category reported by the arbiter
    pub conflict_type: String,
    /// One-sentence description
    pub description: String,
    /// Arbiter confidence in [0, 1]
    pub confidence: f64,
    /// Cosine similarity that triggered arbitration
    pub similarity: f32,
}

// ============================================================================
// CONFLICT CHECKER
// ============================================================================

/// Detects contradictions with top-similar neighbours
pub struct ConflictChecker {
    llm: Arc<dyn LanguageModel>,
    index: Arc<MemoryIndex>,
    config: ConflictConfig,
    retry: RetryConfig,
}

impl ConflictChecker {
    /// Create a checker over the shared index and language model
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        index: Arc<MemoryIndex>,
        config: ConflictConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            llm,
            index,
            config,
            retry,
        }
    }

    /// Scan for contradictions before a node is stored
    ///
    /// Runs before the C4 upsert, so the node cannot shadow itself in the
    /// neighbour pool. Every failure path degrades to "no reports".
    pub async fn check(&self, node: &MemoryNode) -> Vec<MemoryConflict> {
        if node.degraded {
            return vec![];
        }

        let neighbours = match self.index.search_by_vector(
            &node.scope,
            &node.vector,
            self.config.candidates,
            None,
        ) {
            Ok(hits) => hits,
            Err(err) => {
                tracing::warn!(error = %err, "conflict scan skipped: neighbour search failed");
                return vec![];
            }
        };

        let mut reports = Vec::new();
        for (neighbour, similarity) in neighbours {
            if neighbour.id == node.id || similarity < self.config.similarity_threshold {
                continue;
            }

            let Some(judgement) = self.arbitrate(&neighbour.content, &node.content).await else {
                continue;
            };
            if !judgement.is_conflict || judgement.confidence < self.config.min_confidence {
                continue;
            }

            let report = MemoryConflict {
                existing_id: neighbour.id,
                existing_content: neighbour.content,
                conflict_type: judgement
                    .conflict_type
                    .unwrap_or_else(|| "factual".to_string()),
                description: judgement.description.unwrap_or_default(),
                confidence: judgement.confidence,
                similarity,
            };
            tracing::warn!(
                scope = %node.scope,
                new = %node.id,
                existing = %report.existing_id,
                conflict_type = %report.conflict_type,
                confidence = report.confidence,
                "memory conflict detected"
            );
            reports.push(report);
        }
        reports
    }

    async fn arbitrate(&self, existing: &str, incoming: &str) -> Option<ConflictJudgement> {
        match complete_once(&self.llm, &self.retry, &conflict_prompt(existing, incoming)).await {
            Ok(raw) => parse_json_response(&raw),
            Err(err) => {
                tracing::debug!(error = %err, "conflict arbiter unavailable");
                None
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
