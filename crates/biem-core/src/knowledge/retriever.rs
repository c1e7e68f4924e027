//! Knowledge retriever
//!
//! Vector-plus-cluster-expansion search over the triple collection: a
//! direct search seeds the result set, then each hit pulls in its own
//! neighbourhood at a discounted weight, so a query about one concept
//! surfaces the cluster around it. Expansion hits can never outrank the
//! direct hit that found them.

use std::sync::Arc;

use crate::config::{KnowledgeConfig, RetryConfig};
use crate::embedding::l2_normalize;
use crate::error::{BiemError, Result};
use crate::providers::{embed_one, EmbeddingProvider};

use super::{KnowledgeStore, KnowledgeTriple};

// ============================================================================
// KNOWLEDGE RETRIEVER
// ============================================================================

/// Query-time retrieval over the global triple store
pub struct KnowledgeRetriever {
    store: Arc<KnowledgeStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    retry: RetryConfig,
    config: KnowledgeConfig,
}

impl KnowledgeRetriever {
    /// Create a retriever over the store and embedder
    pub fn new(
        store: Arc<KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        retry: RetryConfig,
        config: KnowledgeConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            retry,
            config,
        }
    }

    /// Ranked, deduplicated triples for a query
    pub async fn query(&self, text: &str) -> Result<Vec<(KnowledgeTriple, f32)>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(BiemError::validation("E_EMPTY_QUERY", "query is empty"));
        }
        let cfg = &self.config;

        let mut vector = embed_one(&self.embedder, &self.retry, text).await?;
        l2_normalize(&mut vector);

        let direct = self
            .store
            .search_by_vector(&vector, cfg.top_k, cfg.min_score)?;

        // Dedup by id keeping the maximum score
        let mut best: std::collections::HashMap<uuid::Uuid, (KnowledgeTriple, f32)> =
            std::collections::HashMap::new();
        for (triple, score) in &direct {
            best.insert(triple.id, (triple.clone(), *score));
        }

        if cfg.enable_cluster_expansion {
            for (hit, _) in &direct {
                if hit.vector.is_empty() {
                    continue;
                }
                let neighbours = self.store.search_by_vector(
                    &hit.vector,
                    cfg.expansion_k + 1,
                    cfg.expansion_min_score,
                )?;
                for (triple, score) in neighbours {
                    if triple.id == hit.id {
                        continue;
                    }
                    let weighted = score * cfg.expansion_weight;
                    match best.get(&triple.id) {
                        Some((_, existing)) if *existing >= weighted => {}
                        _ => {
                            best.insert(triple.id, (triple, weighted));
                        }
                    }
                }
            }
        }

        let mut results: Vec<(KnowledgeTriple, f32)> = best.into_values().collect();
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.created_at.cmp(&b.0.created_at))
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        results.truncate(cfg.max_context_items);
        Ok(results)
    }
}

// ============================================================================
// TESTS
// ============================================================================
