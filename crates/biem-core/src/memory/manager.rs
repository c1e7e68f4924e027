//! Memory manager
//!
//! The public face of one scope's memory: the ordered ingest pipeline
//! (encode, energy, conflict scan, tiered store, link routing) and the
//! two-stage recall (vector seeding, spreading activation, fused
//! scoring, access boosts). Holds the per-scope coarse lock shared by
//! the working set and the graph; the lock is only ever taken for
//! synchronous structural mutations, never across an await.

use chrono::{DateTime, Utc};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::config::BiemConfig;
use crate::embedding::l2_normalize;
use crate::error::{BiemError, Result};
use crate::index::MemoryIndex;
use crate::memory::conflict::{ConflictChecker, MemoryConflict};
use crate::memory::encoder::Encoder;
use crate::memory::energy::FEEDBACK_RANGE;
use crate::memory::node::{Link, MemoryNode, MemoryScopeStats, RecallHit};
use crate::memory::router::{lock_state, AssociationRouter};
use crate::memory::tiering::{EnergyOp, TierManager, TierScanReport};
use crate::memory::ScopeState;
use crate::providers::{embed_one, EmbeddingProvider, LanguageModel};
use crate::storage::CrystalStore;

/// Capacity of the query-embedding cache
const QUERY_CACHE_SIZE: usize = 100;

// ============================================================================
// INGEST OUTCOME
// ============================================================================

/// Result of one ingest call
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// Id of the stored node
    pub node_id: Uuid,
    /// Advisory conflict reports surfaced to the caller
    pub conflicts: Vec<MemoryConflict>,
    /// Number of new links routed
    pub links_routed: usize,
}

// ============================================================================
// MEMORY MANAGER
// ============================================================================

/// Orchestrates ingest and recall for one scope
pub struct MemoryManager {
    scope: String,
    config: Arc<BiemConfig>,
    encoder: Encoder,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<MemoryIndex>,
    crystal: Arc<CrystalStore>,
    state: Arc<Mutex<ScopeState>>,
    tiers: TierManager,
    router: AssociationRouter,
    conflicts: ConflictChecker,
    pending_links: Mutex<Vec<Link>>,
    /// LRU cache so repeated recalls skip the provider round-trip
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl MemoryManager {
    /// Create a manager bound to one scope
    pub fn new(
        scope: String,
        config: Arc<BiemConfig>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
        index: Arc<MemoryIndex>,
        crystal: Arc<CrystalStore>,
    ) -> Self {
        let state = Arc::new(Mutex::new(ScopeState::new(config.working_set.clone())));
        let encoder = Encoder::new(
            embedder.clone(),
            llm.clone(),
            config.retry.clone(),
            index.dimensions(),
        );
        let tiers = TierManager::new(
            scope.clone(),
            config.clone(),
            index.clone(),
            crystal.clone(),
            llm.clone(),
            state.clone(),
        );
        let router = AssociationRouter::new(index.clone(), crystal.clone(), config.links.clone());
        let conflicts = ConflictChecker::new(
            llm,
            index.clone(),
            config.conflict.clone(),
            config.retry.clone(),
        );

        Self {
            scope,
            config,
            encoder,
            embedder,
            index,
            crystal,
            state,
            tiers,
            router,
            conflicts,
            pending_links: Mutex::new(Vec::new()),
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_SIZE).expect("cache size is non-zero"),
            )),
        }
    }

    /// Scope this manager serves
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Rebuild the graph from persisted crystal links (startup)
    pub fn hydrate(&self) -> Result<usize> {
        let links = self.crystal.links_for_scope(&self.scope)?;
        let count = links.len();
        let mut guard = lock_state(&self.state)?;
        for link in &links {
            guard.graph.add_link(link);
        }
        drop(guard);
        if count > 0 {
            tracing::info!(scope = %self.scope, links = count, "association graph rehydrated");
        }
        Ok(count)
    }

    // ========================================================================
    // INGEST
    // ========================================================================

    /// Persist a fragment through the full write pipeline
    ///
    /// Total by design: embedding failures store a degraded node, LLM
    /// failures lose only enrichment, and a C6 hiccup parks links on the
    /// reconciliation queue. Only validation and a broken backend
    /// surface as errors.
    pub async fn ingest(&self, content: &str, source: &str) -> Result<IngestOutcome> {
        let mut node = self.encoder.encode(content, source, &self.scope).await?;

        let initial = self
            .tiers
            .energy()
            .initial_energy(source, node.entities.len());
        node.energy = initial;
        node.initial_energy = initial;

        // Advisory scan against the pre-write neighbourhood
        let conflicts = self.conflicts.check(&node).await;

        let node = self.tiers.store(node).await?;
        let links = self.router.route(&node, &self.state, &self.pending_links)?;

        tracing::info!(
            scope = %self.scope,
            node = %node.id,
            energy = node.energy,
            tier = %node.tier,
            links = links.len(),
            conflicts = conflicts.len(),
            degraded = node.degraded,
            "fragment ingested"
        );

        Ok(IngestOutcome {
            node_id: node.id,
            conflicts,
            links_routed: links.len(),
        })
    }

    // ========================================================================
    // RECALL
    // ========================================================================

    /// Two-stage recall: vector seeds, graph expansion, fused ranking
    pub async fn recall(&self, query: &str, top_k: usize) -> Result<Vec<RecallHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(BiemError::validation("E_EMPTY_QUERY", "query is empty"));
        }
        let cfg = &self.config.recall;
        let top_k = if top_k == 0 { cfg.top_k } else { top_k };

        let vector = self.query_vector(query).await?;
        let hits = self
            .index
            .search_by_vector(&self.scope, &vector, cfg.seed_top_k, None)?;

        // Degraded nodes are absent from the ANN side, so seeds are
        // always real vectors
        let seeds: Vec<Uuid> = hits.iter().take(cfg.top_k).map(|(n, _)| n.id).collect();
        let activation = {
            let guard = lock_state(&self.state)?;
            guard.graph.spread(&seeds, cfg.spread_hops, cfg.spread_decay)
        };

        // Fuse: vec-only candidates take activation 0, activation-only
        // candidates take vec 0
        let mut components: HashMap<Uuid, (f64, f64)> = HashMap::new();
        let mut metas: HashMap<Uuid, DateTime<Utc>> = HashMap::new();
        for (node, score) in &hits {
            components.insert(node.id, (*score as f64, 0.0));
            metas.insert(node.id, node.created_at);
        }
        for (id, act) in activation {
            components.entry(id).or_insert((0.0, 0.0)).1 = act;
        }

        let mut ranked: Vec<(Uuid, f64, f64, f64, DateTime<Utc>)> = Vec::new();
        for (id, (vec_score, act_score)) in components {
            let created_at = match metas.get(&id) {
                Some(t) => *t,
                None => match self.index.get(&id)? {
                    Some(node) => node.created_at,
                    None => continue,
                },
            };
            let score = cfg.score_alpha * vec_score + cfg.score_beta * act_score;
            ranked.push((id, score, vec_score, act_score, created_at));
        }

        // Deterministic order: score descending, then age, then id
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.4.cmp(&b.4))
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(top_k);

        let mut results = Vec::with_capacity(ranked.len());
        for (id, score, vec_score, act_score, _) in ranked {
            if let Some(node) = self.tiers.touch(&id, EnergyOp::RecallBoost).await? {
                results.push(RecallHit {
                    node,
                    score,
                    vector_score: vec_score,
                    activation: act_score,
                });
            }
        }
        Ok(results)
    }

    async fn query_vector(&self, query: &str) -> Result<Vec<f32>> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(vector) = cache.get(query) {
                return Ok(vector.clone());
            }
        }

        let mut vector = embed_one(&self.embedder, &self.config.retry, query).await?;
        l2_normalize(&mut vector);

        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(query.to_string(), vector.clone());
        }
        Ok(vector)
    }

    // ========================================================================
    // FEEDBACK AND CAUSAL EVENTS
    // ========================================================================

    /// Apply an explicit relevance delta to a node
    pub async fn feedback(&self, id: Uuid, delta: f64) -> Result<MemoryNode> {
        if !(FEEDBACK_RANGE.0..=FEEDBACK_RANGE.1).contains(&delta) || !delta.is_finite() {
            return Err(BiemError::validation(
                "E_DELTA_RANGE",
                format!(
                    "delta {delta} outside [{}, {}]",
                    FEEDBACK_RANGE.0, FEEDBACK_RANGE.1
                ),
            ));
        }
        self.tiers
            .touch(&id, EnergyOp::Feedback(delta))
            .await?
            .ok_or_else(|| BiemError::NotFound(id.to_string()))
    }

    /// Record an explicit cause-effect pair between two nodes
    ///
    /// The only path that creates causal links. Returns whether the edge
    /// was new.
    pub async fn record_causal(&self, source: Uuid, target: Uuid) -> Result<bool> {
        if source == target {
            return Err(BiemError::validation(
                "E_SELF_LINK",
                "causal link endpoints must differ",
            ));
        }
        if self.index.get(&source)?.is_none() {
            return Err(BiemError::NotFound(source.to_string()));
        }
        if self.index.get(&target)?.is_none() {
            return Err(BiemError::NotFound(target.to_string()));
        }
        let link =
            self.router
                .route_causal(&self.scope, source, target, &self.state, &self.pending_links)?;
        Ok(link.is_some())
    }

    /// Fetch a node through the tier hierarchy (decays on read)
    pub async fn get(&self, id: Uuid) -> Result<Option<MemoryNode>> {
        self.tiers.get(&id).await
    }

    // ========================================================================
    // ADMINISTRATION AND MAINTENANCE
    // ========================================================================

    /// Per-scope counters
    pub fn stats(&self) -> Result<MemoryScopeStats> {
        let (total, _, degraded) = self.index.counts(&self.scope)?;
        let (graph_nodes, graph_links, l1_hot) = {
            let guard = lock_state(&self.state)?;
            (
                guard.graph.node_count(),
                guard.graph.link_count(),
                guard.working.len(),
            )
        };
        Ok(MemoryScopeStats {
            scope: self.scope.clone(),
            l1_nodes: l1_hot,
            l2_nodes: total,
            degraded_nodes: degraded,
            graph_nodes,
            graph_links,
            crystal_facts: self.crystal.fact_count(&self.scope)?,
            crystal_links: self.crystal.link_count(&self.scope)?,
            pending_links: self
                .pending_links
                .lock()
                .map(|p| p.len())
                .unwrap_or_default(),
        })
    }

    /// Refresh the hot copy of a re-embedded node so the L1 view stays
    /// coherent with the durable tier
    pub(crate) fn refresh_vector(&self, id: &Uuid, vector: &[f32]) {
        if let Ok(mut guard) = self.state.lock() {
            if let Some(node) = guard.working.get_mut(id) {
                node.vector = vector.to_vec();
                node.degraded = false;
            }
        }
    }

    /// Administrative removal of a node and its edges
    pub async fn delete_node(&self, id: Uuid) -> Result<bool> {
        {
            let mut guard = lock_state(&self.state)?;
            guard.working.remove(&id);
            guard.graph.remove_node(&id);
        }
        self.crystal.delete_links_for_node(&self.scope, &id)?;
        self.index.delete(&id)
    }

    /// Demotion/eviction pass (background)
    pub(crate) fn scan_tiers(&self) -> Result<TierScanReport> {
        self.tiers.scan()
    }

    /// Re-drive unpersisted links (background)
    pub(crate) fn reconcile_links(&self) -> Result<usize> {
        self.router.reconcile(&self.pending_links)
    }

    /// Consolidation pass (background)
    pub(crate) async fn consolidate(&self) -> Result<usize> {
        self.tiers.consolidate().await
    }
}
