//! Engine configuration
//!
//! Per-concern config structs with defaults. Everything tunable from the
//! outside lives here; components receive the slice of configuration they
//! care about and never read environment state themselves.

use std::path::PathBuf;

/// Default embedding dimension when the provider does not override it
pub const DEFAULT_DIMENSIONS: usize = 1024;

/// Upper bound on node content, in bytes
pub const MAX_CONTENT_BYTES: usize = 16 * 1024;

// ============================================================================
// ENERGY
// ============================================================================

/// Energy scoring and decay parameters
#[derive(Debug, Clone)]
pub struct EnergyConfig {
    /// Exponential decay rate per hour
    pub lambda_decay: f64,
    /// Boost applied to every recall hit
    pub boost_on_recall: f64,
    /// Base term of the initial-energy formula
    pub init_base: f64,
    /// Weight of the source bonus term
    pub init_source_weight: f64,
    /// Weight of the entity-count term
    pub init_entity_weight: f64,
    /// Entity count at which the entity term saturates
    pub entity_saturation: usize,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            lambda_decay: 0.1,
            boost_on_recall: 0.1,
            init_base: 0.5,
            init_source_weight: 0.2,
            init_entity_weight: 0.3,
            entity_saturation: 5,
        }
    }
}

// ============================================================================
// WORKING SET (L1)
// ============================================================================

/// Hot-cache admission and eviction parameters
#[derive(Debug, Clone)]
pub struct WorkingSetConfig {
    /// Maximum nodes per scope
    pub max_nodes: usize,
    /// Minimum energy for admission
    pub admit_energy: f64,
    /// Energy below which a node is evicted at scan time
    pub min_energy: f64,
    /// Seconds of idleness after which a node is evicted at scan time
    pub ttl_seconds: i64,
    /// Energy below which an L1 node is demoted to L2 at scan time
    pub demote_energy: f64,
    /// Post-boost energy at which an L2 node is promoted to L1
    pub promote_energy: f64,
}

impl Default for WorkingSetConfig {
    fn default() -> Self {
        Self {
            max_nodes: 100,
            admit_energy: 0.5,
            min_energy: 0.1,
            ttl_seconds: 3600,
            demote_energy: 0.3,
            promote_energy: 0.7,
        }
    }
}

// ============================================================================
// LINK ROUTING
// ============================================================================

/// Association-router parameters
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Recency window for temporal links, in seconds
    pub temporal_window_seconds: i64,
    /// Number of recent nodes eligible for temporal links
    pub temporal_fanout: usize,
    /// Cosine similarity threshold for semantic links
    pub semantic_threshold: f32,
    /// Neighbour pool size consulted for semantic links
    pub semantic_candidates: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            temporal_window_seconds: 300,
            temporal_fanout: 5,
            semantic_threshold: 0.7,
            semantic_candidates: 10,
        }
    }
}

// ============================================================================
// CONFLICT ARBITRATION
// ============================================================================

/// Contradiction-detection parameters
#[derive(Debug, Clone)]
pub struct ConflictConfig {
    /// Cosine similarity above which a neighbour is arbitrated
    pub similarity_threshold: f32,
    /// Neighbour pool size consulted
    pub candidates: usize,
    /// Minimum arbiter confidence for a conflict to be reported
    pub min_confidence: f64,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            candidates: 10,
            min_confidence: 0.7,
        }
    }
}

// ============================================================================
// RECALL
// ============================================================================

/// Two-stage recall parameters
#[derive(Debug, Clone)]
pub struct RecallConfig {
    /// Results returned (and seeds taken) per recall
    pub top_k: usize,
    /// Vector-search pool from which seeds are drawn
    pub seed_top_k: usize,
    /// Spreading-activation hop count
    pub spread_hops: u32,
    /// Per-hop activation decay
    pub spread_decay: f64,
    /// Fusion weight of the vector score
    pub score_alpha: f64,
    /// Fusion weight of the activation score
    pub score_beta: f64,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            seed_top_k: 10,
            spread_hops: 2,
            spread_decay: 0.5,
            score_alpha: 0.7,
            score_beta: 0.3,
        }
    }
}

// ============================================================================
// CONSOLIDATION
// ============================================================================

/// Cluster-consolidation parameters (thresholds deliberately configurable)
#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    /// Minimum connected-subgraph size eligible for consolidation
    pub cluster_min_size: usize,
    /// Minimum average (decayed) energy of the cluster
    pub cluster_min_energy: f64,
    /// Seconds between consolidation passes
    pub interval_seconds: u64,
    /// Upper bound on clusters summarized per pass
    pub max_clusters_per_run: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            cluster_min_size: 5,
            cluster_min_energy: 0.6,
            interval_seconds: 600,
            max_clusters_per_run: 4,
        }
    }
}

// ============================================================================
// KNOWLEDGE
// ============================================================================

/// Triple extraction, confirmation, and retrieval parameters
#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    /// Store non-conflicting triples without confirmation
    pub auto_store: bool,
    /// Run assistant messages through the extraction pipeline
    pub extract_from_agent: bool,
    /// Seconds before a pending update expires
    pub pending_ttl_seconds: i64,
    /// Minimum extraction confidence for a triple to survive the filter
    pub min_confidence: f64,
    /// Upper bound on triples returned per query
    pub max_context_items: usize,
    /// Run the secondary cluster-expansion search
    pub enable_cluster_expansion: bool,
    /// Direct-search result count
    pub top_k: usize,
    /// Expansion-search result count per direct hit
    pub expansion_k: usize,
    /// Score multiplier applied to expansion hits
    pub expansion_weight: f32,
    /// Minimum score for direct hits
    pub min_score: f32,
    /// Minimum score for expansion hits
    pub expansion_min_score: f32,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            auto_store: true,
            extract_from_agent: true,
            pending_ttl_seconds: 300,
            min_confidence: 0.5,
            max_context_items: 10,
            enable_cluster_expansion: true,
            top_k: 5,
            expansion_k: 3,
            expansion_weight: 0.7,
            min_score: 0.5,
            expansion_min_score: 0.4,
        }
    }
}

// ============================================================================
// RETRIES AND DEADLINES
// ============================================================================

/// Bounded retry budget for external calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts beyond the first
    pub max_retries: u32,
    /// Base backoff delay, doubled per attempt
    pub base_delay_ms: u64,
    /// Deadline per provider call
    pub deadline_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            deadline_ms: 30_000,
        }
    }
}

// ============================================================================
// TOP-LEVEL CONFIG
// ============================================================================

/// Engine-wide configuration
#[derive(Debug, Clone)]
pub struct BiemConfig {
    /// Database location; platform data directory when unset
    pub db_path: Option<PathBuf>,
    /// Embedding dimension; the provider's dimension wins when they differ
    pub dimensions: Option<usize>,
    /// Energy scoring and decay
    pub energy: EnergyConfig,
    /// L1 working set
    pub working_set: WorkingSetConfig,
    /// Link routing
    pub links: LinkConfig,
    /// Conflict arbitration
    pub conflict: ConflictConfig,
    /// Recall
    pub recall: RecallConfig,
    /// Consolidation
    pub consolidation: ConsolidationConfig,
    /// Knowledge pipeline
    pub knowledge: KnowledgeConfig,
    /// External-call retry budget
    pub retry: RetryConfig,
    /// Seconds between background maintenance cycles
    pub maintenance_interval_seconds: u64,
}

impl Default for BiemConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            dimensions: None,
            energy: EnergyConfig::default(),
            working_set: WorkingSetConfig::default(),
            links: LinkConfig::default(),
            conflict: ConflictConfig::default(),
            recall: RecallConfig::default(),
            consolidation: ConsolidationConfig::default(),
            knowledge: KnowledgeConfig::default(),
            retry: RetryConfig::default(),
            maintenance_interval_seconds: 60,
        }
    }
}

impl BiemConfig {
    /// Resolve the effective embedding dimension against a provider
    pub fn effective_dimensions(&self, provider_dims: usize) -> usize {
        if provider_dims > 0 {
            provider_dims
        } else {
            self.dimensions.unwrap_or(DEFAULT_DIMENSIONS)
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
