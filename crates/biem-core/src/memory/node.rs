//! Memory node - the fundamental unit of the tiered substrate
//!
//! Each node carries a text fragment, its embedding, extraction metadata,
//! and an energy scalar that decays over time and drives tier placement.
//! Nodes are value objects: the association graph references them by id
//! only, and mutable state (energy, tier, last access) lives behind the
//! working-set and vector-index interfaces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// TIERS
// ============================================================================

/// Storage class of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// In-process hot cache
    L1,
    /// Durable vector + graph tier
    #[default]
    L2,
}

impl Tier {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::L1 => "l1",
            Tier::L2 => "l2",
        }
    }

    /// Parse from string name; unknown values fall back to L2
    pub fn parse_name(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "l1" => Tier::L1,
            _ => Tier::L2,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// LINKS
// ============================================================================

/// Type of association between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    /// Co-occurrence within the recency window
    Temporal,
    /// Vector similarity above threshold
    Semantic,
    /// Explicitly recorded cause-effect pair
    Causal,
}

impl LinkType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Temporal => "temporal",
            LinkType::Semantic => "semantic",
            LinkType::Causal => "causal",
        }
    }

    /// Parse from string name
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "temporal" => Some(LinkType::Temporal),
            "semantic" => Some(LinkType::Semantic),
            "causal" => Some(LinkType::Causal),
            _ => None,
        }
    }
}

impl std::fmt::Display for LinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed, weighted, directed edge between two nodes
///
/// Unique per `(scope, source, target, link_type)`; the relational mirror
/// enforces that with a UNIQUE constraint, the in-memory graph with a key
/// set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    /// Source node id
    pub source: Uuid,
    /// Target node id
    pub target: Uuid,
    /// Association type
    pub link_type: LinkType,
    /// Weight in (0, 1]
    pub weight: f64,
    /// When the link was created
    pub created_at: DateTime<Utc>,
    /// Scope the link belongs to
    pub scope: String,
}

impl Link {
    /// Create a link in the given scope, stamped now
    pub fn new(
        scope: impl Into<String>,
        source: Uuid,
        target: Uuid,
        link_type: LinkType,
        weight: f64,
    ) -> Self {
        Self {
            source,
            target,
            link_type,
            weight: weight.clamp(f64::MIN_POSITIVE, 1.0),
            created_at: Utc::now(),
            scope: scope.into(),
        }
    }

    /// Identity key within a scope
    pub fn key(&self) -> (Uuid, Uuid, LinkType) {
        (self.source, self.target, self.link_type)
    }
}

// ============================================================================
// MEMORY NODE
// ============================================================================

/// A memory fragment in the tiered substrate
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryNode {
    /// Stable 128-bit identifier (deterministic UUID v5)
    pub id: Uuid,
    /// Isolation key; every memory operation is scoped
    pub scope: String,
    /// The text fragment
    pub content: String,
    /// L2-normalized embedding; all zeros when degraded
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vector: Vec<f32>,
    /// When the node was created
    pub created_at: DateTime<Utc>,
    /// When the node was last accessed or re-scored
    pub last_accessed: DateTime<Utc>,
    /// Extracted entity strings, ordered, deduplicated
    pub entities: Vec<String>,
    /// Sentiment polarity in [-1, 1]
    pub sentiment: f64,
    /// Source tag supplied by the caller
    pub source: String,
    /// Embedding failed at ingest; excluded from recall seeds until
    /// re-embedded
    pub degraded: bool,
    /// Current energy in [0, 1]
    pub energy: f64,
    /// Energy assigned at creation (immutable)
    pub initial_energy: f64,
    /// Current storage tier
    pub tier: Tier,
}

impl MemoryNode {
    /// Seconds since the node was last accessed
    pub fn idle_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_accessed).num_seconds().max(0)
    }
}

// ============================================================================
// CRYSTAL FACTS
// ============================================================================

/// A consolidated fact synthesized from a dense cluster of nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrystalFact {
    /// Unique fact id
    pub id: Uuid,
    /// Scope of the contributing nodes
    pub scope: String,
    /// Consolidated statement
    pub content: String,
    /// Contributing node ids, in cluster order
    pub source_node_ids: Vec<Uuid>,
    /// Confidence in (0, 1]
    pub confidence: f64,
    /// When the fact was created
    pub created_at: DateTime<Utc>,
    /// When the fact was last updated
    pub updated_at: DateTime<Utc>,
    /// Free-form metadata
    pub metadata: serde_json::Value,
}

impl CrystalFact {
    /// Create a fact stamped now
    pub fn new(
        scope: impl Into<String>,
        content: impl Into<String>,
        source_node_ids: Vec<Uuid>,
        confidence: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            scope: scope.into(),
            content: content.into(),
            source_node_ids,
            confidence: confidence.clamp(f64::MIN_POSITIVE, 1.0),
            created_at: now,
            updated_at: now,
            metadata: serde_json::Value::Null,
        }
    }
}

// ============================================================================
// RECALL RESULTS
// ============================================================================

/// A recall result with its fused score components
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallHit {
    /// The recalled node (post-boost)
    pub node: MemoryNode,
    /// Fused score
    pub score: f64,
    /// Cosine similarity component (0 for activation-only candidates)
    pub vector_score: f64,
    /// Spreading-activation component (0 for vector-only candidates)
    pub activation: f64,
}

/// Per-scope memory counters
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemoryScopeStats {
    /// Scope key
    pub scope: String,
    /// Nodes resident in the working set
    pub l1_nodes: usize,
    /// Nodes in the durable tier (total rows)
    pub l2_nodes: usize,
    /// Nodes flagged degraded
    pub degraded_nodes: usize,
    /// Graph node count
    pub graph_nodes: usize,
    /// Graph link count
    pub graph_links: usize,
    /// Persisted crystal facts
    pub crystal_facts: usize,
    /// Persisted crystal links
    pub crystal_links: usize,
    /// Links awaiting re-persistence
    pub pending_links: usize,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_roundtrip() {
        assert_eq!(Tier::parse_name(Tier::L1.as_str()), Tier::L1);
        assert_eq!(Tier::parse_name(Tier::L2.as_str()), Tier::L2);
        assert_eq!(Tier::parse_name("unknown"), Tier::L2);
    }

    #[test]
    fn test_link_type_roundtrip() {
        for lt in [LinkType::Temporal, LinkType::Semantic, LinkType::Causal] {
            assert_eq!(LinkType::parse_name(lt.as_str()), Some(lt));
        }
        assert_eq!(LinkType::parse_name("spatial"), None);
    }

    #[test]
    fn test_link_weight_clamped() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let link = Link::new("s", a, b, LinkType::Semantic, 1.7);
        assert_eq!(link.weight, 1.0);
        assert_eq!(link.key(), (a, b, LinkType::Semantic));
    }

    #[test]
    fn test_crystal_fact_confidence_clamped() {
        let fact = CrystalFact::new("s", "water is wet", vec![], 2.0);
        assert_eq!(fact.confidence, 1.0);
        assert!(fact.metadata.is_null());
    }
}
