//! Global knowledge triple store
//!
//! A second memory system layered on the same vector substrate: durable
//! `(subject, predicate, object)` assertions extracted from dialogue,
//! globally unique per `(subject, predicate)`, versioned through an
//! explicit confirmation flow, and served back with cluster-expanded
//! vector search. Unlike memory nodes, knowledge is global — the
//! contributor id is attribution, never an isolation key.

mod confirmation;
mod conflict;
mod extractor;
mod learning;
mod retriever;
mod store;

pub use confirmation::ConfirmationManager;
pub use conflict::ConflictDetector;
pub use extractor::{CandidateTriple, KnowledgeExtractor};
pub use learning::KnowledgeLearning;
pub use retriever::KnowledgeRetriever;
pub use store::{InsertOutcome, KnowledgeStore};

/// Message intent classification, shared with the extraction prompt
pub use crate::providers::ExtractionIntent as KnowledgeIntent;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on retained previous object values per triple
pub const MAX_PREVIOUS_VALUES: usize = 16;

// ============================================================================
// SOURCES AND ROLES
// ============================================================================

/// Provenance of a knowledge triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeSource {
    /// Extracted from ambient conversation
    #[default]
    Conversation,
    /// Stated directly by the user
    UserStated,
    /// A correction issued by the user
    UserCorrection,
    /// Confirmed by the user through the pending-update flow
    UserVerified,
    /// Inferred from assistant output
    AgentInferred,
}

impl KnowledgeSource {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeSource::Conversation => "conversation",
            KnowledgeSource::UserStated => "user_stated",
            KnowledgeSource::UserCorrection => "user_correction",
            KnowledgeSource::UserVerified => "user_verified",
            KnowledgeSource::AgentInferred => "agent_inferred",
        }
    }

    /// Parse from string name; unknown values fall back to conversation
    pub fn parse_name(s: &str) -> Self {
        match s {
            "user_stated" => KnowledgeSource::UserStated,
            "user_correction" => KnowledgeSource::UserCorrection,
            "user_verified" => KnowledgeSource::UserVerified,
            "agent_inferred" => KnowledgeSource::AgentInferred,
            _ => KnowledgeSource::Conversation,
        }
    }
}

impl std::fmt::Display for KnowledgeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Speaker of a processed message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Human turn
    User,
    /// Assistant turn
    Assistant,
}

// ============================================================================
// TRIPLES
// ============================================================================

/// A `(subject, predicate, object)` assertion in the global store
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeTriple {
    /// Unique triple id
    pub id: Uuid,
    /// Subject (non-empty)
    pub subject: String,
    /// Predicate (non-empty, snake_case by convention)
    pub predicate: String,
    /// Current object value
    pub object: String,
    /// Extraction or confirmation confidence in [0, 1]
    pub confidence: f64,
    /// Provenance
    pub source: KnowledgeSource,
    /// Version; always `previous_values.len() + 1`
    pub version: i64,
    /// Prior object values, most recent first, bounded
    pub previous_values: Vec<String>,
    /// Who contributed the assertion (attribution only)
    pub contributor_id: Option<String>,
    /// Session the assertion came from
    pub session_id: Option<String>,
    /// When the triple was created
    pub created_at: DateTime<Utc>,
    /// When the object last changed
    pub updated_at: DateTime<Utc>,
    /// Embedding of the triple text; empty when the embedder was down
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vector: Vec<f32>,
}

impl KnowledgeTriple {
    /// Build a fresh version-1 triple stamped now
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        confidence: f64,
        source: KnowledgeSource,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source,
            version: 1,
            previous_values: vec![],
            contributor_id: None,
            session_id: None,
            created_at: now,
            updated_at: now,
            vector: vec![],
        }
    }

    /// Text rendition used for embedding and display
    pub fn text(&self) -> String {
        format!("{} {} {}", self.subject, self.predicate, self.object)
    }
}

// ============================================================================
// CONFLICTS AND PENDING UPDATES
// ============================================================================

/// Outcome of per-triple conflict detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripleConflict {
    /// Whether an existing triple disagrees on the object
    pub has_conflict: bool,
    /// The existing triple for this `(subject, predicate)`, if any
    pub existing: Option<KnowledgeTriple>,
    /// Conflict category; currently always "value_change"
    pub conflict_type: Option<String>,
    /// Human-readable confirmation suggestion
    pub suggestion: Option<String>,
}

impl TripleConflict {
    /// No existing triple at all
    pub fn none() -> Self {
        Self {
            has_conflict: false,
            existing: None,
            conflict_type: None,
            suggestion: None,
        }
    }
}

/// A proposed change held until the user confirms or rejects it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdate {
    /// Pending-update id
    pub id: Uuid,
    /// The triple as it would be stored on confirmation
    pub new_triple: KnowledgeTriple,
    /// The triple currently occupying `(subject, predicate)`, if any
    pub existing: Option<KnowledgeTriple>,
    /// Confirmation prompt for the user
    pub prompt: String,
    /// When the update was staged
    pub created_at: DateTime<Utc>,
    /// Hard expiry; past this the update counts as rejected
    pub expires_at: DateTime<Utc>,
}

impl PendingUpdate {
    /// Whether the update has expired at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Terminal result of a confirm/reject call
#[derive(Debug, Clone)]
pub enum ConfirmOutcome {
    /// The update was applied; the stored triple is returned
    Applied(KnowledgeTriple),
    /// The user rejected the update
    Rejected,
    /// The update had already expired and was purged
    Expired,
}

// ============================================================================
// HISTORY AND PIPELINE RESULTS
// ============================================================================

/// One applied object change
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    /// Row id
    pub id: i64,
    /// Triple the change applied to
    pub triple_id: Uuid,
    /// Object before the change (None for the initial insert)
    pub old_object: Option<String>,
    /// Object after the change
    pub new_object: String,
    /// Why the change happened
    pub reason: String,
    /// Whether the user explicitly confirmed it
    pub confirmed: bool,
    /// Contributor attribution
    pub contributor_id: Option<String>,
    /// When the change was applied
    pub created_at: DateTime<Utc>,
}

/// Result of processing one message through the pipeline
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    /// Triples stored (or reinforced) without needing confirmation
    pub stored: Vec<KnowledgeTriple>,
    /// Updates awaiting user confirmation
    pub pending: Vec<PendingUpdate>,
}

/// Knowledge-side counters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeStats {
    /// Stored triples
    pub triples: usize,
    /// Live pending updates
    pub pending: usize,
    /// Applied history rows
    pub history_rows: usize,
}

// ============================================================================
// TESTS
// ============================================================================
