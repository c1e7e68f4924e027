//! Triple conflict detector
//!
//! Per-candidate check against the uniqueness constraint: an occupant of
//! the same `(subject, predicate)` with a different object is a value
//! change that must go through confirmation, never a silent overwrite. An
//! occupant with the same object is a restatement, handled upstream as
//! reinforcement.

use std::sync::Arc;

use crate::error::Result;

use super::{CandidateTriple, KnowledgeStore, TripleConflict};

// ============================================================================
// CONFLICT DETECTOR
// ============================================================================

/// Detects value-change conflicts for extracted candidates
pub struct ConflictDetector {
    store: Arc<KnowledgeStore>,
}

impl ConflictDetector {
    /// Create a detector over the store
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }

    /// Check a candidate against the current occupant, if any
    pub fn detect(&self, candidate: &CandidateTriple) -> Result<TripleConflict> {
        let occupants = self
            .store
            .find_potential_conflicts(&candidate.subject, &candidate.predicate)?;

        let Some(existing) = occupants.into_iter().next() else {
            return Ok(TripleConflict::none());
        };

        if objects_equal(&existing.object, &candidate.object) {
            // Restatement of the stored value; not a conflict
            return Ok(TripleConflict {
                has_conflict: false,
                existing: Some(existing),
                conflict_type: None,
                suggestion: None,
            });
        }

        let suggestion = format!(
            "Update \"{} {}\" from \"{}\" to \"{}\"?",
            existing.subject, existing.predicate, existing.object, candidate.object
        );
        Ok(TripleConflict {
            has_conflict: true,
            existing: Some(existing),
            conflict_type: Some("value_change".to_string()),
            suggestion: Some(suggestion),
        })
    }
}

/// Object comparison used for conflict detection (whitespace-insensitive,
/// case-insensitive: "32K" restates "32k", it does not contradict it)
fn objects_equal(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

// ============================================================================
// TESTS
// ============================================================================
