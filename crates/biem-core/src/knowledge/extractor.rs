//! Knowledge extractor
//!
//! Asks the LLM for `(subject, predicate, object)` candidates, keeps them
//! only when the message is factual with statement/correction intent, and
//! then applies the strict filter: nothing about the user themselves, no
//! personal-attribute predicates, nothing below the confidence floor.
//! The personal layer belongs to scoped memory, not the global store.

use std::sync::Arc;

use crate::config::{KnowledgeConfig, RetryConfig};
use crate::providers::{
    complete_once, parse_json_response, triple_prompt, ExtractionIntent, LanguageModel,
    TripleExtraction,
};

use super::{KnowledgeSource, MessageRole};

/// Personal-attribute predicates excluded from the global store,
/// normalized (lowercase, underscores), including documented synonyms
const PERSONAL_PREDICATES: &[&str] = &[
    // identity
    "name",
    "full_name",
    "first_name",
    "last_name",
    "nickname",
    "age",
    "birthday",
    "birth_date",
    "date_of_birth",
    // contact and location
    "location",
    "address",
    "city",
    "country",
    "hometown",
    "lives_in",
    "email",
    "email_address",
    "phone",
    "phone_number",
    "mobile",
    // tastes
    "preference",
    "preferences",
    "prefers",
    "favorite",
    "favourite",
    "likes",
    "dislikes",
    "hobby",
    "hobbies",
    "interest",
    "interests",
    // ambitions and work items
    "goal",
    "goals",
    "objective",
    "plan",
    "plans",
    "project",
    "projects",
];

// ============================================================================
// CANDIDATES
// ============================================================================

/// A triple that survived extraction and the strict filter
#[derive(Debug, Clone)]
pub struct CandidateTriple {
    /// Triple subject, trimmed
    pub subject: String,
    /// Triple predicate, normalized to snake_case
    pub predicate: String,
    /// Triple object, trimmed
    pub object: String,
    /// Extraction confidence in [0, 1]
    pub confidence: f64,
    /// Provenance derived from role and intent
    pub source: KnowledgeSource,
}

// ============================================================================
// EXTRACTOR
// ============================================================================

/// Strict-filter triple extraction from dialogue
pub struct KnowledgeExtractor {
    llm: Arc<dyn LanguageModel>,
    retry: RetryConfig,
    config: KnowledgeConfig,
}

impl KnowledgeExtractor {
    /// Create an extractor over the language model
    pub fn new(llm: Arc<dyn LanguageModel>, retry: RetryConfig, config: KnowledgeConfig) -> Self {
        Self { llm, retry, config }
    }

    /// Extract filtered candidates from one message
    ///
    /// An unusable LLM response yields no candidates; the pipeline never
    /// blocks on extraction.
    pub async fn extract(&self, message: &str, role: MessageRole) -> Vec<CandidateTriple> {
        let raw = match complete_once(&self.llm, &self.retry, &triple_prompt(message)).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::debug!(error = %err, "triple extractor unavailable");
                return vec![];
            }
        };
        let Some(extraction) = parse_json_response::<TripleExtraction>(&raw) else {
            tracing::debug!("triple extractor returned unusable payload");
            return vec![];
        };

        if !extraction.is_factual
            || !matches!(
                extraction.intent,
                ExtractionIntent::Statement | ExtractionIntent::Correction
            )
        {
            return vec![];
        }

        let source = match (role, extraction.intent) {
            (MessageRole::Assistant, _) => KnowledgeSource::AgentInferred,
            (MessageRole::User, ExtractionIntent::Correction) => KnowledgeSource::UserCorrection,
            (MessageRole::User, _) => KnowledgeSource::UserStated,
        };

        let mut candidates = Vec::new();
        for raw_triple in extraction.triples {
            let subject = raw_triple.subject.trim().to_string();
            let predicate = normalize_predicate(&raw_triple.predicate);
            let object = raw_triple.object.trim().to_string();

            if let Some(reason) = strict_filter_reason(
                &subject,
                &predicate,
                &object,
                raw_triple.confidence,
                self.config.min_confidence,
            ) {
                tracing::debug!(
                    subject = %subject,
                    predicate = %predicate,
                    reason,
                    "triple rejected by strict filter"
                );
                continue;
            }

            candidates.push(CandidateTriple {
                subject,
                predicate,
                object,
                confidence: raw_triple.confidence.clamp(0.0, 1.0),
                source,
            });
        }
        candidates
    }
}

/// Why a triple fails the strict filter, or `None` when it passes
pub fn strict_filter_reason(
    subject: &str,
    predicate: &str,
    object: &str,
    confidence: f64,
    min_confidence: f64,
) -> Option<&'static str> {
    if subject.is_empty() || predicate.is_empty() || object.is_empty() {
        return Some("empty_component");
    }
    if subject.to_lowercase() == "user" {
        return Some("subject_is_user");
    }
    if PERSONAL_PREDICATES.contains(&predicate) {
        return Some("personal_predicate");
    }
    if confidence < min_confidence {
        return Some("low_confidence");
    }
    None
}

/// Lowercase, trim, and join internal whitespace with underscores
pub fn normalize_predicate(predicate: &str) -> String {
    predicate
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

// ============================================================================
// TESTS
// ============================================================================
