//! LLM prompt builders and response payloads
//!
//! Every structured LLM exchange in the engine lives here: the prompt
//! constructors return ready-to-send message lists, and the payload
//! structs deserialize the JSON the model is asked to produce. Responses
//! are parsed tolerantly — models love to wrap JSON in code fences.

use serde::{Deserialize, Serialize};

use super::ChatMessage;

// ============================================================================
// RESPONSE PARSING
// ============================================================================

/// Parse a JSON payload out of a model response
///
/// Strips markdown code fences and any prose around the outermost JSON
/// object before deserializing. `None` means the response was unusable;
/// callers treat that the same as a provider failure.
pub fn parse_json_response<T: serde::de::DeserializeOwned>(raw: &str) -> Option<T> {
    let trimmed = raw.trim();

    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Some(value);
    }

    // Fall back to the outermost brace span
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

// ============================================================================
// ENTITY EXTRACTION (C1)
// ============================================================================

/// Entity list returned by the extraction prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityList {
    /// Distinct named entities, most salient first
    #[serde(default)]
    pub entities: Vec<String>,
}

/// Build the entity-extraction exchange
pub fn entity_prompt(text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "Extract the named entities (people, places, organizations, products, \
             technical terms) from the user's text. Respond with a single JSON object: \
             {\"entities\": [\"...\"]}. No commentary.",
        ),
        ChatMessage::user(text),
    ]
}

// ============================================================================
// SENTIMENT (C1)
// ============================================================================

/// Sentiment score returned by the classifier prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentScore {
    /// Polarity in [-1, 1]
    #[serde(default)]
    pub sentiment: f64,
}

/// Build the sentiment-classification exchange
pub fn sentiment_prompt(text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "Rate the emotional tone of the user's text on a scale from -1.0 \
             (strongly negative) to 1.0 (strongly positive), 0.0 for neutral. \
             Respond with a single JSON object: {\"sentiment\": 0.0}.",
        ),
        ChatMessage::user(text),
    ]
}

// ============================================================================
// CONFLICT ARBITRATION (C8)
// ============================================================================

/// Arbitration verdict for a pair of memory fragments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConflictJudgement {
    /// Whether the two statements contradict
    #[serde(default)]
    pub is_conflict: bool,
    /// Short category ("factual", "temporal", "preference", ...)
    #[serde(default)]
    pub conflict_type: Option<String>,
    /// One-sentence description of the contradiction
    #[serde(default)]
    pub description: Option<String>,
    /// Arbiter confidence in [0, 1]
    #[serde(default)]
    pub confidence: f64,
}

/// Build the conflict-arbitration exchange for an (existing, new) pair
pub fn conflict_prompt(existing: &str, incoming: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "You compare two memory fragments and decide whether they contradict \
             each other. Respond with a single JSON object: {\"is_conflict\": false, \
             \"conflict_type\": null, \"description\": null, \"confidence\": 0.0}. \
             Only report a conflict when the statements cannot both be true.",
        ),
        ChatMessage::user(format!(
            "EXISTING MEMORY:\n{existing}\n\nNEW INFORMATION:\n{incoming}"
        )),
    ]
}

// ============================================================================
// CONSOLIDATION (C9)
// ============================================================================

/// Consolidated fact produced from a dense cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationSummary {
    /// Single consolidated statement
    pub fact: String,
    /// Confidence in (0, 1]
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.8
}

/// Build the cluster-consolidation exchange
pub fn consolidation_prompt(fragments: &[String]) -> Vec<ChatMessage> {
    let mut body = String::new();
    for (i, fragment) in fragments.iter().enumerate() {
        body.push_str(&format!("{}. {}\n", i + 1, fragment));
    }
    vec![
        ChatMessage::system(
            "The following memory fragments form a tightly connected cluster. \
             Synthesize them into one durable fact that preserves their shared \
             meaning. Respond with a single JSON object: \
             {\"fact\": \"...\", \"confidence\": 0.8}.",
        ),
        ChatMessage::user(body),
    ]
}

// ============================================================================
// TRIPLE EXTRACTION (C12)
// ============================================================================

/// Intent classification of a message for triple extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionIntent {
    /// Declarative statement of fact
    Statement,
    /// Correction of previously stated information
    Correction,
    /// Question; nothing to store
    Question,
    /// Subjective opinion; nothing to store
    Opinion,
}

/// A raw `(subject, predicate, object)` candidate from the extractor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTriple {
    /// Triple subject
    #[serde(default)]
    pub subject: String,
    /// Triple predicate
    #[serde(default)]
    pub predicate: String,
    /// Triple object
    #[serde(default)]
    pub object: String,
    /// Extraction confidence in [0, 1]
    #[serde(default)]
    pub confidence: f64,
}

/// Full extractor response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TripleExtraction {
    /// Whether the message carries factual content at all
    #[serde(default)]
    pub is_factual: bool,
    /// Message intent
    pub intent: ExtractionIntent,
    /// Candidate triples
    #[serde(default)]
    pub triples: Vec<RawTriple>,
}

/// Build the triple-extraction exchange
pub fn triple_prompt(message: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "Extract general-knowledge facts from the message as \
             (subject, predicate, object) triples. Use short snake_case \
             predicates. Skip personal details about the speaker. Respond \
             with a single JSON object: {\"is_factual\": true, \"intent\": \
             \"statement\", \"triples\": [{\"subject\": \"...\", \"predicate\": \
             \"...\", \"object\": \"...\", \"confidence\": 0.9}]}. \
             intent is one of statement, correction, question, opinion.",
        ),
        ChatMessage::user(message),
    ]
}

// ============================================================================
// TESTS
// ============================================================================
