//! Mock providers
//!
//! - [`TopicEmbedder`]: deterministic weighted bag-of-words embeddings.
//!   Tokens are lowercased, stripped, and stemmed by truncation; topic
//!   stems carry extra weight so sentences about the same subject score
//!   high cosine similarity while unrelated sentences stay apart.
//! - [`MockLlm`]: routes each prompt family (entities, sentiment,
//!   conflict, consolidation, triples) to a canned default, with a FIFO
//!   script for triple-extraction responses.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use biem_core::{BiemConfig, BiemEngine, BiemError, ChatMessage, EmbeddingProvider, LanguageModel, Result};

/// Embedding dimension used across the journey tests
pub const DIMS: usize = 256;

/// Stems that dominate a sentence's direction in embedding space
const TOPIC_STEMS: &[&str] = &[
    "mitoch", "paris", "france", "capita", "neural", "backpr", "gradie", "tokyo", "japan",
    "rust", "photos", "chloro",
];

const STOP_WORDS: &[&str] = &[
    "the", "is", "of", "a", "an", "and", "in", "to", "on", "at", "by", "do", "does", "what",
    "how", "why", "s", "its", "it",
];

// ============================================================================
// EMBEDDER
// ============================================================================

/// Deterministic topic-weighted embedder with a failure toggle
pub struct TopicEmbedder {
    fail: AtomicBool,
}

impl TopicEmbedder {
    /// Create a healthy embedder
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(false),
        })
    }

    /// Toggle failure injection
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    /// Embed one text synchronously (for assertions)
    ///
    /// Each token lands on two hash-chosen axes so that accidental
    /// single-axis collisions between different tokens only produce
    /// bounded cross-talk instead of aliasing.
    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; DIMS];
        for token in tokenize(text) {
            let weight = if TOPIC_STEMS.contains(&token.as_str()) {
                4.0
            } else {
                1.0
            };
            let hash = fnv1a(&token);
            let half = weight * std::f32::consts::FRAC_1_SQRT_2;
            vector[hash as usize % DIMS] += half;
            vector[(hash >> 32) as usize % DIMS] += half;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for TopicEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BiemError::Embedding("injected failure".into()));
        }
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty() && !STOP_WORDS.contains(&t.as_str()))
        .map(|t| t.chars().take(6).collect())
        .collect()
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x1000_0000_01b3);
    }
    hash
}

// ============================================================================
// LANGUAGE MODEL
// ============================================================================

/// Prompt-routing mock language model
pub struct MockLlm {
    triple_script: Mutex<VecDeque<String>>,
    conflict_response: Mutex<String>,
}

impl MockLlm {
    /// Create a mock with empty scripts and benign defaults
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            triple_script: Mutex::new(VecDeque::new()),
            conflict_response: Mutex::new(
                r#"{"is_conflict": false, "conflict_type": null, "description": null, "confidence": 0.0}"#
                    .to_string(),
            ),
        })
    }

    /// Queue a triple-extraction response (FIFO)
    pub fn push_triples(&self, response: &str) {
        self.triple_script
            .lock()
            .unwrap()
            .push_back(response.to_string());
    }

    /// Replace the conflict-arbitration response
    pub fn set_conflict_response(&self, response: &str) {
        *self.conflict_response.lock().unwrap() = response.to_string();
    }
}

#[async_trait]
impl LanguageModel for MockLlm {
    async fn complete(&self, messages: &[ChatMessage], _json: bool) -> Result<String> {
        let system = messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        if system.contains("named entities") {
            return Ok(r#"{"entities": []}"#.to_string());
        }
        if system.contains("emotional tone") {
            return Ok(r#"{"sentiment": 0.0}"#.to_string());
        }
        if system.contains("contradict") {
            return Ok(self.conflict_response.lock().unwrap().clone());
        }
        if system.contains("tightly connected cluster") {
            return Ok(
                r#"{"fact": "these memories form one coherent topic", "confidence": 0.9}"#
                    .to_string(),
            );
        }
        if system.contains("snake_case") {
            if let Some(scripted) = self.triple_script.lock().unwrap().pop_front() {
                return Ok(scripted);
            }
            return Ok(
                r#"{"is_factual": false, "intent": "opinion", "triples": []}"#.to_string(),
            );
        }
        Err(BiemError::Completion("unrecognized prompt".into()))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// An engine over a temp database with the standard mocks
pub struct TestEngine {
    /// Keeps the database directory alive for the test
    pub dir: tempfile::TempDir,
    /// The engine under test
    pub engine: Arc<BiemEngine>,
    /// The mock embedder (for failure injection)
    pub embedder: Arc<TopicEmbedder>,
    /// The mock language model (for scripting)
    pub llm: Arc<MockLlm>,
}

/// Open an engine with default config over a fresh temp database
pub async fn test_engine() -> TestEngine {
    test_engine_with(BiemConfig::default()).await
}

/// Open an engine with a custom config over a fresh temp database
pub async fn test_engine_with(mut config: BiemConfig) -> TestEngine {
    let dir = tempfile::tempdir().expect("tempdir");
    config.db_path = Some(dir.path().join("biem.db"));
    // Keep test retries fast
    config.retry.max_retries = 0;
    config.retry.base_delay_ms = 1;

    let embedder = TopicEmbedder::new();
    let llm = MockLlm::new();
    let engine = BiemEngine::open(config, embedder.clone(), llm.clone())
        .await
        .expect("engine open");
    TestEngine {
        dir,
        engine,
        embedder,
        llm,
    }
}

/// Reopen an engine over an existing database directory
pub async fn reopen_engine(dir: &tempfile::TempDir) -> (Arc<BiemEngine>, Arc<TopicEmbedder>, Arc<MockLlm>) {
    let mut config = BiemConfig::default();
    config.db_path = Some(dir.path().join("biem.db"));
    config.retry.max_retries = 0;
    config.retry.base_delay_ms = 1;

    let embedder = TopicEmbedder::new();
    let llm = MockLlm::new();
    let engine = BiemEngine::open(config, embedder.clone(), llm.clone())
        .await
        .expect("engine reopen");
    (engine, embedder, llm)
}
