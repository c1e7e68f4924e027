//! Knowledge learning pipeline
//!
//! Orchestrates the triple path end to end: extraction with the strict
//! filter, per-candidate conflict detection, auto-store or staged
//! confirmation, and query-time retrieval. This is an explicit handle
//! created at engine startup — there is no process-wide singleton.

use std::sync::Arc;

use crate::config::{KnowledgeConfig, RetryConfig};
use crate::embedding::l2_normalize;
use crate::error::{BiemError, Result};
use crate::providers::{embed_one, EmbeddingProvider, LanguageModel};

use super::{
    CandidateTriple, ConfirmationManager, ConfirmOutcome, ConflictDetector, HistoryRecord,
    InsertOutcome, KnowledgeExtractor, KnowledgeRetriever, KnowledgeStats, KnowledgeStore,
    KnowledgeTriple, MessageRole, PendingUpdate, ProcessOutcome,
};

// ============================================================================
// KNOWLEDGE LEARNING
// ============================================================================

/// The knowledge subsystem handle
pub struct KnowledgeLearning {
    store: Arc<KnowledgeStore>,
    extractor: KnowledgeExtractor,
    detector: ConflictDetector,
    confirmations: ConfirmationManager,
    retriever: KnowledgeRetriever,
    embedder: Arc<dyn EmbeddingProvider>,
    retry: RetryConfig,
    config: KnowledgeConfig,
}

impl KnowledgeLearning {
    /// Wire up the pipeline over a shared store and providers
    pub fn new(
        store: Arc<KnowledgeStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
        retry: RetryConfig,
        config: KnowledgeConfig,
    ) -> Self {
        let extractor = KnowledgeExtractor::new(llm, retry.clone(), config.clone());
        let detector = ConflictDetector::new(store.clone());
        let confirmations = ConfirmationManager::new(store.clone(), config.pending_ttl_seconds);
        let retriever = KnowledgeRetriever::new(
            store.clone(),
            embedder.clone(),
            retry.clone(),
            config.clone(),
        );
        Self {
            store,
            extractor,
            detector,
            confirmations,
            retriever,
            embedder,
            retry,
            config,
        }
    }

    /// Underlying store (administrative access)
    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    // ========================================================================
    // PROCESS
    // ========================================================================

    /// Run one message through extraction, filtering, and storage
    pub async fn process(&self, message: &str, role: MessageRole) -> Result<ProcessOutcome> {
        self.process_attributed(message, role, None, None).await
    }

    /// [`process`](Self::process) with contributor/session attribution
    pub async fn process_attributed(
        &self,
        message: &str,
        role: MessageRole,
        contributor: Option<&str>,
        session: Option<&str>,
    ) -> Result<ProcessOutcome> {
        let message = message.trim();
        if message.is_empty() {
            return Err(BiemError::validation("E_EMPTY_MESSAGE", "message is empty"));
        }
        if role == MessageRole::Assistant && !self.config.extract_from_agent {
            return Ok(ProcessOutcome::default());
        }

        let candidates = self.extractor.extract(message, role).await;
        let mut outcome = ProcessOutcome::default();

        for candidate in candidates {
            let triple = self
                .materialize(&candidate, contributor, session)
                .await;
            let conflict = self.detector.detect(&candidate)?;

            if conflict.has_conflict {
                let staged =
                    self.confirmations
                        .stage(triple, conflict.existing, conflict.suggestion)?;
                outcome.pending.push(staged);
                continue;
            }

            if let Some(existing) = conflict.existing {
                // Restatement: same (subject, predicate, object)
                let refreshed = self.store.reinforce(&existing.id, candidate.confidence)?;
                outcome.stored.push(refreshed);
                continue;
            }

            if !self.config.auto_store {
                let staged = self.confirmations.stage(triple, None, None)?;
                outcome.pending.push(staged);
                continue;
            }

            match self.store.insert(&triple)? {
                InsertOutcome::Inserted(stored) => outcome.stored.push(stored),
                InsertOutcome::DuplicateOf(existing) => {
                    // A concurrent writer claimed (subject, predicate)
                    // between detection and insert
                    if existing.object.trim().eq_ignore_ascii_case(triple.object.trim()) {
                        let refreshed =
                            self.store.reinforce(&existing.id, candidate.confidence)?;
                        outcome.stored.push(refreshed);
                    } else {
                        let suggestion = format!(
                            "Update \"{} {}\" from \"{}\" to \"{}\"?",
                            existing.subject, existing.predicate, existing.object, triple.object
                        );
                        let staged = self.confirmations.stage(
                            triple,
                            Some(existing),
                            Some(suggestion),
                        )?;
                        outcome.pending.push(staged);
                    }
                }
            }
        }

        tracing::debug!(
            stored = outcome.stored.len(),
            pending = outcome.pending.len(),
            role = ?role,
            "message processed"
        );
        Ok(outcome)
    }

    /// Build the storable triple, embedding its text (best effort)
    async fn materialize(
        &self,
        candidate: &CandidateTriple,
        contributor: Option<&str>,
        session: Option<&str>,
    ) -> KnowledgeTriple {
        let mut triple = KnowledgeTriple::new(
            candidate.subject.clone(),
            candidate.predicate.clone(),
            candidate.object.clone(),
            candidate.confidence,
            candidate.source,
        );
        triple.contributor_id = contributor.map(str::to_string);
        triple.session_id = session.map(str::to_string);

        match embed_one(&self.embedder, &self.retry, &triple.text()).await {
            Ok(mut vector) => {
                l2_normalize(&mut vector);
                triple.vector = vector;
            }
            Err(err) => {
                tracing::warn!(error = %err, "triple not embedded, stored without vector");
            }
        }
        triple
    }

    // ========================================================================
    // CONFIRMATION AND QUERY SURFACE
    // ========================================================================

    /// Resolve a pending update
    pub fn confirm(&self, id: uuid::Uuid, accept: bool) -> Result<ConfirmOutcome> {
        self.confirmations.confirm(id, accept)
    }

    /// Live pending updates
    pub fn pending(&self) -> Result<Vec<PendingUpdate>> {
        self.confirmations.list()
    }

    /// Query the store with cluster expansion
    pub async fn query(&self, text: &str) -> Result<Vec<(KnowledgeTriple, f32)>> {
        self.retriever.query(text).await
    }

    /// Applied changes for one triple
    pub fn history(&self, triple_id: uuid::Uuid) -> Result<Vec<HistoryRecord>> {
        self.store.history(&triple_id)
    }

    /// Knowledge counters
    pub fn stats(&self) -> Result<KnowledgeStats> {
        let (triples, history_rows) = self.store.counts()?;
        Ok(KnowledgeStats {
            triples,
            pending: self.confirmations.count()?,
            history_rows,
        })
    }

    /// Purge expired pending updates (background)
    pub(crate) fn sweep_pending(&self) -> Result<usize> {
        self.confirmations.sweep()
    }

    /// Administrative reset of the whole knowledge store
    pub fn reset(&self) -> Result<()> {
        self.store.reset()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ChatMessage;
    use crate::storage::Database;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const DIMS: usize = 8;

    struct SeedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for SeedEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v: Vec<f32> = (0..DIMS)
                        .map(|i| (i as f32 * 0.9 + t.len() as f32 * 0.08).sin())
                        .collect();
                    l2_normalize(&mut v);
                    v
                })
                .collect())
        }

        fn dimensions(&self) -> usize {
            DIMS
        }
    }

    /// Pops scripted responses in order; repeats the last one
    struct ScriptedLlm {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().rev().map(|s| s.to_string()).collect()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedLlm {
        async fn complete(&self, _messages: &[ChatMessage], _json: bool) -> Result<String> {
            let mut guard = self.responses.lock().unwrap();
            if guard.len() > 1 {
                Ok(guard.pop().unwrap())
            } else {
                guard
                    .last()
                    .cloned()
                    .ok_or_else(|| BiemError::Completion("no script".into()))
            }
        }
    }

    fn pipeline(responses: &[&str], config: KnowledgeConfig) -> (tempfile::TempDir, KnowledgeLearning) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(Some(dir.path().join("test.db"))).unwrap();
        let store = Arc::new(KnowledgeStore::open(db, DIMS).unwrap());
        let learning = KnowledgeLearning::new(
            store,
            Arc::new(SeedEmbedder),
            Arc::new(ScriptedLlm::new(responses)),
            RetryConfig {
                max_retries: 0,
                base_delay_ms: 1,
                deadline_ms: 1000,
            },
            config,
        );
        (dir, learning)
    }

    const STATEMENT_32K: &str = r#"{"is_factual": true, "intent": "statement",
        "triples": [{"subject": "GPT-4", "predicate": "context_window",
                     "object": "32k", "confidence": 0.9}]}"#;
    const CORRECTION_128K: &str = r#"{"is_factual": true, "intent": "correction",
        "triples": [{"subject": "GPT-4", "predicate": "context_window",
                     "object": "128k", "confidence": 0.95}]}"#;

    #[tokio::test]
    async fn test_auto_store_then_conflict_then_confirm() {
        let (_dir, learning) =
            pipeline(&[STATEMENT_32K, CORRECTION_128K], KnowledgeConfig::default());

        let first = learning
            .process("GPT-4 context window is 32k", MessageRole::User)
            .await
            .unwrap();
        assert_eq!(first.stored.len(), 1);
        assert!(first.pending.is_empty());
        assert_eq!(first.stored[0].version, 1);

        let second = learning
            .process("Actually GPT-4 supports 128k now", MessageRole::User)
            .await
            .unwrap();
        assert!(second.stored.is_empty());
        assert_eq!(second.pending.len(), 1);
        let staged = &second.pending[0];
        assert!(staged.prompt.contains("128k"));

        let ConfirmOutcome::Applied(applied) = learning.confirm(staged.id, true).unwrap() else {
            panic!("expected applied");
        };
        assert_eq!(applied.object, "128k");
        assert_eq!(applied.version, 2);
        assert_eq!(applied.previous_values, vec!["32k"]);

        let history = learning.history(applied.id).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].confirmed);
    }

    #[tokio::test]
    async fn test_restatement_reinforces() {
        let (_dir, learning) =
            pipeline(&[STATEMENT_32K, STATEMENT_32K], KnowledgeConfig::default());

        let first = learning
            .process("GPT-4 context window is 32k", MessageRole::User)
            .await
            .unwrap();
        let second = learning
            .process("GPT-4 context window is 32k", MessageRole::User)
            .await
            .unwrap();

        assert_eq!(second.stored.len(), 1);
        assert_eq!(second.stored[0].id, first.stored[0].id);
        assert_eq!(second.stored[0].version, 1);
        assert_eq!(learning.stats().unwrap().triples, 1);
    }

    #[tokio::test]
    async fn test_strict_filter_end_to_end() {
        let personal = r#"{"is_factual": true, "intent": "statement",
            "triples": [{"subject": "user", "predicate": "favorite",
                         "object": "Vim", "confidence": 0.95}]}"#;
        let (_dir, learning) = pipeline(&[personal], KnowledgeConfig::default());

        let outcome = learning
            .process("My favorite editor is Vim", MessageRole::User)
            .await
            .unwrap();
        assert!(outcome.stored.is_empty());
        assert!(outcome.pending.is_empty());
        assert_eq!(learning.stats().unwrap().triples, 0);
    }

    #[tokio::test]
    async fn test_agent_extraction_toggle() {
        let mut config = KnowledgeConfig::default();
        config.extract_from_agent = false;
        let (_dir, learning) = pipeline(&[STATEMENT_32K], config);

        let outcome = learning
            .process("GPT-4 context window is 32k", MessageRole::Assistant)
            .await
            .unwrap();
        assert!(outcome.stored.is_empty());
        assert!(outcome.pending.is_empty());
    }

    #[tokio::test]
    async fn test_manual_store_stages_pending() {
        let mut config = KnowledgeConfig::default();
        config.auto_store = false;
        let (_dir, learning) = pipeline(&[STATEMENT_32K], config);

        let outcome = learning
            .process("GPT-4 context window is 32k", MessageRole::User)
            .await
            .unwrap();
        assert!(outcome.stored.is_empty());
        assert_eq!(outcome.pending.len(), 1);

        let ConfirmOutcome::Applied(applied) =
            learning.confirm(outcome.pending[0].id, true).unwrap()
        else {
            panic!("expected applied");
        };
        assert_eq!(applied.object, "32k");
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let (_dir, learning) = pipeline(&[STATEMENT_32K], KnowledgeConfig::default());
        let err = learning.process("  ", MessageRole::User).await.unwrap_err();
        assert_eq!(err.code(), "E_EMPTY_MESSAGE");
    }
}
