//! Knowledge workflow journeys
//!
//! The full triple path against the public API: auto-store, the strict
//! personal-data filter, value-change conflicts gated behind
//! confirmation, expiry, versioning invariants, and cluster-expanded
//! retrieval.

use biem_core::{BiemConfig, ConfirmOutcome, KnowledgeSource, MessageRole};
use biem_e2e_tests::mocks::{test_engine, test_engine_with};

const STATEMENT_32K: &str = r#"{"is_factual": true, "intent": "statement",
    "triples": [{"subject": "GPT-4", "predicate": "context_window",
                 "object": "32k", "confidence": 0.9}]}"#;

const CORRECTION_128K: &str = r#"{"is_factual": true, "intent": "correction",
    "triples": [{"subject": "GPT-4", "predicate": "context_window",
                 "object": "128k", "confidence": 0.95}]}"#;

#[tokio::test]
async fn knowledge_update_with_confirmation() {
    let fx = test_engine().await;
    let knowledge = fx.engine.knowledge();

    fx.llm.push_triples(STATEMENT_32K);
    let first = knowledge
        .process("GPT-4 context window is 32k", MessageRole::User)
        .await
        .unwrap();
    assert_eq!(first.stored.len(), 1);
    assert!(first.pending.is_empty());
    let stored = &first.stored[0];
    assert_eq!(stored.version, 1);
    assert_eq!(stored.object, "32k");
    assert_eq!(stored.source, KnowledgeSource::UserStated);

    fx.llm.push_triples(CORRECTION_128K);
    let second = knowledge
        .process("Actually GPT-4 supports 128k now", MessageRole::User)
        .await
        .unwrap();
    assert!(second.stored.is_empty());
    assert_eq!(second.pending.len(), 1);
    let staged = &second.pending[0];
    assert!(staged.prompt.contains("32k") && staged.prompt.contains("128k"));

    // No silent overwrite while pending
    assert_eq!(knowledge.stats().unwrap().triples, 1);

    let ConfirmOutcome::Applied(applied) = knowledge.confirm(staged.id, true).unwrap() else {
        panic!("expected applied");
    };
    assert_eq!(applied.object, "128k");
    assert_eq!(applied.version, 2);
    assert_eq!(applied.previous_values, vec!["32k"]);

    let history = knowledge.history(applied.id).unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].confirmed);
    assert_eq!(history[0].old_object.as_deref(), Some("32k"));
    assert_eq!(history[0].new_object, "128k");

    // Versioning invariant: version == previous_values + 1 == history + 1
    assert_eq!(applied.version as usize, applied.previous_values.len() + 1);
    assert_eq!(history.len(), (applied.version - 1) as usize);
}

#[tokio::test]
async fn rejection_keeps_the_old_value() {
    let fx = test_engine().await;
    let knowledge = fx.engine.knowledge();

    fx.llm.push_triples(STATEMENT_32K);
    let first = knowledge
        .process("GPT-4 context window is 32k", MessageRole::User)
        .await
        .unwrap();
    let triple_id = first.stored[0].id;

    fx.llm.push_triples(CORRECTION_128K);
    let second = knowledge
        .process("Actually GPT-4 supports 128k now", MessageRole::User)
        .await
        .unwrap();
    let staged_id = second.pending[0].id;

    assert!(matches!(
        knowledge.confirm(staged_id, false).unwrap(),
        ConfirmOutcome::Rejected
    ));

    // A terminal transition is final: the id is gone
    assert!(knowledge.confirm(staged_id, true).is_err());
    assert!(knowledge.history(triple_id).unwrap().is_empty());
}

#[tokio::test]
async fn expired_pending_updates_never_apply() {
    let mut config = BiemConfig::default();
    config.knowledge.pending_ttl_seconds = 0;
    let fx = test_engine_with(config).await;
    let knowledge = fx.engine.knowledge();

    fx.llm.push_triples(STATEMENT_32K);
    knowledge
        .process("GPT-4 context window is 32k", MessageRole::User)
        .await
        .unwrap();

    fx.llm.push_triples(CORRECTION_128K);
    let second = knowledge
        .process("Actually GPT-4 supports 128k now", MessageRole::User)
        .await
        .unwrap();
    let staged_id = second.pending[0].id;

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(matches!(
        knowledge.confirm(staged_id, true).unwrap(),
        ConfirmOutcome::Expired
    ));

    // Sweep keeps the pending list clean
    assert!(knowledge.pending().unwrap().is_empty());
}

#[tokio::test]
async fn strict_filter_blocks_personal_facts() {
    let fx = test_engine().await;
    let knowledge = fx.engine.knowledge();

    fx.llm.push_triples(
        r#"{"is_factual": true, "intent": "statement",
            "triples": [{"subject": "user", "predicate": "favorite",
                         "object": "Vim", "confidence": 0.95}]}"#,
    );
    let outcome = knowledge
        .process("My favorite editor is Vim", MessageRole::User)
        .await
        .unwrap();

    assert!(outcome.stored.is_empty());
    assert!(outcome.pending.is_empty());
    assert_eq!(knowledge.stats().unwrap().triples, 0);
}

#[tokio::test]
async fn cluster_expansion_pulls_in_neighbours() {
    let fx = test_engine().await;
    let knowledge = fx.engine.knowledge();

    let seeds = [
        r#"{"is_factual": true, "intent": "statement",
            "triples": [{"subject": "neural_networks", "predicate": "trained_by",
                         "object": "backpropagation", "confidence": 0.9}]}"#,
        r#"{"is_factual": true, "intent": "statement",
            "triples": [{"subject": "backpropagation", "predicate": "computes",
                         "object": "gradients", "confidence": 0.9}]}"#,
        r#"{"is_factual": true, "intent": "statement",
            "triples": [{"subject": "gradient_descent", "predicate": "optimizes",
                         "object": "neural_networks", "confidence": 0.9}]}"#,
    ];
    for (i, payload) in seeds.iter().enumerate() {
        fx.llm.push_triples(payload);
        let outcome = knowledge
            .process(&format!("fact number {i}"), MessageRole::User)
            .await
            .unwrap();
        assert_eq!(outcome.stored.len(), 1);
    }

    let results = knowledge.query("how do neural networks learn?").await.unwrap();
    assert!(results.len() >= 2, "got {} results", results.len());

    let direct = results
        .iter()
        .find(|(t, _)| t.subject == "neural_networks")
        .expect("direct match present");
    let expansion = results
        .iter()
        .find(|(t, _)| t.subject == "backpropagation")
        .expect("expansion-found neighbour present");

    // Expansion hits carry the 0.7 weight, so they score strictly below
    // the direct hit that found them
    assert!(expansion.1 < direct.1);
}

#[tokio::test]
async fn knowledge_is_global_across_contributors() {
    let fx = test_engine().await;
    let knowledge = fx.engine.knowledge();

    fx.llm.push_triples(STATEMENT_32K);
    knowledge
        .process_attributed(
            "GPT-4 context window is 32k",
            MessageRole::User,
            Some("alice"),
            Some("session-1"),
        )
        .await
        .unwrap();

    // A different contributor sees (and conflicts with) the same triple
    fx.llm.push_triples(CORRECTION_128K);
    let outcome = knowledge
        .process_attributed(
            "Actually GPT-4 supports 128k now",
            MessageRole::User,
            Some("bob"),
            Some("session-2"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.pending.len(), 1);

    let results = knowledge.query("GPT-4 context_window").await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0.contributor_id.as_deref(), Some("alice"));
}

#[tokio::test]
async fn agent_messages_contribute_when_enabled() {
    let fx = test_engine().await;
    let knowledge = fx.engine.knowledge();

    fx.llm.push_triples(
        r#"{"is_factual": true, "intent": "statement",
            "triples": [{"subject": "Rust", "predicate": "first_released",
                         "object": "2015", "confidence": 0.9}]}"#,
    );
    let outcome = knowledge
        .process("Rust was first released in 2015", MessageRole::Assistant)
        .await
        .unwrap();
    assert_eq!(outcome.stored.len(), 1);
    assert_eq!(outcome.stored[0].source, KnowledgeSource::AgentInferred);
}

#[tokio::test]
async fn restatement_reinforces_instead_of_duplicating() {
    let fx = test_engine().await;
    let knowledge = fx.engine.knowledge();

    fx.llm.push_triples(STATEMENT_32K);
    let first = knowledge
        .process("GPT-4 context window is 32k", MessageRole::User)
        .await
        .unwrap();

    fx.llm.push_triples(STATEMENT_32K);
    let second = knowledge
        .process("GPT-4 context window is 32k", MessageRole::User)
        .await
        .unwrap();

    assert_eq!(second.stored.len(), 1);
    assert_eq!(second.stored[0].id, first.stored[0].id);
    assert_eq!(second.stored[0].version, 1);
    let stats = knowledge.stats().unwrap();
    assert_eq!(stats.triples, 1);
    assert_eq!(stats.history_rows, 0);
}
