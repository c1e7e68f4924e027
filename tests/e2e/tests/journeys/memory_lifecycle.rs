//! Memory lifecycle journeys
//!
//! End-to-end validation of the ingest and recall pipelines against the
//! public engine API: basic recall with energy boosts, temporal and
//! semantic linking, scope isolation, working-set bounds, the degraded
//! path, and restart transparency.

use biem_core::{BiemConfig, Tier};
use biem_e2e_tests::mocks::{test_engine, test_engine_with, reopen_engine, TopicEmbedder};

#[tokio::test]
async fn basic_recall_returns_hit_and_boosts_energy() {
    let fx = test_engine().await;
    let memory = fx.engine.memory("user-1").unwrap();

    let ingested = memory
        .ingest("The mitochondrion is the powerhouse of the cell.", "user")
        .await
        .unwrap();

    let before = memory.get(ingested.node_id).await.unwrap().unwrap();

    let hits = memory
        .recall("What is the role of mitochondria?", 5)
        .await
        .unwrap();

    assert!(!hits.is_empty());
    assert_eq!(hits[0].node.id, ingested.node_id);
    assert!(
        hits[0].score > 0.6,
        "fused score {} should exceed 0.6",
        hits[0].score
    );
    assert!(hits[0].vector_score > 0.8);

    // Recall boosted the node by +0.1 (modulo a sliver of decay)
    let gained = hits[0].node.energy - before.energy;
    assert!(
        (gained - 0.1).abs() < 0.01,
        "expected ~+0.1 boost, got {gained}"
    );
    assert!(hits[0].node.energy <= 1.0);
}

#[tokio::test]
async fn recall_of_identical_text_is_near_exact() {
    let fx = test_engine().await;
    let memory = fx.engine.memory("user-1").unwrap();

    let text = "Rust compiles to native machine code.";
    let ingested = memory.ingest(text, "user").await.unwrap();

    let hits = memory.recall(text, 5).await.unwrap();
    assert_eq!(hits[0].node.id, ingested.node_id);
    assert!(
        hits[0].vector_score >= 0.99,
        "identical text should score >= 0.99, got {}",
        hits[0].vector_score
    );
}

#[tokio::test]
async fn temporal_and_semantic_links_are_mirrored() {
    let fx = test_engine().await;
    let memory = fx.engine.memory("user-1").unwrap();

    memory
        .ingest("Paris is the capital of France", "user")
        .await
        .unwrap();
    let second = memory
        .ingest("France's capital city is Paris", "user")
        .await
        .unwrap();

    // Both directions of temporal + semantic pairs
    assert_eq!(second.links_routed, 4);

    let stats = memory.stats().unwrap();
    assert_eq!(stats.graph_links, 4);
    // Link-mirror invariant: every graph edge has its crystal row
    assert_eq!(stats.crystal_links, stats.graph_links);
    assert_eq!(stats.pending_links, 0);
}

#[tokio::test]
async fn repeated_content_makes_new_nodes_but_unique_links() {
    let fx = test_engine().await;
    let memory = fx.engine.memory("user-1").unwrap();

    let first = memory.ingest("Tokyo is the capital of Japan", "user").await.unwrap();
    let second = memory.ingest("Tokyo is the capital of Japan", "user").await.unwrap();
    assert_ne!(first.node_id, second.node_id);

    let stats = memory.stats().unwrap();
    // One temporal pair plus one semantic pair between the two nodes
    assert_eq!(stats.crystal_links, 4);
    assert_eq!(stats.crystal_links, stats.graph_links);
}

#[tokio::test]
async fn scopes_never_leak() {
    let fx = test_engine().await;
    let alpha = fx.engine.memory("alpha").unwrap();
    let beta = fx.engine.memory("beta").unwrap();

    alpha
        .ingest("Photosynthesis happens in the chloroplast", "user")
        .await
        .unwrap();

    let hits = beta.recall("Where does photosynthesis happen?", 5).await.unwrap();
    assert!(hits.is_empty());

    let hits = alpha.recall("Where does photosynthesis happen?", 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits.iter().all(|h| h.node.scope == "alpha"));
}

#[tokio::test]
async fn working_set_respects_capacity() {
    let mut config = BiemConfig::default();
    config.working_set.max_nodes = 3;
    let fx = test_engine_with(config).await;
    let memory = fx.engine.memory("user-1").unwrap();

    for i in 0..5 {
        memory
            .ingest(&format!("High energy fragment number {i}"), "user")
            .await
            .unwrap();
    }

    let stats = memory.stats().unwrap();
    assert_eq!(stats.l1_nodes, 3);
    assert_eq!(stats.l2_nodes, 5);
}

#[tokio::test]
async fn degraded_ingest_stores_and_recovers() {
    let fx = test_engine().await;
    let memory = fx.engine.memory("user-1").unwrap();

    fx.embedder.set_failing(true);
    let degraded = memory
        .ingest("Paris is the capital of France", "user")
        .await
        .unwrap();
    fx.embedder.set_failing(false);

    let node = memory.get(degraded.node_id).await.unwrap().unwrap();
    assert!(node.degraded);
    assert_eq!(node.tier, Tier::L1);
    assert_eq!(memory.stats().unwrap().degraded_nodes, 1);

    // Degraded nodes never seed recall
    let hits = memory.recall("What is the capital of France?", 5).await.unwrap();
    assert!(hits.iter().all(|h| h.node.id != degraded.node_id));

    // Maintenance re-embeds once the provider is healthy again
    let report = fx.engine.run_maintenance().await.unwrap();
    assert_eq!(report.reembedded, 1);
    assert_eq!(memory.stats().unwrap().degraded_nodes, 0);

    let hits = memory.recall("What is the capital of France?", 5).await.unwrap();
    assert!(hits.iter().any(|h| h.node.id == degraded.node_id));
}

#[tokio::test]
async fn energy_stays_bounded_under_feedback() {
    let fx = test_engine().await;
    let memory = fx.engine.memory("user-1").unwrap();
    let ingested = memory.ingest("A fragment to push around", "user").await.unwrap();

    let up = memory.feedback(ingested.node_id, 0.5).await.unwrap();
    assert!(up.energy <= 1.0);
    let down = memory.feedback(ingested.node_id, -0.5).await.unwrap();
    let down = memory.feedback(down.id, -0.5).await.unwrap();
    assert!(down.energy >= 0.0);

    // Out-of-range deltas are rejected before any side effect
    let err = memory.feedback(ingested.node_id, 0.51).await.unwrap_err();
    assert_eq!(err.code(), "E_DELTA_RANGE");
}

#[tokio::test]
async fn causal_links_only_via_the_explicit_api() {
    let fx = test_engine().await;
    let memory = fx.engine.memory("user-1").unwrap();

    let cause = memory.ingest("The deploy went out at noon", "user").await.unwrap();
    let effect = memory.ingest("Latency spiked right after lunch", "user").await.unwrap();

    assert!(memory.record_causal(cause.node_id, effect.node_id).await.unwrap());
    // Idempotent
    assert!(!memory.record_causal(cause.node_id, effect.node_id).await.unwrap());

    let err = memory
        .record_causal(cause.node_id, uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "E_NOT_FOUND");
}

#[tokio::test]
async fn restart_is_transparent() {
    let fx = test_engine().await;
    {
        let memory = fx.engine.memory("user-1").unwrap();
        memory.ingest("Paris is the capital of France", "user").await.unwrap();
        memory.ingest("France's capital city is Paris", "user").await.unwrap();
        let stats = memory.stats().unwrap();
        assert_eq!(stats.graph_links, 4);
        fx.engine.shutdown().await;
    }
    drop(fx.engine);

    let (engine, _embedder, _llm) = reopen_engine(&fx.dir).await;
    let memory = engine.memory("user-1").unwrap();

    // Graph rehydrated from crystal links, vectors from the embedding rows
    let stats = memory.stats().unwrap();
    assert_eq!(stats.graph_links, 4);
    assert_eq!(stats.l2_nodes, 2);
    // L1 starts empty after restart
    assert_eq!(stats.l1_nodes, 0);

    let hits = memory.recall("What is the capital of France?", 5).await.unwrap();
    assert_eq!(hits.len(), 2);
}

#[tokio::test]
async fn ingest_validation_happens_before_side_effects() {
    let fx = test_engine().await;
    let memory = fx.engine.memory("user-1").unwrap();

    let err = memory.ingest("   ", "user").await.unwrap_err();
    assert_eq!(err.code(), "E_EMPTY_CONTENT");
    assert_eq!(memory.stats().unwrap().l2_nodes, 0);

    let err = memory.recall("", 5).await.unwrap_err();
    assert_eq!(err.code(), "E_EMPTY_QUERY");
}

#[tokio::test]
async fn spreading_activation_surfaces_linked_neighbours() {
    let fx = test_engine().await;
    let memory = fx.engine.memory("user-1").unwrap();

    // Same topic, ingested together: temporal + semantic links form
    memory
        .ingest("Neural networks learn from data", "user")
        .await
        .unwrap();
    let about_backprop = memory
        .ingest("Backpropagation adjusts neural network weights", "user")
        .await
        .unwrap();

    let hits = memory.recall("How do neural networks learn?", 5).await.unwrap();
    assert!(hits.len() >= 2);
    // The linked neighbour rides in with nonzero activation
    let neighbour = hits
        .iter()
        .find(|h| h.node.id == about_backprop.node_id)
        .expect("linked neighbour recalled");
    assert!(neighbour.activation > 0.0 || neighbour.vector_score > 0.0);
}

/// The mock embedder itself keeps related sentences close and unrelated
/// ones apart; sanity-check it so threshold tests stay meaningful.
#[test]
fn mock_embedder_geometry() {
    let a = TopicEmbedder::vector_for("Paris is the capital of France");
    let b = TopicEmbedder::vector_for("France's capital city is Paris");
    let c = TopicEmbedder::vector_for("Gardening requires patience");

    let close = biem_core::cosine_similarity(&a, &b);
    let far = biem_core::cosine_similarity(&a, &c);
    assert!(close > 0.9, "related sentences: {close}");
    assert!(far < 0.3, "unrelated sentences: {far}");
}
