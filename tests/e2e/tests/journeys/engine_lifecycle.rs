//! Engine lifecycle journeys
//!
//! Startup, stats shape, background-cycle counters, consolidation into
//! crystal facts, and clean shutdown.

use biem_core::MessageRole;
use biem_e2e_tests::mocks::test_engine;

#[tokio::test]
async fn stats_cover_scopes_and_knowledge() {
    let fx = test_engine().await;

    fx.engine
        .memory("alpha")
        .unwrap()
        .ingest("The chloroplast performs photosynthesis", "user")
        .await
        .unwrap();
    fx.engine
        .memory("beta")
        .unwrap()
        .ingest("Tokyo is the capital of Japan", "user")
        .await
        .unwrap();

    fx.llm.push_triples(
        r#"{"is_factual": true, "intent": "statement",
            "triples": [{"subject": "Tokyo", "predicate": "capital_of",
                         "object": "Japan", "confidence": 0.9}]}"#,
    );
    fx.engine
        .knowledge()
        .process("Tokyo is the capital of Japan", MessageRole::User)
        .await
        .unwrap();

    let stats = fx.engine.stats().unwrap();
    assert_eq!(stats.scopes.len(), 2);
    assert_eq!(stats.scopes[0].scope, "alpha");
    assert_eq!(stats.scopes[1].scope, "beta");
    assert_eq!(stats.scopes[0].l2_nodes, 1);
    assert_eq!(stats.knowledge.triples, 1);
    assert_eq!(stats.knowledge.pending, 0);
}

#[tokio::test]
async fn maintenance_reports_are_quiet_when_idle() {
    let fx = test_engine().await;
    let report = fx.engine.run_maintenance().await.unwrap();
    assert_eq!(report.demoted, 0);
    assert_eq!(report.evicted, 0);
    assert_eq!(report.links_reconciled, 0);
    assert_eq!(report.pending_purged, 0);
    assert_eq!(report.reembedded, 0);
}

#[tokio::test]
async fn consolidation_folds_a_dense_cluster_into_a_fact() {
    let fx = test_engine().await;
    let memory = fx.engine.memory("user-1").unwrap();

    // Five related fragments ingested back to back: temporal links chain
    // them into one connected cluster, semantic links densify it
    let fragments = [
        "Neural networks are trained with backpropagation",
        "Backpropagation computes gradients layer by layer",
        "Gradient descent updates neural network weights",
        "Neural network training needs labeled data",
        "Deep neural networks stack many layers",
    ];
    for fragment in fragments {
        memory.ingest(fragment, "user").await.unwrap();
    }

    let created = fx.engine.run_consolidation().await.unwrap();
    assert_eq!(created, 1);

    let stats = memory.stats().unwrap();
    assert_eq!(stats.crystal_facts, 1);
    // Source nodes are untouched: consolidation is advisory
    assert_eq!(stats.l2_nodes, 5);

    // The same cluster is not consolidated twice
    assert_eq!(fx.engine.run_consolidation().await.unwrap(), 0);
}

#[tokio::test]
async fn shutdown_drains_background_tasks() {
    let fx = test_engine().await;
    fx.engine
        .memory("user-1")
        .unwrap()
        .ingest("A fragment before shutdown", "user")
        .await
        .unwrap();

    fx.engine.shutdown().await;
    // The engine stays usable for foreground calls after drain
    let stats = fx.engine.stats().unwrap();
    assert_eq!(stats.scopes.len(), 1);
}

#[tokio::test]
async fn unknown_scope_is_rejected() {
    let fx = test_engine().await;
    let err = fx.engine.memory("").unwrap_err();
    assert_eq!(err.code(), "E_MISSING_SCOPE");
}
