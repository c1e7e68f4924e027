//! Association router
//!
//! On every write, attaches the new node into the association graph:
//! symmetric temporal links to the most recent same-scope nodes inside
//! the recency window, and symmetric semantic links to sufficiently
//! similar neighbours. Every edge accepted by the graph is mirrored to
//! the crystal store; a persistence failure parks the batch on the
//! pending queue for the reconciler instead of failing the ingest.
//!
//! Causal links are never routed automatically — they only enter through
//! the explicit feedback API.

use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::config::LinkConfig;
use crate::error::{BiemError, Result};
use crate::index::MemoryIndex;
use crate::memory::node::{Link, LinkType, MemoryNode};
use crate::memory::ScopeState;
use crate::storage::CrystalStore;

// ============================================================================
// ASSOCIATION ROUTER
// ============================================================================

/// Routes temporal and semantic links for freshly stored nodes
pub struct AssociationRouter {
    index: Arc<MemoryIndex>,
    crystal: Arc<CrystalStore>,
    config: LinkConfig,
}

impl AssociationRouter {
    /// Create a router over the shared index and crystal store
    pub fn new(index: Arc<MemoryIndex>, crystal: Arc<CrystalStore>, config: LinkConfig) -> Self {
        Self {
            index,
            crystal,
            config,
        }
    }

    /// Attach a stored node into the graph and mirror the new edges
    ///
    /// Returns the edges that were actually new. Candidate-search
    /// failures degrade to fewer links; only the scope lock going bad is
    /// an error.
    pub fn route(
        &self,
        node: &MemoryNode,
        state: &Mutex<ScopeState>,
        pending: &Mutex<Vec<Link>>,
    ) -> Result<Vec<Link>> {
        let mut candidates = Vec::new();
        self.collect_temporal(node, &mut candidates);
        self.collect_semantic(node, &mut candidates);

        // Graph mutation is synchronous under the scope lock; only edges
        // the graph accepted go to the crystal store.
        let new_links: Vec<Link> = {
            let mut guard = lock_state(state)?;
            guard.graph.add_node(node.id);
            candidates
                .into_iter()
                .filter(|link| guard.graph.add_link(link))
                .collect()
        };

        self.persist(&new_links, pending)?;
        Ok(new_links)
    }

    /// Record an explicit cause-effect pair (feedback API only)
    pub fn route_causal(
        &self,
        scope: &str,
        source: Uuid,
        target: Uuid,
        state: &Mutex<ScopeState>,
        pending: &Mutex<Vec<Link>>,
    ) -> Result<Option<Link>> {
        let link = Link::new(scope, source, target, LinkType::Causal, 1.0);
        let added = {
            let mut guard = lock_state(state)?;
            guard.graph.add_node(source);
            guard.graph.add_link(&link)
        };
        if !added {
            return Ok(None);
        }
        self.persist(std::slice::from_ref(&link), pending)?;
        Ok(Some(link))
    }

    /// Re-drive the pending-persist queue; returns how many rows landed
    pub fn reconcile(&self, pending: &Mutex<Vec<Link>>) -> Result<usize> {
        let batch: Vec<Link> = {
            let mut guard = pending
                .lock()
                .map_err(|_| BiemError::Unavailable("pending-links lock poisoned".into()))?;
            std::mem::take(&mut *guard)
        };
        if batch.is_empty() {
            return Ok(0);
        }

        match self.crystal.insert_links(&batch) {
            Ok(inserted) => {
                tracing::info!(links = batch.len(), inserted, "pending links reconciled");
                Ok(batch.len())
            }
            Err(err) => {
                tracing::warn!(error = %err, links = batch.len(), "link reconciliation failed");
                let mut guard = pending
                    .lock()
                    .map_err(|_| BiemError::Unavailable("pending-links lock poisoned".into()))?;
                guard.extend(batch);
                Ok(0)
            }
        }
    }

    fn collect_temporal(&self, node: &MemoryNode, out: &mut Vec<Link>) {
        let cutoff = Utc::now() - Duration::seconds(self.config.temporal_window_seconds);
        match self
            .index
            .recent(&node.scope, self.config.temporal_fanout + 1, cutoff)
        {
            Ok(recent) => {
                for other in recent
                    .into_iter()
                    .filter(|n| n.id != node.id)
                    .take(self.config.temporal_fanout)
                {
                    out.push(Link::new(
                        &node.scope,
                        node.id,
                        other.id,
                        LinkType::Temporal,
                        1.0,
                    ));
                    out.push(Link::new(
                        &node.scope,
                        other.id,
                        node.id,
                        LinkType::Temporal,
                        1.0,
                    ));
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "temporal candidate scan failed, skipping");
            }
        }
    }

    fn collect_semantic(&self, node: &MemoryNode, out: &mut Vec<Link>) {
        if node.degraded {
            return;
        }
        match self.index.search_by_vector(
            &node.scope,
            &node.vector,
            self.config.semantic_candidates + 1,
            None,
        ) {
            Ok(hits) => {
                for (other, similarity) in hits.into_iter().filter(|(n, _)| n.id != node.id) {
                    if similarity < self.config.semantic_threshold {
                        continue;
                    }
                    let weight = similarity as f64;
                    out.push(Link::new(
                        &node.scope,
                        node.id,
                        other.id,
                        LinkType::Semantic,
                        weight,
                    ));
                    out.push(Link::new(
                        &node.scope,
                        other.id,
                        node.id,
                        LinkType::Semantic,
                        weight,
                    ));
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "semantic candidate search failed, skipping");
            }
        }
    }

    fn persist(&self, links: &[Link], pending: &Mutex<Vec<Link>>) -> Result<()> {
        if links.is_empty() {
            return Ok(());
        }
        if let Err(err) = self.crystal.insert_links(links) {
            tracing::warn!(
                error = %err,
                links = links.len(),
                "link persistence failed, queued for reconciliation"
            );
            let mut guard = pending
                .lock()
                .map_err(|_| BiemError::Unavailable("pending-links lock poisoned".into()))?;
            guard.extend_from_slice(links);
        }
        Ok(())
    }
}

pub(crate) fn lock_state(state: &Mutex<ScopeState>) -> Result<std::sync::MutexGuard<'_, ScopeState>> {
    state
        .lock()
        .map_err(|_| BiemError::Unavailable("scope lock poisoned".into()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkingSetConfig;
    use crate::embedding::l2_normalize;
    use crate::memory::node::Tier;
    use crate::storage::Database;
    use chrono::DateTime;

    const DIMS: usize = 8;

    fn vector(seed: f32) -> Vec<f32> {
        let mut v: Vec<f32> = (0..DIMS).map(|i| ((i as f32 + seed) * 0.37).sin()).collect();
        l2_normalize(&mut v);
        v
    }

    fn node(scope: &str, content: &str, vector: Vec<f32>) -> MemoryNode {
        node_at(scope, content, vector, Utc::now())
    }

    fn node_at(
        scope: &str,
        content: &str,
        vector: Vec<f32>,
        created_at: DateTime<Utc>,
    ) -> MemoryNode {
        MemoryNode {
            id: Uuid::new_v4(),
            scope: scope.to_string(),
            content: content.to_string(),
            vector,
            created_at,
            last_accessed: created_at,
            entities: vec![],
            sentiment: 0.0,
            source: "user".to_string(),
            degraded: false,
            energy: 0.6,
            initial_energy: 0.6,
            tier: Tier::L2,
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        index: Arc<MemoryIndex>,
        crystal: Arc<CrystalStore>,
        router: AssociationRouter,
        state: Mutex<ScopeState>,
        pending: Mutex<Vec<Link>>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(Some(dir.path().join("test.db"))).unwrap();
        let index = Arc::new(MemoryIndex::open(db.clone(), DIMS).unwrap());
        let crystal = Arc::new(CrystalStore::new(db));
        let router =
            AssociationRouter::new(index.clone(), crystal.clone(), LinkConfig::default());
        Fixture {
            _dir: dir,
            index,
            crystal,
            router,
            state: Mutex::new(ScopeState::new(WorkingSetConfig::default())),
            pending: Mutex::new(Vec::new()),
        }
    }

    #[test]
    fn test_temporal_links_symmetric_and_mirrored() {
        let fx = fixture();
        let a = node("s", "first", vector(1.0));
        let b = node("s", "second", vector(50.0));
        fx.index.put(&a).unwrap();
        fx.index.put(&b).unwrap();

        let links = fx.router.route(&b, &fx.state, &fx.pending).unwrap();
        let temporal: Vec<_> = links
            .iter()
            .filter(|l| l.link_type == LinkType::Temporal)
            .collect();
        assert_eq!(temporal.len(), 2);
        assert!(temporal.iter().any(|l| l.source == b.id && l.target == a.id));
        assert!(temporal.iter().any(|l| l.source == a.id && l.target == b.id));
        assert_eq!(fx.crystal.link_count("s").unwrap(), links.len());
    }

    #[test]
    fn test_no_temporal_link_outside_window() {
        let fx = fixture();
        let old = node_at(
            "s",
            "stale",
            vector(50.0),
            Utc::now() - Duration::seconds(301),
        );
        let fresh = node("s", "fresh", vector(1.0));
        fx.index.put(&old).unwrap();
        fx.index.put(&fresh).unwrap();

        let links = fx.router.route(&fresh, &fx.state, &fx.pending).unwrap();
        assert!(links.iter().all(|l| l.link_type != LinkType::Temporal));
    }

    #[test]
    fn test_semantic_links_threshold_and_weight() {
        let fx = fixture();
        let near = node_at(
            "s",
            "paris is the capital of france",
            vector(1.0),
            Utc::now() - Duration::seconds(400),
        );
        let far = node_at(
            "s",
            "unrelated topic",
            vector(40.0),
            Utc::now() - Duration::seconds(400),
        );
        fx.index.put(&near).unwrap();
        fx.index.put(&far).unwrap();

        let incoming = node("s", "france's capital city is paris", vector(1.0));
        fx.index.put(&incoming).unwrap();
        let links = fx.router.route(&incoming, &fx.state, &fx.pending).unwrap();

        let semantic: Vec<_> = links
            .iter()
            .filter(|l| l.link_type == LinkType::Semantic)
            .collect();
        assert_eq!(semantic.len(), 2);
        assert!(semantic.iter().all(|l| l.weight > 0.99));
        assert!(semantic
            .iter()
            .all(|l| l.source == near.id || l.target == near.id));
    }

    #[test]
    fn test_rerouting_is_idempotent() {
        let fx = fixture();
        let a = node("s", "first", vector(1.0));
        let b = node("s", "second", vector(1.0));
        fx.index.put(&a).unwrap();
        fx.index.put(&b).unwrap();

        let first = fx.router.route(&b, &fx.state, &fx.pending).unwrap();
        assert!(!first.is_empty());
        let second = fx.router.route(&b, &fx.state, &fx.pending).unwrap();
        assert!(second.is_empty());
        assert_eq!(fx.crystal.link_count("s").unwrap(), first.len());
    }

    #[test]
    fn test_degraded_node_gets_no_semantic_links() {
        let fx = fixture();
        let existing = node("s", "existing", vector(1.0));
        fx.index.put(&existing).unwrap();

        let mut incoming = node("s", "incoming", vec![0.0; DIMS]);
        incoming.degraded = true;
        fx.index.put(&incoming).unwrap();

        let links = fx.router.route(&incoming, &fx.state, &fx.pending).unwrap();
        assert!(links.iter().all(|l| l.link_type == LinkType::Temporal));
    }

    #[test]
    fn test_route_causal_single_direction() {
        let fx = fixture();
        let (src, dst) = (Uuid::new_v4(), Uuid::new_v4());
        let link = fx
            .router
            .route_causal("s", src, dst, &fx.state, &fx.pending)
            .unwrap()
            .unwrap();
        assert_eq!(link.link_type, LinkType::Causal);
        assert_eq!(link.source, src);

        // Second call is a no-op
        assert!(fx
            .router
            .route_causal("s", src, dst, &fx.state, &fx.pending)
            .unwrap()
            .is_none());
        assert_eq!(fx.crystal.link_count("s").unwrap(), 1);
    }

    #[test]
    fn test_reconcile_drains_queue() {
        let fx = fixture();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        fx.pending
            .lock()
            .unwrap()
            .push(Link::new("s", a, b, LinkType::Semantic, 0.9));

        let drained = fx.router.reconcile(&fx.pending).unwrap();
        assert_eq!(drained, 1);
        assert!(fx.pending.lock().unwrap().is_empty());
        assert_eq!(fx.crystal.link_count("s").unwrap(), 1);
    }
}
