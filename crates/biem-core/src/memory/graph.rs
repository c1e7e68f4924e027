//! Association graph
//!
//! Directed multigraph over node ids with typed, weighted edges, and the
//! spreading-activation walk that seeds recall expansion (Collins &
//! Loftus, 1975). The graph is in-memory only; every edge is mirrored in
//! the relational crystal store and rehydrated from it at startup.
//!
//! All operations are synchronous and run under the per-scope lock; the
//! spread walk touches nothing but the adjacency lists, so holding the
//! lock for its duration keeps recall's view consistent without copying.

use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

use crate::memory::node::{Link, LinkType};

// ============================================================================
// EDGES
// ============================================================================

/// An outgoing edge in the adjacency list
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphEdge {
    /// Target node id
    pub target: Uuid,
    /// Association type
    pub link_type: LinkType,
    /// Weight in (0, 1]
    pub weight: f64,
}

// ============================================================================
// ASSOCIATION GRAPH
// ============================================================================

/// Directed multigraph of memory associations for one scope
#[derive(Debug, Default)]
pub struct AssociationGraph {
    adjacency: HashMap<Uuid, Vec<GraphEdge>>,
    edge_keys: HashSet<(Uuid, Uuid, LinkType)>,
}

impl AssociationGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Number of edges
    pub fn link_count(&self) -> usize {
        self.edge_keys.len()
    }

    /// Ensure a node exists
    pub fn add_node(&mut self, id: Uuid) {
        self.adjacency.entry(id).or_default();
    }

    /// Whether a node exists
    pub fn contains(&self, id: &Uuid) -> bool {
        self.adjacency.contains_key(id)
    }

    /// Add an edge; idempotent on `(source, target, type)`
    ///
    /// Returns `true` when the edge was new. Both endpoints are created
    /// if absent.
    pub fn add_link(&mut self, link: &Link) -> bool {
        if !self.edge_keys.insert(link.key()) {
            return false;
        }
        self.add_node(link.target);
        self.adjacency
            .entry(link.source)
            .or_default()
            .push(GraphEdge {
                target: link.target,
                link_type: link.link_type,
                weight: link.weight,
            });
        true
    }

    /// Outgoing edges of a node
    pub fn neighbors(&self, id: &Uuid) -> &[GraphEdge] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Remove a node and every edge touching it (administrative reset)
    pub fn remove_node(&mut self, id: &Uuid) {
        self.adjacency.remove(id);
        for edges in self.adjacency.values_mut() {
            edges.retain(|e| e.target != *id);
        }
        self.edge_keys.retain(|(s, t, _)| s != id && t != id);
    }

    // ========================================================================
    // SPREADING ACTIVATION
    // ========================================================================

    /// Diffuse activation outward from the seeds
    ///
    /// Seeds start at 1.0 and retain it. Each hop, every activated node n
    /// with score s contributes `s * decay * w` through each outgoing edge
    /// of weight w; contributions within a hop accumulate, and a non-seed
    /// keeps the maximum activation it has seen across hops. The returned
    /// map excludes the seeds; `hops = 0` yields an empty map.
    pub fn spread(&self, seeds: &[Uuid], hops: u32, decay: f64) -> HashMap<Uuid, f64> {
        let mut activation: HashMap<Uuid, f64> = HashMap::new();
        if hops == 0 || seeds.is_empty() {
            return activation;
        }

        let seed_set: HashSet<Uuid> = seeds.iter().copied().collect();
        for seed in &seed_set {
            activation.insert(*seed, 1.0);
        }

        for _ in 0..hops {
            let mut incoming: HashMap<Uuid, f64> = HashMap::new();
            for (&node, &score) in &activation {
                for edge in self.neighbors(&node) {
                    *incoming.entry(edge.target).or_insert(0.0) += score * decay * edge.weight;
                }
            }
            for (target, contribution) in incoming {
                if seed_set.contains(&target) {
                    continue;
                }
                let entry = activation.entry(target).or_insert(0.0);
                if contribution > *entry {
                    *entry = contribution;
                }
            }
        }

        activation.retain(|id, _| !seed_set.contains(id));
        activation
    }

    // ========================================================================
    // CLUSTERS
    // ========================================================================

    /// Connected components (edge direction ignored) of at least
    /// `min_size` nodes, for the consolidation pass
    pub fn connected_components(&self, min_size: usize) -> Vec<Vec<Uuid>> {
        // Undirected adjacency view
        let mut undirected: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (&source, edges) in &self.adjacency {
            undirected.entry(source).or_default();
            for edge in edges {
                undirected.entry(source).or_default().push(edge.target);
                undirected.entry(edge.target).or_default().push(source);
            }
        }

        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut components = Vec::new();

        let mut roots: Vec<Uuid> = undirected.keys().copied().collect();
        roots.sort();

        for root in roots {
            if seen.contains(&root) {
                continue;
            }
            let mut component = Vec::new();
            let mut queue = VecDeque::from([root]);
            seen.insert(root);
            while let Some(node) = queue.pop_front() {
                component.push(node);
                if let Some(nexts) = undirected.get(&node) {
                    for &next in nexts {
                        if seen.insert(next) {
                            queue.push_back(next);
                        }
                    }
                }
            }
            if component.len() >= min_size {
                component.sort();
                components.push(component);
            }
        }

        components
    }
}

// ============================================================================
// TESTS
// ============================================================================
