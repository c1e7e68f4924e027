//! L1 working set
//!
//! Bounded per-scope hot cache keyed by node id. Admission requires
//! energy at or above the configured floor; overflow evicts the
//! lowest-energy resident. Eviction only forgets the L1 copy — the
//! durable tier always retains the node.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::WorkingSetConfig;
use crate::memory::node::MemoryNode;

// ============================================================================
// WORKING SET
// ============================================================================

/// In-process hot cache for one scope
#[derive(Debug)]
pub struct WorkingSet {
    nodes: HashMap<Uuid, MemoryNode>,
    config: WorkingSetConfig,
}

impl WorkingSet {
    /// Create an empty working set
    pub fn new(config: WorkingSetConfig) -> Self {
        Self {
            nodes: HashMap::new(),
            config,
        }
    }

    /// Number of resident nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether a node meets the admission floor
    pub fn admits(&self, energy: f64) -> bool {
        energy >= self.config.admit_energy
    }

    /// Insert or replace a node; returns the node evicted to stay within
    /// the capacity bound, if any
    pub fn put(&mut self, node: MemoryNode) -> Option<MemoryNode> {
        self.nodes.insert(node.id, node);
        if self.nodes.len() > self.config.max_nodes {
            self.evict_lowest_energy()
        } else {
            None
        }
    }

    /// Fetch a resident node
    pub fn get(&self, id: &Uuid) -> Option<&MemoryNode> {
        self.nodes.get(id)
    }

    /// Fetch a resident node mutably
    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut MemoryNode> {
        self.nodes.get_mut(id)
    }

    /// Remove a node from the cache (the durable copy is untouched)
    pub fn remove(&mut self, id: &Uuid) -> Option<MemoryNode> {
        self.nodes.remove(id)
    }

    /// Ids currently resident
    pub fn ids(&self) -> Vec<Uuid> {
        self.nodes.keys().copied().collect()
    }

    /// Resident nodes ordered by ascending energy
    pub fn iter_sorted_by_energy_asc(&self) -> Vec<&MemoryNode> {
        let mut nodes: Vec<&MemoryNode> = self.nodes.values().collect();
        nodes.sort_by(|a, b| {
            a.energy
                .partial_cmp(&b.energy)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        nodes
    }

    /// Evict and return the lowest-energy resident
    pub fn evict_lowest_energy(&mut self) -> Option<MemoryNode> {
        let victim = self
            .iter_sorted_by_energy_asc()
            .first()
            .map(|node| node.id)?;
        self.nodes.remove(&victim)
    }

    /// Ids that fail the residency criteria at `now`
    ///
    /// A node is stale once its energy drops below the floor or it has
    /// been idle past the TTL. The caller decides what demotion means;
    /// this only identifies candidates. Energies are taken as stored —
    /// the caller is expected to have decayed them.
    pub fn stale_ids(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.nodes
            .values()
            .filter(|node| {
                node.energy < self.config.min_energy
                    || node.idle_seconds(now) > self.config.ttl_seconds
            })
            .map(|node| node.id)
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
