//! Tier manager
//!
//! Owns tier placement for one scope: stores route through the durable
//! index and the graph unconditionally and into the working set on
//! admission; reads prefer the hot copy and decay lazily; boosts promote,
//! scans demote and evict. Consolidation periodically folds dense,
//! high-energy subgraphs into crystal facts — advisory only, the source
//! nodes are never altered.

use chrono::Utc;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::config::BiemConfig;
use crate::error::Result;
use crate::index::MemoryIndex;
use crate::memory::energy::EnergyController;
use crate::memory::node::{CrystalFact, MemoryNode, Tier};
use crate::memory::router::lock_state;
use crate::memory::ScopeState;
use crate::providers::{
    complete_once, consolidation_prompt, parse_json_response, retry_backoff,
    ConsolidationSummary, LanguageModel,
};
use crate::storage::CrystalStore;

// ============================================================================
// SCAN REPORT
// ============================================================================

/// Counters from one demotion/eviction pass
#[derive(Debug, Clone, Copy, Default)]
pub struct TierScanReport {
    /// L1 nodes demoted for low energy
    pub demoted: usize,
    /// L1 nodes evicted for idleness or the energy floor
    pub evicted: usize,
}

/// Energy operation applied through [`TierManager::touch`]
#[derive(Debug, Clone, Copy)]
pub enum EnergyOp {
    /// Decay only
    Decay,
    /// Decay then the recall boost
    RecallBoost,
    /// Decay then an explicit feedback delta (already validated)
    Feedback(f64),
}

// ============================================================================
// TIER MANAGER
// ============================================================================

/// Promotions, demotions, and consolidation for one scope
pub struct TierManager {
    scope: String,
    config: Arc<BiemConfig>,
    index: Arc<MemoryIndex>,
    crystal: Arc<CrystalStore>,
    llm: Arc<dyn LanguageModel>,
    energy: EnergyController,
    state: Arc<Mutex<ScopeState>>,
    consolidated_clusters: Mutex<HashSet<u64>>,
}

impl TierManager {
    /// Create a manager for one scope
    pub fn new(
        scope: String,
        config: Arc<BiemConfig>,
        index: Arc<MemoryIndex>,
        crystal: Arc<CrystalStore>,
        llm: Arc<dyn LanguageModel>,
        state: Arc<Mutex<ScopeState>>,
    ) -> Self {
        let energy = EnergyController::new(config.energy.clone());
        Self {
            scope,
            config,
            index,
            crystal,
            llm,
            energy,
            state,
            consolidated_clusters: Mutex::new(HashSet::new()),
        }
    }

    /// Energy controller shared with the manager
    pub fn energy(&self) -> &EnergyController {
        &self.energy
    }

    // ========================================================================
    // STORE / GET
    // ========================================================================

    /// Store a node: durable upsert, graph membership, conditional L1
    /// admission
    ///
    /// Degraded nodes are forced into L1 so they stay reachable while the
    /// durable write is retried in the background. A durable write that
    /// exhausts its retry budget leaves the node hot-only and logs a
    /// durability warning rather than failing the ingest.
    pub async fn store(&self, mut node: MemoryNode) -> Result<MemoryNode> {
        let admit = node.degraded || node.energy >= self.config.working_set.admit_energy;
        node.tier = if admit { Tier::L1 } else { Tier::L2 };

        let upsert = retry_backoff(&self.config.retry, "memory_index.put", || async {
            self.index.put(&node)
        })
        .await;
        if let Err(err) = upsert {
            tracing::warn!(
                node = %node.id,
                scope = %self.scope,
                error = %err,
                "durable upsert exhausted retries, node is hot-tier only"
            );
        }

        let evicted = {
            let mut guard = lock_state(&self.state)?;
            guard.graph.add_node(node.id);
            if admit {
                guard.working.put(node.clone())
            } else {
                None
            }
        };
        self.settle_eviction(evicted)?;
        Ok(node)
    }

    /// Fetch a node, hot copy first, decayed to now and persisted
    pub async fn get(&self, id: &Uuid) -> Result<Option<MemoryNode>> {
        self.touch(id, EnergyOp::Decay).await
    }

    /// Apply an energy operation and settle any tier transition
    pub async fn touch(&self, id: &Uuid, op: EnergyOp) -> Result<Option<MemoryNode>> {
        let now = Utc::now();

        let hot = {
            let guard = lock_state(&self.state)?;
            guard.working.get(id).cloned()
        };
        let mut node = match hot {
            Some(node) => node,
            None => match self.index.get(id)? {
                Some(node) => node,
                None => return Ok(None),
            },
        };

        match op {
            EnergyOp::Decay => self.energy.apply_decay(&mut node, now),
            EnergyOp::RecallBoost => self.energy.boost_on_recall(&mut node, now),
            EnergyOp::Feedback(delta) => self.energy.apply_feedback(&mut node, delta, now),
        }

        let ws = &self.config.working_set;
        let mut tier_changed = false;
        if node.tier == Tier::L2 && node.energy >= ws.promote_energy {
            node.tier = Tier::L1;
            tier_changed = true;
            tracing::debug!(node = %id, energy = node.energy, "promoted to L1");
        } else if node.tier == Tier::L1 && !node.degraded && node.energy < ws.demote_energy {
            node.tier = Tier::L2;
            tier_changed = true;
            tracing::debug!(node = %id, energy = node.energy, "demoted to L2");
        }

        let evicted = {
            let mut guard = lock_state(&self.state)?;
            match node.tier {
                Tier::L1 => guard.working.put(node.clone()),
                Tier::L2 => {
                    guard.working.remove(id);
                    None
                }
            }
        };

        self.index
            .update_energy(id, node.energy, node.last_accessed)?;
        if tier_changed {
            self.index.set_tier(id, node.tier)?;
        }
        self.settle_eviction(evicted)?;
        Ok(Some(node))
    }

    /// Persist the L2 transition of a capacity-evicted node
    fn settle_eviction(&self, evicted: Option<MemoryNode>) -> Result<()> {
        if let Some(victim) = evicted {
            tracing::debug!(
                node = %victim.id,
                energy = victim.energy,
                "working set full, lowest-energy node evicted"
            );
            self.index.set_tier(&victim.id, Tier::L2)?;
        }
        Ok(())
    }

    // ========================================================================
    // SCANS
    // ========================================================================

    /// Demote and evict stale working-set residents
    pub fn scan(&self) -> Result<TierScanReport> {
        let now = Utc::now();
        let ws = &self.config.working_set;

        let removed: Vec<MemoryNode> = {
            let mut guard = lock_state(&self.state)?;
            for id in guard.working.ids() {
                if let Some(node) = guard.working.get_mut(&id) {
                    self.energy.apply_decay(node, now);
                }
            }

            let mut stale: HashSet<Uuid> = guard.working.stale_ids(now).into_iter().collect();
            for node in guard.working.iter_sorted_by_energy_asc() {
                if node.energy < ws.demote_energy {
                    stale.insert(node.id);
                }
            }
            stale
                .iter()
                .filter_map(|id| guard.working.remove(id))
                .collect()
        };

        let mut report = TierScanReport::default();
        for node in removed {
            if node.energy < ws.demote_energy {
                report.demoted += 1;
            } else {
                report.evicted += 1;
            }
            self.index
                .update_energy(&node.id, node.energy, node.last_accessed)?;
            self.index.set_tier(&node.id, Tier::L2)?;
        }

        if report.demoted + report.evicted > 0 {
            tracing::debug!(
                scope = %self.scope,
                demoted = report.demoted,
                evicted = report.evicted,
                "tier scan complete"
            );
        }
        Ok(report)
    }

    // ========================================================================
    // CONSOLIDATION
    // ========================================================================

    /// Fold dense, high-energy subgraphs into crystal facts
    ///
    /// Returns the number of facts created. Each qualifying cluster is
    /// summarized once per process lifetime; the LLM failing just means
    /// no fact this cycle.
    pub async fn consolidate(&self) -> Result<usize> {
        let cfg = &self.config.consolidation;
        let clusters = {
            let guard = lock_state(&self.state)?;
            guard.graph.connected_components(cfg.cluster_min_size)
        };
        if clusters.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut created = 0usize;

        for cluster in clusters {
            if created >= cfg.max_clusters_per_run {
                break;
            }

            let fingerprint = cluster_fingerprint(&cluster);
            {
                let seen = self
                    .consolidated_clusters
                    .lock()
                    .map_err(|_| crate::error::BiemError::Unavailable(
                        "consolidation lock poisoned".into(),
                    ))?;
                if seen.contains(&fingerprint) {
                    continue;
                }
            }

            let mut contents = Vec::new();
            let mut members = Vec::new();
            let mut total_energy = 0.0;
            for id in &cluster {
                let Some(node) = self.peek(id)? else { continue };
                total_energy += self.energy.decayed(node.energy, node.last_accessed, now);
                contents.push(node.content);
                members.push(*id);
            }
            if members.len() < cfg.cluster_min_size {
                continue;
            }
            let avg_energy = total_energy / members.len() as f64;
            if avg_energy < cfg.cluster_min_energy {
                continue;
            }

            let Some(summary) = self.summarize(&contents).await else {
                continue;
            };
            let fact = CrystalFact::new(&self.scope, summary.fact, members, summary.confidence);
            if let Err(err) = self.crystal.insert_fact(&fact) {
                tracing::warn!(error = %err, "consolidated fact not persisted");
                continue;
            }
            tracing::info!(
                scope = %self.scope,
                fact = %fact.id,
                cluster_size = fact.source_node_ids.len(),
                avg_energy,
                "cluster consolidated"
            );

            self.consolidated_clusters
                .lock()
                .map_err(|_| crate::error::BiemError::Unavailable(
                    "consolidation lock poisoned".into(),
                ))?
                .insert(fingerprint);
            created += 1;
        }
        Ok(created)
    }

    /// Read a node without touching its energy (hot copy first)
    fn peek(&self, id: &Uuid) -> Result<Option<MemoryNode>> {
        {
            let guard = lock_state(&self.state)?;
            if let Some(node) = guard.working.get(id) {
                return Ok(Some(node.clone()));
            }
        }
        self.index.get(id)
    }

    async fn summarize(&self, contents: &[String]) -> Option<ConsolidationSummary> {
        match complete_once(&self.llm, &self.config.retry, &consolidation_prompt(contents)).await {
            Ok(raw) => parse_json_response(&raw),
            Err(err) => {
                tracing::debug!(error = %err, "consolidation summarizer unavailable");
                None
            }
        }
    }
}

fn cluster_fingerprint(cluster: &[Uuid]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for id in cluster {
        id.hash(&mut hasher);
    }
    hasher.finish()
}

// ============================================================================
// TESTS
// ============================================================================
