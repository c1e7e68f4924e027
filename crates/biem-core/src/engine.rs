//! Engine handle
//!
//! The explicit lifecycle object the host agent owns: create, hydrate
//! the association graphs from the crystal store, serve memory and
//! knowledge handles, run the periodic background work (tier scans, link
//! reconciliation, pending sweeps, degraded re-embedding, consolidation),
//! and drain everything on shutdown. There are no process-wide
//! singletons; everything hangs off this handle.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::BiemConfig;
use crate::error::{BiemError, Result};
use crate::index::MemoryIndex;
use crate::knowledge::{KnowledgeLearning, KnowledgeStats, KnowledgeStore};
use crate::memory::{MemoryManager, MemoryScopeStats};
use crate::providers::{embed_one, EmbeddingProvider, LanguageModel};
use crate::storage::{CrystalStore, Database};

/// Degraded nodes re-embedded per maintenance cycle
const REEMBED_BATCH: usize = 16;

// ============================================================================
// REPORTS AND STATS
// ============================================================================

/// Counters from one background maintenance cycle
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    /// L1 nodes demoted for low energy
    pub demoted: usize,
    /// L1 nodes evicted for idleness
    pub evicted: usize,
    /// Links re-persisted from the pending queue
    pub links_reconciled: usize,
    /// Expired pending updates purged
    pub pending_purged: usize,
    /// Degraded nodes successfully re-embedded
    pub reembedded: usize,
    /// Crystal facts created by consolidation
    pub facts_created: usize,
}

/// Engine-wide counters
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    /// Per-scope memory counters
    pub scopes: Vec<MemoryScopeStats>,
    /// Knowledge counters
    pub knowledge: KnowledgeStats,
}

// ============================================================================
// ENGINE
// ============================================================================

/// The memory engine: tiered memory plus the global knowledge store
pub struct BiemEngine {
    config: Arc<BiemConfig>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<MemoryIndex>,
    crystal: Arc<CrystalStore>,
    knowledge: Arc<KnowledgeLearning>,
    llm: Arc<dyn LanguageModel>,
    managers: Mutex<HashMap<String, Arc<MemoryManager>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BiemEngine {
    /// Open the engine: storage, indexes, graph rehydration, background
    /// tasks
    pub async fn open(
        config: BiemConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
    ) -> Result<Arc<Self>> {
        let dimensions = config.effective_dimensions(embedder.dimensions());
        let config = Arc::new(config);

        let db = Database::open(config.db_path.clone())?;
        let index = Arc::new(MemoryIndex::open(db.clone(), dimensions)?);
        let crystal = Arc::new(CrystalStore::new(db.clone()));
        let knowledge_store = Arc::new(KnowledgeStore::open(db, dimensions)?);
        let knowledge = Arc::new(KnowledgeLearning::new(
            knowledge_store,
            embedder.clone(),
            llm.clone(),
            config.retry.clone(),
            config.knowledge.clone(),
        ));

        let (shutdown_tx, _) = watch::channel(false);
        let engine = Arc::new(Self {
            config,
            embedder,
            index,
            crystal,
            knowledge,
            llm,
            managers: Mutex::new(HashMap::new()),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        });

        // Restart transparency: every scope seen before gets its graph
        // back before the first call
        for scope in engine.index.scopes()? {
            engine.memory(&scope)?;
        }

        engine.spawn_background();
        tracing::info!(dimensions, "memory engine ready");
        Ok(engine)
    }

    /// Memory handle for a scope (created and hydrated on first use)
    pub fn memory(&self, scope: &str) -> Result<Arc<MemoryManager>> {
        if scope.is_empty() {
            return Err(BiemError::validation("E_MISSING_SCOPE", "scope is required"));
        }
        let mut managers = self
            .managers
            .lock()
            .map_err(|_| BiemError::Unavailable("manager map lock poisoned".into()))?;
        if let Some(manager) = managers.get(scope) {
            return Ok(manager.clone());
        }

        let manager = Arc::new(MemoryManager::new(
            scope.to_string(),
            self.config.clone(),
            self.embedder.clone(),
            self.llm.clone(),
            self.index.clone(),
            self.crystal.clone(),
        ));
        manager.hydrate()?;
        managers.insert(scope.to_string(), manager.clone());
        Ok(manager)
    }

    /// Knowledge subsystem handle
    pub fn knowledge(&self) -> &Arc<KnowledgeLearning> {
        &self.knowledge
    }

    /// Counts per tier, per scope, plus knowledge counters
    pub fn stats(&self) -> Result<EngineStats> {
        let managers: Vec<Arc<MemoryManager>> = {
            let guard = self
                .managers
                .lock()
                .map_err(|_| BiemError::Unavailable("manager map lock poisoned".into()))?;
            guard.values().cloned().collect()
        };
        let mut scopes = Vec::with_capacity(managers.len());
        for manager in managers {
            scopes.push(manager.stats()?);
        }
        scopes.sort_by(|a, b| a.scope.cmp(&b.scope));
        Ok(EngineStats {
            scopes,
            knowledge: self.knowledge.stats()?,
        })
    }

    // ========================================================================
    // BACKGROUND WORK
    // ========================================================================

    /// One maintenance cycle over every scope
    ///
    /// Also runnable on demand; the background loop calls this on the
    /// configured interval.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport> {
        let mut report = MaintenanceReport::default();

        let managers: Vec<Arc<MemoryManager>> = {
            let guard = self
                .managers
                .lock()
                .map_err(|_| BiemError::Unavailable("manager map lock poisoned".into()))?;
            guard.values().cloned().collect()
        };

        for manager in &managers {
            match manager.scan_tiers() {
                Ok(scan) => {
                    report.demoted += scan.demoted;
                    report.evicted += scan.evicted;
                }
                Err(err) => tracing::warn!(error = %err, "tier scan failed"),
            }
            match manager.reconcile_links() {
                Ok(count) => report.links_reconciled += count,
                Err(err) => tracing::warn!(error = %err, "link reconciliation failed"),
            }
        }

        report.pending_purged = self.knowledge.sweep_pending().unwrap_or_default();
        report.reembedded = self.reembed_degraded().await;

        tracing::debug!(?report, "maintenance cycle complete");
        Ok(report)
    }

    /// One consolidation cycle over every scope
    pub async fn run_consolidation(&self) -> Result<usize> {
        let managers: Vec<Arc<MemoryManager>> = {
            let guard = self
                .managers
                .lock()
                .map_err(|_| BiemError::Unavailable("manager map lock poisoned".into()))?;
            guard.values().cloned().collect()
        };
        let mut created = 0usize;
        for manager in &managers {
            match manager.consolidate().await {
                Ok(count) => created += count,
                Err(err) => tracing::warn!(error = %err, "consolidation failed"),
            }
        }
        Ok(created)
    }

    /// Retry embedding for degraded nodes; returns how many recovered
    async fn reembed_degraded(&self) -> usize {
        let degraded = match self.index.degraded_nodes(REEMBED_BATCH) {
            Ok(nodes) => nodes,
            Err(err) => {
                tracing::warn!(error = %err, "degraded-node listing failed");
                return 0;
            }
        };

        let mut recovered = 0usize;
        for node in degraded {
            match embed_one(&self.embedder, &self.config.retry, &node.content).await {
                Ok(mut vector) => {
                    crate::embedding::l2_normalize(&mut vector);
                    if let Err(err) = self.index.set_vector(&node.id, &vector) {
                        tracing::warn!(node = %node.id, error = %err, "re-embed write failed");
                        continue;
                    }
                    if let Ok(manager) = self.memory(&node.scope) {
                        manager.refresh_vector(&node.id, &vector);
                    }
                    tracing::info!(node = %node.id, "degraded node re-embedded");
                    recovered += 1;
                }
                Err(err) => {
                    tracing::debug!(node = %node.id, error = %err, "re-embed still failing");
                }
            }
        }
        recovered
    }

    fn spawn_background(self: &Arc<Self>) {
        let maintenance = spawn_periodic(
            Arc::downgrade(self),
            self.shutdown_tx.subscribe(),
            Duration::from_secs(self.config.maintenance_interval_seconds.max(1)),
            "maintenance",
            |engine| async move {
                let _ = engine.run_maintenance().await;
            },
        );
        let consolidation = spawn_periodic(
            Arc::downgrade(self),
            self.shutdown_tx.subscribe(),
            Duration::from_secs(self.config.consolidation.interval_seconds.max(1)),
            "consolidation",
            |engine| async move {
                let _ = engine.run_consolidation().await;
            },
        );

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(maintenance);
            tasks.push(consolidation);
        }
    }

    /// Stop background work and wait for in-flight cycles to finish
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => return,
        };
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("memory engine drained");
    }
}

fn spawn_periodic<F, Fut>(
    engine: Weak<BiemEngine>,
    mut shutdown: watch::Receiver<bool>,
    period: Duration,
    name: &'static str,
    run: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<BiemEngine>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup stays quiet
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let Some(engine) = engine.upgrade() else { break };
                    run(engine).await;
                }
                _ = shutdown.changed() => {
                    tracing::debug!(task = name, "background task stopping");
                    break;
                }
            }
        }
    })
}
