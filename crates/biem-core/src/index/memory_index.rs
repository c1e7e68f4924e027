//! L2 memory vector index
//!
//! The durable home of every memory node: scalar attributes live in the
//! `memory_nodes` table, embeddings in `memory_embeddings`, and an
//! in-process HNSW index mirrors every non-degraded vector for ANN
//! search. On startup the HNSW side is rebuilt from the persisted
//! embeddings, so the SQLite rows are the only durable state.
//!
//! Scope filtering is mandatory on every search — the index serves all
//! scopes, callers only ever see their own.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::embedding::Embedding;
use crate::error::{BiemError, Result};
use crate::memory::{MemoryNode, Tier};
use crate::storage::{parse_timestamp, Database};

use super::hnsw::HnswIndex;

// ============================================================================
// FILTERS
// ============================================================================

/// Optional scalar filters for a vector search
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    /// Restrict to one tier
    pub tier: Option<Tier>,
    /// Minimum stored energy
    pub min_energy: Option<f64>,
    /// Created at or after this instant
    pub created_after: Option<DateTime<Utc>>,
    /// Created at or before this instant
    pub created_before: Option<DateTime<Utc>>,
}

impl NodeFilter {
    fn matches(&self, node: &MemoryNode) -> bool {
        if let Some(tier) = self.tier {
            if node.tier != tier {
                return false;
            }
        }
        if let Some(min) = self.min_energy {
            if node.energy < min {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if node.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if node.created_at > before {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// MEMORY INDEX
// ============================================================================

/// Persistent ANN index over all memory nodes
pub struct MemoryIndex {
    db: Arc<Database>,
    hnsw: Mutex<HnswIndex>,
    dimensions: usize,
}

impl MemoryIndex {
    /// Open the index and rebuild the HNSW side from persisted embeddings
    pub fn open(db: Arc<Database>, dimensions: usize) -> Result<Self> {
        let index = Self {
            db,
            hnsw: Mutex::new(HnswIndex::new(dimensions)?),
            dimensions,
        };
        index.rehydrate()?;
        Ok(index)
    }

    /// Embedding dimension served by this index
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn hnsw(&self) -> Result<std::sync::MutexGuard<'_, HnswIndex>> {
        self.hnsw
            .lock()
            .map_err(|_| BiemError::Unavailable("vector index lock poisoned".into()))
    }

    /// Load every non-degraded embedding into the HNSW index
    fn rehydrate(&self) -> Result<()> {
        let rows: Vec<(String, Vec<u8>)> = {
            let reader = self.db.reader()?;
            let mut stmt = reader.prepare(
                "SELECT e.node_id, e.embedding FROM memory_embeddings e
                 JOIN memory_nodes n ON n.id = e.node_id
                 WHERE n.degraded = 0",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        let mut hnsw = self.hnsw()?;
        let mut loaded = 0usize;
        for (raw_id, blob) in rows {
            let Ok(id) = Uuid::parse_str(&raw_id) else {
                continue;
            };
            let Some(embedding) = Embedding::from_bytes(&blob) else {
                continue;
            };
            if embedding.dimensions != self.dimensions {
                tracing::warn!(
                    node = %id,
                    got = embedding.dimensions,
                    expected = self.dimensions,
                    "skipping embedding with stale dimensions"
                );
                continue;
            }
            if let Err(e) = hnsw.add(id, &embedding.vector) {
                tracing::warn!(node = %id, error = %e, "failed to load embedding");
            } else {
                loaded += 1;
            }
        }
        if loaded > 0 {
            tracing::info!(vectors = loaded, "memory index rehydrated");
        }
        Ok(())
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Upsert a node: scalar row, embedding blob, and HNSW entry
    ///
    /// Degraded nodes get a row but no index membership, which is what
    /// keeps them out of recall seeding.
    pub fn put(&self, node: &MemoryNode) -> Result<()> {
        let entities =
            serde_json::to_string(&node.entities).unwrap_or_else(|_| "[]".to_string());
        let embedding = Embedding::new(node.vector.clone());

        {
            let writer = self.db.writer()?;
            let tx = writer.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO memory_nodes
                 (id, scope, content, created_at, last_accessed, energy, initial_energy,
                  tier, entities, sentiment, source, degraded)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(id) DO UPDATE SET
                   content = excluded.content,
                   last_accessed = excluded.last_accessed,
                   energy = excluded.energy,
                   tier = excluded.tier,
                   entities = excluded.entities,
                   sentiment = excluded.sentiment,
                   source = excluded.source,
                   degraded = excluded.degraded",
                params![
                    node.id.to_string(),
                    node.scope,
                    node.content,
                    node.created_at.to_rfc3339(),
                    node.last_accessed.to_rfc3339(),
                    node.energy,
                    node.initial_energy,
                    node.tier.as_str(),
                    entities,
                    node.sentiment,
                    node.source,
                    node.degraded as i64,
                ],
            )?;
            tx.execute(
                "INSERT INTO memory_embeddings (node_id, embedding, dimensions, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(node_id) DO UPDATE SET
                   embedding = excluded.embedding,
                   dimensions = excluded.dimensions",
                params![
                    node.id.to_string(),
                    embedding.to_bytes(),
                    embedding.dimensions as i64,
                    node.created_at.to_rfc3339(),
                ],
            )?;
            tx.commit()?;
        }

        if !node.degraded && !embedding.is_zero() {
            self.hnsw()?.add(node.id, &node.vector)?;
        }
        Ok(())
    }

    /// Persist an energy evaluation
    pub fn update_energy(
        &self,
        id: &Uuid,
        energy: f64,
        last_accessed: DateTime<Utc>,
    ) -> Result<()> {
        let writer = self.db.writer()?;
        writer.execute(
            "UPDATE memory_nodes SET energy = ?2, last_accessed = ?3 WHERE id = ?1",
            params![id.to_string(), energy, last_accessed.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Persist a tier transition
    pub fn set_tier(&self, id: &Uuid, tier: Tier) -> Result<()> {
        let writer = self.db.writer()?;
        writer.execute(
            "UPDATE memory_nodes SET tier = ?2 WHERE id = ?1",
            params![id.to_string(), tier.as_str()],
        )?;
        Ok(())
    }

    /// Attach a fresh vector to a previously degraded node
    pub fn set_vector(&self, id: &Uuid, vector: &[f32]) -> Result<()> {
        let embedding = Embedding::new(vector.to_vec());
        {
            let writer = self.db.writer()?;
            let tx = writer.unchecked_transaction()?;
            tx.execute(
                "UPDATE memory_nodes SET degraded = 0 WHERE id = ?1",
                params![id.to_string()],
            )?;
            tx.execute(
                "UPDATE memory_embeddings SET embedding = ?2, dimensions = ?3 WHERE node_id = ?1",
                params![
                    id.to_string(),
                    embedding.to_bytes(),
                    embedding.dimensions as i64
                ],
            )?;
            tx.commit()?;
        }
        self.hnsw()?.add(*id, vector)
    }

    /// Remove a node entirely (administrative reset only)
    pub fn delete(&self, id: &Uuid) -> Result<bool> {
        let removed = {
            let writer = self.db.writer()?;
            writer.execute(
                "DELETE FROM memory_nodes WHERE id = ?1",
                params![id.to_string()],
            )?
        };
        self.hnsw()?.remove(id)?;
        Ok(removed > 0)
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Exact fetch by id
    pub fn get(&self, id: &Uuid) -> Result<Option<MemoryNode>> {
        let reader = self.db.reader()?;
        let node = reader
            .query_row(
                &format!("{NODE_COLUMNS} WHERE n.id = ?1"),
                params![id.to_string()],
                row_to_node,
            )
            .optional()?;
        Ok(node)
    }

    /// ANN search within a scope
    ///
    /// The scope filter is mandatory; `filter` adds optional scalar
    /// constraints. The HNSW pool is over-fetched so that post-filtering
    /// still fills `top_k` in mixed-scope databases.
    pub fn search_by_vector(
        &self,
        scope: &str,
        query: &[f32],
        top_k: usize,
        filter: Option<&NodeFilter>,
    ) -> Result<Vec<(MemoryNode, f32)>> {
        if scope.is_empty() {
            return Err(BiemError::validation("E_MISSING_SCOPE", "scope is required"));
        }
        if top_k == 0 {
            return Ok(vec![]);
        }

        let pool = self.hnsw()?.search(query, top_k * 4 + 16)?;

        let mut results = Vec::with_capacity(top_k);
        for (id, score) in pool {
            if results.len() >= top_k {
                break;
            }
            let Some(node) = self.get(&id)? else {
                continue;
            };
            if node.scope != scope {
                continue;
            }
            if let Some(f) = filter {
                if !f.matches(&node) {
                    continue;
                }
            }
            results.push((node, score));
        }
        Ok(results)
    }

    /// Most recently created nodes in a scope since `cutoff`
    pub fn recent(
        &self,
        scope: &str,
        limit: usize,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MemoryNode>> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare_cached(&format!(
            "{NODE_COLUMNS} WHERE n.scope = ?1 AND n.created_at >= ?2
             ORDER BY n.created_at DESC LIMIT ?3"
        ))?;
        let nodes = stmt
            .query_map(
                params![scope, cutoff.to_rfc3339(), limit as i64],
                row_to_node,
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(nodes)
    }

    /// Degraded nodes awaiting re-embedding, oldest first
    pub fn degraded_nodes(&self, limit: usize) -> Result<Vec<MemoryNode>> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare_cached(&format!(
            "{NODE_COLUMNS} WHERE n.degraded = 1 ORDER BY n.created_at ASC LIMIT ?1"
        ))?;
        let nodes = stmt
            .query_map(params![limit as i64], row_to_node)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(nodes)
    }

    /// Distinct scopes present in the index
    pub fn scopes(&self) -> Result<Vec<String>> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare("SELECT DISTINCT scope FROM memory_nodes ORDER BY scope")?;
        let scopes = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(scopes)
    }

    /// `(total, l1, degraded)` row counts for a scope
    pub fn counts(&self, scope: &str) -> Result<(usize, usize, usize)> {
        let reader = self.db.reader()?;
        reader
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN tier = 'l1' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN degraded = 1 THEN 1 ELSE 0 END), 0)
                 FROM memory_nodes WHERE scope = ?1",
                params![scope],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)? as usize,
                        row.get::<_, i64>(1)? as usize,
                        row.get::<_, i64>(2)? as usize,
                    ))
                },
            )
            .map_err(Into::into)
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

const NODE_COLUMNS: &str = "SELECT n.id, n.scope, n.content, n.created_at, n.last_accessed,
        n.energy, n.initial_energy, n.tier, n.entities, n.sentiment, n.source, n.degraded,
        e.embedding
 FROM memory_nodes n LEFT JOIN memory_embeddings e ON e.node_id = n.id";

fn row_to_node(row: &Row<'_>) -> rusqlite::Result<MemoryNode> {
    let raw_id: String = row.get(0)?;
    let id = Uuid::parse_str(&raw_id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let created_raw: String = row.get(3)?;
    let accessed_raw: String = row.get(4)?;
    let tier_raw: String = row.get(7)?;
    let entities_raw: String = row.get(8)?;
    let degraded: i64 = row.get(11)?;
    let blob: Option<Vec<u8>> = row.get(12)?;

    Ok(MemoryNode {
        id,
        scope: row.get(1)?,
        content: row.get(2)?,
        vector: blob
            .and_then(|b| Embedding::from_bytes(&b))
            .map(|e| e.vector)
            .unwrap_or_default(),
        created_at: parse_timestamp(&created_raw, 3)?,
        last_accessed: parse_timestamp(&accessed_raw, 4)?,
        energy: row.get(5)?,
        initial_energy: row.get(6)?,
        tier: Tier::parse_name(&tier_raw),
        entities: serde_json::from_str(&entities_raw).unwrap_or_default(),
        sentiment: row.get(9)?,
        source: row.get(10)?,
        degraded: degraded != 0,
    })
}

// ============================================================================
// TESTS
// ============================================================================
