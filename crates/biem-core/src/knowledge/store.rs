//! Knowledge store
//!
//! SQLite persistence for triples under the global case-insensitive
//! `UNIQUE(subject, predicate)` constraint, the append-only change
//! history, and the parallel HNSW collection keyed by triple id. A
//! uniqueness violation is not an error here — it is the signal that
//! launches the confirmation flow, so `insert` reports it as an outcome.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::embedding::Embedding;
use crate::error::{BiemError, Result};
use crate::index::HnswIndex;
use crate::storage::{parse_timestamp, Database};

use super::{HistoryRecord, KnowledgeSource, KnowledgeTriple, MAX_PREVIOUS_VALUES};

// ============================================================================
// INSERT OUTCOME
// ============================================================================

/// Result of an insert attempt under the uniqueness constraint
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// The triple was stored
    Inserted(KnowledgeTriple),
    /// `(subject, predicate)` was already occupied; here is the occupant
    DuplicateOf(KnowledgeTriple),
}

// ============================================================================
// KNOWLEDGE STORE
// ============================================================================

/// Triple persistence with a parallel vector collection
pub struct KnowledgeStore {
    db: Arc<Database>,
    hnsw: Mutex<HnswIndex>,
    dimensions: usize,
}

impl KnowledgeStore {
    /// Open the store and rebuild the vector collection from persisted
    /// embeddings
    pub fn open(db: Arc<Database>, dimensions: usize) -> Result<Self> {
        let store = Self {
            db,
            hnsw: Mutex::new(HnswIndex::new(dimensions)?),
            dimensions,
        };
        store.rehydrate()?;
        Ok(store)
    }

    fn hnsw(&self) -> Result<std::sync::MutexGuard<'_, HnswIndex>> {
        self.hnsw
            .lock()
            .map_err(|_| BiemError::Unavailable("knowledge index lock poisoned".into()))
    }

    fn rehydrate(&self) -> Result<()> {
        let rows: Vec<(String, Vec<u8>)> = {
            let reader = self.db.reader()?;
            let mut stmt = reader.prepare(
                "SELECT id, embedding FROM knowledge_triples WHERE embedding IS NOT NULL",
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
                continue;
            }
            if let Err(e) = hnsw.add(id, &embedding.vector) {
                tracing::warn!(triple = %id, error = %e, "failed to load triple embedding");
            } else {
                loaded += 1;
            }
        }
        if loaded > 0 {
            tracing::info!(vectors = loaded, "knowledge index rehydrated");
        }
        Ok(())
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Insert a triple; a `(subject, predicate)` collision returns the
    /// occupant instead of erroring
    pub fn insert(&self, triple: &KnowledgeTriple) -> Result<InsertOutcome> {
        let previous = serde_json::to_string(&triple.previous_values)
            .unwrap_or_else(|_| "[]".to_string());
        let embedding = if triple.vector.is_empty() {
            None
        } else {
            Some(Embedding::new(triple.vector.clone()).to_bytes())
        };

        let inserted = {
            let writer = self.db.writer()?;
            writer.execute(
                "INSERT INTO knowledge_triples
                 (id, subject, predicate, object, confidence, source, version,
                  previous_values, contributor_id, session_id, created_at, updated_at, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    triple.id.to_string(),
                    triple.subject,
                    triple.predicate,
                    triple.object,
                    triple.confidence,
                    triple.source.as_str(),
                    triple.version,
                    previous,
                    triple.contributor_id,
                    triple.session_id,
                    triple.created_at.to_rfc3339(),
                    triple.updated_at.to_rfc3339(),
                    embedding,
                ],
            )
        };

        match inserted {
            Ok(_) => {
                if !triple.vector.is_empty() {
                    self.hnsw()?.add(triple.id, &triple.vector)?;
                }
                Ok(InsertOutcome::Inserted(triple.clone()))
            }
            Err(err) if is_unique_violation(&err) => {
                let existing = self
                    .find_by_subject_predicate(&triple.subject, &triple.predicate)?
                    .ok_or_else(|| {
                        BiemError::Unavailable("uniqueness race with no occupant".into())
                    })?;
                Ok(InsertOutcome::DuplicateOf(existing))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Apply a confirmed object change: version bump, previous-value
    /// prepend, history row, vector refresh — one transaction
    pub fn update_object(
        &self,
        id: &Uuid,
        new_object: &str,
        reason: &str,
        confirmed: bool,
        contributor: Option<&str>,
        vector: Option<&[f32]>,
    ) -> Result<KnowledgeTriple> {
        let now = Utc::now();
        let updated = {
            let writer = self.db.writer()?;
            let tx = writer.unchecked_transaction()?;

            let mut triple = tx
                .query_row(
                    &format!("{TRIPLE_COLUMNS} WHERE id = ?1"),
                    params![id.to_string()],
                    row_to_triple,
                )
                .optional()?
                .ok_or_else(|| BiemError::NotFound(id.to_string()))?;

            let old_object = triple.object.clone();
            triple.previous_values.insert(0, old_object.clone());
            triple.previous_values.truncate(MAX_PREVIOUS_VALUES);
            triple.object = new_object.to_string();
            triple.version += 1;
            triple.updated_at = now;
            if confirmed {
                triple.source = KnowledgeSource::UserVerified;
            }

            let previous = serde_json::to_string(&triple.previous_values)
                .unwrap_or_else(|_| "[]".to_string());
            let embedding = vector.map(|v| Embedding::new(v.to_vec()).to_bytes());

            tx.execute(
                "UPDATE knowledge_triples SET
                   object = ?2, version = ?3, previous_values = ?4, updated_at = ?5,
                   source = ?6,
                   embedding = COALESCE(?7, embedding)
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    triple.object,
                    triple.version,
                    previous,
                    now.to_rfc3339(),
                    triple.source.as_str(),
                    embedding,
                ],
            )?;
            tx.execute(
                "INSERT INTO knowledge_history
                 (triple_id, old_object, new_object, reason, confirmed, contributor_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id.to_string(),
                    old_object,
                    triple.object,
                    reason,
                    confirmed as i64,
                    contributor,
                    now.to_rfc3339(),
                ],
            )?;
            tx.commit()?;
            triple
        };

        if let Some(vector) = vector {
            self.hnsw()?.add(*id, vector)?;
        }
        Ok(updated)
    }

    /// Refresh confidence and timestamp on a re-stated triple
    pub fn reinforce(&self, id: &Uuid, confidence: f64) -> Result<KnowledgeTriple> {
        let now = Utc::now();
        {
            let writer = self.db.writer()?;
            writer.execute(
                "UPDATE knowledge_triples
                 SET confidence = MAX(confidence, ?2), updated_at = ?3
                 WHERE id = ?1",
                params![id.to_string(), confidence.clamp(0.0, 1.0), now.to_rfc3339()],
            )?;
        }
        self.get(id)?
            .ok_or_else(|| BiemError::NotFound(id.to_string()))
    }

    /// Drop every triple, history row, and vector (administrative reset)
    pub fn reset(&self) -> Result<()> {
        {
            let writer = self.db.writer()?;
            let tx = writer.unchecked_transaction()?;
            tx.execute("DELETE FROM knowledge_history", [])?;
            tx.execute("DELETE FROM knowledge_triples", [])?;
            tx.commit()?;
        }
        let mut hnsw = self.hnsw()?;
        *hnsw = HnswIndex::new(self.dimensions)?;
        tracing::warn!("knowledge store reset");
        Ok(())
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Exact fetch by id
    pub fn get(&self, id: &Uuid) -> Result<Option<KnowledgeTriple>> {
        let reader = self.db.reader()?;
        let triple = reader
            .query_row(
                &format!("{TRIPLE_COLUMNS} WHERE id = ?1"),
                params![id.to_string()],
                row_to_triple,
            )
            .optional()?;
        Ok(triple)
    }

    /// The occupant of `(subject, predicate)`, case-insensitive
    pub fn find_by_subject_predicate(
        &self,
        subject: &str,
        predicate: &str,
    ) -> Result<Option<KnowledgeTriple>> {
        let reader = self.db.reader()?;
        let triple = reader
            .query_row(
                &format!("{TRIPLE_COLUMNS} WHERE subject = ?1 AND predicate = ?2"),
                params![subject, predicate],
                row_to_triple,
            )
            .optional()?;
        Ok(triple)
    }

    /// Existing triples that could conflict with a new assertion
    ///
    /// Under global uniqueness this is at most one row, but the
    /// detector treats it as a set.
    pub fn find_potential_conflicts(
        &self,
        subject: &str,
        predicate: &str,
    ) -> Result<Vec<KnowledgeTriple>> {
        Ok(self
            .find_by_subject_predicate(subject, predicate)?
            .into_iter()
            .collect())
    }

    /// ANN search over the triple collection
    pub fn search_by_vector(
        &self,
        query: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<(KnowledgeTriple, f32)>> {
        let pool = self.hnsw()?.search(query, top_k)?;
        let mut results = Vec::with_capacity(pool.len());
        for (id, score) in pool {
            if score < min_score {
                continue;
            }
            if let Some(triple) = self.get(&id)? {
                results.push((triple, score));
            }
        }
        Ok(results)
    }

    /// Applied changes for a triple, newest first
    pub fn history(&self, triple_id: &Uuid) -> Result<Vec<HistoryRecord>> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT id, triple_id, old_object, new_object, reason, confirmed, contributor_id, created_at
             FROM knowledge_history WHERE triple_id = ?1 ORDER BY id DESC",
        )?;
        let rows = stmt
            .query_map(params![triple_id.to_string()], row_to_history)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// `(triples, history_rows)` counts
    pub fn counts(&self) -> Result<(usize, usize)> {
        let reader = self.db.reader()?;
        reader
            .query_row(
                "SELECT (SELECT COUNT(*) FROM knowledge_triples),
                        (SELECT COUNT(*) FROM knowledge_history)",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)? as usize,
                        row.get::<_, i64>(1)? as usize,
                    ))
                },
            )
            .map_err(Into::into)
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ConstraintViolation)
    )
}

// ============================================================================
// ROW MAPPING
// ============================================================================

const TRIPLE_COLUMNS: &str = "SELECT id, subject, predicate, object, confidence, source, version,
        previous_values, contributor_id, session_id, created_at, updated_at, embedding
 FROM knowledge_triples";

fn row_to_triple(row: &Row<'_>) -> rusqlite::Result<KnowledgeTriple> {
    let raw_id: String = row.get(0)?;
    let id = Uuid::parse_str(&raw_id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let source_raw: String = row.get(5)?;
    let previous_raw: String = row.get(7)?;
    let created_raw: String = row.get(10)?;
    let updated_raw: String = row.get(11)?;
    let blob: Option<Vec<u8>> = row.get(12)?;

    Ok(KnowledgeTriple {
        id,
        subject: row.get(1)?,
        predicate: row.get(2)?,
        object: row.get(3)?,
        confidence: row.get(4)?,
        source: KnowledgeSource::parse_name(&source_raw),
        version: row.get(6)?,
        previous_values: serde_json::from_str(&previous_raw).unwrap_or_default(),
        contributor_id: row.get(8)?,
        session_id: row.get(9)?,
        created_at: parse_timestamp(&created_raw, 10)?,
        updated_at: parse_timestamp(&updated_raw, 11)?,
        vector: blob
            .and_then(|b| Embedding::from_bytes(&b))
            .map(|e| e.vector)
            .unwrap_or_default(),
    })
}

fn row_to_history(row: &Row<'_>) -> rusqlite::Result<HistoryRecord> {
    let raw_id: String = row.get(1)?;
    let triple_id = Uuid::parse_str(&raw_id).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let confirmed: i64 = row.get(5)?;
    let created_raw: String = row.get(7)?;

    Ok(HistoryRecord {
        id: row.get(0)?,
        triple_id,
        old_object: row.get(2)?,
        new_object: row.get(3)?,
        reason: row.get(4)?,
        confirmed: confirmed != 0,
        contributor_id: row.get(6)?,
        created_at: parse_timestamp(&created_raw, 7)?,
    })
}

// ============================================================================
// TESTS
// ============================================================================
