//! L3 crystal store
//!
//! Relational persistence for the association graph's links and for
//! consolidated facts. The link table is the durable mirror of the
//! in-memory graph: every edge added during ingest is written here in the
//! same transaction batch, and the graph is rehydrated from these rows on
//! startup. The UNIQUE constraint makes concurrent ingests racing on the
//! same edge collapse to one persisted copy.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::memory::{CrystalFact, Link, LinkType};
use crate::storage::Database;

// ============================================================================
// CRYSTAL STORE
// ============================================================================

/// Relational store of persisted links and consolidated facts
pub struct CrystalStore {
    db: Arc<Database>,
}

impl CrystalStore {
    /// Create a store over the shared database
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    // ========================================================================
    // LINKS
    // ========================================================================

    /// Persist a batch of links in one transaction
    ///
    /// Duplicate `(scope, source, target, type)` rows are ignored; returns
    /// the number of rows actually inserted.
    pub fn insert_links(&self, links: &[Link]) -> Result<usize> {
        if links.is_empty() {
            return Ok(0);
        }

        let writer = self.db.writer()?;
        let tx = writer.unchecked_transaction()?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO crystal_links
                 (scope, source_id, target_id, link_type, weight, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for link in links {
                inserted += stmt.execute(params![
                    link.scope,
                    link.source.to_string(),
                    link.target.to_string(),
                    link.link_type.as_str(),
                    link.weight,
                    link.created_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// All persisted links for a scope, for graph rehydration
    pub fn links_for_scope(&self, scope: &str) -> Result<Vec<Link>> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT scope, source_id, target_id, link_type, weight, created_at
             FROM crystal_links WHERE scope = ?1 ORDER BY id",
        )?;
        let links = stmt
            .query_map(params![scope], row_to_link)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(links)
    }

    /// Number of persisted links in a scope
    pub fn link_count(&self, scope: &str) -> Result<usize> {
        let reader = self.db.reader()?;
        let count: i64 = reader.query_row(
            "SELECT COUNT(*) FROM crystal_links WHERE scope = ?1",
            params![scope],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Whether a specific link row exists
    pub fn link_exists(&self, link: &Link) -> Result<bool> {
        let reader = self.db.reader()?;
        let found: Option<i64> = reader
            .query_row(
                "SELECT 1 FROM crystal_links
                 WHERE scope = ?1 AND source_id = ?2 AND target_id = ?3 AND link_type = ?4",
                params![
                    link.scope,
                    link.source.to_string(),
                    link.target.to_string(),
                    link.link_type.as_str(),
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Remove every link touching a node (administrative delete)
    pub fn delete_links_for_node(&self, scope: &str, id: &Uuid) -> Result<usize> {
        let writer = self.db.writer()?;
        let removed = writer.execute(
            "DELETE FROM crystal_links
             WHERE scope = ?1 AND (source_id = ?2 OR target_id = ?2)",
            params![scope, id.to_string()],
        )?;
        Ok(removed)
    }

    // ========================================================================
    // FACTS
    // ========================================================================

    /// Persist a consolidated fact
    pub fn insert_fact(&self, fact: &CrystalFact) -> Result<()> {
        let source_ids = serde_json::to_string(
            &fact
                .source_node_ids
                .iter()
                .map(Uuid::to_string)
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".to_string());
        let metadata = if fact.metadata.is_null() {
            None
        } else {
            Some(fact.metadata.to_string())
        };

        let writer = self.db.writer()?;
        writer.execute(
            "INSERT INTO crystal_facts
             (id, scope, content, source_node_ids, confidence, created_at, updated_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                fact.id.to_string(),
                fact.scope,
                fact.content,
                source_ids,
                fact.confidence,
                fact.created_at.to_rfc3339(),
                fact.updated_at.to_rfc3339(),
                metadata,
            ],
        )?;
        Ok(())
    }

    /// Facts for a scope, newest first
    pub fn facts_for_scope(&self, scope: &str, limit: usize) -> Result<Vec<CrystalFact>> {
        let reader = self.db.reader()?;
        let mut stmt = reader.prepare_cached(
            "SELECT id, scope, content, source_node_ids, confidence, created_at, updated_at, metadata
             FROM crystal_facts WHERE scope = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let facts = stmt
            .query_map(params![scope, limit as i64], row_to_fact)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(facts)
    }

    /// Number of facts in a scope
    pub fn fact_count(&self, scope: &str) -> Result<usize> {
        let reader = self.db.reader()?;
        let count: i64 = reader.query_row(
            "SELECT COUNT(*) FROM crystal_facts WHERE scope = ?1",
            params![scope],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn row_to_link(row: &Row<'_>) -> rusqlite::Result<Link> {
    let parse_uuid = |idx: usize| -> rusqlite::Result<Uuid> {
        let raw: String = row.get(idx)?;
        Uuid::parse_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
    };

    let link_type_raw: String = row.get(3)?;
    let link_type = LinkType::parse_name(&link_type_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown link type: {link_type_raw}").into(),
        )
    })?;
    let created_raw: String = row.get(5)?;

    Ok(Link {
        scope: row.get(0)?,
        source: parse_uuid(1)?,
        target: parse_uuid(2)?,
        link_type,
        weight: row.get(4)?,
        created_at: parse_timestamp(&created_raw, 5)?,
    })
}

fn row_to_fact(row: &Row<'_>) -> rusqlite::Result<CrystalFact> {
    let id_raw: String = row.get(0)?;
    let id = Uuid::parse_str(&id_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let source_ids_raw: String = row.get(3)?;
    let source_node_ids: Vec<Uuid> = serde_json::from_str::<Vec<String>>(&source_ids_raw)
        .unwrap_or_default()
        .iter()
        .filter_map(|s| Uuid::parse_str(s).ok())
        .collect();
    let created_raw: String = row.get(5)?;
    let updated_raw: String = row.get(6)?;
    let metadata_raw: Option<String> = row.get(7)?;

    Ok(CrystalFact {
        id,
        scope: row.get(1)?,
        content: row.get(2)?,
        source_node_ids,
        confidence: row.get(4)?,
        created_at: parse_timestamp(&created_raw, 5)?,
        updated_at: parse_timestamp(&updated_raw, 6)?,
        metadata: metadata_raw
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or(serde_json::Value::Null),
    })
}

pub(crate) fn parse_timestamp(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

// ============================================================================
// TESTS
// ============================================================================
