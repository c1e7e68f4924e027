//! Database migrations
//!
//! Schema migration definitions for the storage layer.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Memory substrate: nodes, embeddings, crystal facts and links",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Global knowledge triple store with change history",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Maintenance indexes for tier scans and degraded re-embedding",
        up: MIGRATION_V3_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Memory substrate
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memory_nodes (
    id TEXT PRIMARY KEY,
    scope TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_accessed TEXT NOT NULL,

    -- Energy model
    energy REAL NOT NULL DEFAULT 0.5,
    initial_energy REAL NOT NULL DEFAULT 0.5,

    -- Tier placement ('l1' or 'l2')
    tier TEXT NOT NULL DEFAULT 'l2',

    -- Extraction metadata
    entities TEXT NOT NULL DEFAULT '[]',
    sentiment REAL NOT NULL DEFAULT 0.0,
    source TEXT NOT NULL DEFAULT '',

    -- Embedding failed at ingest; excluded from recall seeds
    degraded INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_nodes_scope ON memory_nodes(scope);
CREATE INDEX IF NOT EXISTS idx_nodes_scope_created ON memory_nodes(scope, created_at);
CREATE INDEX IF NOT EXISTS idx_nodes_energy ON memory_nodes(energy);

-- Embeddings storage table (binary blob for efficiency)
CREATE TABLE IF NOT EXISTS memory_embeddings (
    node_id TEXT PRIMARY KEY REFERENCES memory_nodes(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

-- Consolidated facts synthesized from dense clusters
CREATE TABLE IF NOT EXISTS crystal_facts (
    id TEXT PRIMARY KEY,
    scope TEXT NOT NULL,
    content TEXT NOT NULL,
    source_node_ids TEXT NOT NULL DEFAULT '[]',
    confidence REAL NOT NULL DEFAULT 1.0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    metadata TEXT
);

CREATE INDEX IF NOT EXISTS idx_crystal_facts_scope ON crystal_facts(scope);

-- Relational mirror of the association graph
CREATE TABLE IF NOT EXISTS crystal_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scope TEXT NOT NULL,
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    link_type TEXT NOT NULL,  -- 'temporal', 'semantic', 'causal'
    weight REAL NOT NULL DEFAULT 1.0,
    created_at TEXT NOT NULL,
    UNIQUE(scope, source_id, target_id, link_type)
);

CREATE INDEX IF NOT EXISTS idx_crystal_links_scope ON crystal_links(scope);
CREATE INDEX IF NOT EXISTS idx_crystal_links_source ON crystal_links(source_id);
CREATE INDEX IF NOT EXISTS idx_crystal_links_target ON crystal_links(target_id);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: Global knowledge triple store
///
/// Uniqueness is on (subject, predicate) globally, case-insensitive;
/// contributor_id is attribution only and never scopes a lookup.
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS knowledge_triples (
    id TEXT PRIMARY KEY,
    subject TEXT NOT NULL COLLATE NOCASE,
    predicate TEXT NOT NULL COLLATE NOCASE,
    object TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 0.5,
    source TEXT NOT NULL DEFAULT 'conversation',
    version INTEGER NOT NULL DEFAULT 1,
    previous_values TEXT NOT NULL DEFAULT '[]',
    contributor_id TEXT,
    session_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    embedding BLOB,
    UNIQUE(subject, predicate)
);

CREATE INDEX IF NOT EXISTS idx_triples_subject ON knowledge_triples(subject);
CREATE INDEX IF NOT EXISTS idx_triples_updated ON knowledge_triples(updated_at);

-- One row per applied object change
CREATE TABLE IF NOT EXISTS knowledge_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    triple_id TEXT NOT NULL,
    old_object TEXT,
    new_object TEXT NOT NULL,
    reason TEXT NOT NULL,
    confirmed INTEGER NOT NULL DEFAULT 0,
    contributor_id TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (triple_id) REFERENCES knowledge_triples(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_history_triple ON knowledge_history(triple_id);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// V3: Maintenance indexes
///
/// The tier scan walks L1 rows by scope and the re-embed task walks
/// degraded rows; both were full scans before these partial indexes.
const MIGRATION_V3_UP: &str = r#"
CREATE INDEX IF NOT EXISTS idx_nodes_scope_tier ON memory_nodes(scope, tier);
CREATE INDEX IF NOT EXISTS idx_nodes_degraded ON memory_nodes(degraded) WHERE degraded = 1;

UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}

// ============================================================================
// TESTS
// ============================================================================
