//! HNSW index wrapper
//!
//! Thin layer over USearch that maps node/triple UUIDs to the u64 keys
//! the index wants, grows capacity ahead of inserts (USearch requires
//! reserve() before add()), and converts cosine distance to similarity.
//! Persistence is not handled here: both collections rehydrate from the
//! embeddings stored in SQLite at startup.

use std::collections::HashMap;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};
use uuid::Uuid;

use crate::error::{BiemError, Result};

/// HNSW connectivity parameter (higher = better recall, more memory)
pub const DEFAULT_CONNECTIVITY: usize = 16;

/// HNSW expansion factor for index building
pub const DEFAULT_EXPANSION_ADD: usize = 128;

/// HNSW expansion factor for search (higher = better recall, slower)
pub const DEFAULT_EXPANSION_SEARCH: usize = 64;

// ============================================================================
// HNSW INDEX
// ============================================================================

/// Cosine-metric HNSW index keyed by UUID
pub struct HnswIndex {
    index: Index,
    dimensions: usize,
    key_to_id: HashMap<Uuid, u64>,
    id_to_key: HashMap<u64, Uuid>,
    next_id: u64,
}

impl HnswIndex {
    /// Create an empty index for the given dimension
    pub fn new(dimensions: usize) -> Result<Self> {
        let options = IndexOptions {
            dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: DEFAULT_CONNECTIVITY,
            expansion_add: DEFAULT_EXPANSION_ADD,
            expansion_search: DEFAULT_EXPANSION_SEARCH,
            multi: false,
        };

        let index = Index::new(&options)
            .map_err(|e| BiemError::Index(format!("index creation failed: {e}")))?;

        Ok(Self {
            index,
            dimensions,
            key_to_id: HashMap::new(),
            id_to_key: HashMap::new(),
            next_id: 0,
        })
    }

    /// Number of vectors in the index
    pub fn len(&self) -> usize {
        self.index.size()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index dimension
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Whether a key is present
    pub fn contains(&self, key: &Uuid) -> bool {
        self.key_to_id.contains_key(key)
    }

    fn reserve(&self, capacity: usize) -> Result<()> {
        self.index
            .reserve(capacity)
            .map_err(|e| BiemError::Index(format!("reserve failed: {e}")))
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(BiemError::Index(format!(
                "invalid dimensions: expected {}, got {}",
                self.dimensions,
                vector.len()
            )));
        }
        Ok(())
    }

    /// Insert or replace a vector
    pub fn add(&mut self, key: Uuid, vector: &[f32]) -> Result<()> {
        self.check_dimensions(vector)?;

        // Replace in place when the key already exists
        if let Some(&existing_id) = self.key_to_id.get(&key) {
            self.index
                .remove(existing_id)
                .map_err(|e| BiemError::Index(format!("remove-for-update failed: {e}")))?;
            self.reserve(self.index.size() + 1)?;
            self.index
                .add(existing_id, vector)
                .map_err(|e| BiemError::Index(format!("re-add failed: {e}")))?;
            return Ok(());
        }

        // Grow capacity ahead of the insert (double or at least 16)
        let capacity = self.index.capacity();
        if self.index.size() >= capacity {
            self.reserve(std::cmp::max(capacity * 2, 16))?;
        }

        let id = self.next_id;
        self.next_id += 1;
        self.index
            .add(id, vector)
            .map_err(|e| BiemError::Index(format!("add failed: {e}")))?;
        self.key_to_id.insert(key, id);
        self.id_to_key.insert(id, key);
        Ok(())
    }

    /// Remove a vector; returns whether it was present
    pub fn remove(&mut self, key: &Uuid) -> Result<bool> {
        if let Some(id) = self.key_to_id.remove(key) {
            self.id_to_key.remove(&id);
            self.index
                .remove(id)
                .map_err(|e| BiemError::Index(format!("remove failed: {e}")))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Nearest neighbours by cosine similarity, descending
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(Uuid, f32)>> {
        self.check_dimensions(query)?;
        if self.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let matches = self
            .index
            .search(query, limit)
            .map_err(|e| BiemError::Index(format!("search failed: {e}")))?;

        let mut results = Vec::with_capacity(matches.keys.len());
        for (id, distance) in matches.keys.iter().zip(matches.distances.iter()) {
            if let Some(key) = self.id_to_key.get(id) {
                // Cosine distance -> similarity
                results.push((*key, 1.0 - distance));
            }
        }
        Ok(results)
    }
}

// ============================================================================
// TESTS
// ============================================================================
