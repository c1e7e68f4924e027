//! Vector index module
//!
//! HNSW-backed ANN search for the two collections: scoped memory nodes
//! and global knowledge triples. The HNSW side is in-process and rebuilt
//! from SQLite-persisted embeddings at startup.

mod hnsw;
mod memory_index;

pub use hnsw::HnswIndex;
pub use memory_index::{MemoryIndex, NodeFilter};
