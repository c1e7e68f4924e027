//! # BIEM Core
//!
//! Bio-inspired evolving memory engine for long-running conversational
//! agents:
//!
//! - **Tiered substrate**: an in-process working set (L1) over a durable
//!   vector + graph tier (L2), with consolidated relational facts (L3)
//! - **Energy model**: exponential time decay evaluated lazily on every
//!   read, boosted by recall hits and explicit feedback, driving
//!   promotion and demotion between tiers
//! - **Association graph**: temporal, semantic, and causal links routed
//!   at write time, mirrored to SQLite, and walked with spreading
//!   activation (Collins & Loftus, 1975) during recall
//! - **Two-stage recall**: ANN seeding plus graph expansion, fused into
//!   one deterministic ranking
//! - **Global knowledge store**: `(subject, predicate, object)` triples
//!   extracted from dialogue under a strict personal-data filter, with
//!   value changes gated behind explicit user confirmation
//!
//! The engine consumes exactly two external capabilities — an embedding
//! function and an LLM completion function — plus wall-clock time.
//! Storage is SQLite (rusqlite) with in-process HNSW search (usearch)
//! rebuilt from persisted embeddings at startup.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use biem_core::{BiemConfig, BiemEngine, MessageRole};
//!
//! let engine = BiemEngine::open(BiemConfig::default(), embedder, llm).await?;
//!
//! let memory = engine.memory("user-42")?;
//! memory.ingest("The mitochondrion is the powerhouse of the cell.", "user").await?;
//! let hits = memory.recall("What is the role of mitochondria?", 5).await?;
//!
//! let outcome = engine.knowledge().process("GPT-4 context window is 32k", MessageRole::User).await?;
//! engine.shutdown().await;
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod knowledge;
pub mod memory;
pub mod providers;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Engine lifecycle
pub use engine::{BiemEngine, EngineStats, MaintenanceReport};

// Configuration
pub use config::{
    BiemConfig, ConflictConfig, ConsolidationConfig, EnergyConfig, KnowledgeConfig, LinkConfig,
    RecallConfig, RetryConfig, WorkingSetConfig, DEFAULT_DIMENSIONS, MAX_CONTENT_BYTES,
};

// Errors
pub use error::{BiemError, ErrorKind, Result};

// Memory types and components
pub use memory::{
    AssociationGraph, CrystalFact, EnergyController, IngestOutcome, Link, LinkType,
    MemoryConflict, MemoryManager, MemoryNode, MemoryScopeStats, RecallHit, Tier,
};

// Knowledge types and components
pub use knowledge::{
    ConfirmOutcome, HistoryRecord, KnowledgeIntent, KnowledgeLearning, KnowledgeSource,
    KnowledgeStats, KnowledgeStore, KnowledgeTriple, MessageRole, PendingUpdate, ProcessOutcome,
    TripleConflict,
};

// Providers
pub use providers::{ChatMessage, ChatRole, EmbeddingProvider, LanguageModel};

// Embedding helpers
pub use embedding::{cosine_similarity, l2_normalize, Embedding};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        BiemConfig, BiemEngine, BiemError, ChatMessage, ConfirmOutcome, EmbeddingProvider,
        EngineStats, IngestOutcome, KnowledgeLearning, KnowledgeTriple, LanguageModel, Link,
        LinkType, MemoryManager, MemoryNode, MessageRole, PendingUpdate, ProcessOutcome,
        RecallHit, Result, Tier,
    };
}
