//! Storage module
//!
//! SQLite-backed persistence: the shared connection pair, versioned
//! migrations, and the crystal store (persisted links + consolidated
//! facts). The vector index keeps its rows here too; see [`crate::index`].

mod crystal;
mod database;
mod migrations;

pub use crystal::CrystalStore;
pub use database::Database;
pub use migrations::{apply_migrations, get_current_version, MIGRATIONS};

pub(crate) use crystal::parse_timestamp;
