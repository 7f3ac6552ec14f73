//! # TgFleet Store
//!
//! Implementations of the repository traits from `tgfleet-core`:
//! - [`SqliteStore`]: rusqlite-backed, survives restarts
//! - [`MemoryStore`]: mutex-guarded maps, for tests and embedding

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
