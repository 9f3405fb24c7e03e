//! Catalog store implementations.
//!
//! Available backends:
//! - `MemoryCatalog` - In-memory catalog with failure injection (tests, demos)
//! - `PgCatalogStore` - PostgreSQL catalog with per-statement timeouts

pub mod memory;
pub mod postgres;

pub use memory::MemoryCatalog;
pub use postgres::{PgCatalogStore, PgStoreConfig};
