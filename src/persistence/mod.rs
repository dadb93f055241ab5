//! Persistence Layer
//!
//! An opaque record store behind the `Store` trait:
//! - `PgStore` for PostgreSQL (pooled, bounded)
//! - `MemoryStore` for dry runs and tests

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{
    load_all, load_latest, save_or_log, save_value, RecordFilter, RecordPayload, RecordType, Store, StoredRecord,
};
