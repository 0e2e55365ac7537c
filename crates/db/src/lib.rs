//! `db` crate: pure persistence layer.
//!
//! Provides the [`Store`] contract the engine persists through, a Postgres
//! implementation backed by a connection pool, an in-memory implementation
//! for tests and single-process use, and the typed row structs both share.
//! No business logic lives here.

pub mod error;
pub mod memory;
pub mod models;
pub mod pg;
pub mod pool;
pub mod repository;
pub mod store;

pub use error::DbError;
pub use memory::MemoryStore;
pub use pg::PgStore;
pub use pool::DbPool;
pub use store::Store;
