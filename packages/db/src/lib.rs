//! SurrealDB persistence for the harvester.
//!
//! Jobs, areas, credentials and incidents live here. Every repository
//! takes an explicit [`Db`] handle; there is no process-wide connection.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
pub mod repositories;

pub use connection::{Db, DbConfig, DbError};
pub use schema::init_schema;
