//! Persistent storage for the job queue on SurrealDB.
//!
//! Jobs, the queue configuration and the worker registry live here. All job
//! state transitions happen here as single conditional updates, so worker
//! processes sharing one store never need a lock of their own.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `surrealkv`: Use SurrealKV for persistent file-based storage
//! - `rocksdb`: Use RocksDB for persistent file-based storage
//! - `remote`: Connect to a SurrealDB server over WebSocket, which lets
//!   worker processes and the CLI share one store concurrently
//!
//! A file-backed store is locked by the process that opens it; a second
//! process gets [`DbError::StoreLocked`].

mod connection;
mod dispatcher;
mod records;
mod schema;
pub mod repositories;

pub use connection::{
    Credentials, DEFAULT_DATABASE, DEFAULT_NAMESPACE, Database, DbConfig, DbError, Store, StoreLock,
    get_db, init_db,
};
pub use dispatcher::Dispatcher;
pub use schema::init_schema;

/// Connect and define the schema. Call once per process before any repository.
pub async fn init(config: DbConfig) -> Result<(), DbError> {
    init_db(config).await?;
    init_schema().await?;
    Ok(())
}
