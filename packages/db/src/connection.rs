//! The process-wide connection to the queue store.
//!
//! One connection is opened per process and shared by every repository.
//! Workers and the CLI coordinate only through the records behind it.
//!
//! Embedded file stores (`surrealkv://`, `rocksdb://`) can only be opened by
//! one process at a time, so opening one takes an exclusive lock on a
//! `<path>.lock` file beside it. Processes sharing a queue go through a
//! SurrealDB server instead.

use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};
use surrealdb::opt::auth::Root;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use queue_core::{JobId, ValidationError};

pub const DEFAULT_NAMESPACE: &str = "queuectl";
pub const DEFAULT_DATABASE: &str = "main";

/// Endpoint schemes whose data lives in files owned by this process.
const EMBEDDED_SCHEMES: [&str; 4] = ["surrealkv://", "surrealkv+versioned://", "rocksdb://", "file://"];

static STORE: LazyLock<OnceCell<Store>> = LazyLock::new(OnceCell::new);

pub type Database = Surreal<Any>;

/// Root login for a store that requires one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Where the queue lives.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// `mem://`, `surrealkv://<path>`, `rocksdb://<path>` or `ws://<host:port>`.
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    pub credentials: Option<Credentials>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::endpoint("mem://")
    }
}

impl DbConfig {
    /// A throwaway store local to this process.
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            credentials: None,
        }
    }

    /// File-backed store (`surrealkv` feature).
    pub fn surrealkv(path: impl AsRef<str>) -> Self {
        Self::endpoint(format!("surrealkv://{}", path.as_ref()))
    }

    /// File-backed store (`rocksdb` feature).
    pub fn rocksdb(path: impl AsRef<str>) -> Self {
        Self::endpoint(format!("rocksdb://{}", path.as_ref()))
    }

    /// A SurrealDB server shared by several processes (`remote` feature).
    pub fn remote(address: impl AsRef<str>) -> Self {
        Self::endpoint(format!("ws://{}", address.as_ref()))
    }

    pub fn with_namespace(self, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..self
        }
    }

    pub fn with_database(self, database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..self
        }
    }

    pub fn with_credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credentials: Some(Credentials {
                username: username.into(),
                password: password.into(),
            }),
            ..self
        }
    }
}

/// Failures of queue store operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Queue store is not connected; call db::init first")]
    NotInitialized,
    #[error("Store error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query failed: {0}")]
    Query(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Job {0} is not in the dead letter queue")]
    NotDead(JobId),
    #[error("Job {0} is not processing")]
    NotProcessing(JobId),
    #[error("Malformed stored record: {0}")]
    Serialization(String),
    #[error(
        "Store {0} is in use by another process; start a SurrealDB server and point every process at it with --db ws://<host:port>"
    )]
    StoreLocked(String),
    #[error("Cannot lock store {path}: {source}")]
    Lock {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl DbError {
    pub(crate) fn job_not_found(id: JobId) -> Self {
        DbError::NotFound(format!("Job {}", id))
    }

    /// The store could not be reached at all, as opposed to rejecting a request.
    pub fn is_unavailable(&self) -> bool {
        match self {
            DbError::NotInitialized | DbError::StoreLocked(_) | DbError::Lock { .. } => true,
            DbError::Connection(e) => !is_conflict(e),
            _ => false,
        }
    }
}

/// Whether a query failed because a concurrent transaction touched the same records.
pub(crate) fn is_conflict(error: &surrealdb::Error) -> bool {
    match error {
        surrealdb::Error::Db(surrealdb::error::Db::TxRetryable) => true,
        surrealdb::Error::Db(_) => false,
        // Remote engines only hand back the server's message.
        surrealdb::Error::Api(_) => {
            let message = error.to_string().to_ascii_lowercase();
            message.contains("conflict") || message.contains("can be retried")
        }
    }
}

/// The files behind an embedded endpoint, if it has any.
fn embedded_path(endpoint: &str) -> Option<&str> {
    let path = EMBEDDED_SCHEMES
        .iter()
        .find_map(|scheme| endpoint.strip_prefix(scheme))?;
    let path = path.split('?').next().unwrap_or(path);
    (!path.is_empty()).then_some(path)
}

/// Exclusive hold on an embedded store's files, released on drop.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
    _file: File,
}

impl StoreLock {
    /// Lock the embedded store behind `endpoint`.
    ///
    /// Returns `None` for servers and `mem://`, which need no lock, and
    /// [`DbError::StoreLocked`] while another process holds it.
    pub fn acquire(endpoint: &str) -> Result<Option<StoreLock>, DbError> {
        let Some(store_path) = embedded_path(endpoint) else {
            return Ok(None);
        };
        let path = PathBuf::from(format!("{}.lock", store_path));
        let lock_error = |source| DbError::Lock {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(lock_error)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(lock_error)?;

        match file.try_lock() {
            Ok(()) => {
                debug!(path = %path.display(), "Locked embedded store");
                Ok(Some(StoreLock { path, _file: file }))
            }
            Err(TryLockError::WouldBlock) => Err(DbError::StoreLocked(store_path.to_string())),
            Err(TryLockError::Error(e)) => Err(lock_error(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// An open connection, plus the lock on its files for embedded stores.
#[derive(Debug)]
pub struct Store {
    db: Database,
    _lock: Option<StoreLock>,
}

impl Store {
    /// Connect to the store described by `config`.
    ///
    /// Most callers want [`init_db`]; this opens a connection that is not
    /// shared with the repositories.
    pub async fn open(config: &DbConfig) -> Result<Store, DbError> {
        let lock = StoreLock::acquire(&config.endpoint)?;
        let db = connect_to(config).await?;
        Ok(Store { db, _lock: lock })
    }

    pub fn db(&self) -> &Database {
        &self.db
    }
}

/// Open the process-wide connection. Later calls return the first connection
/// and ignore `config`.
pub async fn init_db(config: DbConfig) -> Result<&'static Database, DbError> {
    let store = STORE.get_or_try_init(|| Store::open(&config)).await?;
    Ok(store.db())
}

async fn connect_to(config: &DbConfig) -> Result<Database, DbError> {
    info!(endpoint = %config.endpoint, "Opening queue store");
    let store = connect(config.endpoint.as_str()).await?;

    if let Some(Credentials { username, password }) = &config.credentials {
        store
            .signin(Root {
                username,
                password,
            })
            .await?;
    }
    store.use_ns(&config.namespace).use_db(&config.database).await?;

    info!(
        namespace = %config.namespace,
        database = %config.database,
        "Queue store ready"
    );
    Ok(store)
}

/// The connection opened by [`init_db`].
pub fn get_db() -> Result<&'static Database, DbError> {
    STORE.get().map(Store::db).ok_or(DbError::NotInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_set_endpoint_scheme() {
        assert_eq!(DbConfig::memory().endpoint, "mem://");
        assert_eq!(DbConfig::surrealkv("queue.db").endpoint, "surrealkv://queue.db");
        assert_eq!(DbConfig::remote("127.0.0.1:8000").endpoint, "ws://127.0.0.1:8000");
        let config = DbConfig::memory().with_namespace("ns").with_database("db");
        assert_eq!((config.namespace.as_str(), config.database.as_str()), ("ns", "db"));
    }

    #[test]
    fn credentials_are_optional() {
        assert_eq!(DbConfig::remote("db:8000").credentials, None);
        let config = DbConfig::remote("db:8000").with_credentials("root", "secret");
        assert_eq!(config.credentials.map(|c| c.username), Some("root".to_string()));
    }

    #[test]
    fn domain_errors_are_not_unavailability() {
        assert!(DbError::NotInitialized.is_unavailable());
        assert!(!DbError::NotDead(JobId::new(1)).is_unavailable());
        assert!(!DbError::job_not_found(JobId::new(1)).is_unavailable());
        assert_eq!(DbError::job_not_found(JobId::new(7)).to_string(), "Job 7 not found");
        assert!(DbError::StoreLocked("queue.db".into()).is_unavailable());
    }

    #[test]
    fn only_file_stores_are_locked() {
        assert_eq!(embedded_path("surrealkv://queue.db"), Some("queue.db"));
        assert_eq!(embedded_path("rocksdb:///var/lib/q?strict=true"), Some("/var/lib/q"));
        assert_eq!(embedded_path("mem://"), None);
        assert_eq!(embedded_path("ws://127.0.0.1:8000"), None);
        assert_eq!(embedded_path("surrealkv://"), None);
        assert!(matches!(StoreLock::acquire("ws://127.0.0.1:8000"), Ok(None)));
    }

    #[test]
    fn store_lock_is_exclusive_until_dropped() -> Result<(), DbError> {
        let dir = std::env::temp_dir().join(format!("queuectl-lock-{}", std::process::id()));
        let endpoint = format!("surrealkv://{}", dir.join("queue.db").display());

        let held = StoreLock::acquire(&endpoint)?.ok_or(DbError::NotInitialized)?;
        assert!(held.path().ends_with("queue.db.lock"));
        let second = StoreLock::acquire(&endpoint);
        assert!(matches!(second, Err(DbError::StoreLocked(_))));

        drop(held);
        assert!(StoreLock::acquire(&endpoint)?.is_some());
        let _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }

    #[test]
    fn conflicts_are_recognised_by_kind() {
        let retryable = surrealdb::Error::Db(surrealdb::error::Db::TxRetryable);
        assert!(is_conflict(&retryable));
        assert!(!DbError::Connection(retryable).is_unavailable());

        let missing = surrealdb::Error::Db(surrealdb::error::Db::TxKeyAlreadyExists);
        assert!(!is_conflict(&missing));
        let remote = surrealdb::Error::Api(surrealdb::error::Api::Query(
            "Failed to commit transaction due to a read or write conflict".into(),
        ));
        assert!(is_conflict(&remote));
    }
}
