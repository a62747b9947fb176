//! Project persistence.
//!
//! Two interchangeable variants implement one contract:
//!
//! - [`Database`]: blocking, a single connection behind a mutex.
//! - [`AsyncDatabase`]: async, backed by the bounded [`ConnectionPool`].
//!
//! Both run the same row-level SQL from `queries` against the schema from
//! [`schema`], and both are checked by the same contract tests.

mod async_store;
mod pool;
mod queries;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::Connection;

use crate::error::{CoreError, Result};
use crate::models::*;

pub use async_store::AsyncDatabase;
pub use pool::{ConnectionPool, PoolSettings, PoolStatus, PooledConnection};

/// The blocking persistence contract.
pub trait ProjectStore: Send + Sync {
    /// Insert a new aggregate. Fails with `DuplicateId` if the id exists.
    fn create(&self, project: &Project) -> Result<Project>;
    /// Load the full aggregate. Fails with `NotFound` if absent.
    fn load(&self, id: &ProjectId) -> Result<Project>;
    /// Replace the full aggregate atomically.
    fn save(&self, project: &Project) -> Result<Project>;
    fn archive(&self, id: &ProjectId) -> Result<()>;
    fn restore(&self, id: &ProjectId) -> Result<()>;
    /// Soft delete: same as `archive`.
    fn delete(&self, id: &ProjectId) -> Result<()> {
        self.archive(id)
    }
    fn list_by_owner(&self, owner: &str) -> Result<Vec<ProjectSummary>>;
    fn list_by_member(&self, user: &str) -> Result<Vec<ProjectSummary>>;
    fn count_owned(&self, owner: &str) -> Result<u64>;
    fn storage_summary(&self, id: &ProjectId) -> Result<StorageSummary>;
    fn storage_used_by_owner(&self, owner: &str) -> Result<u64>;
}

/// The asynchronous persistence contract. Same operations, same results.
#[async_trait]
pub trait AsyncProjectStore: Send + Sync {
    async fn create(&self, project: &Project) -> Result<Project>;
    async fn load(&self, id: &ProjectId) -> Result<Project>;
    async fn save(&self, project: &Project) -> Result<Project>;
    async fn archive(&self, id: &ProjectId) -> Result<()>;
    async fn restore(&self, id: &ProjectId) -> Result<()>;
    async fn delete(&self, id: &ProjectId) -> Result<()> {
        self.archive(id).await
    }
    async fn list_by_owner(&self, owner: &str) -> Result<Vec<ProjectSummary>>;
    async fn list_by_member(&self, user: &str) -> Result<Vec<ProjectSummary>>;
    async fn count_owned(&self, owner: &str) -> Result<u64>;
    async fn storage_summary(&self, id: &ProjectId) -> Result<StorageSummary>;
    async fn storage_used_by_owner(&self, owner: &str) -> Result<u64>;
}

/// Blocking store: one SQLite connection shared behind a mutex.
///
/// Clones share the connection. [`Database::close`] releases it for all of
/// them; later calls fail with `Closed`.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Option<Connection>>>,
    path: Option<PathBuf>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::SchemaUnavailable(format!("{}: {e}", parent.display())))?;
        }
        schema::register_vector_extension();
        let conn = Connection::open(path)
            .map_err(|e| CoreError::SchemaUnavailable(format!("{}: {e}", path.display())))?;
        schema::configure_connection(&conn)
            .map_err(|e| CoreError::SchemaUnavailable(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_memory() -> Result<Self> {
        schema::register_vector_extension();
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: None,
        })
    }

    pub fn ensure_schema(&self) -> Result<()> {
        self.with_conn(schema::ensure_schema)
    }

    /// Sorted DDL of the database, see [`schema::describe`].
    pub fn describe_schema(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| schema::describe(conn))
    }

    /// Database file path (None for in-memory).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) -> Result<()> {
        let Some(conn) = self.lock()?.take() else {
            return Ok(());
        };
        tracing::debug!("Closing database {:?}", self.path);
        conn.close().map_err(|(_, e)| CoreError::Storage(e))
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|conn| conn.is_none()).unwrap_or(true)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|_| CoreError::Pool("database lock poisoned".to_string()))
    }

    fn with_conn<R>(&self, f: impl FnOnce(&mut Connection) -> Result<R>) -> Result<R> {
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or(CoreError::Closed)?;
        f(conn)
    }
}

impl ProjectStore for Database {
    fn create(&self, project: &Project) -> Result<Project> {
        self.with_conn(|conn| queries::insert_project(conn, project))
    }

    fn load(&self, id: &ProjectId) -> Result<Project> {
        self.with_conn(|conn| queries::load_project(conn, id))
    }

    fn save(&self, project: &Project) -> Result<Project> {
        self.with_conn(|conn| queries::replace_project(conn, project))
    }

    fn archive(&self, id: &ProjectId) -> Result<()> {
        self.with_conn(|conn| queries::set_archived(conn, id, true))
    }

    fn restore(&self, id: &ProjectId) -> Result<()> {
        self.with_conn(|conn| queries::set_archived(conn, id, false))
    }

    fn list_by_owner(&self, owner: &str) -> Result<Vec<ProjectSummary>> {
        self.with_conn(|conn| queries::list_by_owner(conn, owner))
    }

    fn list_by_member(&self, user: &str) -> Result<Vec<ProjectSummary>> {
        self.with_conn(|conn| queries::list_by_member(conn, user))
    }

    fn count_owned(&self, owner: &str) -> Result<u64> {
        self.with_conn(|conn| queries::count_owned(conn, owner))
    }

    fn storage_summary(&self, id: &ProjectId) -> Result<StorageSummary> {
        self.with_conn(|conn| queries::storage_summary(conn, id))
    }

    fn storage_used_by_owner(&self, owner: &str) -> Result<u64> {
        self.with_conn(|conn| queries::storage_used_by_owner(conn, owner))
    }
}

/// Runs a blocking store on tokio's blocking thread pool so async callers,
/// such as the orchestrator, can drive it.
#[derive(Clone)]
pub struct BlockingBridge<S> {
    inner: Arc<S>,
}

impl<S: ProjectStore + 'static> BlockingBridge<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    async fn run<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&S) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&inner)).await?
    }
}

#[async_trait]
impl<S: ProjectStore + 'static> AsyncProjectStore for BlockingBridge<S> {
    async fn create(&self, project: &Project) -> Result<Project> {
        let project = project.clone();
        self.run(move |s| s.create(&project)).await
    }

    async fn load(&self, id: &ProjectId) -> Result<Project> {
        let id = id.clone();
        self.run(move |s| s.load(&id)).await
    }

    async fn save(&self, project: &Project) -> Result<Project> {
        let project = project.clone();
        self.run(move |s| s.save(&project)).await
    }

    async fn archive(&self, id: &ProjectId) -> Result<()> {
        let id = id.clone();
        self.run(move |s| s.archive(&id)).await
    }

    async fn restore(&self, id: &ProjectId) -> Result<()> {
        let id = id.clone();
        self.run(move |s| s.restore(&id)).await
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<ProjectSummary>> {
        let owner = owner.to_string();
        self.run(move |s| s.list_by_owner(&owner)).await
    }

    async fn list_by_member(&self, user: &str) -> Result<Vec<ProjectSummary>> {
        let user = user.to_string();
        self.run(move |s| s.list_by_member(&user)).await
    }

    async fn count_owned(&self, owner: &str) -> Result<u64> {
        let owner = owner.to_string();
        self.run(move |s| s.count_owned(&owner)).await
    }

    async fn storage_summary(&self, id: &ProjectId) -> Result<StorageSummary> {
        let id = id.clone();
        self.run(move |s| s.storage_summary(&id)).await
    }

    async fn storage_used_by_owner(&self, owner: &str) -> Result<u64> {
        let owner = owner.to_string();
        self.run(move |s| s.storage_used_by_owner(&owner)).await
    }
}
