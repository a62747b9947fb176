//! Bounded async connection pool over deadpool-sqlite.
//!
//! The pool never grows past `max_size`. When every connection is checked
//! out, `acquire` waits up to `acquire_timeout` and then fails with
//! `PoolExhausted`; it never resizes to absorb the overflow.
//!
//! A [`PooledConnection`] is owned by exactly one operation. Dropping it (or
//! passing it to [`ConnectionPool::release`]) returns it to the pool.

use std::path::{Path, PathBuf};
use std::time::Duration;

use deadpool_sqlite::{Config, Hook, Object, Pool, PoolError, Runtime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::schema;
use crate::error::{CoreError, Result};

/// Sizing and timing for a [`ConnectionPool`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Ceiling on concurrently open connections.
    pub max_size: usize,
    /// Connections opened eagerly at construction.
    pub min_idle: usize,
    /// How long `acquire` waits for a free connection.
    #[serde(with = "millis")]
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: 2,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Pool status for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub max_size: usize,
    pub size: usize,
    pub available: usize,
    pub waiting: usize,
}

#[derive(Clone)]
pub struct ConnectionPool {
    pool: Pool,
    settings: PoolSettings,
    path: PathBuf,
}

impl ConnectionPool {
    /// Build the pool and eagerly open `min_idle` connections.
    pub async fn open(path: &Path, settings: PoolSettings) -> Result<Self> {
        if settings.max_size == 0 {
            return Err(CoreError::Pool("max_size must be at least 1".to_string()));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::SchemaUnavailable(format!("{}: {e}", parent.display())))?;
        }

        schema::register_vector_extension();
        let pool = Config::new(path)
            .builder(Runtime::Tokio1)
            .map_err(|e| CoreError::Pool(format!("failed to create pool builder: {e}")))?
            .max_size(settings.max_size)
            .wait_timeout(Some(settings.acquire_timeout))
            .post_create(make_post_create_hook())
            .build()
            .map_err(|e| CoreError::Pool(format!("failed to build connection pool: {e}")))?;

        let pool = Self {
            pool,
            settings,
            path: path.to_path_buf(),
        };
        pool.warm_up().await?;
        Ok(pool)
    }

    /// Open `min_idle` connections up front so the first requests do not
    /// pay for connection setup. They go straight back to the pool.
    async fn warm_up(&self) -> Result<()> {
        let floor = self.settings.min_idle.min(self.settings.max_size);
        let mut held = Vec::with_capacity(floor);
        for _ in 0..floor {
            held.push(self.acquire().await?);
        }
        tracing::debug!(
            "Connection pool for {} warmed with {} connections",
            self.path.display(),
            held.len()
        );
        Ok(())
    }

    /// Check out a connection, waiting up to the configured deadline.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        match self.pool.get().await {
            Ok(object) => Ok(PooledConnection { object }),
            Err(PoolError::Timeout(_)) => {
                tracing::warn!(
                    "Connection pool exhausted ({} connections) after {:?}",
                    self.settings.max_size,
                    self.settings.acquire_timeout
                );
                Err(CoreError::PoolExhausted(self.settings.acquire_timeout))
            }
            Err(PoolError::Closed) => Err(CoreError::Closed),
            Err(PoolError::Backend(e)) => Err(CoreError::Storage(e)),
            Err(e) => Err(CoreError::Pool(e.to_string())),
        }
    }

    /// Return a connection to the pool. Equivalent to dropping it.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Run `f` on a pooled connection, on the blocking thread pool.
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.acquire().await?;
        conn.interact(f).await
    }

    /// Apply the schema through a pooled connection.
    pub async fn ensure_schema(&self) -> Result<()> {
        self.interact(schema::ensure_schema).await.map_err(|e| match e {
            CoreError::SchemaUnavailable(_) => e,
            other => CoreError::SchemaUnavailable(other.to_string()),
        })
    }

    pub fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            max_size: status.max_size,
            size: status.size,
            available: status.available,
            waiting: status.waiting,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the pool. Idle connections are dropped now, checked-out ones
    /// when they are released; later `acquire` calls fail with `Closed`.
    pub fn close(&self) {
        if !self.pool.is_closed() {
            tracing::debug!("Closing connection pool for {}", self.path.display());
            self.pool.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

/// A checked-out connection, exclusive to one operation.
pub struct PooledConnection {
    object: Object,
}

impl PooledConnection {
    pub async fn interact<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.object
            .interact(f)
            .await
            .map_err(|e| CoreError::Pool(format!("interact failed: {e}")))?
    }
}

fn make_post_create_hook() -> Hook {
    Hook::async_fn(|conn, _metrics| {
        Box::pin(async move {
            conn.interact(|conn| schema::configure_connection(conn))
                .await
                .map_err(|e| {
                    deadpool_sqlite::HookError::Message(format!("interact failed: {e}").into())
                })?
                .map_err(|e| {
                    deadpool_sqlite::HookError::Message(
                        format!("connection setup failed: {e}").into(),
                    )
                })
        })
    })
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(max_size: usize, min_idle: usize, timeout_ms: u64) -> PoolSettings {
        PoolSettings {
            max_size,
            min_idle,
            acquire_timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[tokio::test]
    async fn test_pool_opens_floor_eagerly() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::open(&dir.path().join("pool.db"), settings(4, 2, 500))
            .await
            .unwrap();

        let status = pool.status();
        assert_eq!(status.max_size, 4);
        assert_eq!(status.size, 2);
        assert_eq!(status.available, 2);
    }

    #[tokio::test]
    async fn test_acquire_times_out_at_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::open(&dir.path().join("pool.db"), settings(2, 0, 50))
            .await
            .unwrap();

        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert!(matches!(
            pool.acquire().await,
            Err(CoreError::PoolExhausted(_))
        ));
        assert_eq!(pool.status().size, 2);

        pool.release(a);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::open(&dir.path().join("pool.db"), settings(2, 1, 50))
            .await
            .unwrap();

        pool.close();
        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(pool.acquire().await, Err(CoreError::Closed)));
    }

    #[tokio::test]
    async fn test_zero_ceiling_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConnectionPool::open(&dir.path().join("pool.db"), settings(0, 0, 50)).await;
        assert!(matches!(result, Err(CoreError::Pool(_))));
    }
}
