//! Teardown of native handles.
//!
//! Database connections, pooled or not, and the knowledge index hold OS
//! handles. On
//! platforms with strict file locking those handles must be released, and
//! the OS given a moment to let go of them, before the backing files can be
//! deleted. [`ResourceLifecycle::close`] does both.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::db::{ConnectionPool, Database};
use crate::error::{CoreError, Result};
use crate::knowledge::KnowledgeIndex;

/// Settle delay for the current platform: none on POSIX, 250 ms on Windows.
pub fn default_settle_delay() -> Duration {
    if cfg!(windows) {
        Duration::from_millis(250)
    } else {
        Duration::ZERO
    }
}

#[derive(Default)]
struct Resources {
    databases: Vec<Database>,
    pools: Vec<ConnectionPool>,
    indexes: Vec<Arc<KnowledgeIndex>>,
}

/// Owns every handle registered with it and releases them all on `close`.
pub struct ResourceLifecycle {
    resources: Mutex<Resources>,
    settle_delay: Duration,
    closed: AtomicBool,
}

impl ResourceLifecycle {
    pub fn new(settle_delay: Duration) -> Self {
        Self {
            resources: Mutex::new(Resources::default()),
            settle_delay,
            closed: AtomicBool::new(false),
        }
    }

    pub fn register_database(&self, database: Database) -> Result<()> {
        self.ensure_open()?;
        self.lock()?.databases.push(database);
        Ok(())
    }

    pub fn register_pool(&self, pool: ConnectionPool) -> Result<()> {
        self.ensure_open()?;
        self.lock()?.pools.push(pool);
        Ok(())
    }

    pub fn register_index(&self, index: Arc<KnowledgeIndex>) -> Result<()> {
        self.ensure_open()?;
        self.lock()?.indexes.push(index);
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close databases, pools and indexes, then wait the settle delay.
    ///
    /// Only the first call does anything. Every handle is released even if
    /// an earlier one fails; the first failure is returned.
    pub async fn close(&self) -> Result<()> {
        let Some(released) = self.release_all() else {
            return Ok(());
        };
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        released
    }

    /// Release every handle without waiting. None when the lifecycle was
    /// already closed.
    fn release_all(&self) -> Option<Result<()>> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return None;
        }
        let resources = match self.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(e) => return Some(Err(e)),
        };

        let mut first = None;
        for database in &resources.databases {
            if let Err(e) = database.close() {
                tracing::warn!("Failed to close database {:?}: {}", database.path(), e);
                first.get_or_insert(e);
            }
        }
        for pool in &resources.pools {
            pool.close();
        }
        for index in &resources.indexes {
            if let Err(e) = index.close() {
                tracing::warn!("Failed to close knowledge index {}: {}", index.path().display(), e);
                first.get_or_insert(e);
            }
        }
        tracing::debug!(
            "Released {} databases, {} pools and {} indexes",
            resources.databases.len(),
            resources.pools.len(),
            resources.indexes.len()
        );
        Some(first.map_or(Ok(()), Err))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(CoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Resources>> {
        self.resources
            .lock()
            .map_err(|_| CoreError::Pool("lifecycle lock poisoned".to_string()))
    }
}

impl Default for ResourceLifecycle {
    fn default() -> Self {
        Self::new(default_settle_delay())
    }
}

impl Drop for ResourceLifecycle {
    /// Best effort: releases handles but cannot wait the settle delay.
    fn drop(&mut self) {
        if let Some(Err(e)) = self.release_all() {
            tracing::warn!("Resource teardown incomplete: {}", e);
        }
    }
}
