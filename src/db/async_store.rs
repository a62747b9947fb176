use std::path::Path;

use async_trait::async_trait;

use super::pool::{ConnectionPool, PoolSettings};
use super::{queries, schema, AsyncProjectStore};
use crate::error::{CoreError, Result};
use crate::models::*;

/// Async store: every operation checks out one pooled connection for its
/// duration and runs on the blocking thread pool.
#[derive(Clone)]
pub struct AsyncDatabase {
    pool: ConnectionPool,
}

impl AsyncDatabase {
    /// Open the pool and bring the schema up to date.
    ///
    /// Any failure here is `SchemaUnavailable` and should abort startup.
    pub async fn open(path: &Path, settings: PoolSettings) -> Result<Self> {
        let pool = ConnectionPool::open(path, settings).await.map_err(|e| match e {
            CoreError::SchemaUnavailable(_) => e,
            other => CoreError::SchemaUnavailable(other.to_string()),
        })?;
        pool.ensure_schema().await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Sorted DDL of the database, see [`schema::describe`].
    pub async fn describe_schema(&self) -> Result<Vec<String>> {
        self.pool.interact(|conn| schema::describe(conn)).await
    }
}

#[async_trait]
impl AsyncProjectStore for AsyncDatabase {
    async fn create(&self, project: &Project) -> Result<Project> {
        let project = project.clone();
        self.pool
            .interact(move |conn| queries::insert_project(conn, &project))
            .await
    }

    async fn load(&self, id: &ProjectId) -> Result<Project> {
        let id = id.clone();
        self.pool
            .interact(move |conn| queries::load_project(conn, &id))
            .await
    }

    async fn save(&self, project: &Project) -> Result<Project> {
        let project = project.clone();
        self.pool
            .interact(move |conn| queries::replace_project(conn, &project))
            .await
    }

    async fn archive(&self, id: &ProjectId) -> Result<()> {
        let id = id.clone();
        self.pool
            .interact(move |conn| queries::set_archived(conn, &id, true))
            .await
    }

    async fn restore(&self, id: &ProjectId) -> Result<()> {
        let id = id.clone();
        self.pool
            .interact(move |conn| queries::set_archived(conn, &id, false))
            .await
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<ProjectSummary>> {
        let owner = owner.to_string();
        self.pool
            .interact(move |conn| queries::list_by_owner(conn, &owner))
            .await
    }

    async fn list_by_member(&self, user: &str) -> Result<Vec<ProjectSummary>> {
        let user = user.to_string();
        self.pool
            .interact(move |conn| queries::list_by_member(conn, &user))
            .await
    }

    async fn count_owned(&self, owner: &str) -> Result<u64> {
        let owner = owner.to_string();
        self.pool
            .interact(move |conn| queries::count_owned(conn, &owner))
            .await
    }

    async fn storage_summary(&self, id: &ProjectId) -> Result<StorageSummary> {
        let id = id.clone();
        self.pool
            .interact(move |conn| queries::storage_summary(conn, &id))
            .await
    }

    async fn storage_used_by_owner(&self, owner: &str) -> Result<u64> {
        let owner = owner.to_string();
        self.pool
            .interact(move |conn| queries::storage_used_by_owner(conn, &owner))
            .await
    }
}
