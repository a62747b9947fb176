//! Request router: load, dispatch to one agent, verify, save, respond.
//!
//! Per request the state moves `Received -> Loaded -> Dispatched -> Mutated
//! -> Persisted -> Responded`. Any failure before `Persisted` leaves storage
//! untouched. There is no cross-request locking: two requests on the same
//! project may both load the same state, and the last save wins.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::agents::{build_project, AgentContext, AgentError, AgentRegistry, AgentRequest};
use crate::db::AsyncProjectStore;
use crate::error::{CoreError, Result};
use crate::knowledge::KnowledgeIndex;
use crate::models::{invariants, NewProject, Project, ProjectId};

/// Result of one successful `execute`.
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    /// Agent-specific response payload.
    pub response: Value,
    /// The aggregate as saved.
    pub project: Project,
    /// The save succeeded but the knowledge index could not be refreshed.
    pub index_stale: bool,
}

pub struct Orchestrator {
    store: Arc<dyn AsyncProjectStore>,
    agents: AgentRegistry,
    index: Option<Arc<KnowledgeIndex>>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn AsyncProjectStore>, agents: AgentRegistry) -> Self {
        Self {
            store,
            agents,
            index: None,
        }
    }

    /// Attach the knowledge index searched by agents and refreshed after
    /// every save.
    pub fn with_index(mut self, index: Arc<KnowledgeIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn store(&self) -> &Arc<dyn AsyncProjectStore> {
        &self.store
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// Create a project owned by `owner` and return its id.
    pub async fn create_project(&self, owner: &str, fields: NewProject) -> Result<ProjectId> {
        let project = build_project(owner, fields)?;
        invariants::validate(&project).map_err(AgentError::from)?;

        let created = self.store.create(&project).await?;
        tracing::info!("Created project {} for {}", created.id, created.owner);
        self.refresh_index(&created);
        Ok(created.id)
    }

    /// Load a project without mutating it.
    pub async fn project(&self, id: &ProjectId) -> Result<Project> {
        self.store.load(id).await
    }

    /// Run `action` against project `id`.
    pub async fn execute(&self, id: &ProjectId, action: &str, payload: Value) -> Result<Execution> {
        tracing::debug!("Received {} for project {}", action, id);

        let project = self.store.load(id).await?;
        tracing::debug!("Loaded project {} in phase {}", id, project.phase);

        let agent = self
            .agents
            .resolve(action)
            .ok_or_else(|| CoreError::UnsupportedAction(action.to_string()))?;
        if project.archived && !agent.allowed_when_archived(action) {
            return Err(AgentError::Archived(id.to_string()).into());
        }
        tracing::debug!("Dispatched {} to agent {}", action, agent.name());

        let request = AgentRequest::new(action, payload);
        let ctx = AgentContext {
            index: self.index.clone(),
        };
        let before = project.clone();
        let outcome = agent.handle(project, &request, &ctx).await?;
        invariants::verify_mutation(&before, &outcome.project, outcome.phase_reset)
            .map_err(AgentError::from)?;
        tracing::debug!("Mutated project {} via {}", id, action);

        let saved = self
            .store
            .save(&outcome.project)
            .await
            .map_err(|e| CoreError::PersistenceFailed(Box::new(e)))?;
        tracing::debug!("Persisted project {}", id);

        let index_stale = !self.refresh_index(&saved);
        tracing::debug!("Responded to {} for project {}", action, id);
        Ok(Execution {
            response: outcome.response,
            project: saved,
            index_stale,
        })
    }

    /// Re-index the project's documents. Concurrent requests may refresh
    /// out of order; the index keeps whichever saved revision is newest.
    /// Returns false if the index could not be updated.
    fn refresh_index(&self, project: &Project) -> bool {
        let Some(index) = &self.index else {
            return true;
        };
        match index.replace_project(project) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Knowledge index refresh failed for {}: {}", project.id, e);
                false
            }
        }
    }
}
