//! Agents: single-purpose processing units that each compute one mutation of
//! the project aggregate per request.
//!
//! An agent receives an owned copy of the aggregate and hands back the
//! mutated copy. Agents never talk to a store; the orchestrator is the only
//! place aggregates are loaded and saved.

mod code_validator;
mod gateway;
mod knowledge;
mod lifecycle;
mod profiler;
mod questions;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::knowledge::KnowledgeIndex;
use crate::models::invariants::InvariantViolation;
use crate::models::{Phase, Project, ScoreOutOfRange};
use crate::provider::ModelProvider;

pub use code_validator::{CodeValidatorAgent, Issue, Severity, VALIDATE_CODE};
pub use gateway::{ModelGatewayAgent, GENERATE};
pub use knowledge::{KnowledgeAgent, ADD_DOCUMENT, REMOVE_DOCUMENT, SEARCH_KNOWLEDGE};
pub use lifecycle::{
    build_project, LifecycleAgent, ADD_MEMBER, ADVANCE_PHASE, ARCHIVE, CHANGE_ROLE,
    REMOVE_MEMBER, RESET_PHASE, RESTORE, UPDATE_PROJECT,
};
pub use profiler::{LearnerProfilerAgent, ASSESS_MATURITY, UPDATE_MATURITY};
pub use questions::{QuestionAgent, ANSWER, ASK_QUESTION, QUEUE_QUESTION};

/// Business-rule failures raised inside an agent. None of these touch
/// persisted state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgentError {
    #[error("invalid payload for {action}: {reason}")]
    InvalidPayload { action: String, reason: String },

    #[error("project {0} is archived")]
    Archived(String),

    #[error("project {0} is not archived")]
    NotArchived(String),

    #[error("cannot move from phase {from} to {to}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error(transparent)]
    ScoreOutOfRange(#[from] ScoreOutOfRange),

    #[error("{0}")]
    Rejected(String),

    #[error("model provider error: {0}")]
    Provider(String),

    #[error("aggregate invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
}

/// One request routed to an agent.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub action: String,
    pub payload: Value,
}

impl AgentRequest {
    pub fn new(action: impl Into<String>, payload: Value) -> Self {
        Self {
            action: action.into(),
            payload,
        }
    }

    /// Deserialize the payload into the action's input type.
    ///
    /// A `null` payload is treated as an empty object so actions whose
    /// fields are all optional need no payload at all.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, AgentError> {
        let payload = match &self.payload {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        serde_json::from_value(payload).map_err(|e| AgentError::InvalidPayload {
            action: self.action.clone(),
            reason: e.to_string(),
        })
    }

    pub fn invalid(&self, reason: impl Into<String>) -> AgentError {
        AgentError::InvalidPayload {
            action: self.action.clone(),
            reason: reason.into(),
        }
    }
}

/// What an agent produced: a response for the caller and the aggregate to
/// persist.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub response: Value,
    pub project: Project,
    /// Set only by the explicit phase reset, the one action allowed to move
    /// the phase backwards.
    pub phase_reset: bool,
}

impl AgentOutcome {
    pub fn new(response: Value, project: Project) -> Self {
        Self {
            response,
            project,
            phase_reset: false,
        }
    }
}

/// Read-only resources agents may consult.
#[derive(Clone, Default)]
pub struct AgentContext {
    pub index: Option<Arc<KnowledgeIndex>>,
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &'static str;

    /// Actions this agent handles.
    fn actions(&self) -> &'static [&'static str];

    /// Whether `action` may run on an archived project.
    fn allowed_when_archived(&self, _action: &str) -> bool {
        false
    }

    async fn handle(
        &self,
        project: Project,
        request: &AgentRequest,
        ctx: &AgentContext,
    ) -> Result<AgentOutcome, AgentError>;
}

/// Maps action names to the agent that handles them.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<&'static str, Arc<dyn Agent>>,
}

/// Tunables for the standard agent set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Largest knowledge document accepted, in bytes.
    pub max_document_bytes: u64,
    /// Conversation turns included in model prompts.
    pub context_turns: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_document_bytes: 5 * 1024 * 1024,
            context_turns: 6,
        }
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full agent set wired to the given model providers.
    pub fn standard(settings: &AgentSettings, providers: Vec<Arc<dyn ModelProvider>>) -> Self {
        let mut registry = Self::new();
        let agents: Vec<Arc<dyn Agent>> = vec![
            Arc::new(LifecycleAgent),
            Arc::new(QuestionAgent),
            Arc::new(CodeValidatorAgent),
            Arc::new(KnowledgeAgent::new(settings.max_document_bytes)),
            Arc::new(ModelGatewayAgent::new(providers, settings.context_turns)),
            Arc::new(LearnerProfilerAgent),
        ];
        for agent in agents {
            // The standard agents have disjoint action sets.
            if let Err(e) = registry.register(agent) {
                tracing::error!("Skipping agent registration: {}", e);
            }
        }
        registry
    }

    /// Register an agent for all of its actions. Fails without registering
    /// anything if another agent already claims one of them.
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> Result<(), AgentError> {
        if let Some(taken) = agent
            .actions()
            .iter()
            .find(|action| self.agents.contains_key(*action))
        {
            return Err(AgentError::Rejected(format!(
                "action {taken} is already handled by {}",
                self.agents[taken].name()
            )));
        }
        for action in agent.actions() {
            self.agents.insert(*action, agent.clone());
        }
        Ok(())
    }

    pub fn resolve(&self, action: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(action).cloned()
    }

    /// Registered action names, sorted.
    pub fn actions(&self) -> Vec<&'static str> {
        let mut actions: Vec<_> = self.agents.keys().copied().collect();
        actions.sort_unstable();
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_covers_every_action() {
        let registry = AgentRegistry::standard(&AgentSettings::default(), Vec::new());
        for action in [
            ARCHIVE,
            RESTORE,
            ADVANCE_PHASE,
            RESET_PHASE,
            UPDATE_PROJECT,
            ADD_MEMBER,
            REMOVE_MEMBER,
            CHANGE_ROLE,
            ASK_QUESTION,
            ANSWER,
            QUEUE_QUESTION,
            VALIDATE_CODE,
            ADD_DOCUMENT,
            REMOVE_DOCUMENT,
            SEARCH_KNOWLEDGE,
            GENERATE,
            UPDATE_MATURITY,
            ASSESS_MATURITY,
        ] {
            assert!(registry.resolve(action).is_some(), "no agent for {action}");
        }
        assert_eq!(registry.actions().len(), 18);
        assert!(registry.resolve("fly").is_none());
    }

    #[test]
    fn resolved_agent_restores_an_archived_project() {
        let registry = AgentRegistry::standard(&AgentSettings::default(), Vec::new());
        let agent = registry.resolve(RESTORE).unwrap();
        assert!(agent.allowed_when_archived(RESTORE));
        assert!(!agent.allowed_when_archived(ARCHIVE));

        let mut project = Project::new(crate::models::ProjectId::from("p1"), "alice", "Parser");
        project.archived = true;
        let outcome = tokio_test::block_on(agent.handle(
            project,
            &AgentRequest::new(RESTORE, Value::Null),
            &AgentContext::default(),
        ))
        .unwrap();
        assert!(!outcome.project.archived);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(LifecycleAgent)).unwrap();
        assert!(registry.register(Arc::new(LifecycleAgent)).is_err());
    }

    #[test]
    fn null_payload_parses_as_empty_object() {
        #[derive(serde::Deserialize)]
        struct Input {
            limit: Option<usize>,
        }
        let request = AgentRequest::new("search-knowledge", Value::Null);
        let input: Input = request.parse().unwrap();
        assert!(input.limit.is_none());
    }
}
