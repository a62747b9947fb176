use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{Agent, AgentContext, AgentError, AgentOutcome, AgentRequest};
use crate::models::{ConversationTurn, Project, TurnRole};
use crate::provider::ModelProvider;

pub const GENERATE: &str = "generate";

/// Multi-provider model gateway. Providers are tried in order; the first
/// successful reply wins.
pub struct ModelGatewayAgent {
    providers: Vec<Arc<dyn ModelProvider>>,
    context_turns: usize,
}

impl ModelGatewayAgent {
    pub fn new(providers: Vec<Arc<dyn ModelProvider>>, context_turns: usize) -> Self {
        Self {
            providers,
            context_turns,
        }
    }

    /// The learner's prompt framed with the project context and the most
    /// recent conversation turns.
    fn build_prompt(&self, project: &Project, prompt: &str) -> String {
        let mut out = format!(
            "You are a Socratic tutor guiding the project \"{}\", currently in the {} phase.\n",
            project.name, project.phase
        );
        if let Some(description) = &project.description {
            let _ = writeln!(out, "Description: {description}");
        }
        if !project.tech_stack.is_empty() {
            let _ = writeln!(out, "Tech stack: {}", project.tech_stack.join(", "));
        }
        let skip = project.conversation.len().saturating_sub(self.context_turns);
        for turn in project.conversation.iter().skip(skip) {
            let _ = writeln!(out, "{}: {}", turn.role.as_str(), turn.content);
        }
        let _ = write!(out, "user: {prompt}");
        out
    }
}

#[derive(Deserialize)]
struct GenerateInput {
    prompt: String,
}

#[async_trait]
impl Agent for ModelGatewayAgent {
    fn name(&self) -> &'static str {
        "model-gateway"
    }

    fn actions(&self) -> &'static [&'static str] {
        &[GENERATE]
    }

    async fn handle(
        &self,
        mut project: Project,
        request: &AgentRequest,
        _ctx: &AgentContext,
    ) -> Result<AgentOutcome, AgentError> {
        let input: GenerateInput = request.parse()?;
        if input.prompt.trim().is_empty() {
            return Err(request.invalid("prompt must not be empty"));
        }
        if self.providers.is_empty() {
            return Err(AgentError::Provider("no model provider configured".into()));
        }

        let prompt = self.build_prompt(&project, &input.prompt);
        let mut failures = Vec::new();
        for provider in &self.providers {
            match provider.generate(&prompt).await {
                Ok(reply) => {
                    project
                        .conversation
                        .push(ConversationTurn::new(TurnRole::User, input.prompt));
                    project
                        .conversation
                        .push(ConversationTurn::new(TurnRole::Assistant, reply.clone()));
                    return Ok(AgentOutcome::new(
                        json!({ "reply": reply, "provider": provider.name() }),
                        project,
                    ));
                }
                Err(e) => {
                    tracing::warn!("Model provider {} failed: {}", provider.name(), e);
                    failures.push(format!("{}: {}", provider.name(), e));
                }
            }
        }
        Err(AgentError::Provider(failures.join("; ")))
    }
}
