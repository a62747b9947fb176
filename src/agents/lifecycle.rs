use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::{Agent, AgentContext, AgentError, AgentOutcome, AgentRequest};
use crate::models::{NewProject, Phase, Project, ProjectId, TeamMember, TeamRole};

pub const ARCHIVE: &str = "archive";
pub const RESTORE: &str = "restore";
pub const ADVANCE_PHASE: &str = "advance-phase";
pub const RESET_PHASE: &str = "reset-phase";
pub const UPDATE_PROJECT: &str = "update-project";
pub const ADD_MEMBER: &str = "add-member";
pub const REMOVE_MEMBER: &str = "remove-member";
pub const CHANGE_ROLE: &str = "change-role";

/// Build the aggregate for a new project.
pub fn build_project(owner: &str, fields: NewProject) -> Result<Project, AgentError> {
    if owner.trim().is_empty() {
        return Err(AgentError::Rejected("project owner must not be empty".into()));
    }
    if fields.name.trim().is_empty() {
        return Err(AgentError::Rejected("project name must not be empty".into()));
    }
    if matches!(&fields.id, Some(id) if id.as_str().trim().is_empty()) {
        return Err(AgentError::Rejected("project id must not be empty".into()));
    }

    let id = fields.id.unwrap_or_else(ProjectId::generate);
    let mut project = Project::new(id, owner, fields.name);
    project.description = fields.description;
    project.requirements = fields.requirements;
    project.tech_stack = fields.tech_stack;
    project.constraints = fields.constraints;
    Ok(project)
}

/// Project lifecycle manager: archive/restore, phase transitions, project
/// fields and team membership.
pub struct LifecycleAgent;

#[derive(Deserialize)]
struct PhaseInput {
    target: Phase,
}

#[derive(Deserialize)]
struct UpdateInput {
    name: Option<String>,
    description: Option<String>,
    requirements: Option<Vec<String>>,
    tech_stack: Option<Vec<String>>,
    constraints: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct MemberInput {
    user: String,
    role: Option<TeamRole>,
}

#[async_trait]
impl Agent for LifecycleAgent {
    fn name(&self) -> &'static str {
        "lifecycle"
    }

    fn actions(&self) -> &'static [&'static str] {
        &[
            ARCHIVE,
            RESTORE,
            ADVANCE_PHASE,
            RESET_PHASE,
            UPDATE_PROJECT,
            ADD_MEMBER,
            REMOVE_MEMBER,
            CHANGE_ROLE,
        ]
    }

    fn allowed_when_archived(&self, action: &str) -> bool {
        action == RESTORE
    }

    async fn handle(
        &self,
        mut project: Project,
        request: &AgentRequest,
        _ctx: &AgentContext,
    ) -> Result<AgentOutcome, AgentError> {
        match request.action.as_str() {
            ARCHIVE => {
                if project.archived {
                    return Err(AgentError::Archived(project.id.to_string()));
                }
                project.archived = true;
                Ok(AgentOutcome::new(json!({ "archived": true }), project))
            }
            RESTORE => {
                if !project.archived {
                    return Err(AgentError::NotArchived(project.id.to_string()));
                }
                project.archived = false;
                Ok(AgentOutcome::new(json!({ "archived": false }), project))
            }
            ADVANCE_PHASE => {
                let input: PhaseInput = request.parse()?;
                if input.target <= project.phase {
                    return Err(AgentError::InvalidTransition {
                        from: project.phase,
                        to: input.target,
                    });
                }
                let previous = project.phase;
                project.phase = input.target;
                Ok(AgentOutcome::new(
                    json!({ "previous": previous, "phase": project.phase }),
                    project,
                ))
            }
            RESET_PHASE => {
                let input: PhaseInput = request.parse()?;
                if input.target > project.phase {
                    return Err(AgentError::InvalidTransition {
                        from: project.phase,
                        to: input.target,
                    });
                }
                let previous = project.phase;
                project.phase = input.target;
                let mut outcome = AgentOutcome::new(
                    json!({ "previous": previous, "phase": project.phase }),
                    project,
                );
                outcome.phase_reset = true;
                Ok(outcome)
            }
            UPDATE_PROJECT => {
                let input: UpdateInput = request.parse()?;
                if let Some(name) = input.name {
                    if name.trim().is_empty() {
                        return Err(request.invalid("name must not be empty"));
                    }
                    project.name = name;
                }
                if input.description.is_some() {
                    project.description = input.description;
                }
                if let Some(requirements) = input.requirements {
                    project.requirements = requirements;
                }
                if let Some(tech_stack) = input.tech_stack {
                    project.tech_stack = tech_stack;
                }
                if let Some(constraints) = input.constraints {
                    project.constraints = constraints;
                }
                Ok(AgentOutcome::new(json!({ "updated": true }), project))
            }
            ADD_MEMBER => {
                let input: MemberInput = request.parse()?;
                let role = input.role.unwrap_or(TeamRole::Viewer);
                check_assignable(request, &input.user, role)?;
                if project.member(&input.user).is_some() {
                    return Err(AgentError::Rejected(format!(
                        "{} is already a member of {}",
                        input.user, project.id
                    )));
                }
                project.team.push(TeamMember {
                    user: input.user.clone(),
                    role,
                    joined_at: Utc::now(),
                });
                Ok(AgentOutcome::new(
                    json!({ "user": input.user, "role": role, "team_size": project.team.len() }),
                    project,
                ))
            }
            REMOVE_MEMBER => {
                let input: MemberInput = request.parse()?;
                if input.user == project.owner {
                    return Err(AgentError::Rejected(
                        "the project owner cannot be removed".into(),
                    ));
                }
                let before = project.team.len();
                project.team.retain(|m| m.user != input.user);
                if project.team.len() == before {
                    return Err(AgentError::Rejected(format!(
                        "{} is not a member of {}",
                        input.user, project.id
                    )));
                }
                Ok(AgentOutcome::new(
                    json!({ "user": input.user, "team_size": project.team.len() }),
                    project,
                ))
            }
            CHANGE_ROLE => {
                let input: MemberInput = request.parse()?;
                let role = input
                    .role
                    .ok_or_else(|| request.invalid("missing field `role`"))?;
                check_assignable(request, &input.user, role)?;
                if input.user == project.owner {
                    return Err(AgentError::Rejected(
                        "the project owner's role cannot change".into(),
                    ));
                }
                let member = project
                    .team
                    .iter_mut()
                    .find(|m| m.user == input.user)
                    .ok_or_else(|| {
                        AgentError::Rejected(format!("{} is not a member", input.user))
                    })?;
                member.role = role;
                Ok(AgentOutcome::new(
                    json!({ "user": input.user, "role": role }),
                    project,
                ))
            }
            other => Err(request.invalid(format!("{other} is not a lifecycle action"))),
        }
    }
}

fn check_assignable(request: &AgentRequest, user: &str, role: TeamRole) -> Result<(), AgentError> {
    if user.trim().is_empty() {
        return Err(request.invalid("user must not be empty"));
    }
    if role == TeamRole::Owner {
        return Err(AgentError::Rejected(
            "ownership is fixed at creation and cannot be granted".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn project() -> Project {
        build_project(
            "alice",
            NewProject {
                id: Some(ProjectId::from("p1")),
                name: "Interpreter".to_string(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    async fn run(project: Project, action: &str, payload: Value) -> Result<AgentOutcome, AgentError> {
        LifecycleAgent
            .handle(project, &AgentRequest::new(action, payload), &AgentContext::default())
            .await
    }

    #[test]
    fn build_project_rejects_blank_name() {
        let result = build_project("alice", NewProject::default());
        assert!(matches!(result, Err(AgentError::Rejected(_))));
    }

    #[tokio::test]
    async fn advance_phase_only_moves_forward() {
        let outcome = run(project(), ADVANCE_PHASE, json!({ "target": "design" }))
            .await
            .unwrap();
        assert_eq!(outcome.project.phase, Phase::Design);
        assert!(!outcome.phase_reset);

        let err = run(outcome.project, ADVANCE_PHASE, json!({ "target": "discovery" }))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AgentError::InvalidTransition {
                from: Phase::Design,
                to: Phase::Discovery
            }
        );
    }

    #[tokio::test]
    async fn reset_phase_moves_backwards_and_flags_outcome() {
        let mut p = project();
        p.phase = Phase::Implementation;
        let outcome = run(p, RESET_PHASE, json!({ "target": "discovery" }))
            .await
            .unwrap();
        assert_eq!(outcome.project.phase, Phase::Discovery);
        assert!(outcome.phase_reset);
    }

    #[tokio::test]
    async fn unknown_phase_is_invalid_payload() {
        let err = run(project(), ADVANCE_PHASE, json!({ "target": "testing" }))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidPayload { .. }));
    }

    #[tokio::test]
    async fn members_are_unique_and_owner_is_protected() {
        let outcome = run(project(), ADD_MEMBER, json!({ "user": "bob", "role": "editor" }))
            .await
            .unwrap();
        assert_eq!(outcome.project.team.len(), 2);

        let dup = run(outcome.project.clone(), ADD_MEMBER, json!({ "user": "bob" })).await;
        assert!(matches!(dup, Err(AgentError::Rejected(_))));

        let owner = run(outcome.project.clone(), REMOVE_MEMBER, json!({ "user": "alice" })).await;
        assert!(matches!(owner, Err(AgentError::Rejected(_))));

        let grant = run(
            outcome.project.clone(),
            CHANGE_ROLE,
            json!({ "user": "bob", "role": "owner" }),
        )
        .await;
        assert!(matches!(grant, Err(AgentError::Rejected(_))));

        let removed = run(outcome.project, REMOVE_MEMBER, json!({ "user": "bob" }))
            .await
            .unwrap();
        assert_eq!(removed.project.team.len(), 1);
    }

    #[tokio::test]
    async fn restore_requires_archived_project() {
        let err = run(project(), RESTORE, Value::Null).await.unwrap_err();
        assert!(matches!(err, AgentError::NotArchived(_)));

        let archived = run(project(), ARCHIVE, Value::Null).await.unwrap();
        assert!(archived.project.archived);
        let restored = run(archived.project, RESTORE, Value::Null).await.unwrap();
        assert!(!restored.project.archived);
    }
}
