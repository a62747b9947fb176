//! Aggregate invariants, checked in one place.
//!
//! [`validate`] checks a standalone aggregate (used before `create`), and
//! [`verify_mutation`] checks that an agent's output is a legal successor of
//! the aggregate it was given.

use std::collections::HashSet;

use thiserror::Error;

use super::project::{Phase, Project};
use super::team::TeamRole;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    #[error("project id changed from {before} to {after}")]
    IdChanged { before: String, after: String },

    #[error("project owner cannot be reassigned")]
    OwnerChanged,

    #[error("creation timestamp cannot change")]
    CreatedAtChanged,

    #[error("phase moved backwards from {from} to {to}")]
    PhaseRegressed { from: Phase, to: Phase },

    #[error("maturity score out of bounds")]
    MaturityOutOfBounds,

    #[error("conversation history was truncated or rewritten")]
    ConversationRewritten,

    #[error("project notes were truncated or rewritten")]
    NotesRewritten,

    #[error("user {0} appears more than once on the team")]
    DuplicateMember(String),

    #[error("team must have exactly one owner entry and it must be the project owner")]
    OwnerEntry,

    #[error("knowledge document id {0} is not unique")]
    DuplicateDocument(String),

    #[error("inline document {id} declares {declared} bytes but holds {actual}")]
    DocumentSize { id: String, declared: u64, actual: u64 },

    #[error("project name must not be empty")]
    EmptyName,
}

/// Check the invariants that hold for any single aggregate.
pub fn validate(project: &Project) -> Result<(), InvariantViolation> {
    if project.name.trim().is_empty() {
        return Err(InvariantViolation::EmptyName);
    }
    if !project.maturity.is_within_bounds() {
        return Err(InvariantViolation::MaturityOutOfBounds);
    }

    let mut users = HashSet::new();
    for member in &project.team {
        if !users.insert(member.user.as_str()) {
            return Err(InvariantViolation::DuplicateMember(member.user.clone()));
        }
    }
    let owners: Vec<_> = project
        .team
        .iter()
        .filter(|m| m.role == TeamRole::Owner)
        .collect();
    if owners.len() != 1 || owners[0].user != project.owner {
        return Err(InvariantViolation::OwnerEntry);
    }

    let mut documents = HashSet::new();
    for doc in &project.knowledge_documents {
        if !documents.insert(doc.id.as_str()) {
            return Err(InvariantViolation::DuplicateDocument(doc.id.clone()));
        }
        if let Some(content) = doc.body.content() {
            let actual = content.len() as u64;
            if actual != doc.size_bytes {
                return Err(InvariantViolation::DocumentSize {
                    id: doc.id.clone(),
                    declared: doc.size_bytes,
                    actual,
                });
            }
        }
    }

    Ok(())
}

/// Check that `after` is a legal successor of `before`.
///
/// `allow_phase_reset` is only set for the explicit reset action.
pub fn verify_mutation(
    before: &Project,
    after: &Project,
    allow_phase_reset: bool,
) -> Result<(), InvariantViolation> {
    if before.id != after.id {
        return Err(InvariantViolation::IdChanged {
            before: before.id.to_string(),
            after: after.id.to_string(),
        });
    }
    if before.owner != after.owner {
        return Err(InvariantViolation::OwnerChanged);
    }
    if before.created_at != after.created_at {
        return Err(InvariantViolation::CreatedAtChanged);
    }
    if after.phase < before.phase && !allow_phase_reset {
        return Err(InvariantViolation::PhaseRegressed {
            from: before.phase,
            to: after.phase,
        });
    }
    if !is_prefix(&before.conversation, &after.conversation) {
        return Err(InvariantViolation::ConversationRewritten);
    }
    if !is_prefix(&before.notes, &after.notes) {
        return Err(InvariantViolation::NotesRewritten);
    }
    validate(after)
}

fn is_prefix<T: PartialEq>(before: &[T], after: &[T]) -> bool {
    after.len() >= before.len() && after[..before.len()] == *before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConversationTurn, ProjectId, TeamMember, TurnRole};

    fn project() -> Project {
        Project::new(ProjectId::from("p1"), "alice", "Parser")
    }

    #[test]
    fn fresh_project_is_valid() {
        assert_eq!(validate(&project()), Ok(()));
    }

    #[test]
    fn rejects_phase_regression_unless_reset() {
        let mut before = project();
        before.phase = Phase::Design;
        let mut after = before.clone();
        after.phase = Phase::Discovery;

        assert!(matches!(
            verify_mutation(&before, &after, false),
            Err(InvariantViolation::PhaseRegressed { .. })
        ));
        assert_eq!(verify_mutation(&before, &after, true), Ok(()));
    }

    #[test]
    fn rejects_rewritten_conversation() {
        let mut before = project();
        before
            .conversation
            .push(ConversationTurn::new(TurnRole::Assistant, "What problem?"));
        let mut after = before.clone();
        after.conversation[0].content = "edited".to_string();

        assert_eq!(
            verify_mutation(&before, &after, false),
            Err(InvariantViolation::ConversationRewritten)
        );

        let mut truncated = before.clone();
        truncated.conversation.clear();
        assert_eq!(
            verify_mutation(&before, &truncated, false),
            Err(InvariantViolation::ConversationRewritten)
        );
    }

    #[test]
    fn rejects_duplicate_members() {
        let mut p = project();
        p.team.push(TeamMember {
            user: "alice".to_string(),
            role: TeamRole::Viewer,
            joined_at: p.created_at,
        });
        assert_eq!(
            validate(&p),
            Err(InvariantViolation::DuplicateMember("alice".to_string()))
        );
    }

    #[test]
    fn rejects_owner_change() {
        let before = project();
        let mut after = before.clone();
        after.owner = "mallory".to_string();
        assert_eq!(
            verify_mutation(&before, &after, false),
            Err(InvariantViolation::OwnerChanged)
        );
    }
}
