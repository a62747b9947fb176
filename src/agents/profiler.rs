use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{Agent, AgentContext, AgentError, AgentOutcome, AgentRequest};
use crate::models::{Phase, Project, TurnRole, MAX_SCORE};

pub const UPDATE_MATURITY: &str = "update-maturity";
pub const ASSESS_MATURITY: &str = "assess-maturity";

/// Learner profiler: the only agent that writes maturity scores.
pub struct LearnerProfilerAgent;

#[derive(Deserialize)]
struct UpdateInput {
    phase: Option<Phase>,
    scores: BTreeMap<String, f64>,
}

/// Linear score capped at the maximum: `per_item` points per item.
fn scaled(items: usize, per_item: f64) -> f64 {
    (items as f64 * per_item).min(MAX_SCORE)
}

/// Derive scores for the project's current phase from what the project
/// contains so far.
fn assess(project: &Project) -> BTreeMap<String, f64> {
    let answers = project
        .conversation
        .iter()
        .filter(|t| t.role == TurnRole::User)
        .count();
    let documents = project.knowledge_documents.len();

    let mut scores = BTreeMap::new();
    scores.insert("engagement".to_string(), scaled(answers, 10.0));
    match project.phase {
        Phase::Discovery => {
            scores.insert(
                "problem_definition".to_string(),
                scaled(project.requirements.len(), 20.0),
            );
            scores.insert(
                "constraints".to_string(),
                scaled(project.constraints.len(), 25.0),
            );
        }
        Phase::Design => {
            scores.insert(
                "architecture".to_string(),
                scaled(project.tech_stack.len(), 20.0),
            );
            scores.insert("documentation".to_string(), scaled(documents, 25.0));
        }
        Phase::Implementation => {
            let reviews: Vec<_> = project
                .notes
                .iter()
                .filter(|n| n.author == "code-validator")
                .collect();
            let clean = reviews.iter().filter(|n| n.body.contains(": 0 errors")).count();
            let quality = if reviews.is_empty() {
                0.0
            } else {
                clean as f64 / reviews.len() as f64 * MAX_SCORE
            };
            scores.insert("code_quality".to_string(), quality);
            scores.insert("practice".to_string(), scaled(reviews.len(), 10.0));
        }
        Phase::Delivery => {
            scores.insert("documentation".to_string(), scaled(documents, 25.0));
            let earlier: Vec<f64> = Phase::ALL
                .iter()
                .filter(|p| **p < Phase::Delivery)
                .filter_map(|p| project.maturity.phase_average(*p))
                .collect();
            let completeness = if earlier.is_empty() {
                0.0
            } else {
                earlier.iter().sum::<f64>() / earlier.len() as f64
            };
            scores.insert("completeness".to_string(), completeness);
        }
    }
    scores
}

#[async_trait]
impl Agent for LearnerProfilerAgent {
    fn name(&self) -> &'static str {
        "learner-profiler"
    }

    fn actions(&self) -> &'static [&'static str] {
        &[UPDATE_MATURITY, ASSESS_MATURITY]
    }

    async fn handle(
        &self,
        mut project: Project,
        request: &AgentRequest,
        _ctx: &AgentContext,
    ) -> Result<AgentOutcome, AgentError> {
        let (phase, scores) = match request.action.as_str() {
            UPDATE_MATURITY => {
                let input: UpdateInput = request.parse()?;
                if input.scores.is_empty() {
                    return Err(request.invalid("scores must not be empty"));
                }
                if input.scores.keys().any(|c| c.trim().is_empty()) {
                    return Err(request.invalid("category must not be empty"));
                }
                (input.phase.unwrap_or(project.phase), input.scores)
            }
            ASSESS_MATURITY => (project.phase, assess(&project)),
            other => return Err(request.invalid(format!("{other} is not a profiler action"))),
        };

        // All or nothing: a single bad score leaves the maturity untouched.
        let mut maturity = project.maturity.clone();
        for (category, score) in &scores {
            maturity.set(phase, category.as_str(), *score)?;
        }
        project.maturity = maturity;

        Ok(AgentOutcome::new(
            json!({
                "phase": phase,
                "scores": scores,
                "average": project.maturity.phase_average(phase),
            }),
            project,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConversationTurn, ProjectId};
    use serde_json::Value;

    async fn run(project: Project, action: &str, payload: Value) -> Result<AgentOutcome, AgentError> {
        LearnerProfilerAgent
            .handle(project, &AgentRequest::new(action, payload), &AgentContext::default())
            .await
    }

    #[tokio::test]
    async fn update_writes_scores_for_current_phase() {
        let project = Project::new(ProjectId::from("p1"), "alice", "Parser");
        let outcome = run(project, UPDATE_MATURITY, json!({ "scores": { "goals": 40.0 } }))
            .await
            .unwrap();
        assert_eq!(outcome.project.maturity.get(Phase::Discovery, "goals"), Some(40.0));
    }

    #[tokio::test]
    async fn one_out_of_range_score_rejects_the_whole_update() {
        let project = Project::new(ProjectId::from("p1"), "alice", "Parser");
        let err = run(
            project,
            UPDATE_MATURITY,
            json!({ "phase": "design", "scores": { "a": 50.0, "b": 100.5 } }),
        )
        .await
        .unwrap_err();
        match err {
            AgentError::ScoreOutOfRange(e) => {
                assert_eq!(e.category, "b");
                assert_eq!(e.phase, Phase::Design);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn assessment_reflects_project_content() {
        let mut project = Project::new(ProjectId::from("p1"), "alice", "Parser");
        project.requirements = vec!["parse".into(), "report errors".into()];
        project
            .conversation
            .push(ConversationTurn::new(TurnRole::User, "an answer"));

        let outcome = run(project, ASSESS_MATURITY, Value::Null).await.unwrap();
        let maturity = &outcome.project.maturity;
        assert_eq!(maturity.get(Phase::Discovery, "problem_definition"), Some(40.0));
        assert_eq!(maturity.get(Phase::Discovery, "engagement"), Some(10.0));
        assert!(maturity.is_within_bounds());
    }
}
