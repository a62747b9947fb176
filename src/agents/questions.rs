use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{Agent, AgentContext, AgentError, AgentOutcome, AgentRequest};
use crate::models::{ConversationTurn, Phase, Project, TurnRole};

pub const ASK_QUESTION: &str = "ask-question";
pub const ANSWER: &str = "answer";
pub const QUEUE_QUESTION: &str = "queue-question";

const DISCOVERY_QUESTIONS: &[&str] = &[
    "What problem does {name} solve, and for whom?",
    "How would you know {name} succeeded? What would you measure?",
    "What do people do today without {name}?",
    "Which requirement would you cut first if time ran out, and why?",
];

const DESIGN_QUESTIONS: &[&str] = &[
    "What are the main components of {name}, and how do they talk to each other?",
    "Which part of the design are you least sure about?",
    "What data does {name} keep, and who owns it?",
    "Where could {name} fail, and how would a user notice?",
];

const IMPLEMENTATION_QUESTIONS: &[&str] = &[
    "Which piece of {name} are you building first, and why that one?",
    "How are you testing the code you wrote today?",
    "What did the last bug you fixed teach you about the design?",
    "Which part of the code would a new teammate find hardest to read?",
];

const DELIVERY_QUESTIONS: &[&str] = &[
    "How will {name} be deployed, and how do you roll it back?",
    "What would you monitor in the first week after release?",
    "Who needs documentation, and what do they need to know first?",
    "Looking back, what would you design differently?",
];

fn question_bank(phase: Phase) -> &'static [&'static str] {
    match phase {
        Phase::Discovery => DISCOVERY_QUESTIONS,
        Phase::Design => DESIGN_QUESTIONS,
        Phase::Implementation => IMPLEMENTATION_QUESTIONS,
        Phase::Delivery => DELIVERY_QUESTIONS,
    }
}

/// Pick a question for the project's current phase that has not been asked
/// yet. When every question has been asked, cycle through the bank again.
fn generate_question(project: &Project) -> String {
    let bank = question_bank(project.phase);
    let render = |template: &str| template.replace("{name}", &project.name);
    let asked = |question: &str| {
        project
            .conversation
            .iter()
            .any(|t| t.role == TurnRole::Assistant && t.content == question)
    };

    bank.iter()
        .map(|&t| render(t))
        .find(|q| !asked(q.as_str()))
        .unwrap_or_else(|| {
            let asked_count = project
                .conversation
                .iter()
                .filter(|t| t.role == TurnRole::Assistant)
                .count();
            render(bank[asked_count % bank.len()])
        })
}

/// Socratic question generator.
pub struct QuestionAgent;

#[derive(Deserialize)]
struct AnswerInput {
    content: String,
}

#[derive(Deserialize)]
struct QueueInput {
    question: String,
}

#[async_trait]
impl Agent for QuestionAgent {
    fn name(&self) -> &'static str {
        "questions"
    }

    fn actions(&self) -> &'static [&'static str] {
        &[ASK_QUESTION, ANSWER, QUEUE_QUESTION]
    }

    async fn handle(
        &self,
        mut project: Project,
        request: &AgentRequest,
        _ctx: &AgentContext,
    ) -> Result<AgentOutcome, AgentError> {
        match request.action.as_str() {
            ASK_QUESTION => {
                let (question, source) = match project.pending_questions.pop_front() {
                    Some(queued) => (queued, "queue"),
                    None => (generate_question(&project), "generated"),
                };
                project
                    .conversation
                    .push(ConversationTurn::new(TurnRole::Assistant, question.clone()));
                Ok(AgentOutcome::new(
                    json!({
                        "question": question,
                        "source": source,
                        "pending": project.pending_questions.len(),
                    }),
                    project,
                ))
            }
            ANSWER => {
                let input: AnswerInput = request.parse()?;
                if input.content.trim().is_empty() {
                    return Err(request.invalid("content must not be empty"));
                }
                project
                    .conversation
                    .push(ConversationTurn::new(TurnRole::User, input.content));
                Ok(AgentOutcome::new(
                    json!({ "turns": project.conversation.len() }),
                    project,
                ))
            }
            QUEUE_QUESTION => {
                let input: QueueInput = request.parse()?;
                if input.question.trim().is_empty() {
                    return Err(request.invalid("question must not be empty"));
                }
                project.pending_questions.push_back(input.question);
                Ok(AgentOutcome::new(
                    json!({ "pending": project.pending_questions.len() }),
                    project,
                ))
            }
            other => Err(request.invalid(format!("{other} is not a question action"))),
        }
    }
}
