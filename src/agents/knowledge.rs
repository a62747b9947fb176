use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{Agent, AgentContext, AgentError, AgentOutcome, AgentRequest};
use crate::knowledge::SearchHit;
use crate::models::{DocumentBody, KnowledgeDocument, Project};

pub const ADD_DOCUMENT: &str = "add-document";
pub const REMOVE_DOCUMENT: &str = "remove-document";
pub const SEARCH_KNOWLEDGE: &str = "search-knowledge";

const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Knowledge manager: keeps the document list and its size bookkeeping.
pub struct KnowledgeAgent {
    max_document_bytes: u64,
}

impl KnowledgeAgent {
    pub fn new(max_document_bytes: u64) -> Self {
        Self { max_document_bytes }
    }
}

#[derive(Deserialize)]
struct AddInput {
    id: Option<String>,
    title: String,
    content: Option<String>,
    reference: Option<String>,
    size_bytes: Option<u64>,
}

#[derive(Deserialize)]
struct RemoveInput {
    id: String,
}

#[derive(Deserialize)]
struct SearchInput {
    query: String,
    limit: Option<usize>,
}

impl KnowledgeAgent {
    fn build_document(
        &self,
        request: &AgentRequest,
        input: AddInput,
    ) -> Result<KnowledgeDocument, AgentError> {
        if input.title.trim().is_empty() {
            return Err(request.invalid("title must not be empty"));
        }
        let (body, size_bytes) = match (input.content, input.reference) {
            (Some(content), None) => {
                let size = content.len() as u64;
                if input.size_bytes.is_some_and(|declared| declared != size) {
                    return Err(request.invalid("size_bytes does not match content length"));
                }
                (DocumentBody::Inline(content), size)
            }
            (None, Some(reference)) => {
                let size = input
                    .size_bytes
                    .ok_or_else(|| request.invalid("referenced documents need size_bytes"))?;
                (DocumentBody::Reference(reference), size)
            }
            _ => {
                return Err(request.invalid("exactly one of content or reference is required"));
            }
        };
        // Sizes are stored as SQLite integers.
        if size_bytes > self.max_document_bytes || i64::try_from(size_bytes).is_err() {
            return Err(AgentError::Rejected(format!(
                "document is {size_bytes} bytes, the limit is {}",
                self.max_document_bytes
            )));
        }
        Ok(KnowledgeDocument {
            id: input
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            title: input.title,
            size_bytes,
            body,
        })
    }
}

#[async_trait]
impl Agent for KnowledgeAgent {
    fn name(&self) -> &'static str {
        "knowledge"
    }

    fn actions(&self) -> &'static [&'static str] {
        &[ADD_DOCUMENT, REMOVE_DOCUMENT, SEARCH_KNOWLEDGE]
    }

    async fn handle(
        &self,
        mut project: Project,
        request: &AgentRequest,
        ctx: &AgentContext,
    ) -> Result<AgentOutcome, AgentError> {
        match request.action.as_str() {
            ADD_DOCUMENT => {
                let input: AddInput = request.parse()?;
                let doc = self.build_document(request, input)?;
                if project.document(&doc.id).is_some() {
                    return Err(AgentError::Rejected(format!(
                        "document {} already exists",
                        doc.id
                    )));
                }
                let (id, size_bytes) = (doc.id.clone(), doc.size_bytes);
                project.knowledge_documents.push(doc);
                Ok(AgentOutcome::new(
                    json!({
                        "id": id,
                        "size_bytes": size_bytes,
                        "total_bytes": project.storage_bytes(),
                    }),
                    project,
                ))
            }
            REMOVE_DOCUMENT => {
                let input: RemoveInput = request.parse()?;
                let before = project.knowledge_documents.len();
                project.knowledge_documents.retain(|d| d.id != input.id);
                if project.knowledge_documents.len() == before {
                    return Err(AgentError::Rejected(format!(
                        "document {} does not exist",
                        input.id
                    )));
                }
                Ok(AgentOutcome::new(
                    json!({ "id": input.id, "total_bytes": project.storage_bytes() }),
                    project,
                ))
            }
            SEARCH_KNOWLEDGE => {
                let input: SearchInput = request.parse()?;
                let limit = input.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
                let indexed = ctx
                    .index
                    .as_ref()
                    .map(|index| index.search(&project.id, &input.query, limit));
                let hits = match indexed {
                    Some(Ok(hits)) => hits,
                    Some(Err(e)) => {
                        tracing::warn!("Knowledge index unavailable, scanning documents: {}", e);
                        scan(&project, &input.query, limit)
                    }
                    None => scan(&project, &input.query, limit),
                };
                Ok(AgentOutcome::new(json!({ "hits": hits }), project))
            }
            other => Err(request.invalid(format!("{other} is not a knowledge action"))),
        }
    }
}

/// Case-insensitive substring match over titles and inline content.
fn scan(project: &Project, query: &str, limit: usize) -> Vec<SearchHit> {
    let needle = query.to_lowercase();
    project
        .knowledge_documents
        .iter()
        .filter(|d| {
            d.title.to_lowercase().contains(&needle)
                || d.body
                    .content()
                    .is_some_and(|c| c.to_lowercase().contains(&needle))
        })
        .take(limit)
        .map(|d| SearchHit {
            document_id: d.id.clone(),
            title: d.title.clone(),
            score: 1.0,
        })
        .collect()
}
