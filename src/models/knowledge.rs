use serde::{Deserialize, Serialize};

/// A document in a project's knowledge base.
///
/// `size_bytes` is what external quota accounting reads. For inline documents
/// it always equals the content length; referenced documents carry the size
/// reported when they were registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: String,
    pub title: String,
    pub size_bytes: u64,
    pub body: DocumentBody,
}

/// Where a document's content lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum DocumentBody {
    /// Content stored alongside the project.
    Inline(String),
    /// Content kept elsewhere (object storage key, URL).
    Reference(String),
}

impl DocumentBody {
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Inline(content) => Some(content),
            Self::Reference(_) => None,
        }
    }

    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::Inline(_) => None,
            Self::Reference(reference) => Some(reference),
        }
    }
}
