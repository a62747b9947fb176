use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A note an agent recorded against a project, such as a code review summary.
///
/// Notes are append-only, like the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectNote {
    /// The agent (or user) that wrote the note.
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl ProjectNote {
    pub fn new(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}
