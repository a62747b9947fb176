use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::conversation::ConversationTurn;
use super::knowledge::KnowledgeDocument;
use super::maturity::Maturity;
use super::note::ProjectNote;
use super::team::{TeamMember, TeamRole};

/// Opaque, globally unique project identifier.
///
/// Generated identifiers are UUID v4 strings, but callers may bring their own
/// (e.g. `"p1"`). Once a project row exists its identifier is never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The tutoring phase a project is in.
///
/// Phases are ordered: `Discovery < Design < Implementation < Delivery`.
/// A project only moves forward unless it is explicitly reset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discovery,
    Design,
    Implementation,
    Delivery,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Self::Discovery,
        Self::Design,
        Self::Implementation,
        Self::Delivery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Design => "design",
            Self::Implementation => "implementation",
            Self::Delivery => "delivery",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "discovery" => Some(Self::Discovery),
            "design" => Some(Self::Design),
            "implementation" => Some(Self::Implementation),
            "delivery" => Some(Self::Delivery),
            _ => None,
        }
    }

    pub fn ordinal(&self) -> u8 {
        match self {
            Self::Discovery => 0,
            Self::Design => 1,
            Self::Implementation => 2,
            Self::Delivery => 3,
        }
    }

    pub fn next(&self) -> Option<Self> {
        Self::ALL.get(self.ordinal() as usize + 1).copied()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The project aggregate.
///
/// A project is loaded, mutated and saved as one unit: the store reassembles
/// every sub-entity on load and rewrites every sub-entity on save. Nothing
/// outside the store touches `created_at`/`updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: Option<String>,
    pub owner: String,
    pub phase: Phase,
    pub requirements: Vec<String>,
    pub tech_stack: Vec<String>,
    pub constraints: Vec<String>,
    pub maturity: Maturity,
    /// Append-only, oldest turn first.
    pub conversation: Vec<ConversationTurn>,
    pub team: Vec<TeamMember>,
    /// Prompts queued for the question generator, consumed front first.
    pub pending_questions: VecDeque<String>,
    pub knowledge_documents: Vec<KnowledgeDocument>,
    pub notes: Vec<ProjectNote>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Build a fresh aggregate in the discovery phase with the owner as the
    /// only team member. Timestamps are placeholders until the store stamps
    /// them on `create`.
    pub fn new(id: ProjectId, owner: impl Into<String>, name: impl Into<String>) -> Self {
        let owner = owner.into();
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            description: None,
            team: vec![TeamMember {
                user: owner.clone(),
                role: TeamRole::Owner,
                joined_at: now,
            }],
            owner,
            phase: Phase::Discovery,
            requirements: Vec::new(),
            tech_stack: Vec::new(),
            constraints: Vec::new(),
            maturity: Maturity::default(),
            conversation: Vec::new(),
            pending_questions: VecDeque::new(),
            knowledge_documents: Vec::new(),
            notes: Vec::new(),
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn member(&self, user: &str) -> Option<&TeamMember> {
        self.team.iter().find(|m| m.user == user)
    }

    pub fn document(&self, id: &str) -> Option<&KnowledgeDocument> {
        self.knowledge_documents.iter().find(|d| d.id == id)
    }

    /// Total bytes held by knowledge documents, as accounted for quotas.
    pub fn storage_bytes(&self) -> u64 {
        self.knowledge_documents.iter().map(|d| d.size_bytes).sum()
    }
}

/// Caller-supplied fields for creating a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProject {
    /// Explicit identifier. A fresh UUID is generated when absent.
    pub id: Option<ProjectId>,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub tech_stack: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// Lightweight listing row for owner/member queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: ProjectId,
    pub name: String,
    pub owner: String,
    pub phase: Phase,
    pub archived: bool,
    /// The queried user's team role. Only set by member listings.
    pub role: Option<TeamRole>,
    pub updated_at: DateTime<Utc>,
}

/// Read-only knowledge storage accounting for one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSummary {
    pub document_count: u64,
    pub total_bytes: u64,
}
