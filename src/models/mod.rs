//! Domain models for the Socratic project core.
//!
//! # Core Concepts
//!
//! - [`Project`]: the aggregate. Loaded, mutated by one agent, and saved as a
//!   whole. Its sub-entities live in separate tables but never outside it.
//! - [`ConversationTurn`]: append-only Socratic dialogue.
//! - [`TeamMember`]: at most one entry per user, roles ordered by [`TeamRole`].
//! - [`Maturity`]: bounded per-phase, per-category scores.
//! - [`KnowledgeDocument`]: knowledge base entries, sized for quota accounting.
//! - [`ProjectNote`]: append-only notes written by agents.
//!
//! Aggregate rules are enforced by [`invariants`].

mod conversation;
pub mod invariants;
mod knowledge;
mod maturity;
mod note;
mod project;
mod team;

pub use conversation::*;
pub use knowledge::*;
pub use maturity::*;
pub use note::*;
pub use project::*;
pub use team::*;
