//! Persistence and orchestration core for Socratic tutoring projects.
//!
//! A project aggregate is loaded from a [`db`] store, mutated by exactly one
//! [`agents`] handler and saved back whole by the [`orchestrator`]. The store
//! comes in a blocking and an async flavour sharing one schema.

pub mod agents;
pub mod config;
pub mod db;
pub mod error;
pub mod knowledge;
pub mod lifecycle;
pub mod models;
pub mod orchestrator;
pub mod provider;

pub use error::{CoreError, Result};
pub use orchestrator::{Execution, Orchestrator};
