//! Orchestrator integration tests.
//!
//! Tests are organized by concern:
//! - scenario: the end-to-end project walkthrough, on both store variants
//! - failures: what each failure leaves behind in storage
//! - knowledge: index refresh after saves

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use socratic::agents::{AgentError, AgentRegistry, AgentSettings};
use socratic::db::{
    AsyncDatabase, AsyncProjectStore, BlockingBridge, Database, PoolSettings,
};
use socratic::error::{CoreError, Result};
use socratic::knowledge::KnowledgeIndex;
use socratic::models::*;
use socratic::Orchestrator;
use tempfile::TempDir;

fn registry() -> AgentRegistry {
    AgentRegistry::standard(&AgentSettings::default(), Vec::new())
}

fn blocking_store(dir: &TempDir) -> Arc<dyn AsyncProjectStore> {
    let db = Database::open(dir.path().join("blocking.db")).expect("Failed to open database");
    db.ensure_schema().expect("Failed to apply schema");
    Arc::new(BlockingBridge::new(db))
}

async fn pooled_store(dir: &TempDir) -> Arc<dyn AsyncProjectStore> {
    let db = AsyncDatabase::open(&dir.path().join("pooled.db"), PoolSettings::default())
        .await
        .expect("Failed to open pooled database");
    Arc::new(db)
}

/// Helper to create the scenario project "p1" owned by alice.
async fn create_p1(orchestrator: &Orchestrator) -> ProjectId {
    orchestrator
        .create_project(
            "alice",
            NewProject {
                id: Some(ProjectId::from("p1")),
                name: "Interpreter".to_string(),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to create project")
}

// ============================================================
// Scenario
// ============================================================

mod scenario {
    use super::*;

    async fn walkthrough(store: Arc<dyn AsyncProjectStore>) {
        let orchestrator = Orchestrator::new(store.clone(), registry());
        let id = create_p1(&orchestrator).await;

        let loaded = store.load(&id).await.unwrap();
        assert_eq!(loaded.phase, Phase::Discovery);
        assert!(loaded.conversation.is_empty());
        assert_eq!(loaded.owner, "alice");

        let asked = orchestrator
            .execute(&id, "ask-question", Value::Null)
            .await
            .unwrap();
        assert_eq!(asked.project.conversation.len(), 1);
        assert!(asked.project.pending_questions.len() <= loaded.pending_questions.len());

        let advanced = orchestrator
            .execute(&id, "advance-phase", json!({ "target": "design" }))
            .await
            .unwrap();
        assert_eq!(advanced.project.phase, Phase::Design);

        let backwards = orchestrator
            .execute(&id, "advance-phase", json!({ "target": "discovery" }))
            .await;
        assert!(matches!(
            backwards,
            Err(CoreError::Agent(AgentError::InvalidTransition { .. }))
        ));

        orchestrator.execute(&id, "archive", Value::Null).await.unwrap();
        let rejected = orchestrator.execute(&id, "ask-question", Value::Null).await;
        assert!(matches!(
            rejected,
            Err(CoreError::Agent(AgentError::Archived(_)))
        ));

        orchestrator.execute(&id, "restore", Value::Null).await.unwrap();
        let resumed = orchestrator
            .execute(&id, "ask-question", Value::Null)
            .await
            .unwrap();
        assert_eq!(resumed.project.conversation.len(), 2);

        let stored = store.load(&id).await.unwrap();
        assert_eq!(stored, resumed.project);
        assert_eq!(stored.phase, Phase::Design);
        assert!(!stored.archived);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn walkthrough_on_blocking_store() {
        let dir = tempfile::tempdir().unwrap();
        walkthrough(blocking_store(&dir)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn walkthrough_on_pooled_store() {
        let dir = tempfile::tempdir().unwrap();
        walkthrough(pooled_store(&dir).await).await;
    }

    #[tokio::test]
    async fn explicit_reset_moves_phase_back() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(pooled_store(&dir).await, registry());
        let id = create_p1(&orchestrator).await;

        orchestrator
            .execute(&id, "advance-phase", json!({ "target": "implementation" }))
            .await
            .unwrap();
        let reset = orchestrator
            .execute(&id, "reset-phase", json!({ "target": "discovery" }))
            .await
            .unwrap();
        assert_eq!(reset.project.phase, Phase::Discovery);
    }

    #[tokio::test]
    async fn created_project_ids_are_generated_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(pooled_store(&dir).await, registry());
        let id = orchestrator
            .create_project(
                "alice",
                NewProject {
                    name: "Untitled".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(uuid::Uuid::parse_str(id.as_str()).is_ok());

        let duplicate = orchestrator
            .create_project(
                "bob",
                NewProject {
                    id: Some(id.clone()),
                    name: "Clash".to_string(),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(duplicate, Err(CoreError::DuplicateId(_))));
    }
}

// ============================================================
// Failures
// ============================================================

mod failures {
    use super::*;

    /// Delegates to a real store but refuses every save.
    struct FailingSave {
        inner: Arc<dyn AsyncProjectStore>,
    }

    #[async_trait]
    impl AsyncProjectStore for FailingSave {
        async fn create(&self, project: &Project) -> Result<Project> {
            self.inner.create(project).await
        }
        async fn load(&self, id: &ProjectId) -> Result<Project> {
            self.inner.load(id).await
        }
        async fn save(&self, _project: &Project) -> Result<Project> {
            Err(CoreError::Pool("disk unplugged".to_string()))
        }
        async fn archive(&self, id: &ProjectId) -> Result<()> {
            self.inner.archive(id).await
        }
        async fn restore(&self, id: &ProjectId) -> Result<()> {
            self.inner.restore(id).await
        }
        async fn list_by_owner(&self, owner: &str) -> Result<Vec<ProjectSummary>> {
            self.inner.list_by_owner(owner).await
        }
        async fn list_by_member(&self, user: &str) -> Result<Vec<ProjectSummary>> {
            self.inner.list_by_member(user).await
        }
        async fn count_owned(&self, owner: &str) -> Result<u64> {
            self.inner.count_owned(owner).await
        }
        async fn storage_summary(&self, id: &ProjectId) -> Result<StorageSummary> {
            self.inner.storage_summary(id).await
        }
        async fn storage_used_by_owner(&self, owner: &str) -> Result<u64> {
            self.inner.storage_used_by_owner(owner).await
        }
    }

    #[tokio::test]
    async fn missing_project_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(pooled_store(&dir).await, registry());

        let result = orchestrator
            .execute(&ProjectId::from("nope"), "ask-question", Value::Null)
            .await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn unknown_action_is_unsupported_and_mutates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = pooled_store(&dir).await;
        let orchestrator = Orchestrator::new(store.clone(), registry());
        let id = create_p1(&orchestrator).await;
        let before = store.load(&id).await.unwrap();

        let result = orchestrator.execute(&id, "fly", Value::Null).await;
        assert!(matches!(result, Err(CoreError::UnsupportedAction(a)) if a == "fly"));
        assert_eq!(store.load(&id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn agent_failure_discards_the_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let store = pooled_store(&dir).await;
        let orchestrator = Orchestrator::new(store.clone(), registry());
        let id = create_p1(&orchestrator).await;
        let before = store.load(&id).await.unwrap();

        let result = orchestrator
            .execute(&id, "answer", json!({ "wrong": "shape" }))
            .await;
        assert!(matches!(
            result,
            Err(CoreError::Agent(AgentError::InvalidPayload { .. }))
        ));
        assert!(!result.unwrap_err().is_retryable());
        assert_eq!(store.load(&id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn out_of_range_maturity_is_rejected_before_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let store = pooled_store(&dir).await;
        let orchestrator = Orchestrator::new(store.clone(), registry());
        let id = create_p1(&orchestrator).await;

        let result = orchestrator
            .execute(
                &id,
                "update-maturity",
                json!({ "scores": { "goals": 60.0, "scope": 101.0 } }),
            )
            .await;
        assert!(matches!(
            result,
            Err(CoreError::Agent(AgentError::ScoreOutOfRange(_)))
        ));
        assert!(store.load(&id).await.unwrap().maturity.is_empty());

        let accepted = orchestrator
            .execute(&id, "update-maturity", json!({ "scores": { "goals": 100.0 } }))
            .await
            .unwrap();
        assert_eq!(
            accepted.project.maturity.get(Phase::Discovery, "goals"),
            Some(100.0)
        );
    }

    #[tokio::test]
    async fn save_failure_is_retryable_persistence_failure() {
        let dir = tempfile::tempdir().unwrap();
        let inner = pooled_store(&dir).await;
        let orchestrator = Orchestrator::new(
            Arc::new(FailingSave {
                inner: inner.clone(),
            }),
            registry(),
        );
        let id = create_p1(&orchestrator).await;

        let err = orchestrator
            .execute(&id, "ask-question", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PersistenceFailed(_)));
        assert!(err.is_retryable());
        assert!(inner.load(&id).await.unwrap().conversation.is_empty());
    }
}

// ============================================================
// Knowledge
// ============================================================

mod knowledge {
    use super::*;

    #[tokio::test]
    async fn saved_documents_are_searchable_through_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = pooled_store(&dir).await;
        let index = Arc::new(KnowledgeIndex::open(dir.path().join("pooled.db")).unwrap());
        let orchestrator = Orchestrator::new(store, registry()).with_index(index.clone());
        let id = create_p1(&orchestrator).await;

        let added = orchestrator
            .execute(
                &id,
                "add-document",
                json!({
                    "id": "scoping",
                    "title": "Lexical scoping",
                    "content": "closures capture variables from the enclosing environment",
                }),
            )
            .await
            .unwrap();
        assert!(!added.index_stale);
        assert_eq!(index.document_count().unwrap(), 1);

        let found = orchestrator
            .execute(&id, "search-knowledge", json!({ "query": "closures environment" }))
            .await
            .unwrap();
        assert_eq!(found.response["hits"][0]["document_id"], "scoping");

        let summary = orchestrator.store().storage_summary(&id).await.unwrap();
        assert_eq!(summary.document_count, 1);
    }

    #[tokio::test]
    async fn closed_index_marks_execution_stale_but_still_saves() {
        let dir = tempfile::tempdir().unwrap();
        let store = pooled_store(&dir).await;
        let index = Arc::new(KnowledgeIndex::open(dir.path().join("pooled.db")).unwrap());
        let orchestrator =
            Orchestrator::new(store.clone(), registry()).with_index(index.clone());
        let id = create_p1(&orchestrator).await;
        index.close().unwrap();

        let execution = orchestrator
            .execute(&id, "queue-question", json!({ "question": "Why?" }))
            .await
            .unwrap();
        assert!(execution.index_stale);
        assert_eq!(store.load(&id).await.unwrap().pending_questions.len(), 1);
    }
}
