//! Store contract tests.
//!
//! Every check runs against both store variants:
//! - blocking: `Database` driven through `BlockingBridge`
//! - pooled: `AsyncDatabase` over the connection pool
//!
//! Both use file-backed databases in a temporary directory.

use std::sync::Arc;

use socratic::db::{AsyncDatabase, AsyncProjectStore, BlockingBridge, Database, PoolSettings};
use socratic::error::CoreError;
use socratic::models::*;
use tempfile::TempDir;

type Store = Arc<dyn AsyncProjectStore>;

fn blocking_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db = Database::open(dir.path().join("blocking.db")).expect("Failed to open database");
    db.ensure_schema().expect("Failed to apply schema");
    (dir, Arc::new(BlockingBridge::new(db)))
}

async fn pooled_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db = AsyncDatabase::open(&dir.path().join("pooled.db"), PoolSettings::default())
        .await
        .expect("Failed to open pooled database");
    (dir, Arc::new(db))
}

/// A project with every relation populated. Unless bob owns it, bob is an
/// editor on it.
fn full_project(id: &str, owner: &str) -> Project {
    let mut project = Project::new(ProjectId::from(id), owner, "Interpreter");
    project.description = Some("A tree-walking interpreter".into());
    project.requirements = vec!["parse".into(), "evaluate".into()];
    project.tech_stack = vec!["rust".into(), "sqlite".into()];
    project.constraints = vec!["no unsafe".into()];
    project.phase = Phase::Design;
    project
        .conversation
        .push(ConversationTurn::new(TurnRole::Assistant, "What is an AST?"));
    project
        .conversation
        .push(ConversationTurn::new(TurnRole::User, "A tree of the program."));
    project.pending_questions.push_back("How do you handle scope?".into());
    project.pending_questions.push_back("What about closures?".into());
    project.maturity.set(Phase::Discovery, "goals", 80.0).unwrap();
    project.maturity.set(Phase::Design, "architecture", 35.5).unwrap();
    if owner != "bob" {
        project.team.push(TeamMember {
            user: "bob".into(),
            role: TeamRole::Editor,
            joined_at: chrono::Utc::now(),
        });
    }
    project.knowledge_documents.push(KnowledgeDocument {
        id: "grammar".into(),
        title: "Grammar".into(),
        size_bytes: 7,
        body: DocumentBody::Inline("expr ::".into()),
    });
    project.knowledge_documents.push(KnowledgeDocument {
        id: "book".into(),
        title: "Crafting Interpreters".into(),
        size_bytes: 1_000_000,
        body: DocumentBody::Reference("https://example.org/book.pdf".into()),
    });
    project
        .notes
        .push(ProjectNote::new("code-validator", "Validated 3 lines"));
    project
}

async fn round_trip_is_lossless(store: Store) {
    let created = store.create(&full_project("p1", "alice")).await.unwrap();
    let loaded = store.load(&created.id).await.unwrap();
    assert_eq!(loaded, created);

    let saved = store.save(&loaded).await.unwrap();
    let reloaded = store.load(&created.id).await.unwrap();
    assert_eq!(reloaded, saved);

    // Only the store-maintained timestamp moves on a no-op save.
    let mut expected = created.clone();
    expected.updated_at = reloaded.updated_at;
    assert_eq!(reloaded, expected);
}

async fn save_fully_replaces_children(store: Store) {
    let mut project = store.create(&full_project("p1", "alice")).await.unwrap();
    project.requirements = vec!["evaluate".into()];
    project.tech_stack.clear();
    project.pending_questions.pop_front();
    project.team.retain(|m| m.user != "bob");
    project.knowledge_documents.truncate(1);
    project.maturity = Maturity::default();

    store.save(&project).await.unwrap();
    let loaded = store.load(&project.id).await.unwrap();

    assert_eq!(loaded.requirements, vec!["evaluate".to_string()]);
    assert!(loaded.tech_stack.is_empty());
    assert_eq!(loaded.pending_questions.len(), 1);
    assert_eq!(loaded.team.len(), 1);
    assert_eq!(loaded.knowledge_documents.len(), 1);
    assert!(loaded.maturity.is_empty());
}

async fn missing_projects_are_not_found(store: Store) {
    let id = ProjectId::from("missing");
    assert!(matches!(store.load(&id).await, Err(CoreError::NotFound(_))));
    assert!(matches!(store.archive(&id).await, Err(CoreError::NotFound(_))));
    assert!(matches!(
        store.save(&full_project("missing", "alice")).await,
        Err(CoreError::NotFound(_))
    ));
    assert!(matches!(
        store.storage_summary(&id).await,
        Err(CoreError::NotFound(_))
    ));
}

async fn concurrent_duplicate_create_has_one_winner(store: Store) {
    let a = full_project("race", "alice");
    let b = full_project("race", "bob");
    let (first, second) = futures::join!(store.create(&a), store.create(&b));

    let results = [first, second];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let dups = results
        .iter()
        .filter(|r| matches!(r, Err(CoreError::DuplicateId(_))))
        .count();
    assert_eq!((wins, dups), (1, 1));
}

async fn archive_and_restore_toggle_flag(store: Store) {
    let created = store.create(&full_project("p1", "alice")).await.unwrap();

    store.archive(&created.id).await.unwrap();
    assert!(store.load(&created.id).await.unwrap().archived);
    assert_eq!(store.count_owned("alice").await.unwrap(), 0);

    store.restore(&created.id).await.unwrap();
    assert!(!store.load(&created.id).await.unwrap().archived);
    assert_eq!(store.count_owned("alice").await.unwrap(), 1);

    store.delete(&created.id).await.unwrap();
    assert!(store.load(&created.id).await.unwrap().archived);
}

async fn ownership_and_membership_stay_separate(store: Store) {
    store.create(&full_project("a1", "alice")).await.unwrap();
    store.create(&full_project("a2", "alice")).await.unwrap();
    store.create(&full_project("b1", "bob")).await.unwrap();

    let owned: Vec<_> = store
        .list_by_owner("bob")
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id.to_string())
        .collect();
    assert_eq!(owned, vec!["b1".to_string()]);

    let mut member: Vec<_> = store
        .list_by_member("bob")
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id.to_string())
        .collect();
    member.sort();
    assert_eq!(member, vec!["a1".to_string(), "a2".to_string()]);

    assert_eq!(store.count_owned("bob").await.unwrap(), 1);
    assert_eq!(store.count_owned("alice").await.unwrap(), 2);
    assert_eq!(store.count_owned("carol").await.unwrap(), 0);
}

async fn storage_accounting(store: Store) {
    let created = store.create(&full_project("p1", "alice")).await.unwrap();
    store.create(&full_project("p2", "alice")).await.unwrap();

    let summary = store.storage_summary(&created.id).await.unwrap();
    assert_eq!(
        summary,
        StorageSummary {
            document_count: 2,
            total_bytes: 1_000_007
        }
    );
    assert_eq!(store.storage_used_by_owner("alice").await.unwrap(), 2_000_014);
    // Membership never contributes to usage.
    assert_eq!(store.storage_used_by_owner("bob").await.unwrap(), 0);
}

/// A load racing a stream of saves sees each save whole or not at all.
async fn loads_never_observe_a_partial_save(store: Store) {
    const SAVES: usize = 200;

    let created = store
        .create(&Project::new(ProjectId::from("p1"), "alice", "Snapshot"))
        .await
        .unwrap();
    let id = created.id.clone();

    let writer = {
        let store = store.clone();
        let mut project = created;
        tokio::spawn(async move {
            for round in 0..SAVES {
                let len = if round % 2 == 0 { 50 } else { 1 };
                project.requirements = (0..len).map(|i| format!("req {i}")).collect();
                project.tech_stack = (0..len).map(|i| format!("tool {i}")).collect();
                store.save(&project).await.unwrap();
            }
        })
    };

    let mut loads = 0;
    loop {
        let done = writer.is_finished();
        let loaded = store.load(&id).await.unwrap();
        assert_eq!(
            loaded.requirements.len(),
            loaded.tech_stack.len(),
            "load {loads} mixed two saves"
        );
        loads += 1;
        if done {
            break;
        }
    }
    writer.await.unwrap();
    assert!(loads > 0);
}

macro_rules! contract {
    ($variant:ident, $open:expr) => {
        mod $variant {
            use super::*;

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn round_trip_is_lossless() {
                let (_dir, store) = $open;
                super::round_trip_is_lossless(store).await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn save_fully_replaces_children() {
                let (_dir, store) = $open;
                super::save_fully_replaces_children(store).await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn missing_projects_are_not_found() {
                let (_dir, store) = $open;
                super::missing_projects_are_not_found(store).await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn concurrent_duplicate_create_has_one_winner() {
                let (_dir, store) = $open;
                super::concurrent_duplicate_create_has_one_winner(store).await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn archive_and_restore_toggle_flag() {
                let (_dir, store) = $open;
                super::archive_and_restore_toggle_flag(store).await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn ownership_and_membership_stay_separate() {
                let (_dir, store) = $open;
                super::ownership_and_membership_stay_separate(store).await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn storage_accounting() {
                let (_dir, store) = $open;
                super::storage_accounting(store).await;
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn loads_never_observe_a_partial_save() {
                let (_dir, store) = $open;
                super::loads_never_observe_a_partial_save(store).await;
            }
        }
    };
}

contract!(blocking, blocking_store());
contract!(pooled, pooled_store().await);

#[tokio::test]
async fn both_variants_build_identical_schema() {
    let dir = tempfile::tempdir().unwrap();

    let blocking = Database::open(dir.path().join("blocking.db")).unwrap();
    blocking.ensure_schema().unwrap();
    let pooled = AsyncDatabase::open(&dir.path().join("pooled.db"), PoolSettings::default())
        .await
        .unwrap();

    let blocking_ddl = blocking.describe_schema().unwrap();
    let pooled_ddl = pooled.describe_schema().await.unwrap();
    assert!(!blocking_ddl.is_empty());
    assert_eq!(blocking_ddl, pooled_ddl);
    assert!(blocking_ddl.iter().any(|ddl| ddl.contains("knowledge_documents")));
}
