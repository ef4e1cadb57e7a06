//! `SqliteStore` against a real database file.

use std::sync::Arc;
use tempfile::TempDir;

use repolens::config::DbConfig;
use repolens::sqlite_store::SqliteStore;
use repolens::{db, migrate};
use repolens_core::models::{
    ContextScope, ConversationKey, ConversationMessage, FileAnalysis, FileNode, KeyFunction,
    Layer, RepoRef, RepoStatus, Repository, RepositoryAnalysis, Role, Symbol, SymbolKind,
};
use repolens_core::store::Store;

async fn open() -> (TempDir, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let config = DbConfig {
        path: tmp.path().join("data").join("lens.sqlite"),
    };
    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    // schema creation is idempotent
    migrate::run_migrations(&pool).await.unwrap();
    (tmp, SqliteStore::new(pool))
}

async fn repo(store: &SqliteStore) -> Repository {
    let repo = Repository::new("alice", &RepoRef::new("acme", "web", "main"));
    store.insert_repository(&repo).await.unwrap()
}

fn symbol(file_id: &str, name: &str, line: u32) -> Symbol {
    Symbol {
        id: uuid::Uuid::new_v4().to_string(),
        file_id: file_id.to_string(),
        name: name.to_string(),
        kind: SymbolKind::Function,
        start_line: line,
        end_line: line + 2,
        explanation: None,
    }
}

/// Begin a sync for `generation` and commit it.
async fn publish(store: &SqliteStore, repo_id: &str, generation: &str) {
    assert!(store.try_begin_sync(repo_id, generation, 1_700_000_000, 0).await.unwrap());
    assert!(store.commit_generation(repo_id, generation, 1_700_000_000).await.unwrap());
}

async fn committed(store: &SqliteStore, repo: &Repository, generation: &str, files: &[FileNode]) {
    store.stage_files(files, &[]).await.unwrap();
    publish(store, &repo.id, generation).await;
}

#[tokio::test]
async fn test_insert_is_keyed_by_user_and_ref() {
    let (_tmp, store) = open().await;
    let first = repo(&store).await;
    assert_eq!(first.status, RepoStatus::Pending);

    let dup = Repository::new("alice", &RepoRef::new("acme", "web", "main"));
    assert_eq!(store.insert_repository(&dup).await.unwrap().id, first.id);

    let other = Repository::new("alice", &RepoRef::new("acme", "web", "v2"));
    store.insert_repository(&other).await.unwrap();
    let listed = store.list_repositories("alice").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, first.id);

    let found = store
        .find_repository("alice", &RepoRef::new("acme", "web", "v2"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, other.id);
    assert!(store.list_repositories("bob").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_begin_sync_is_a_conditional_update() {
    let (_tmp, store) = open().await;
    let r = repo(&store).await;

    assert!(store.try_begin_sync(&r.id, "g1", 100, 0).await.unwrap());
    assert!(!store.try_begin_sync(&r.id, "g2", 101, 0).await.unwrap());
    assert!(!store.try_begin_sync("missing", "g3", 102, 0).await.unwrap());

    // only the holder of the sync may end it
    assert!(!store.fail_sync(&r.id, "g2", "intruder").await.unwrap());
    assert!(store.fail_sync(&r.id, "g1", "rate limited").await.unwrap());
    let failed = store.get_repository(&r.id).await.unwrap().unwrap();
    assert_eq!(failed.status, RepoStatus::Error);
    assert_eq!(failed.last_error.as_deref(), Some("rate limited"));
    assert!(failed.sync_generation.is_none());
    // error → ready is not a transition
    assert!(!store.commit_generation(&r.id, "g1", 103).await.unwrap());
    assert!(store.try_begin_sync(&r.id, "g4", 104, 0).await.unwrap());
}

#[tokio::test]
async fn test_stale_sync_is_taken_over() {
    let (_tmp, store) = open().await;
    let r = repo(&store).await;
    assert!(store.try_begin_sync(&r.id, "dead", 100, 0).await.unwrap());
    let held = store.get_repository(&r.id).await.unwrap().unwrap();
    assert_eq!(held.sync_generation.as_deref(), Some("dead"));
    assert_eq!(held.sync_started_at, Some(100));

    assert!(!store.try_begin_sync(&r.id, "g2", 150, 100).await.unwrap());
    assert!(store.try_begin_sync(&r.id, "g2", 1_000, 500).await.unwrap());

    store
        .stage_files(&[FileNode::new(&r.id, "dead", "late.rs", 1)], &[])
        .await
        .unwrap();
    assert!(!store.commit_generation(&r.id, "dead", 1_001).await.unwrap());
    assert!(!store.fail_sync(&r.id, "dead", "late").await.unwrap());
    assert!(store.list_files(&r.id).await.unwrap().is_empty());

    assert!(store.commit_generation(&r.id, "g2", 1_002).await.unwrap());
    let stored = store.get_repository(&r.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RepoStatus::Ready);
    assert_eq!(stored.current_generation.as_deref(), Some("g2"));
    assert!(stored.sync_started_at.is_none());
}

#[tokio::test]
async fn test_concurrent_begin_sync_has_one_winner() {
    let (_tmp, store) = open().await;
    let store = Arc::new(store);
    let r = repo(&store).await;

    let mut handles = Vec::new();
    for n in 0..4 {
        let store = store.clone();
        let id = r.id.clone();
        handles.push(tokio::spawn(async move {
            store
                .try_begin_sync(&id, &format!("g{}", n), 100, 0)
                .await
                .unwrap()
        }));
    }
    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_commit_swaps_generations() {
    let (_tmp, store) = open().await;
    let r = repo(&store).await;
    assert!(store.try_begin_sync(&r.id, "g1", 90, 0).await.unwrap());

    let old = FileNode::new(&r.id, "g1", "src/old.rs", 10).with_content("fn old() {}".into());
    store
        .stage_files(&[old.clone()], &[symbol(&old.id, "old", 1)])
        .await
        .unwrap();
    assert!(store.list_files(&r.id).await.unwrap().is_empty());
    assert!(store.commit_generation(&r.id, "g1", 100).await.unwrap());

    let listed = store.list_files(&r.id).await.unwrap();
    assert_eq!(listed, vec![old.clone()]);
    store
        .upsert_file_analysis(&FileAnalysis {
            file_id: old.id.clone(),
            repository_id: r.id.clone(),
            path: old.path.clone(),
            purpose: "legacy".into(),
            layer: "core".into(),
            summary: "old code".into(),
            exports: vec!["old".into()],
            imports: vec![],
            key_functions: vec![KeyFunction {
                name: "old".into(),
                description: "does old things".into(),
            }],
            generated_at: 101,
        })
        .await
        .unwrap();

    let new = FileNode::new(&r.id, "g2", "src/new.rs", 10);
    committed(&store, &r, "g2", &[new.clone()]).await;

    let listed = store.list_files(&r.id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path, "src/new.rs");
    assert!(store.get_file(&r.id, "src/old.rs").await.unwrap().is_none());
    assert!(store.list_symbols(&old.id).await.unwrap().is_empty());
    assert!(store.get_file_analysis(&old.id).await.unwrap().is_none());

    let stored = store.get_repository(&r.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RepoStatus::Ready);
    assert_eq!(stored.current_generation.as_deref(), Some("g2"));
    assert!(stored.last_error.is_none());
}

#[tokio::test]
async fn test_discard_leaves_current_generation() {
    let (_tmp, store) = open().await;
    let r = repo(&store).await;
    committed(&store, &r, "g1", &[FileNode::new(&r.id, "g1", "a.rs", 1)]).await;

    store
        .stage_files(&[FileNode::new(&r.id, "g2", "b.rs", 1)], &[])
        .await
        .unwrap();
    store.discard_generation(&r.id, "g2").await.unwrap();

    let paths: Vec<String> = store
        .list_files(&r.id)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.path)
        .collect();
    assert_eq!(paths, vec!["a.rs"]);
}

#[tokio::test]
async fn test_set_file_content_replaces_symbols() {
    let (_tmp, store) = open().await;
    let r = repo(&store).await;
    let file = FileNode::new(&r.id, "g1", "src/lib.rs", 500);
    store
        .stage_files(&[file.clone()], &[symbol(&file.id, "stale", 1)])
        .await
        .unwrap();
    publish(&store, &r.id, "g1").await;

    store
        .set_file_content(
            &file.id,
            "fn b() {}\nfn a() {}",
            &[symbol(&file.id, "b", 20), symbol(&file.id, "a", 2)],
        )
        .await
        .unwrap();

    let stored = store.get_file(&r.id, "src/lib.rs").await.unwrap().unwrap();
    assert_eq!(stored.content.as_deref(), Some("fn b() {}\nfn a() {}"));
    assert!(stored.content_hash.is_some());
    let names: Vec<String> = store
        .list_symbols(&file.id)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["a", "b"]);

    let first = &store.list_symbols(&file.id).await.unwrap()[0];
    store
        .set_symbol_explanation(&first.id, r#"{"name":"a"}"#)
        .await
        .unwrap();
    let first = &store.list_symbols(&file.id).await.unwrap()[0];
    assert_eq!(first.explanation.as_deref(), Some(r#"{"name":"a"}"#));

    assert!(store.set_file_content("missing", "x", &[]).await.is_err());
}

#[tokio::test]
async fn test_repository_analysis_roundtrip_stamps_repository() {
    let (_tmp, store) = open().await;
    let r = repo(&store).await;
    let analysis = RepositoryAnalysis {
        repository_id: r.id.clone(),
        summary: "A web app".into(),
        architecture: "layered".into(),
        patterns: vec!["Service Layer".into()],
        frameworks: vec!["Next.js".into(), "React".into()],
        build_system: "npm".into(),
        entry_points: vec!["src/app/page.tsx".into()],
        layers: vec![Layer {
            name: "ui".into(),
            description: "pages".into(),
            files: vec!["src/app/page.tsx".into()],
        }],
        generated_at: 1234,
    };
    store.upsert_repository_analysis(&analysis).await.unwrap();
    assert_eq!(
        store.get_repository_analysis(&r.id).await.unwrap(),
        Some(analysis.clone())
    );
    let stored = store.get_repository(&r.id).await.unwrap().unwrap();
    assert_eq!(stored.analyzed_at, Some(1234));

    let replaced = RepositoryAnalysis {
        summary: "Rewritten".into(),
        frameworks: vec![],
        generated_at: 2000,
        ..analysis
    };
    store.upsert_repository_analysis(&replaced).await.unwrap();
    let stored = store.get_repository_analysis(&r.id).await.unwrap().unwrap();
    assert_eq!(stored.summary, "Rewritten");
    assert!(stored.frameworks.is_empty());
}

#[tokio::test]
async fn test_conversation_log_appends_in_order() {
    let (_tmp, store) = open().await;
    let r = repo(&store).await;
    let key = ConversationKey::new("alice", &r.id, ContextScope::file("src/lib.rs"));
    assert!(store.get_conversation(&key).await.unwrap().is_none());

    store
        .append_messages(
            &key,
            &[
                ConversationMessage::now(Role::User, "q1"),
                ConversationMessage::now(Role::Assistant, "a1"),
            ],
        )
        .await
        .unwrap();
    let convo = store
        .append_messages(
            &key,
            &[
                ConversationMessage::now(Role::User, "q2"),
                ConversationMessage::now(Role::Assistant, "a2"),
            ],
        )
        .await
        .unwrap();
    let contents: Vec<&str> = convo.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["q1", "a1", "q2", "a2"]);
    assert_eq!(convo.key, key);

    let reloaded = store.get_conversation(&key).await.unwrap().unwrap();
    assert_eq!(reloaded.id, convo.id);
    assert_eq!(reloaded.messages.len(), 4);
    assert_eq!(reloaded.messages[3].role, Role::Assistant);

    let repo_scope = ConversationKey::new("alice", &r.id, ContextScope::repository());
    assert!(store.get_conversation(&repo_scope).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_repository_cascades() {
    let (_tmp, store) = open().await;
    let r = repo(&store).await;
    let file = FileNode::new(&r.id, "g1", "a.rs", 1);
    store
        .stage_files(&[file.clone()], &[symbol(&file.id, "main", 1)])
        .await
        .unwrap();
    publish(&store, &r.id, "g1").await;
    let key = ConversationKey::new("alice", &r.id, ContextScope::repository());
    store
        .append_messages(&key, &[ConversationMessage::now(Role::User, "hi")])
        .await
        .unwrap();

    assert!(store.delete_repository(&r.id).await.unwrap());
    assert!(!store.delete_repository(&r.id).await.unwrap());
    assert!(store.get_repository(&r.id).await.unwrap().is_none());
    assert!(store.list_symbols(&file.id).await.unwrap().is_empty());
    assert!(store.get_conversation(&key).await.unwrap().is_none());
}
