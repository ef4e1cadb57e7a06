//! In-memory [`Store`] implementation for tests and embedding.
//!
//! All tables sit behind one `std::sync::RwLock`, so every trait method is
//! atomic with respect to the others, including the conditional sync
//! update and generation commit.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{
    content_hash, Conversation, ConversationKey, ConversationMessage, FileAnalysis, FileNode,
    RepoRef, RepoStatus, Repository, RepositoryAnalysis, Symbol, CONVERSATION_SCHEMA_VERSION,
};

use super::Store;

#[derive(Default)]
struct Tables {
    repositories: Vec<Repository>,
    files: Vec<FileNode>,
    symbols: Vec<Symbol>,
    file_analyses: HashMap<String, FileAnalysis>,
    repository_analyses: HashMap<String, RepositoryAnalysis>,
    conversations: Vec<Conversation>,
}

impl Tables {
    fn repository_mut(&mut self, id: &str) -> Option<&mut Repository> {
        self.repositories.iter_mut().find(|r| r.id == id)
    }

    fn current_generation(&self, repository_id: &str) -> Option<&str> {
        self.repositories
            .iter()
            .find(|r| r.id == repository_id)
            .and_then(|r| r.current_generation.as_deref())
    }

    /// Drop symbols and analyses whose file no longer exists.
    fn collect_orphans(&mut self) {
        let live: std::collections::HashSet<&str> =
            self.files.iter().map(|f| f.id.as_str()).collect();
        self.symbols.retain(|s| live.contains(s.file_id.as_str()));
        self.file_analyses.retain(|id, _| live.contains(id.as_str()));
    }
}

/// In-memory store for tests.
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn same_key(repo: &Repository, user_id: &str, key: &RepoRef) -> bool {
    repo.user_id == user_id
        && repo.owner == key.owner
        && repo.name == key.name
        && repo.reference == key.reference
}

/// Whether the sync for `generation` holds `repo` and may move it to `next`.
fn holds_sync(repo: &Repository, generation: &str, next: RepoStatus) -> bool {
    repo.status.can_transition_to(next) && repo.sync_generation.as_deref() == Some(generation)
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_repository(&self, repo: &Repository) -> Result<Repository> {
        let mut tables = self.tables.write().unwrap();
        let key = repo.repo_ref();
        if let Some(existing) = tables
            .repositories
            .iter()
            .find(|r| same_key(r, &repo.user_id, &key))
        {
            return Ok(existing.clone());
        }
        tables.repositories.push(repo.clone());
        Ok(repo.clone())
    }

    async fn get_repository(&self, id: &str) -> Result<Option<Repository>> {
        let tables = self.tables.read().unwrap();
        Ok(tables.repositories.iter().find(|r| r.id == id).cloned())
    }

    async fn find_repository(&self, user_id: &str, repo: &RepoRef) -> Result<Option<Repository>> {
        let tables = self.tables.read().unwrap();
        Ok(tables
            .repositories
            .iter()
            .find(|r| same_key(r, user_id, repo))
            .cloned())
    }

    async fn list_repositories(&self, user_id: &str) -> Result<Vec<Repository>> {
        let tables = self.tables.read().unwrap();
        let mut repos: Vec<Repository> = tables
            .repositories
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        repos.sort_by_key(|r| r.created_at);
        Ok(repos)
    }

    async fn delete_repository(&self, id: &str) -> Result<bool> {
        let mut tables = self.tables.write().unwrap();
        let before = tables.repositories.len();
        tables.repositories.retain(|r| r.id != id);
        if tables.repositories.len() == before {
            return Ok(false);
        }
        tables.files.retain(|f| f.repository_id != id);
        tables.collect_orphans();
        tables.repository_analyses.remove(id);
        tables.conversations.retain(|c| c.key.repository_id != id);
        Ok(true)
    }

    async fn try_begin_sync(
        &self,
        id: &str,
        generation: &str,
        started_at: i64,
        stale_before: i64,
    ) -> Result<bool> {
        let mut tables = self.tables.write().unwrap();
        let Some(repo) = tables.repository_mut(id) else {
            return Ok(false);
        };
        let stale = repo.status == RepoStatus::Syncing
            && repo.sync_started_at.map_or(true, |t| t < stale_before);
        if !repo.status.can_transition_to(RepoStatus::Syncing) && !stale {
            return Ok(false);
        }
        repo.status = RepoStatus::Syncing;
        repo.sync_generation = Some(generation.to_string());
        repo.sync_started_at = Some(started_at);
        Ok(true)
    }

    async fn fail_sync(&self, id: &str, generation: &str, reason: &str) -> Result<bool> {
        let mut tables = self.tables.write().unwrap();
        match tables.repository_mut(id) {
            Some(repo) if holds_sync(repo, generation, RepoStatus::Error) => {
                repo.status = RepoStatus::Error;
                repo.last_error = Some(reason.to_string());
                repo.sync_generation = None;
                repo.sync_started_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn stage_files(&self, files: &[FileNode], symbols: &[Symbol]) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        tables.files.extend_from_slice(files);
        tables.symbols.extend_from_slice(symbols);
        Ok(())
    }

    async fn commit_generation(
        &self,
        repository_id: &str,
        generation: &str,
        synced_at: i64,
    ) -> Result<bool> {
        let mut tables = self.tables.write().unwrap();
        let Some(repo) = tables.repository_mut(repository_id) else {
            return Ok(false);
        };
        if !holds_sync(repo, generation, RepoStatus::Ready) {
            return Ok(false);
        }
        repo.current_generation = Some(generation.to_string());
        repo.status = RepoStatus::Ready;
        repo.synced_at = Some(synced_at);
        repo.last_error = None;
        repo.sync_generation = None;
        repo.sync_started_at = None;
        tables
            .files
            .retain(|f| f.repository_id != repository_id || f.generation == generation);
        tables.collect_orphans();
        Ok(true)
    }

    async fn discard_generation(&self, repository_id: &str, generation: &str) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        tables
            .files
            .retain(|f| !(f.repository_id == repository_id && f.generation == generation));
        tables.collect_orphans();
        Ok(())
    }

    async fn list_files(&self, repository_id: &str) -> Result<Vec<FileNode>> {
        let tables = self.tables.read().unwrap();
        let Some(generation) = tables.current_generation(repository_id) else {
            return Ok(Vec::new());
        };
        let mut files: Vec<FileNode> = tables
            .files
            .iter()
            .filter(|f| f.repository_id == repository_id && f.generation == generation)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn get_file(&self, repository_id: &str, path: &str) -> Result<Option<FileNode>> {
        let tables = self.tables.read().unwrap();
        let Some(generation) = tables.current_generation(repository_id) else {
            return Ok(None);
        };
        Ok(tables
            .files
            .iter()
            .find(|f| f.repository_id == repository_id && f.generation == generation && f.path == path)
            .cloned())
    }

    async fn set_file_content(
        &self,
        file_id: &str,
        content: &str,
        symbols: &[Symbol],
    ) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        let Some(file) = tables.files.iter_mut().find(|f| f.id == file_id) else {
            bail!("file {} no longer exists", file_id);
        };
        file.content = Some(content.to_string());
        file.content_hash = Some(content_hash(content));
        tables.symbols.retain(|s| s.file_id != file_id);
        tables.symbols.extend_from_slice(symbols);
        Ok(())
    }

    async fn list_symbols(&self, file_id: &str) -> Result<Vec<Symbol>> {
        let tables = self.tables.read().unwrap();
        let mut symbols: Vec<Symbol> = tables
            .symbols
            .iter()
            .filter(|s| s.file_id == file_id)
            .cloned()
            .collect();
        symbols.sort_by_key(|s| (s.start_line, s.end_line));
        Ok(symbols)
    }

    async fn set_symbol_explanation(&self, symbol_id: &str, explanation: &str) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        if let Some(symbol) = tables.symbols.iter_mut().find(|s| s.id == symbol_id) {
            symbol.explanation = Some(explanation.to_string());
        }
        Ok(())
    }

    async fn upsert_file_analysis(&self, analysis: &FileAnalysis) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        if !tables.files.iter().any(|f| f.id == analysis.file_id) {
            bail!("file {} no longer exists", analysis.file_id);
        }
        tables
            .file_analyses
            .insert(analysis.file_id.clone(), analysis.clone());
        Ok(())
    }

    async fn get_file_analysis(&self, file_id: &str) -> Result<Option<FileAnalysis>> {
        let tables = self.tables.read().unwrap();
        Ok(tables.file_analyses.get(file_id).cloned())
    }

    async fn upsert_repository_analysis(&self, analysis: &RepositoryAnalysis) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        let Some(repo) = tables.repository_mut(&analysis.repository_id) else {
            bail!("repository {} no longer exists", analysis.repository_id);
        };
        repo.analyzed_at = Some(analysis.generated_at);
        tables
            .repository_analyses
            .insert(analysis.repository_id.clone(), analysis.clone());
        Ok(())
    }

    async fn get_repository_analysis(
        &self,
        repository_id: &str,
    ) -> Result<Option<RepositoryAnalysis>> {
        let tables = self.tables.read().unwrap();
        Ok(tables.repository_analyses.get(repository_id).cloned())
    }

    async fn get_conversation(&self, key: &ConversationKey) -> Result<Option<Conversation>> {
        let tables = self.tables.read().unwrap();
        Ok(tables.conversations.iter().find(|c| &c.key == key).cloned())
    }

    async fn append_messages(
        &self,
        key: &ConversationKey,
        messages: &[ConversationMessage],
    ) -> Result<Conversation> {
        let mut tables = self.tables.write().unwrap();
        if !tables
            .repositories
            .iter()
            .any(|r| r.id == key.repository_id)
        {
            bail!("repository {} no longer exists", key.repository_id);
        }
        let now = chrono::Utc::now().timestamp();
        let idx = match tables.conversations.iter().position(|c| &c.key == key) {
            Some(idx) => idx,
            None => {
                tables.conversations.push(Conversation {
                    id: uuid::Uuid::new_v4().to_string(),
                    key: key.clone(),
                    schema_version: CONVERSATION_SCHEMA_VERSION,
                    messages: Vec::new(),
                    created_at: now,
                    updated_at: now,
                });
                tables.conversations.len() - 1
            }
        };
        let convo = &mut tables.conversations[idx];
        convo.messages.extend_from_slice(messages);
        convo.updated_at = now;
        Ok(convo.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContextScope, Role, SymbolKind};

    fn symbol(file_id: &str, name: &str, line: u32) -> Symbol {
        Symbol {
            id: uuid::Uuid::new_v4().to_string(),
            file_id: file_id.to_string(),
            name: name.to_string(),
            kind: SymbolKind::Function,
            start_line: line,
            end_line: line,
            explanation: None,
        }
    }

    async fn repo(store: &InMemoryStore) -> Repository {
        let repo = Repository::new("alice", &RepoRef::new("acme", "web", "main"));
        store.insert_repository(&repo).await.unwrap()
    }

    /// Begin a sync for `generation`, then commit it.
    async fn publish(store: &InMemoryStore, id: &str, generation: &str, at: i64) {
        assert!(store.try_begin_sync(id, generation, at, 0).await.unwrap());
        assert!(store.commit_generation(id, generation, at).await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_returns_existing_for_same_key() {
        let store = InMemoryStore::new();
        let first = repo(&store).await;
        let again = Repository::new("alice", &RepoRef::new("acme", "web", "main"));
        let stored = store.insert_repository(&again).await.unwrap();
        assert_eq!(stored.id, first.id);

        let other_ref = Repository::new("alice", &RepoRef::new("acme", "web", "dev"));
        assert_ne!(store.insert_repository(&other_ref).await.unwrap().id, first.id);
        assert_eq!(store.list_repositories("alice").await.unwrap().len(), 2);
        assert!(store.list_repositories("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_begin_sync_is_conditional() {
        let store = InMemoryStore::new();
        let r = repo(&store).await;
        assert!(store.try_begin_sync(&r.id, "g1", 100, 0).await.unwrap());
        assert!(!store.try_begin_sync(&r.id, "g2", 101, 0).await.unwrap());
        // only the holder may finish the sync
        assert!(!store.fail_sync(&r.id, "g2", "other").await.unwrap());
        assert!(!store.commit_generation(&r.id, "g2", 102).await.unwrap());
        assert!(store.fail_sync(&r.id, "g1", "boom").await.unwrap());
        let stored = store.get_repository(&r.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RepoStatus::Error);
        assert_eq!(stored.last_error.as_deref(), Some("boom"));
        assert!(!stored.status.can_transition_to(RepoStatus::Ready));
        assert!(!store.commit_generation(&r.id, "g1", 103).await.unwrap());
        assert!(store.try_begin_sync(&r.id, "g3", 104, 0).await.unwrap());
        assert!(!store.try_begin_sync("missing", "g4", 105, 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_sync_is_taken_over() {
        let store = InMemoryStore::new();
        let r = repo(&store).await;
        assert!(store.try_begin_sync(&r.id, "g1", 100, 0).await.unwrap());
        // still fresh relative to the threshold
        assert!(!store.try_begin_sync(&r.id, "g2", 150, 100).await.unwrap());
        // older than the threshold: abandoned
        assert!(store.try_begin_sync(&r.id, "g2", 500, 200).await.unwrap());

        // the abandoned sync can no longer finish
        assert!(!store.commit_generation(&r.id, "g1", 501).await.unwrap());
        assert!(!store.fail_sync(&r.id, "g1", "late").await.unwrap());
        assert!(store.commit_generation(&r.id, "g2", 502).await.unwrap());
        let stored = store.get_repository(&r.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RepoStatus::Ready);
        assert_eq!(stored.current_generation.as_deref(), Some("g2"));
        assert!(stored.sync_generation.is_none());
    }

    #[tokio::test]
    async fn test_commit_replaces_previous_generation() {
        let store = InMemoryStore::new();
        let r = repo(&store).await;

        let old = FileNode::new(&r.id, "g1", "src/old.rs", 1);
        store
            .stage_files(&[old.clone()], &[symbol(&old.id, "old", 1)])
            .await
            .unwrap();
        // staged but uncommitted files are invisible
        assert!(store.list_files(&r.id).await.unwrap().is_empty());
        publish(&store, &r.id, "g1", 100).await;
        assert_eq!(store.list_files(&r.id).await.unwrap().len(), 1);

        let new = FileNode::new(&r.id, "g2", "src/new.rs", 1);
        store.stage_files(&[new.clone()], &[]).await.unwrap();
        publish(&store, &r.id, "g2", 200).await;

        let files = store.list_files(&r.id).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "src/new.rs");
        assert!(store.list_symbols(&old.id).await.unwrap().is_empty());

        let stored = store.get_repository(&r.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RepoStatus::Ready);
        assert_eq!(stored.synced_at, Some(200));
        assert_eq!(stored.current_generation.as_deref(), Some("g2"));
    }

    #[tokio::test]
    async fn test_discard_keeps_current_generation() {
        let store = InMemoryStore::new();
        let r = repo(&store).await;
        store
            .stage_files(&[FileNode::new(&r.id, "g1", "a.rs", 1)], &[])
            .await
            .unwrap();
        publish(&store, &r.id, "g1", 1).await;
        store
            .stage_files(&[FileNode::new(&r.id, "g2", "b.rs", 1)], &[])
            .await
            .unwrap();
        store.discard_generation(&r.id, "g2").await.unwrap();
        let files = store.list_files(&r.id).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "a.rs");
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = InMemoryStore::new();
        let r = repo(&store).await;
        let file = FileNode::new(&r.id, "g1", "a.rs", 1);
        store
            .stage_files(&[file.clone()], &[symbol(&file.id, "main", 1)])
            .await
            .unwrap();
        publish(&store, &r.id, "g1", 1).await;
        let key = ConversationKey::new("alice", &r.id, ContextScope::repository());
        store
            .append_messages(&key, &[ConversationMessage::now(Role::User, "hi")])
            .await
            .unwrap();

        assert!(store.delete_repository(&r.id).await.unwrap());
        assert!(!store.delete_repository(&r.id).await.unwrap());
        assert!(store.list_symbols(&file.id).await.unwrap().is_empty());
        assert!(store.get_conversation(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_symbols_ordered_by_start_line() {
        let store = InMemoryStore::new();
        let r = repo(&store).await;
        let file = FileNode::new(&r.id, "g1", "a.rs", 1);
        store
            .stage_files(
                &[file.clone()],
                &[symbol(&file.id, "late", 30), symbol(&file.id, "early", 3)],
            )
            .await
            .unwrap();
        let names: Vec<String> = store
            .list_symbols(&file.id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn test_append_messages_keeps_order() {
        let store = InMemoryStore::new();
        let r = repo(&store).await;
        let key = ConversationKey::new("alice", &r.id, ContextScope::file("a.rs"));
        store
            .append_messages(&key, &[ConversationMessage::now(Role::User, "one")])
            .await
            .unwrap();
        let convo = store
            .append_messages(
                &key,
                &[
                    ConversationMessage::now(Role::Assistant, "two"),
                    ConversationMessage::now(Role::User, "three"),
                ],
            )
            .await
            .unwrap();
        let contents: Vec<&str> = convo.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        assert_eq!(convo.schema_version, CONVERSATION_SCHEMA_VERSION);

        let other = ConversationKey::new("alice", &r.id, ContextScope::repository());
        assert!(store.get_conversation(&other).await.unwrap().is_none());
    }
}
