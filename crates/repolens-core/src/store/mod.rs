//! Storage abstraction for RepoLens.
//!
//! The [`Store`] trait names every persistence operation the services
//! need, so no query strings leak outside a backend. Two implementations
//! exist: [`memory::InMemoryStore`] here, and `SqliteStore` in the
//! `repolens` app crate.
//!
//! # Generations
//!
//! A sync never edits the live file set. It stages FileNodes and Symbols
//! under a fresh generation id ([`Store::stage_files`]), then
//! [`Store::commit_generation`] repoints the repository, marks it ready and
//! drops every older generation in one unit. Readers only ever see the
//! generation named by `Repository::current_generation`.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    Conversation, ConversationKey, ConversationMessage, FileAnalysis, FileNode, RepoRef,
    Repository, RepositoryAnalysis, Symbol,
};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_repository`](Store::insert_repository) | Create unless the (user, owner, name, ref) key exists |
/// | [`try_begin_sync`](Store::try_begin_sync) | Conditional `status != syncing → syncing`, or take over a stale sync |
/// | [`stage_files`](Store::stage_files) | Write an uncommitted generation |
/// | [`commit_generation`](Store::commit_generation) | Atomically publish a generation |
/// | [`append_messages`](Store::append_messages) | Append to a conversation log |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert `repo`, or return the record already stored under the same
    /// (user, owner, name, ref) key.
    async fn insert_repository(&self, repo: &Repository) -> Result<Repository>;

    async fn get_repository(&self, id: &str) -> Result<Option<Repository>>;

    async fn find_repository(&self, user_id: &str, repo: &RepoRef) -> Result<Option<Repository>>;

    /// Repositories owned by `user_id`, oldest first.
    async fn list_repositories(&self, user_id: &str) -> Result<Vec<Repository>>;

    /// Delete a repository with its files, symbols, analyses and
    /// conversations. Returns `false` if it did not exist.
    async fn delete_repository(&self, id: &str) -> Result<bool>;

    /// Move the repository to `syncing` on behalf of `generation`, stamping
    /// `started_at`.
    ///
    /// Applies when the repository is not syncing, or when the sync holding
    /// it started before `stale_before` (its owner is presumed gone).
    /// Returns `false` when the update did not apply.
    async fn try_begin_sync(
        &self,
        id: &str,
        generation: &str,
        started_at: i64,
        stale_before: i64,
    ) -> Result<bool>;

    /// Move the repository from `syncing` to `error`, retaining `reason`.
    ///
    /// Only the sync holding the repository for `generation` may do this;
    /// returns `false` otherwise.
    async fn fail_sync(&self, id: &str, generation: &str, reason: &str) -> Result<bool>;

    /// Write FileNodes and Symbols of an uncommitted generation.
    async fn stage_files(&self, files: &[FileNode], symbols: &[Symbol]) -> Result<()>;

    /// Publish `generation`: set it current, mark the repository `ready`
    /// with `synced_at`, clear `last_error`, and delete older generations
    /// together with their symbols and file analyses.
    ///
    /// Only the sync holding the repository for `generation` may commit;
    /// returns `false` (and changes nothing) otherwise.
    async fn commit_generation(
        &self,
        repository_id: &str,
        generation: &str,
        synced_at: i64,
    ) -> Result<bool>;

    /// Drop a staged generation that will never be committed.
    async fn discard_generation(&self, repository_id: &str, generation: &str) -> Result<()>;

    /// Files of the current generation, ordered by path.
    async fn list_files(&self, repository_id: &str) -> Result<Vec<FileNode>>;

    /// One file of the current generation.
    async fn get_file(&self, repository_id: &str, path: &str) -> Result<Option<FileNode>>;

    /// Store lazily fetched content (and its hash) on a file, replacing the
    /// file's symbols with `symbols`.
    async fn set_file_content(&self, file_id: &str, content: &str, symbols: &[Symbol])
        -> Result<()>;

    /// Symbols of one file, ordered by start line.
    async fn list_symbols(&self, file_id: &str) -> Result<Vec<Symbol>>;

    async fn set_symbol_explanation(&self, symbol_id: &str, explanation: &str) -> Result<()>;

    async fn upsert_file_analysis(&self, analysis: &FileAnalysis) -> Result<()>;

    async fn get_file_analysis(&self, file_id: &str) -> Result<Option<FileAnalysis>>;

    /// Replace the repository's analysis and stamp `analyzed_at`.
    async fn upsert_repository_analysis(&self, analysis: &RepositoryAnalysis) -> Result<()>;

    async fn get_repository_analysis(&self, repository_id: &str)
        -> Result<Option<RepositoryAnalysis>>;

    async fn get_conversation(&self, key: &ConversationKey) -> Result<Option<Conversation>>;

    /// Append `messages` in order to the conversation for `key`, creating
    /// it if needed. All messages land or none do.
    async fn append_messages(
        &self,
        key: &ConversationKey,
        messages: &[ConversationMessage],
    ) -> Result<Conversation>;
}
