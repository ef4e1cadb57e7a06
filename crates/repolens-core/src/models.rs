//! Core data models used throughout RepoLens.
//!
//! These types represent repositories, their ingested files and symbols,
//! the analysis records derived from them, and the conversation log kept
//! per context scope. Timestamps are Unix seconds, as stored.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::language::infer_language;

/// Lifecycle state of a [`Repository`].
///
/// ```text
/// pending ──▶ syncing ──▶ ready
///               ▲   └───▶ error
///               └──── ready | error (re-sync)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoStatus {
    Pending,
    Syncing,
    Ready,
    Error,
}

impl RepoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "syncing" => Some(Self::Syncing),
            "ready" => Some(Self::Ready),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: RepoStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Syncing)
                | (Self::Ready, Self::Syncing)
                | (Self::Error, Self::Syncing)
                | (Self::Syncing, Self::Ready)
                | (Self::Syncing, Self::Error)
        )
    }
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coordinates of a repository on the hosting platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
    /// Branch, tag, or commit SHA.
    pub reference: String,
}

impl RepoRef {
    pub fn new(owner: &str, name: &str, reference: &str) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            reference: reference.to_string(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// An imported repository, owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub user_id: String,
    pub owner: String,
    pub name: String,
    pub reference: String,
    pub status: RepoStatus,
    /// Reason of the most recent failed sync, cleared on success.
    pub last_error: Option<String>,
    /// Generation id of the FileNode set readers currently see.
    pub current_generation: Option<String>,
    /// Generation being built by the sync that holds the `syncing` state.
    pub sync_generation: Option<String>,
    /// When that sync started. A `syncing` row older than the stale
    /// threshold may be taken over by a new sync.
    pub sync_started_at: Option<i64>,
    pub created_at: i64,
    pub synced_at: Option<i64>,
    pub analyzed_at: Option<i64>,
}

impl Repository {
    /// A fresh repository in the `pending` state.
    pub fn new(user_id: &str, repo: &RepoRef) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            owner: repo.owner.clone(),
            name: repo.name.clone(),
            reference: repo.reference.clone(),
            status: RepoStatus::Pending,
            last_error: None,
            current_generation: None,
            sync_generation: None,
            sync_started_at: None,
            created_at: chrono::Utc::now().timestamp(),
            synced_at: None,
            analyzed_at: None,
        }
    }

    pub fn repo_ref(&self) -> RepoRef {
        RepoRef::new(&self.owner, &self.name, &self.reference)
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// One file of one ingestion generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub id: String,
    pub repository_id: String,
    pub generation: String,
    /// Repository-relative path, `/`-separated.
    pub path: String,
    pub name: String,
    /// Parent directory (empty for root-level files).
    pub directory: String,
    pub extension: Option<String>,
    pub language: Option<String>,
    pub size: u64,
    pub content: Option<String>,
    /// SHA-256 of `content`, when present.
    pub content_hash: Option<String>,
}

impl FileNode {
    /// Build a node for `path`, deriving name, directory, extension and language.
    pub fn new(repository_id: &str, generation: &str, path: &str, size: u64) -> Self {
        let (directory, name) = split_path(path);
        let extension = extension_of(name);
        let language = infer_language(name, extension.as_deref()).map(str::to_string);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            repository_id: repository_id.to_string(),
            generation: generation.to_string(),
            path: path.to_string(),
            name: name.to_string(),
            directory: directory.to_string(),
            extension,
            language,
            size,
            content: None,
            content_hash: None,
        }
    }

    pub fn with_content(mut self, content: String) -> Self {
        self.content_hash = Some(content_hash(&content));
        self.content = Some(content);
        self
    }
}

/// Split `a/b/c.rs` into `("a/b", "c.rs")`.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

/// Lowercased extension of a file name, without the dot.
///
/// Dotfiles such as `.gitignore` have no extension.
pub fn extension_of(name: &str) -> Option<String> {
    let idx = name.rfind('.')?;
    if idx == 0 || idx + 1 == name.len() {
        return None;
    }
    Some(name[idx + 1..].to_ascii_lowercase())
}

/// Hex SHA-256 of a file body.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Class,
    Interface,
    Type,
    Constant,
    Variable,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Type => "type",
            Self::Constant => "constant",
            Self::Variable => "variable",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "function" => Some(Self::Function),
            "class" => Some(Self::Class),
            "interface" => Some(Self::Interface),
            "type" => Some(Self::Type),
            "constant" => Some(Self::Constant),
            "variable" => Some(Self::Variable),
            _ => None,
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declaration found in a file, spanning `start_line..=end_line` (1-based).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: String,
    pub file_id: String,
    pub name: String,
    pub kind: SymbolKind,
    pub start_line: u32,
    pub end_line: u32,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KeyFunction {
    pub name: String,
    pub description: String,
}

/// Current analysis of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub file_id: String,
    pub repository_id: String,
    pub path: String,
    pub purpose: String,
    pub layer: String,
    pub summary: String,
    pub exports: Vec<String>,
    pub imports: Vec<String>,
    pub key_functions: Vec<KeyFunction>,
    pub generated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
}

/// Current whole-repository analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryAnalysis {
    pub repository_id: String,
    pub summary: String,
    pub architecture: String,
    pub patterns: Vec<String>,
    pub frameworks: Vec<String>,
    pub build_system: String,
    pub entry_points: Vec<String>,
    pub layers: Vec<Layer>,
    pub generated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// A message sent to the completion provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    Repository,
    File,
}

impl ContextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::File => "file",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "repository" => Some(Self::Repository),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

/// What a conversation is about: the whole repository, or one file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextScope {
    pub context_type: ContextType,
    pub path: Option<String>,
}

impl ContextScope {
    pub fn repository() -> Self {
        Self {
            context_type: ContextType::Repository,
            path: None,
        }
    }

    pub fn file(path: &str) -> Self {
        Self {
            context_type: ContextType::File,
            path: Some(path.to_string()),
        }
    }

    /// File scopes carry a non-empty path; repository scopes carry none.
    pub fn is_valid(&self) -> bool {
        match self.context_type {
            ContextType::Repository => self.path.is_none(),
            ContextType::File => self.path.as_deref().is_some_and(|p| !p.is_empty()),
        }
    }
}

/// Identity of a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub user_id: String,
    pub repository_id: String,
    pub scope: ContextScope,
}

impl ConversationKey {
    pub fn new(user_id: &str, repository_id: &str, scope: ContextScope) -> Self {
        Self {
            user_id: user_id.to_string(),
            repository_id: repository_id.to_string(),
            scope,
        }
    }
}

/// Version of the stored message-log layout.
pub const CONVERSATION_SCHEMA_VERSION: u32 = 1;

/// One entry of a conversation's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub created_at: i64,
}

impl ConversationMessage {
    pub fn now(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub key: ConversationKey,
    pub schema_version: u32,
    pub messages: Vec<ConversationMessage>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Conversation {
    /// The trailing `window` messages, oldest first.
    pub fn window(&self, window: usize) -> &[ConversationMessage] {
        let start = self.messages.len().saturating_sub(window);
        &self.messages[start..]
    }
}
