//! Context-scoped, multi-turn chat about a repository or one of its files.
//!
//! One conversation exists per (user, repository, scope). Stored history is
//! append-only and never trimmed; only the prompt is windowed to the last
//! `conversation.window` messages. Each exchange persists the user message
//! and the reply together, so a thread never ends on an unanswered turn.
//!
//! When the provider fails or times out, the user message is still stored,
//! followed by a fixed apology, and the caller gets
//! [`ChatOutcome::ProviderFailed`].

use std::sync::Arc;
use std::time::Duration;

use repolens_core::completion::{CompletionOptions, CompletionProvider};
use repolens_core::error::{LensError, Result};
use repolens_core::models::{
    ChatMessage, ContextScope, ContextType, Conversation, ConversationKey, ConversationMessage,
    Role,
};
use repolens_core::prompt;
use repolens_core::store::Store;
use repolens_core::tree::normalize_path;

use crate::config::ConversationConfig;
use crate::ingest::RepositoryIngestor;

/// Reply stored and returned when the provider could not answer.
pub const APOLOGY: &str =
    "Sorry, I couldn't generate a response right now. Please try again in a moment.";

/// Result of [`ConversationManager::send`].
#[derive(Debug)]
pub enum ChatOutcome {
    Answered(String),
    ProviderFailed { apology: String, error: LensError },
}

impl ChatOutcome {
    /// The assistant message that was stored.
    pub fn reply(&self) -> &str {
        match self {
            Self::Answered(reply) => reply,
            Self::ProviderFailed { apology, .. } => apology,
        }
    }

    pub fn is_answered(&self) -> bool {
        matches!(self, Self::Answered(_))
    }
}

pub struct ConversationManager {
    store: Arc<dyn Store>,
    provider: Arc<dyn CompletionProvider>,
    ingestor: Arc<RepositoryIngestor>,
    config: ConversationConfig,
    options: CompletionOptions,
}

impl ConversationManager {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn CompletionProvider>,
        ingestor: Arc<RepositoryIngestor>,
        config: ConversationConfig,
        options: CompletionOptions,
    ) -> Self {
        Self {
            store,
            provider,
            ingestor,
            config,
            options,
        }
    }

    /// Full stored history for the scope, if a conversation exists.
    pub async fn history(
        &self,
        user_id: &str,
        repository_id: &str,
        scope: &ContextScope,
    ) -> Result<Option<Conversation>> {
        let scope = checked_scope(scope)?;
        self.ingestor.get_repository(repository_id).await?;
        let key = ConversationKey::new(user_id, repository_id, scope);
        Ok(self.store.get_conversation(&key).await?)
    }

    /// Send `message` and record the exchange.
    ///
    /// # Errors
    ///
    /// - [`LensError::InvalidInput`] for an empty message or malformed scope
    /// - [`LensError::NotFound`] if the repository, or the scoped file, does
    ///   not exist
    ///
    /// Provider failures are not errors; see [`ChatOutcome::ProviderFailed`].
    pub async fn send(
        &self,
        user_id: &str,
        repository_id: &str,
        scope: &ContextScope,
        message: &str,
    ) -> Result<ChatOutcome> {
        let message = message.trim();
        if message.is_empty() {
            return Err(LensError::InvalidInput("message must not be empty".to_string()));
        }
        let scope = checked_scope(scope)?;
        let repo = self.ingestor.get_repository(repository_id).await?;

        let file_content = match (&scope.context_type, &scope.path) {
            (ContextType::File, Some(path)) => self.file_context(repository_id, path).await?,
            _ => None,
        };
        let analysis = self.store.get_repository_analysis(repository_id).await?;

        let key = ConversationKey::new(user_id, repository_id, scope);
        let history = self.store.get_conversation(&key).await?;
        let window = history
            .as_ref()
            .map(|c| c.window(self.config.window))
            .unwrap_or_default();

        let mut messages = Vec::with_capacity(window.len() + 2);
        messages.push(prompt::chat_system(
            &repo.full_name(),
            &key.scope,
            analysis.as_ref(),
            file_content.as_deref(),
            self.config.file_context_chars,
        ));
        messages.extend(window.iter().map(ConversationMessage::to_chat));
        messages.push(ChatMessage::user(message));
        tracing::debug!(
            repository = %repo.full_name(),
            scope = key.scope.context_type.as_str(),
            window = window.len(),
            "chat request"
        );

        let outcome = match self.complete(&messages).await {
            Ok(reply) => ChatOutcome::Answered(reply),
            Err(error) => {
                tracing::warn!(repository = %repo.full_name(), error = %error, "chat failed; storing apology");
                ChatOutcome::ProviderFailed {
                    apology: APOLOGY.to_string(),
                    error,
                }
            }
        };

        self.store
            .append_messages(
                &key,
                &[
                    ConversationMessage::now(Role::User, message),
                    ConversationMessage::now(Role::Assistant, outcome.reply()),
                ],
            )
            .await?;
        Ok(outcome)
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let limit = Duration::from_secs(self.config.call_timeout_secs);
        match tokio::time::timeout(limit, self.provider.complete(messages, self.options)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(LensError::UpstreamUnavailable(format!(
                "chat timed out after {}s",
                self.config.call_timeout_secs
            ))),
        }
    }

    /// Content of the scoped file. The file must exist; content that cannot
    /// be fetched right now is left out of the prompt.
    async fn file_context(&self, repository_id: &str, path: &str) -> Result<Option<String>> {
        match self.ingestor.file(repository_id, path).await {
            Ok(file) => Ok(file.content),
            Err(err @ (LensError::NotFound(_) | LensError::Storage(_))) => Err(err),
            Err(err) => {
                tracing::warn!(%path, error = %err, "file content unavailable for chat");
                Ok(None)
            }
        }
    }
}

/// Validate `scope` and normalize its file path.
fn checked_scope(scope: &ContextScope) -> Result<ContextScope> {
    if !scope.is_valid() {
        return Err(LensError::InvalidInput(
            "file scope needs a path; repository scope takes none".to_string(),
        ));
    }
    Ok(match &scope.path {
        Some(path) => {
            let path = normalize_path(path);
            if path.is_empty() {
                return Err(LensError::InvalidInput("file path must not be empty".to_string()));
            }
            ContextScope::file(&path)
        }
        None => ContextScope::repository(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_scope_normalizes_path() {
        let scope = checked_scope(&ContextScope::file("./src//main.rs")).unwrap();
        assert_eq!(scope, ContextScope::file("src/main.rs"));
        assert_eq!(
            checked_scope(&ContextScope::repository()).unwrap(),
            ContextScope::repository()
        );
    }

    #[test]
    fn test_checked_scope_rejects_malformed() {
        assert!(matches!(
            checked_scope(&ContextScope::file("")),
            Err(LensError::InvalidInput(_))
        ));
        let bad = ContextScope {
            context_type: ContextType::Repository,
            path: Some("src/main.rs".into()),
        };
        assert!(matches!(checked_scope(&bad), Err(LensError::InvalidInput(_))));
    }

    #[test]
    fn test_outcome_reply() {
        assert_eq!(ChatOutcome::Answered("hi".into()).reply(), "hi");
        let failed = ChatOutcome::ProviderFailed {
            apology: APOLOGY.to_string(),
            error: LensError::UpstreamUnavailable("down".into()),
        };
        assert_eq!(failed.reply(), APOLOGY);
        assert!(!failed.is_answered());
    }
}
