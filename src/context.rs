//! Composition root.
//!
//! [`Lens`] owns one instance of each collaborator (store, hosting client,
//! completion provider) and hands them to the three services. Nothing else
//! in the crate constructs adapters.

use anyhow::Result;
use std::sync::Arc;

use repolens_core::completion::CompletionProvider;
use repolens_core::hosting::HostingPlatform;
use repolens_core::store::Store;

use crate::analysis::AnalysisService;
use crate::completion::{create_provider, DisabledProvider};
use crate::config::Config;
use crate::conversation::ConversationManager;
use crate::db;
use crate::github::GitHubClient;
use crate::ingest::RepositoryIngestor;
use crate::migrate;
use crate::sqlite_store::SqliteStore;

pub struct Lens {
    pub ingestor: Arc<RepositoryIngestor>,
    pub analysis: AnalysisService,
    pub conversations: ConversationManager,
}

impl Lens {
    /// Open the configured database (migrating it), and wire the GitHub
    /// client and completion provider into the services.
    ///
    /// A completion provider that cannot be built (for example, a missing
    /// API key) is replaced by [`DisabledProvider`] with a warning, so
    /// browsing and syncing keep working.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(&config.db).await?;
        migrate::run_migrations(&pool).await?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
        let hosting: Arc<dyn HostingPlatform> = Arc::new(GitHubClient::from_config(&config.github)?);
        let provider = match create_provider(&config.completion) {
            Ok(provider) => provider,
            Err(e) => {
                tracing::warn!(error = %e, "completion provider unavailable; AI features disabled");
                Arc::new(DisabledProvider)
            }
        };
        Self::from_parts(config, store, hosting, provider)
    }

    /// Wire already-built collaborators.
    pub fn from_parts(
        config: &Config,
        store: Arc<dyn Store>,
        hosting: Arc<dyn HostingPlatform>,
        provider: Arc<dyn CompletionProvider>,
    ) -> Result<Self> {
        let ingestor = Arc::new(RepositoryIngestor::new(
            store.clone(),
            hosting,
            config.ingest.clone(),
        )?);
        let options = config.completion.options();
        let analysis = AnalysisService::new(
            store.clone(),
            provider.clone(),
            ingestor.clone(),
            config.analysis.clone(),
            options,
        );
        let conversations = ConversationManager::new(
            store,
            provider,
            ingestor.clone(),
            config.conversation.clone(),
            options,
        );
        Ok(Self {
            ingestor,
            analysis,
            conversations,
        })
    }
}
