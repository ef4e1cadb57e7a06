//! Repository ingestion.
//!
//! [`RepositoryIngestor::start_sync`] runs the whole sync flow:
//!
//! ```text
//! try_begin_sync ─▶ list tree ─▶ denylist ─▶ fetch contents ─▶ scan symbols
//!                      (retried)              (bounded pool,
//!                                              per-file retries)
//!       ─▶ stage generation ─▶ commit (swap + ready + GC) ─▶ SyncReport
//! ```
//!
//! Any failure discards the staged generation and moves the repository to
//! `error` with the reason; the previously committed generation stays
//! readable throughout. The hosting phase runs under
//! `ingest.sync_timeout_secs`. Each sync holds the repository under its
//! generation id, and only the holder may commit or fail it.

use anyhow::Result as AnyResult;
use futures::stream::{self, StreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use repolens_core::error::{LensError, Result};
use repolens_core::heuristics::{is_manifest, merge_dependencies, Heuristics};
use repolens_core::hosting::{HostingError, HostingPlatform};
use repolens_core::models::{
    content_hash, extension_of, FileNode, RepoRef, RepoStatus, Repository, Symbol,
};
use repolens_core::store::Store;
use repolens_core::symbols::scan_symbols;
use repolens_core::tree::{build_tree, normalize_path, TreeNode};

use crate::config::IngestConfig;
use crate::progress::{SyncProgressEvent, SyncProgressReporter};

/// Directory names never ingested, at any depth.
/// Grace period past `sync_timeout_secs` before a `syncing` repository may
/// be taken over. Covers staging and commit, which run outside the timeout.
pub const STALE_SYNC_GRACE_SECS: u64 = 300;

const DENY_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "bower_components",
    "vendor",
    "target",
    "dist",
    "build",
    "out",
    ".next",
    ".nuxt",
    "coverage",
    "__pycache__",
    ".venv",
    "venv",
    ".tox",
    ".idea",
    ".cache",
];

/// Extensions of binary or generated files.
const DENY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "psd", "pdf", "zip", "gz", "tgz",
    "bz2", "xz", "tar", "rar", "7z", "jar", "war", "class", "exe", "dll", "so", "dylib", "o",
    "a", "lib", "bin", "obj", "wasm", "woff", "woff2", "ttf", "otf", "eot", "mp3", "mp4", "mov",
    "avi", "wav", "ogg", "webm", "flac", "pyc", "pyo", "db", "sqlite", "map",
];

/// Lockfiles and OS droppings.
const DENY_FILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.lock",
    "poetry.lock",
    "Pipfile.lock",
    "composer.lock",
    "Gemfile.lock",
    "go.sum",
    ".DS_Store",
    "Thumbs.db",
];

/// Built-in exclusions plus configured `exclude_globs`.
#[derive(Clone)]
pub struct Denylist {
    globs: GlobSet,
}

impl Denylist {
    pub fn new(exclude_globs: &[String]) -> AnyResult<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude_globs {
            builder.add(Glob::new(pattern)?);
        }
        Ok(Self {
            globs: builder.build()?,
        })
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        let mut segments: Vec<&str> = path.split('/').collect();
        let Some(name) = segments.pop() else {
            return true;
        };
        if segments.iter().any(|dir| DENY_DIRS.contains(dir)) {
            return true;
        }
        if DENY_FILES.contains(&name) || name.ends_with(".min.js") || name.ends_with(".min.css") {
            return true;
        }
        if let Some(ext) = extension_of(name) {
            if DENY_EXTENSIONS.contains(&ext.as_str()) {
                return true;
            }
        }
        self.globs.is_match(path)
    }
}

/// Files whose content could not be fetched after retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialIngestion {
    pub unavailable: Vec<String>,
    /// Content fetches attempted.
    pub attempted: usize,
}

/// Outcome of a successful sync.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub repository_id: String,
    pub generation: String,
    pub files: usize,
    pub excluded: usize,
    /// Files whose content was stored.
    pub fetched: usize,
    /// Files over `max_file_bytes`, kept without content.
    pub oversized: usize,
    /// Files whose content was not text.
    pub binary: usize,
    pub symbols: usize,
    pub heuristics: Heuristics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<PartialIngestion>,
    pub duration_ms: u64,
}

/// Everything gathered from the hosting platform for one generation.
struct Collected {
    files: Vec<FileNode>,
    symbols: Vec<Symbol>,
    excluded: usize,
    fetched: usize,
    oversized: usize,
    binary: usize,
    heuristics: Heuristics,
    partial: Option<PartialIngestion>,
}

/// Imports repositories and keeps their file model in sync with the host.
#[derive(Clone)]
pub struct RepositoryIngestor {
    store: Arc<dyn Store>,
    hosting: Arc<dyn HostingPlatform>,
    config: IngestConfig,
    denylist: Denylist,
}

impl RepositoryIngestor {
    pub fn new(
        store: Arc<dyn Store>,
        hosting: Arc<dyn HostingPlatform>,
        config: IngestConfig,
    ) -> AnyResult<Self> {
        let denylist = Denylist::new(&config.exclude_globs)?;
        Ok(Self {
            store,
            hosting,
            config,
            denylist,
        })
    }

    /// Register a repository for `user_id`, or return the existing record
    /// for the same owner, name and ref.
    pub async fn add_repository(
        &self,
        user_id: &str,
        owner: &str,
        name: &str,
        reference: &str,
    ) -> Result<Repository> {
        for (field, value) in [("user", user_id), ("owner", owner), ("name", name), ("ref", reference)] {
            if value.trim().is_empty() {
                return Err(LensError::InvalidInput(format!("{} must not be empty", field)));
            }
        }
        if owner.contains('/') || name.contains('/') {
            return Err(LensError::InvalidInput(
                "owner and name must not contain '/'".to_string(),
            ));
        }

        let candidate = Repository::new(user_id, &RepoRef::new(owner, name, reference));
        let stored = self.store.insert_repository(&candidate).await?;
        if stored.id == candidate.id {
            tracing::info!(repository = %stored.full_name(), id = %stored.id, "repository added");
        }
        Ok(stored)
    }

    pub async fn list_repositories(&self, user_id: &str) -> Result<Vec<Repository>> {
        Ok(self.store.list_repositories(user_id).await?)
    }

    pub async fn get_repository(&self, repository_id: &str) -> Result<Repository> {
        self.store
            .get_repository(repository_id)
            .await?
            .ok_or_else(|| LensError::NotFound(format!("repository {}", repository_id)))
    }

    /// Delete a repository and everything derived from it.
    pub async fn remove_repository(&self, repository_id: &str) -> Result<()> {
        if !self.store.delete_repository(repository_id).await? {
            return Err(LensError::NotFound(format!("repository {}", repository_id)));
        }
        tracing::info!(id = %repository_id, "repository removed");
        Ok(())
    }

    /// Fetch the repository's current tree and contents from the host and
    /// replace its file model.
    ///
    /// Once the repository is moved to `syncing`, the sync runs on its own
    /// task: dropping the returned future does not stop it, and it always
    /// ends in `ready` or `error`. A repository left in `syncing` by a dead
    /// process is taken over once its sync is older than
    /// `sync_timeout_secs + STALE_SYNC_GRACE_SECS`.
    ///
    /// # Errors
    ///
    /// - [`LensError::NotFound`] if the repository does not exist
    /// - [`LensError::AlreadyInProgress`] if a sync is already running
    /// - [`LensError::UpstreamUnavailable`] if listing fails, too many
    ///   fetches fail, or the sync times out
    pub async fn start_sync(
        &self,
        repository_id: &str,
        progress: Arc<dyn SyncProgressReporter>,
    ) -> Result<SyncReport> {
        let repo = self.get_repository(repository_id).await?;
        let generation = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        let stale_before = now - self.stale_after_secs();
        if !self
            .store
            .try_begin_sync(repository_id, &generation, now, stale_before)
            .await?
        {
            if self.store.get_repository(repository_id).await?.is_none() {
                return Err(LensError::NotFound(format!("repository {}", repository_id)));
            }
            return Err(LensError::AlreadyInProgress(repository_id.to_string()));
        }
        if repo.status == RepoStatus::Syncing {
            tracing::warn!(repository = %repo.full_name(), "taking over an abandoned sync");
        }
        tracing::info!(repository = %repo.full_name(), %generation, "sync started");

        let worker = self.clone();
        let task = tokio::spawn(async move { worker.run_sync(repo, generation, progress).await });
        task.await
            .map_err(|e| LensError::Storage(anyhow::anyhow!("sync task failed: {}", e)))?
    }

    /// Seconds after which a `syncing` repository counts as abandoned.
    fn stale_after_secs(&self) -> i64 {
        self.config
            .sync_timeout_secs
            .saturating_add(STALE_SYNC_GRACE_SECS)
            .min(i64::MAX as u64) as i64
    }

    async fn run_sync(
        &self,
        repo: Repository,
        generation: String,
        progress: Arc<dyn SyncProgressReporter>,
    ) -> Result<SyncReport> {
        let started = Instant::now();
        match self.sync_generation(&repo, &generation, progress.as_ref()).await {
            Ok(collected) => {
                let report = SyncReport {
                    repository_id: repo.id.clone(),
                    generation,
                    files: collected.files.len(),
                    excluded: collected.excluded,
                    fetched: collected.fetched,
                    oversized: collected.oversized,
                    binary: collected.binary,
                    symbols: collected.symbols.len(),
                    heuristics: collected.heuristics,
                    partial: collected.partial,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                tracing::info!(
                    repository = %repo.full_name(),
                    files = report.files,
                    symbols = report.symbols,
                    duration_ms = report.duration_ms,
                    "sync complete"
                );
                Ok(report)
            }
            Err(err) => {
                if let Err(e) = self.store.discard_generation(&repo.id, &generation).await {
                    tracing::warn!(error = %e, %generation, "failed to discard staged generation");
                }
                if !self
                    .store
                    .fail_sync(&repo.id, &generation, &err.to_string())
                    .await?
                {
                    tracing::warn!(repository = %repo.full_name(), %generation, "sync no longer holds the repository");
                }
                tracing::warn!(repository = %repo.full_name(), error = %err, "sync failed");
                Err(err)
            }
        }
    }

    async fn sync_generation(
        &self,
        repo: &Repository,
        generation: &str,
        progress: &dyn SyncProgressReporter,
    ) -> Result<Collected> {
        let limit = Duration::from_secs(self.config.sync_timeout_secs);
        let collected = tokio::time::timeout(limit, self.collect(repo, generation, progress))
            .await
            .map_err(|_| {
                LensError::UpstreamUnavailable(format!(
                    "sync timed out after {}s",
                    self.config.sync_timeout_secs
                ))
            })??;

        progress.report(SyncProgressEvent::Committing {
            repository: repo.full_name(),
            files: collected.files.len() as u64,
        });
        self.store
            .stage_files(&collected.files, &collected.symbols)
            .await?;
        let committed = self
            .store
            .commit_generation(&repo.id, generation, chrono::Utc::now().timestamp())
            .await?;
        if !committed {
            return Err(LensError::Storage(anyhow::anyhow!(
                "sync of {} was superseded before commit",
                repo.full_name()
            )));
        }
        Ok(collected)
    }

    /// List, filter and fetch. Touches only the hosting platform.
    async fn collect(
        &self,
        repo: &Repository,
        generation: &str,
        progress: &dyn SyncProgressReporter,
    ) -> Result<Collected> {
        let repo_ref = &repo.repo_ref();
        let full_name = repo.full_name();
        let hosting: &dyn HostingPlatform = self.hosting.as_ref();

        progress.report(SyncProgressEvent::Listing {
            repository: full_name.clone(),
        });
        let entries = with_retries(
            self.config.fetch_retries,
            self.config.retry_base_ms,
            "list tree",
            move || hosting.list_tree(repo_ref),
        )
        .await?;

        // normalise, drop excluded, collapse duplicates (last wins)
        let mut excluded = 0;
        let mut unique: BTreeMap<String, Option<u64>> = BTreeMap::new();
        for entry in entries {
            let path = normalize_path(&entry.path);
            if path.is_empty() || self.denylist.is_excluded(&path) {
                excluded += 1;
                continue;
            }
            if unique.insert(path.clone(), entry.size).is_some() {
                tracing::warn!(%path, "duplicate path in tree listing; keeping the later entry");
            }
        }

        let mut files: Vec<FileNode> = unique
            .into_iter()
            .map(|(path, size)| FileNode::new(&repo.id, generation, &path, size.unwrap_or(0)))
            .collect();

        let max_bytes = self.config.max_file_bytes;
        let wanted: Vec<(usize, String)> = files
            .iter()
            .enumerate()
            .filter(|(_, f)| f.size <= max_bytes)
            .map(|(idx, f)| (idx, f.path.clone()))
            .collect();
        let oversized = files.len() - wanted.len();
        let total = wanted.len() as u64;

        let retries = self.config.fetch_retries;
        let base_ms = self.config.retry_base_ms;
        let mut done = 0u64;
        let results: Vec<(usize, std::result::Result<String, HostingError>)> = stream::iter(wanted)
            .map(|(idx, path)| async move {
                let path_ref: &str = &path;
                let result = with_retries(retries, base_ms, path_ref, move || async move {
                    hosting.get_file_content(repo_ref, path_ref).await?.decode()
                })
                .await;
                (idx, result)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .inspect(|_| {
                done += 1;
                progress.report(SyncProgressEvent::Fetching {
                    repository: full_name.clone(),
                    n: done,
                    total,
                });
            })
            .collect()
            .await;

        let mut fetched = 0;
        let mut binary = 0;
        let mut unavailable = Vec::new();
        for (idx, result) in results {
            match result {
                Ok(content) => {
                    let file = &mut files[idx];
                    file.content_hash = Some(content_hash(&content));
                    file.content = Some(content);
                    fetched += 1;
                }
                Err(HostingError::Decode(reason)) => {
                    tracing::debug!(path = %files[idx].path, %reason, "content not stored");
                    binary += 1;
                }
                Err(err) => {
                    tracing::warn!(path = %files[idx].path, error = %err, "content unavailable");
                    unavailable.push(files[idx].path.clone());
                }
            }
        }

        let attempted = total as usize;
        if attempted > 0 {
            let ratio = unavailable.len() as f64 / attempted as f64;
            if ratio > self.config.failure_threshold {
                return Err(LensError::UpstreamUnavailable(format!(
                    "{} of {} file fetches failed",
                    unavailable.len(),
                    attempted
                )));
            }
        }
        unavailable.sort();
        let partial = (!unavailable.is_empty()).then(|| PartialIngestion {
            unavailable,
            attempted,
        });

        let mut symbols = Vec::new();
        for file in &files {
            if let Some(content) = &file.content {
                symbols.extend(scan_symbols(&file.id, file.language.as_deref(), content));
            }
        }

        let heuristics = detect_heuristics(&files);

        Ok(Collected {
            files,
            symbols,
            excluded,
            fetched,
            oversized,
            binary,
            heuristics,
            partial,
        })
    }

    /// Directory tree of the current generation.
    pub async fn file_tree(&self, repository_id: &str) -> Result<TreeNode> {
        self.get_repository(repository_id).await?;
        let files = self.store.list_files(repository_id).await?;
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        Ok(build_tree(&paths))
    }

    /// One file of the current generation, fetching and storing its
    /// content on first request if the sync did not.
    pub async fn file(&self, repository_id: &str, path: &str) -> Result<FileNode> {
        let repo = self.get_repository(repository_id).await?;
        let path = normalize_path(path);
        let file = self
            .store
            .get_file(repository_id, &path)
            .await?
            .ok_or_else(|| LensError::NotFound(format!("file {} in {}", path, repo.full_name())))?;
        if file.content.is_some() {
            return Ok(file);
        }

        let repo_ref = &repo.repo_ref();
        let path_ref: &str = &path;
        let hosting: &dyn HostingPlatform = self.hosting.as_ref();
        let fetched = with_retries(
            self.config.fetch_retries,
            self.config.retry_base_ms,
            path_ref,
            move || async move { hosting.get_file_content(repo_ref, path_ref).await?.decode() },
        )
        .await;

        match fetched {
            Ok(content) => {
                let symbols = scan_symbols(&file.id, file.language.as_deref(), &content);
                self.store
                    .set_file_content(&file.id, &content, &symbols)
                    .await?;
                tracing::debug!(%path, symbols = symbols.len(), "content fetched on demand");
                Ok(file.with_content(content))
            }
            Err(HostingError::Decode(reason)) => {
                tracing::debug!(%path, %reason, "content is not text");
                Ok(file)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Symbols of one file, ordered by start line.
    pub async fn symbols(&self, repository_id: &str, path: &str) -> Result<Vec<Symbol>> {
        let file = self.file(repository_id, path).await?;
        Ok(self.store.list_symbols(&file.id).await?)
    }
}

/// Run heuristics over a generation's paths and fetched manifests.
pub fn detect_heuristics(files: &[FileNode]) -> Heuristics {
    let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    let deps: BTreeSet<String> = merge_dependencies(files.iter().filter_map(|f| {
        match (&f.content, is_manifest(&f.path)) {
            (Some(content), true) => Some((f.path.as_str(), content.as_str())),
            _ => None,
        }
    }));
    Heuristics::detect(&paths, &deps)
}

/// Run `op`, retrying transient hosting errors with exponential backoff
/// (`base_ms`, doubling, capped at 64x).
pub async fn with_retries<T, F, Fut>(
    retries: u32,
    base_ms: u64,
    what: &str,
    mut op: F,
) -> std::result::Result<T, HostingError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, HostingError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < retries => {
                let delay = Duration::from_millis(base_ms.saturating_mul(1 << attempt.min(6)));
                attempt += 1;
                tracing::warn!(what, attempt, error = %err, "retrying hosting request");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_builtin_denylist() {
        let deny = Denylist::new(&[]).unwrap();
        assert!(deny.is_excluded("node_modules/react/index.js"));
        assert!(deny.is_excluded("web/node_modules/x.js"));
        assert!(deny.is_excluded("assets/logo.PNG"));
        assert!(deny.is_excluded("package-lock.json"));
        assert!(deny.is_excluded("public/app.min.js"));
        assert!(deny.is_excluded("target/debug/app"));
        assert!(!deny.is_excluded("src/app/page.tsx"));
        assert!(!deny.is_excluded("package.json"));
        // a file named like a denied directory is fine
        assert!(!deny.is_excluded("docs/build"));
    }

    #[test]
    fn test_configured_globs() {
        let deny = Denylist::new(&["**/fixtures/**".to_string(), "*.snap".to_string()]).unwrap();
        assert!(deny.is_excluded("tests/fixtures/a.json"));
        assert!(deny.is_excluded("ui.snap"));
        assert!(!deny.is_excluded("tests/a.rs"));
        assert!(Denylist::new(&["[".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = &AtomicU32::new(0);
        let result = with_retries(3, 1, "x", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(HostingError::Transient("reset".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let calls = &AtomicU32::new(0);
        let result: std::result::Result<(), _> = with_retries(3, 1, "x", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(HostingError::NotFound("x".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let calls = &AtomicU32::new(0);
        let result: std::result::Result<(), _> = with_retries(2, 1, "x", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(HostingError::Transient("down".into()))
        })
        .await;
        assert_eq!(result, Err(HostingError::Transient("down".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_detect_heuristics_reads_manifests() {
        let files = vec![
            FileNode::new("r", "g", "package.json", 10)
                .with_content(r#"{"dependencies": {"next": "14", "react": "18"}}"#.to_string()),
            FileNode::new("r", "g", "src/app/page.tsx", 10),
        ];
        let heuristics = detect_heuristics(&files);
        assert!(heuristics.frameworks.contains("Next.js"));
        assert!(heuristics.frameworks.contains("React"));
    }
}
