//! AI-assisted analysis of files, symbols and whole repositories.
//!
//! Each request builds a strict JSON-only prompt, calls the completion
//! provider under `analysis.call_timeout_secs`, and parses the reply with
//! [`parse_or_degrade`]. Malformed output becomes a degraded record; only
//! a provider failure or timeout is an error, and then nothing is stored.
//!
//! Repository analyses are grounded in [`Heuristics`]: detected frameworks,
//! patterns, build system and entry points are fed into the prompt and
//! merged into the stored record.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use repolens_core::completion::{CompletionOptions, CompletionProvider};
use repolens_core::error::{LensError, Result};
use repolens_core::explain::{
    parse_or_degrade, Explained, FileExplanation, RepositoryOverview, SymbolExplanation,
};
use repolens_core::heuristics::{is_manifest, Heuristics};
use repolens_core::models::{ChatMessage, FileAnalysis, FileNode, RepositoryAnalysis};
use repolens_core::prompt::{self, RepositoryPromptLimits, SampleFile};
use repolens_core::store::Store;
use repolens_core::symbols::excerpt;
use repolens_core::tree::{build_tree, TreeNode};

use crate::config::AnalysisConfig;
use crate::ingest::{detect_heuristics, RepositoryIngestor};

const README_NAMES: &[&str] = &["README.md", "README", "README.rst", "README.txt", "readme.md"];

pub struct AnalysisService {
    store: Arc<dyn Store>,
    provider: Arc<dyn CompletionProvider>,
    ingestor: Arc<RepositoryIngestor>,
    config: AnalysisConfig,
    options: CompletionOptions,
}

impl AnalysisService {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn CompletionProvider>,
        ingestor: Arc<RepositoryIngestor>,
        config: AnalysisConfig,
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

    async fn complete(&self, messages: Vec<ChatMessage>, kind: &str) -> Result<String> {
        let prompt_chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
        tracing::debug!(kind, prompt_chars, model = self.provider.model_name(), "analysis request");

        let limit = Duration::from_secs(self.config.call_timeout_secs);
        match tokio::time::timeout(limit, self.provider.complete(&messages, self.options)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(LensError::UpstreamUnavailable(format!(
                "{} analysis timed out after {}s",
                kind, self.config.call_timeout_secs
            ))),
        }
    }

    /// Explain one file's role.
    pub async fn explain_file(
        &self,
        content: &str,
        path: &str,
        repo_context: Option<&str>,
    ) -> Result<Explained<FileExplanation>> {
        let messages = prompt::file_explanation(path, content, repo_context, self.config.file_chars);
        let raw = self.complete(messages, "file").await?;
        Ok(parse_or_degrade(&raw, FileExplanation::fallback))
    }

    /// Explain one declaration.
    pub async fn explain_symbol(
        &self,
        code: &str,
        name: &str,
        kind: &str,
        file_context: Option<&str>,
    ) -> Result<Explained<SymbolExplanation>> {
        let messages =
            prompt::symbol_explanation(code, name, kind, file_context, self.config.symbol_chars);
        let raw = self.complete(messages, "symbol").await?;
        Ok(parse_or_degrade(&raw, |r| SymbolExplanation::fallback(r, name, kind)))
    }

    /// Summarize a repository from its tree, sample files and heuristics.
    ///
    /// Frameworks, patterns, build system and entry points of the result
    /// always include what the heuristics detected.
    pub async fn analyze_repository(
        &self,
        repo_name: &str,
        tree: &TreeNode,
        samples: &[SampleFile],
        heuristics: &Heuristics,
    ) -> Result<Explained<RepositoryOverview>> {
        let limits = RepositoryPromptLimits {
            tree_chars: self.config.tree_chars,
            sample_chars: self.config.sample_chars,
        };
        let messages =
            prompt::repository_analysis(repo_name, &tree.render(), samples, heuristics, limits);
        let raw = self.complete(messages, "repository").await?;
        let mut parsed = parse_or_degrade(&raw, RepositoryOverview::fallback);
        ground_overview(&mut parsed.value, heuristics);
        Ok(parsed)
    }

    /// Analyze one file of a synced repository and store the result.
    pub async fn analyze_file(
        &self,
        repository_id: &str,
        path: &str,
    ) -> Result<Explained<FileAnalysis>> {
        let file = self.ingestor.file(repository_id, path).await?;
        let content = text_content(&file)?;
        let repo_context = self
            .store
            .get_repository_analysis(repository_id)
            .await?
            .map(|a| a.summary);

        let explained = self
            .explain_file(content, &file.path, repo_context.as_deref())
            .await?;
        let value = explained.value;
        let analysis = FileAnalysis {
            file_id: file.id.clone(),
            repository_id: repository_id.to_string(),
            path: file.path.clone(),
            purpose: value.purpose,
            layer: value.layer,
            summary: value.summary,
            exports: value.exports,
            imports: value.imports,
            key_functions: value.key_functions,
            generated_at: chrono::Utc::now().timestamp(),
        };
        self.store.upsert_file_analysis(&analysis).await?;
        tracing::info!(path = %file.path, degraded = explained.degraded, "file analyzed");
        Ok(Explained {
            value: analysis,
            degraded: explained.degraded,
        })
    }

    /// Explain a named symbol of a file, caching the explanation on it.
    ///
    /// A cached explanation is returned without calling the provider.
    pub async fn explain_symbol_in_file(
        &self,
        repository_id: &str,
        path: &str,
        symbol_name: &str,
    ) -> Result<Explained<SymbolExplanation>> {
        let file = self.ingestor.file(repository_id, path).await?;
        let content = text_content(&file)?;
        let symbols = self.store.list_symbols(&file.id).await?;
        let symbol = symbols
            .iter()
            .find(|s| s.name == symbol_name)
            .ok_or_else(|| {
                LensError::NotFound(format!("symbol {} in {}", symbol_name, file.path))
            })?;

        if let Some(cached) = &symbol.explanation {
            if let Ok(value) = serde_json::from_str::<SymbolExplanation>(cached) {
                return Ok(Explained {
                    value,
                    degraded: false,
                });
            }
        }

        let code = excerpt(content, symbol.start_line, symbol.end_line);
        let context = match &file.language {
            Some(language) => format!("{} ({})", file.path, language),
            None => file.path.clone(),
        };
        let explained = self
            .explain_symbol(&code, &symbol.name, symbol.kind.as_str(), Some(&context))
            .await?;

        // degraded output is returned but never cached
        if !explained.degraded {
            let json = serde_json::to_string(&explained.value)
                .map_err(|e| LensError::Storage(e.into()))?;
            self.store.set_symbol_explanation(&symbol.id, &json).await?;
        }
        Ok(explained)
    }

    /// Analyze the whole repository and store the result.
    pub async fn analyze(&self, repository_id: &str) -> Result<Explained<RepositoryAnalysis>> {
        let repo = self.ingestor.get_repository(repository_id).await?;
        if repo.current_generation.is_none() {
            return Err(LensError::InvalidInput(format!(
                "repository {} has not been synced",
                repo.full_name()
            )));
        }

        let files = self.store.list_files(repository_id).await?;
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        let tree = build_tree(&paths);
        let heuristics = detect_heuristics(&files);
        let samples: Vec<SampleFile> =
            select_sample_files(&files, &heuristics, self.config.sample_files)
                .into_iter()
                .filter_map(|f| {
                    f.content.as_ref().map(|content| SampleFile {
                        path: f.path.clone(),
                        content: content.clone(),
                    })
                })
                .collect();

        let explained = self
            .analyze_repository(&repo.full_name(), &tree, &samples, &heuristics)
            .await?;
        let value = explained.value;
        let analysis = RepositoryAnalysis {
            repository_id: repo.id.clone(),
            summary: value.summary,
            architecture: value.architecture,
            patterns: value.patterns,
            frameworks: value.frameworks,
            build_system: value.build_system,
            entry_points: value.entry_points,
            layers: value.layers,
            generated_at: chrono::Utc::now().timestamp(),
        };
        self.store.upsert_repository_analysis(&analysis).await?;
        tracing::info!(
            repository = %repo.full_name(),
            samples = samples.len(),
            degraded = explained.degraded,
            "repository analyzed"
        );
        Ok(Explained {
            value: analysis,
            degraded: explained.degraded,
        })
    }

    /// Stored analysis of a file, if any.
    pub async fn file_analysis(
        &self,
        repository_id: &str,
        path: &str,
    ) -> Result<Option<FileAnalysis>> {
        let file = self.ingestor.file(repository_id, path).await?;
        Ok(self.store.get_file_analysis(&file.id).await?)
    }

    /// Stored analysis of a repository, if any.
    pub async fn repository_analysis(&self, repository_id: &str) -> Result<Option<RepositoryAnalysis>> {
        self.ingestor.get_repository(repository_id).await?;
        Ok(self.store.get_repository_analysis(repository_id).await?)
    }
}

fn text_content(file: &FileNode) -> Result<&str> {
    file.content.as_deref().ok_or_else(|| {
        LensError::InvalidInput(format!("{} has no text content to analyze", file.path))
    })
}

/// Pick up to `limit` files with content to represent the repository.
///
/// Priority: manifests, then detected entry points, then the root README,
/// then remaining source files, shallowest paths first. Within a tier the
/// order is by path, so the selection is deterministic.
pub fn select_sample_files<'a>(
    files: &'a [FileNode],
    heuristics: &Heuristics,
    limit: usize,
) -> Vec<&'a FileNode> {
    let entry_points: BTreeSet<&str> = heuristics.entry_points.iter().map(String::as_str).collect();
    let tier = |f: &FileNode| -> u8 {
        if is_manifest(&f.path) {
            0
        } else if entry_points.contains(f.path.as_str()) {
            1
        } else if README_NAMES.contains(&f.path.as_str()) {
            2
        } else if f.language.is_some() {
            3
        } else {
            4
        }
    };

    let mut candidates: Vec<&FileNode> = files
        .iter()
        .filter(|f| f.content.as_deref().is_some_and(|c| !c.trim().is_empty()))
        .collect();
    candidates.sort_by(|a, b| {
        tier(a)
            .cmp(&tier(b))
            .then(depth(&a.path).cmp(&depth(&b.path)))
            .then(a.path.cmp(&b.path))
    });
    candidates.truncate(limit);
    candidates
}

fn depth(path: &str) -> usize {
    path.matches('/').count()
}

/// Lowercase alphanumerics, so "Next.js" and "nextjs" compare equal.
fn label_key(label: &str) -> String {
    label
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Heuristic labels first, then model labels not already present.
fn merge_labels(detected: &BTreeSet<String>, model: Vec<String>) -> Vec<String> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut merged = Vec::new();
    for label in detected.iter().cloned().chain(model) {
        let label = label.trim().to_string();
        if label.is_empty() {
            continue;
        }
        if seen.insert(label_key(&label)) {
            merged.push(label);
        }
    }
    merged
}

/// Make the model's overview agree with deterministic evidence.
fn ground_overview(overview: &mut RepositoryOverview, heuristics: &Heuristics) {
    overview.frameworks = merge_labels(&heuristics.frameworks, std::mem::take(&mut overview.frameworks));
    overview.patterns = merge_labels(&heuristics.patterns, std::mem::take(&mut overview.patterns));
    if let Some(build) = &heuristics.build_system {
        overview.build_system = build.clone();
    }
    let detected: BTreeSet<String> = heuristics.entry_points.iter().cloned().collect();
    let mut entry_points: Vec<String> = heuristics.entry_points.clone();
    for point in std::mem::take(&mut overview.entry_points) {
        if !detected.contains(&point) && !entry_points.contains(&point) {
            entry_points.push(point);
        }
    }
    overview.entry_points = entry_points;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, content: Option<&str>) -> FileNode {
        let node = FileNode::new("r", "g", path, 10);
        match content {
            Some(c) => node.with_content(c.to_string()),
            None => node,
        }
    }

    #[test]
    fn test_select_sample_files_priority() {
        let files = vec![
            file("src/utils/deep/helper.ts", Some("export {}")),
            file("src/index.ts", Some("main()")),
            file("README.md", Some("# Web")),
            file("package.json", Some("{}")),
            file("assets/big.ts", None),
            file("src/a.ts", Some("   ")),
        ];
        let heuristics = Heuristics {
            entry_points: vec!["src/index.ts".to_string()],
            ..Default::default()
        };
        let picked: Vec<&str> = select_sample_files(&files, &heuristics, 10)
            .iter()
            .map(|f| f.path.as_str())
            .collect();
        assert_eq!(
            picked,
            vec!["package.json", "src/index.ts", "README.md", "src/utils/deep/helper.ts"]
        );

        assert_eq!(select_sample_files(&files, &heuristics, 2).len(), 2);
        assert!(select_sample_files(&[], &heuristics, 5).is_empty());
    }

    #[test]
    fn test_merge_labels_dedupes_case_and_punctuation() {
        let detected: BTreeSet<String> = ["Next.js".to_string(), "React".to_string()].into();
        let merged = merge_labels(
            &detected,
            vec!["nextjs".into(), "Tailwind CSS".into(), "react".into(), "".into()],
        );
        assert_eq!(merged, vec!["Next.js", "React", "Tailwind CSS"]);
    }

    #[test]
    fn test_ground_overview_keeps_heuristic_facts() {
        let mut overview = RepositoryOverview {
            frameworks: vec!["Express".into()],
            build_system: "make".into(),
            entry_points: vec!["src/server.ts".into()],
            ..Default::default()
        };
        let mut heuristics = Heuristics::default();
        heuristics.frameworks.insert("Next.js".into());
        heuristics.patterns.insert("Service Layer".into());
        heuristics.build_system = Some("npm".into());
        heuristics.entry_points = vec!["src/app/page.tsx".into()];

        ground_overview(&mut overview, &heuristics);
        assert_eq!(overview.frameworks, vec!["Next.js", "Express"]);
        assert_eq!(overview.patterns, vec!["Service Layer"]);
        assert_eq!(overview.build_system, "npm");
        assert_eq!(overview.entry_points, vec!["src/app/page.tsx", "src/server.ts"]);
    }

    #[test]
    fn test_ground_degraded_overview_uses_heuristics() {
        let mut overview = RepositoryOverview::fallback("not json");
        let mut heuristics = Heuristics::default();
        heuristics.frameworks.insert("Django".into());
        ground_overview(&mut overview, &heuristics);
        assert_eq!(overview.summary, "not json");
        assert_eq!(overview.frameworks, vec!["Django"]);
        assert!(overview.build_system.is_empty());
    }
}
