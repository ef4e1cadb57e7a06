//! TOML configuration.
//!
//! Every section except `[db]` is optional; missing keys fall back to the
//! defaults below. [`load_config`] rejects values the services cannot run
//! with.
//!
//! ```toml
//! [db]
//! path = "./data/repolens.sqlite"
//!
//! [github]
//! token_env = "GITHUB_TOKEN"
//!
//! [completion]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [ingest]
//! max_file_bytes = 200000
//! exclude_globs = ["**/fixtures/**"]
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use repolens_core::completion::CompletionOptions;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitHubConfig {
    #[serde(default = "default_github_api")]
    pub api_base: String,
    /// Environment variable holding the access token. Anonymous when unset.
    #[serde(default = "default_github_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: default_github_api(),
            token_env: default_github_token_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}
fn default_github_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: default_completion_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_completion_timeout_secs(),
            max_retries: default_max_retries(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Sampling options passed with every request.
    pub fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_completion_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_completion_timeout_secs() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    2048
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Files larger than this are listed but their content is not fetched.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Retries per hosting call (tree listing and each content fetch).
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
    /// First backoff delay; doubles on each retry.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Fraction of failed content fetches above which a sync fails.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
    /// Extra exclusions on top of the built-in denylist.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            concurrency: default_concurrency(),
            fetch_retries: default_fetch_retries(),
            retry_base_ms: default_retry_base_ms(),
            failure_threshold: default_failure_threshold(),
            sync_timeout_secs: default_sync_timeout_secs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    200_000
}
fn default_concurrency() -> usize {
    8
}
fn default_fetch_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_failure_threshold() -> f64 {
    0.5
}
fn default_sync_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_file_chars")]
    pub file_chars: usize,
    #[serde(default = "default_symbol_chars")]
    pub symbol_chars: usize,
    #[serde(default = "default_tree_chars")]
    pub tree_chars: usize,
    #[serde(default = "default_sample_files")]
    pub sample_files: usize,
    #[serde(default = "default_sample_chars")]
    pub sample_chars: usize,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            file_chars: default_file_chars(),
            symbol_chars: default_symbol_chars(),
            tree_chars: default_tree_chars(),
            sample_files: default_sample_files(),
            sample_chars: default_sample_chars(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_file_chars() -> usize {
    12_000
}
fn default_symbol_chars() -> usize {
    6_000
}
fn default_tree_chars() -> usize {
    4_000
}
fn default_sample_files() -> usize {
    8
}
fn default_sample_chars() -> usize {
    2_000
}
fn default_call_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConversationConfig {
    /// Number of trailing messages sent to the provider.
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default = "default_file_context_chars")]
    pub file_context_chars: usize,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            file_context_chars: default_file_context_chars(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_window() -> usize {
    10
}
fn default_file_context_chars() -> usize {
    8_000
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate completion
    match config.completion.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.completion.is_enabled() && config.completion.model.is_none() {
        anyhow::bail!(
            "completion.model must be specified when provider is '{}'",
            config.completion.provider
        );
    }
    if !(0.0..=2.0).contains(&config.completion.temperature) {
        anyhow::bail!("completion.temperature must be in [0.0, 2.0]");
    }
    if config.completion.max_tokens == 0 {
        anyhow::bail!("completion.max_tokens must be > 0");
    }

    // Validate ingest
    if config.ingest.concurrency == 0 {
        anyhow::bail!("ingest.concurrency must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.ingest.failure_threshold) {
        anyhow::bail!("ingest.failure_threshold must be in [0.0, 1.0]");
    }
    if config.ingest.sync_timeout_secs == 0 {
        anyhow::bail!("ingest.sync_timeout_secs must be > 0");
    }
    for glob in &config.ingest.exclude_globs {
        globset::Glob::new(glob)
            .with_context(|| format!("Invalid ingest.exclude_globs pattern: {}", glob))?;
    }

    // Validate analysis and conversation limits
    if config.analysis.file_chars == 0 || config.analysis.tree_chars == 0 {
        anyhow::bail!("analysis.file_chars and analysis.tree_chars must be > 0");
    }
    if config.conversation.window == 0 {
        anyhow::bail!("conversation.window must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("[db]\npath = \"./data/lens.sqlite\"\n").unwrap();
        assert_eq!(config.github.api_base, "https://api.github.com");
        assert!(!config.completion.is_enabled());
        assert_eq!(config.ingest.failure_threshold, 0.5);
        assert_eq!(config.ingest.concurrency, 8);
        assert_eq!(config.conversation.window, 10);
        assert_eq!(config.conversation.file_context_chars, 8000);
    }

    #[test]
    fn test_openai_requires_model() {
        let err = parse_config("[db]\npath = \"x\"\n[completion]\nprovider = \"openai\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("completion.model"));

        let ok = parse_config(
            "[db]\npath = \"x\"\n[completion]\nprovider = \"openai\"\nmodel = \"gpt-4o-mini\"\n",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_rejects_unknown_provider_and_bad_threshold() {
        assert!(parse_config("[db]\npath = \"x\"\n[completion]\nprovider = \"magic\"\n").is_err());
        assert!(parse_config("[db]\npath = \"x\"\n[ingest]\nfailure_threshold = 1.5\n").is_err());
        assert!(parse_config("[db]\npath = \"x\"\n[ingest]\nexclude_globs = [\"[\"]\n").is_err());
    }

    #[test]
    fn test_example_config_parses() {
        let config = parse_config(include_str!("../config/repolens.example.toml")).unwrap();
        assert!(config.completion.is_enabled());
        assert_eq!(config.completion.options().max_tokens, 2048);
        assert_eq!(config.ingest.exclude_globs.len(), 2);
        assert_eq!(config.analysis.sample_files, 8);
    }
}
