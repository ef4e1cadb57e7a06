//! GitHub REST implementation of [`HostingPlatform`].
//!
//! Uses two endpoints:
//!
//! - `GET /repos/{owner}/{repo}/git/trees/{ref}?recursive=1` to list blobs
//! - `GET /repos/{owner}/{repo}/contents/{path}?ref={ref}` for one file,
//!   returned base64-encoded
//!
//! The client makes exactly one request per call. Retrying is the
//! ingestor's job, driven by [`HostingError::is_transient`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

use repolens_core::hosting::{ContentEncoding, FileContent, HostingError, HostingPlatform, TreeEntry};
use repolens_core::models::RepoRef;

use crate::config::GitHubConfig;

const USER_AGENT: &str = concat!("repolens/", env!("CARGO_PKG_VERSION"));

/// GitHub API client.
pub struct GitHubClient {
    client: reqwest::Client,
    api_base: Url,
    token: Option<String>,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

impl GitHubClient {
    /// Build a client; the token is read from the configured environment
    /// variable, and requests are anonymous when it is unset.
    pub fn from_config(config: &GitHubConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty());
        Self::new(&config.api_base, token, Duration::from_secs(config.timeout_secs))
    }

    pub fn new(api_base: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let api_base = Url::parse(api_base)
            .with_context(|| format!("Invalid github.api_base: {}", api_base))?;
        if api_base.cannot_be_a_base() {
            anyhow::bail!("github.api_base must be an http(s) URL: {}", api_base);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            api_base,
            token,
        })
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        what: &str,
    ) -> Result<T, HostingError> {
        let mut request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| HostingError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| HostingError::Transient(format!("invalid response body: {}", e)));
        }

        let rate_limited = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            == Some("0");
        Err(self.classify(status, rate_limited, what))
    }

    fn classify(&self, status: StatusCode, rate_limited: bool, what: &str) -> HostingError {
        match status.as_u16() {
            429 => HostingError::RateLimited,
            403 if rate_limited => HostingError::RateLimited,
            401 | 403 => {
                let hint = if self.token.is_none() {
                    "private repository? set GITHUB_TOKEN"
                } else {
                    "check token permissions"
                };
                HostingError::Unauthorized(format!("{} ({} {})", what, status.as_u16(), hint))
            }
            404 | 409 | 422 => HostingError::NotFound(what.to_string()),
            _ if status.is_server_error() => {
                HostingError::Transient(format!("{} returned {}", what, status))
            }
            _ => HostingError::Unauthorized(format!("{} returned {}", what, status)),
        }
    }
}

#[async_trait]
impl HostingPlatform for GitHubClient {
    async fn list_tree(&self, repo: &RepoRef) -> Result<Vec<TreeEntry>, HostingError> {
        let mut url = self.endpoint([
            "repos",
            repo.owner.as_str(),
            repo.name.as_str(),
            "git",
            "trees",
            repo.reference.as_str(),
        ]);
        url.query_pairs_mut().append_pair("recursive", "1");

        let what = format!("{}@{}", repo.full_name(), repo.reference);
        let response: TreeResponse = self.get_json(url, &what).await?;
        if response.truncated {
            tracing::warn!(repository = %what, "tree listing truncated by GitHub; some files are missing");
        }

        Ok(response
            .tree
            .into_iter()
            .filter(|item| item.kind == "blob")
            .map(|item| TreeEntry {
                path: item.path,
                size: item.size,
            })
            .collect())
    }

    async fn get_file_content(
        &self,
        repo: &RepoRef,
        path: &str,
    ) -> Result<FileContent, HostingError> {
        let mut url = self.endpoint(
            ["repos", repo.owner.as_str(), repo.name.as_str(), "contents"]
                .into_iter()
                .chain(path.split('/').filter(|s| !s.is_empty())),
        );
        url.query_pairs_mut().append_pair("ref", &repo.reference);

        let what = format!("{}:{}", repo.full_name(), path);
        let response: ContentResponse = self.get_json(url, &what).await?;

        // Files over 1 MB come back with encoding "none" and no content.
        if response.encoding == "none" {
            return Err(HostingError::Decode(format!(
                "{} is too large for the contents API",
                path
            )));
        }
        let encoding = ContentEncoding::parse(&response.encoding).ok_or_else(|| {
            HostingError::Decode(format!("unsupported encoding '{}'", response.encoding))
        })?;
        Ok(FileContent {
            content: response.content,
            encoding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(token: Option<&str>) -> GitHubClient {
        GitHubClient::new(
            "https://api.github.com",
            token.map(str::to_string),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let c = client(None);
        let url = c.endpoint(["repos", "acme", "web", "contents", "docs", "read me.md"]);
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/acme/web/contents/docs/read%20me.md"
        );
    }

    #[test]
    fn test_endpoint_with_base_path() {
        let c = GitHubClient::new("https://ghe.example.com/api/v3", None, Duration::from_secs(5))
            .unwrap();
        let url = c.endpoint(["repos", "a", "b"]);
        assert_eq!(url.as_str(), "https://ghe.example.com/api/v3/repos/a/b");
    }

    #[test]
    fn test_status_classification() {
        let c = client(None);
        assert_eq!(
            c.classify(StatusCode::NOT_FOUND, false, "acme/web"),
            HostingError::NotFound("acme/web".into())
        );
        assert_eq!(
            c.classify(StatusCode::FORBIDDEN, true, "x"),
            HostingError::RateLimited
        );
        assert!(matches!(
            c.classify(StatusCode::FORBIDDEN, false, "x"),
            HostingError::Unauthorized(_)
        ));
        assert!(c
            .classify(StatusCode::BAD_GATEWAY, false, "x")
            .is_transient());
        assert!(!c.classify(StatusCode::BAD_REQUEST, false, "x").is_transient());
    }

    #[test]
    fn test_rejects_bad_base() {
        assert!(GitHubClient::new("not a url", None, Duration::from_secs(1)).is_err());
    }
}
