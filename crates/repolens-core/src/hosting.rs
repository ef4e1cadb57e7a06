//! Hosting platform trait.
//!
//! The ingestor only needs two calls from a version-control host: list the
//! files of a tree at a ref, and fetch one file's content. The GitHub REST
//! implementation lives in the `repolens` app crate.

use async_trait::async_trait;
use base64::Engine;
use thiserror::Error;

use crate::error::LensError;
use crate::models::RepoRef;

/// One blob in a repository tree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    /// Size in bytes, when the host reports it.
    pub size: Option<u64>,
}

impl TreeEntry {
    pub fn new(path: &str, size: Option<u64>) -> Self {
        Self {
            path: path.to_string(),
            size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Utf8,
    Base64,
}

impl ContentEncoding {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "base64" => Some(Self::Base64),
            "utf-8" | "utf8" | "" | "none" => Some(Self::Utf8),
            _ => None,
        }
    }
}

/// File content as returned by the host, possibly still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub content: String,
    pub encoding: ContentEncoding,
}

impl FileContent {
    pub fn utf8(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            encoding: ContentEncoding::Utf8,
        }
    }

    pub fn base64(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            encoding: ContentEncoding::Base64,
        }
    }

    /// Decode into UTF-8 text.
    ///
    /// Base64 payloads may contain line breaks (GitHub wraps at 60
    /// columns). Content that is not valid UTF-8 is rejected as binary.
    pub fn decode(&self) -> Result<String, HostingError> {
        match self.encoding {
            ContentEncoding::Utf8 => Ok(self.content.clone()),
            ContentEncoding::Base64 => {
                let compact: String = self
                    .content
                    .chars()
                    .filter(|c| !c.is_ascii_whitespace())
                    .collect();
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(compact.as_bytes())
                    .map_err(|e| HostingError::Decode(e.to_string()))?;
                String::from_utf8(bytes)
                    .map_err(|_| HostingError::Decode("content is not valid UTF-8".to_string()))
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HostingError {
    #[error("not found on hosting platform: {0}")]
    NotFound(String),

    #[error("hosting platform rejected credentials: {0}")]
    Unauthorized(String),

    #[error("hosting platform rate limit exceeded")]
    RateLimited,

    /// Network failure, timeout, or 5xx response.
    #[error("hosting platform request failed: {0}")]
    Transient(String),

    #[error("could not decode file content: {0}")]
    Decode(String),
}

impl HostingError {
    /// Whether the same request may succeed if retried shortly.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited)
    }
}

impl From<HostingError> for LensError {
    fn from(err: HostingError) -> Self {
        match err {
            HostingError::NotFound(what) => {
                LensError::UpstreamUnavailable(format!("repository or ref not found: {}", what))
            }
            other => LensError::UpstreamUnavailable(other.to_string()),
        }
    }
}

/// A version-control hosting platform.
#[async_trait]
pub trait HostingPlatform: Send + Sync {
    /// List every file (blob) in the tree at `repo.reference`.
    async fn list_tree(&self, repo: &RepoRef) -> Result<Vec<TreeEntry>, HostingError>;

    /// Fetch one file's content at `repo.reference`.
    async fn get_file_content(&self, repo: &RepoRef, path: &str)
        -> Result<FileContent, HostingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_with_newlines() {
        // "fn main() {}\n" wrapped the way GitHub wraps it
        let content = FileContent::base64("Zm4gbWFp\nbigpIHt9Cg==\n");
        assert_eq!(content.decode().unwrap(), "fn main() {}\n");
    }

    #[test]
    fn test_decode_utf8_passthrough() {
        assert_eq!(FileContent::utf8("hello").decode().unwrap(), "hello");
    }

    #[test]
    fn test_decode_rejects_binary() {
        // 0xFF 0xFE is not valid UTF-8
        let content = FileContent::base64("//4=");
        assert!(matches!(content.decode(), Err(HostingError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let content = FileContent::base64("***");
        assert!(content.decode().is_err());
    }

    #[test]
    fn test_encoding_parse() {
        assert_eq!(ContentEncoding::parse("base64"), Some(ContentEncoding::Base64));
        assert_eq!(ContentEncoding::parse(""), Some(ContentEncoding::Utf8));
        assert_eq!(ContentEncoding::parse("rot13"), None);
    }

    #[test]
    fn test_transient_classification() {
        assert!(HostingError::Transient("reset".into()).is_transient());
        assert!(HostingError::RateLimited.is_transient());
        assert!(!HostingError::NotFound("x".into()).is_transient());
        assert!(!HostingError::Unauthorized("x".into()).is_transient());
    }
}
