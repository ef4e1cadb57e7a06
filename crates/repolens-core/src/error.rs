use thiserror::Error;

pub type Result<T> = std::result::Result<T, LensError>;

/// Errors surfaced by the ingestion, analysis and conversation services.
#[derive(Error, Debug)]
pub enum LensError {
    /// Repository, file, symbol or conversation absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// A sync was requested while one is running for the same repository.
    #[error("sync already in progress for repository {0}")]
    AlreadyInProgress(String),

    /// Hosting platform or completion provider failed (network, auth, timeout).
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Completion provider throttling; retry after a delay.
    #[error("rate limited by upstream, try again later")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Provider output could not be parsed into the expected shape.
    ///
    /// Always recovered into a degraded record before reaching callers.
    #[error("malformed upstream output: {0}")]
    MalformedUpstreamOutput(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl LensError {
    /// Whether the same request should succeed later without any change
    /// on the caller's side (throttling, or a sync that will finish).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::AlreadyInProgress(_))
    }

    /// Short machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AlreadyInProgress(_) => "already_in_progress",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::RateLimited { .. } => "rate_limited",
            Self::MalformedUpstreamOutput(_) => "malformed_upstream_output",
            Self::InvalidInput(_) => "invalid_input",
            Self::Storage(_) => "storage",
        }
    }
}
