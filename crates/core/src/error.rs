use thiserror::Error;

/// Library-level errors shared across the workspace.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Caller-visible error taxonomy (see §7 of the system design). This is
/// what an HTTP adapter sitting in front of the crate would project onto
/// a status code; nothing here depends on a web framework.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("internal error ({correlation_id}): {message}")]
    Internal {
        correlation_id: String,
        message: String,
    },
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Validation { .. } => 400,
            ApiError::NotFound(_) => 404,
            ApiError::ResourceExhausted(_) => 503,
            ApiError::DependencyUnavailable(_) => 503,
            ApiError::Internal { .. } => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "INVALID_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            ApiError::DependencyUnavailable(_) => "DEPENDENCY_UNAVAILABLE",
            ApiError::Internal { .. } => "INTERNAL",
        }
    }
}
