use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EaselError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0} is not set")]
    MissingCredentials(&'static str),
    #[error("api error ({status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("{0}")]
    UpstreamBlocked(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("{provider} job failed with status '{status}'")]
    JobFailed { provider: String, status: String },
    #[error("{provider} job timed out after {seconds} seconds")]
    JobTimeout { provider: String, seconds: u64 },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EaselError {
    /// Caller-correctable request problems. Messages in this category are
    /// safe to echo back verbatim; everything else is logged server-side and
    /// reported generically.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, EaselError::InvalidInput(_))
    }

    pub fn is_persistence_failure(&self) -> bool {
        matches!(self, EaselError::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, EaselError>;
