use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Remote API failure classification.
///
/// `RateLimited` and `Transient` are retry candidates; everything else is
/// surfaced to the caller immediately.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited by remote, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("transient remote error: {0}")]
    Transient(String),

    #[error("remote error: status={status} body={body}")]
    Permanent { status: u16, body: String },
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. } | ApiError::Transient(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        // Connection-level failures have no status and are worth retrying.
        match e.status() {
            Some(status) if status.is_server_error() => Self::Transient(e.to_string()),
            Some(status) => Self::Permanent {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None => Self::Transient(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::Permanent {
            status: 0,
            body: format!("payload decode failed: {e}"),
        }
    }
}
