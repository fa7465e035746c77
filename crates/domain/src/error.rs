use thiserror::Error;

/// Errors shared across the context-assembly pipeline. Library crates return
/// these directly; the HTTP layer maps them onto status codes.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream returned malformed data: {0}")]
    UpstreamMalformed(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("token budget exhausted: {0}")]
    BudgetExhausted(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::StorageUnavailable(err.to_string())
    }
}
