use crate::deduplication::CacheError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the monitoring pipeline.
///
/// Payloads are plain strings so the error can be cloned and handed to every
/// caller waiting on the same cache generation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Cache error: {0}")]
    Cache(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<surf::Error> for Error {
    fn from(err: surf::Error) -> Self {
        Error::Http(format!("{} ({})", err, err.status()))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::Config(format!("invalid URL: {}", err))
    }
}

impl From<CacheError<Error>> for Error {
    fn from(err: CacheError<Error>) -> Self {
        match err {
            CacheError::Compute(err) => err,
            CacheError::Abandoned => {
                Error::Cache("computation was abandoned before completing".to_string())
            }
        }
    }
}
