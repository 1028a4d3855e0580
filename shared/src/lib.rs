// shared/src/lib.rs

/// Errors shared by every layer of the thumbnail service.
///
/// Payloads are plain strings so the type stays `Clone`: a single origin
/// fetch result is handed to every caller waiting on the same key.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("not found at origin")]
    OriginNotFound,
    #[error("origin: {0}")]
    Origin(String),
    #[error("cache: {0}")]
    Cache(String),
    #[error("config: {0}")]
    Config(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures the caller caused, which no retry can fix.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::InvalidIdentifier(_) | Error::OriginNotFound)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod config;
