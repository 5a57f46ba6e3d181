use serde::Serialize;
use thiserror::Error;

use crate::extract::ExtractionError;
use crate::fetcher::FetchError;

#[derive(Error, Debug)]
pub enum LocalBooksError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Rule not found: {0}")]
    RuleNotFound(i64),

    #[error("Chapter not found: {0}")]
    ChapterNotFound(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse error category a client can switch on to pick a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Fetch,
    Extraction,
    Cache,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Fetch => "fetch",
            ErrorKind::Extraction => "extraction",
            ErrorKind::Cache => "cache",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Serializable form of an error: kind plus human readable message.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl LocalBooksError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LocalBooksError::Validation(_) | LocalBooksError::InvalidUrl(_) => ErrorKind::Validation,
            LocalBooksError::RuleNotFound(_)
            | LocalBooksError::ChapterNotFound(_) => ErrorKind::NotFound,
            LocalBooksError::Fetch(_) => ErrorKind::Fetch,
            LocalBooksError::Extraction(_) => ErrorKind::Extraction,
            LocalBooksError::Cache(_) => ErrorKind::Cache,
            LocalBooksError::Database(_)
            | LocalBooksError::Io(_)
            | LocalBooksError::Serialization(_)
            | LocalBooksError::Config(_) => ErrorKind::Internal,
        }
    }

    /// True for failures of a live refresh that may fall back to a stale cache entry.
    pub fn is_refresh_failure(&self) -> bool {
        matches!(
            self,
            LocalBooksError::Fetch(_) | LocalBooksError::Extraction(_)
        )
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LocalBooksError>;
