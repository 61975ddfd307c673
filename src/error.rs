//! Error types for library parsing, catalog lookups and persistence.
//!
//! Only batch-level failures are errors here. A record that cannot be matched is an
//! outcome (`EnrichOutcome::NoMatch`), not an error.

use std::path::PathBuf;
use thiserror::Error;

/// The library document could not be read as XML at all.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed reading library file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed parsing library as XML: {0}")]
    Xml(#[from] roxmltree::Error),
}

/// Coarse classification of catalog failures, used for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogErrorKind {
    MissingCredentials,
    Network,
    RateLimited,
    Timeout,
    Api,
    Decode,
}

impl CatalogErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CatalogErrorKind::MissingCredentials => "missing_credentials",
            CatalogErrorKind::Network => "network",
            CatalogErrorKind::RateLimited => "rate_limited",
            CatalogErrorKind::Timeout => "timeout",
            CatalogErrorKind::Api => "api",
            CatalogErrorKind::Decode => "decode",
        }
    }
}

/// Catalog search collaborator errors. All of them degrade a record to "no match".
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Catalog credentials not configured")]
    MissingCredentials,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Failed decoding catalog response: {0}")]
    Decode(String),
}

impl CatalogError {
    pub fn kind(&self) -> CatalogErrorKind {
        match self {
            CatalogError::MissingCredentials => CatalogErrorKind::MissingCredentials,
            CatalogError::Network(_) => CatalogErrorKind::Network,
            CatalogError::RateLimited => CatalogErrorKind::RateLimited,
            CatalogError::Timeout(_) => CatalogErrorKind::Timeout,
            CatalogError::Api { .. } => CatalogErrorKind::Api,
            CatalogError::Decode(_) => CatalogErrorKind::Decode,
        }
    }
}

/// Storage collaborator errors. These abort a batch; committed rows are kept.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Track not found: {0}")]
    NotFound(String),
}
