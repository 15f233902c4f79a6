//! Error types for mek-enrich
//!
//! Source failures (`SourceUnavailable`, `SourceDataIncomplete`) and
//! `IdentifierUnresolved` are recovered inside a run and recorded on the
//! affected record. `InvalidEntity` rejects a single entity before any lookup.
//! Only `Config` stops a run from starting.

use crate::types::SourceKind;
use thiserror::Error;

/// Result alias for enrichment operations
pub type EnrichResult<T> = std::result::Result<T, EnrichError>;

/// Enrichment error taxonomy
#[derive(Debug, Error)]
pub enum EnrichError {
    /// Network failure or timeout talking to a source
    #[error("Source {source_kind} unavailable for '{key}': {message}")]
    SourceUnavailable {
        source_kind: SourceKind,
        key: String,
        message: String,
    },

    /// Source reachable but payload empty or malformed
    #[error("Source {source_kind} returned incomplete data for '{key}': {message}")]
    SourceDataIncomplete {
        source_kind: SourceKind,
        key: String,
        message: String,
    },

    /// No identifier of a required kind could be found for the entity
    #[error("No {kind} identifier found for '{entity}'")]
    IdentifierUnresolved { entity: String, kind: String },

    /// Cache persistence failure
    #[error("Cache I/O error: {0}")]
    CacheIo(String),

    /// Entity with neither a name nor identifiers
    #[error("Invalid entity: {0}")]
    InvalidEntity(String),

    /// Run cancelled before the entity finished
    #[error("Enrichment cancelled: {0}")]
    Cancelled(String),

    /// Configuration invalid or missing a required value
    #[error("Configuration error: {0}")]
    Config(String),

    /// mek-common error
    #[error("Common error: {0}")]
    Common(#[from] mek_common::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EnrichError {
    /// Recovered locally by the orchestrator (never aborts a batch)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EnrichError::SourceUnavailable { .. }
                | EnrichError::SourceDataIncomplete { .. }
                | EnrichError::IdentifierUnresolved { .. }
                | EnrichError::CacheIo(_)
        )
    }
}

impl From<sqlx::Error> for EnrichError {
    fn from(err: sqlx::Error) -> Self {
        EnrichError::CacheIo(err.to_string())
    }
}
