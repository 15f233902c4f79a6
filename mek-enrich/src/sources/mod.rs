//! Source adapters
//!
//! Every external data source implements [`SourceAdapter`]. The orchestrator
//! iterates adapters generically in configured priority order; nothing in the
//! core branches on which source it is talking to.
//!
//! Adapters return `Err(SourceError)` for every failure. They never panic and
//! never build `PartialRecord`s themselves: the orchestrator owns timing,
//! caching and the failed-record shape.

use crate::error::EnrichError;
use crate::types::{FieldMap, Lookup, SourceErrorKind, SourceKind};
use async_trait::async_trait;
use thiserror::Error;

pub mod assistant_client;
pub mod contextual;
pub mod hmdb_client;
pub mod pubchem_client;

pub use assistant_client::AssistantClient;
pub use contextual::ContextualClassifier;
pub use hmdb_client::HmdbClient;
pub use pubchem_client::PubChemClient;

/// Fields returned by one successful adapter call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcePayload {
    pub fields: FieldMap,
    /// Adapter-reported completeness
    pub success: bool,
}

impl SourcePayload {
    /// Payload whose success flag is "at least one non-empty field"
    pub fn from_fields(fields: FieldMap) -> Self {
        let success = fields.values().any(|v| !v.is_empty());
        Self { fields, success }
    }

    /// Payload with an explicit success flag
    pub fn with_success(fields: FieldMap, success: bool) -> Self {
        Self { fields, success }
    }
}

/// Typed adapter failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    pub fn kind(&self) -> SourceErrorKind {
        match self {
            SourceError::Timeout(_) => SourceErrorKind::Timeout,
            SourceError::NotFound(_) => SourceErrorKind::NotFound,
            SourceError::MalformedResponse(_) => SourceErrorKind::MalformedResponse,
            SourceError::RateLimited(_) => SourceErrorKind::RateLimited,
            SourceError::Unavailable(_) => SourceErrorKind::Unavailable,
        }
    }

    /// Map onto the enrichment error taxonomy (used for logging)
    pub fn class(&self, source: SourceKind, key: &str) -> EnrichError {
        match self {
            SourceError::NotFound(msg) | SourceError::MalformedResponse(msg) => {
                EnrichError::SourceDataIncomplete {
                    source_kind: source,
                    key: key.to_string(),
                    message: msg.clone(),
                }
            }
            SourceError::Timeout(msg)
            | SourceError::RateLimited(msg)
            | SourceError::Unavailable(msg) => EnrichError::SourceUnavailable {
                source_kind: source,
                key: key.to_string(),
                message: msg.clone(),
            },
        }
    }

    /// Map a non-success HTTP status
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        match status.as_u16() {
            404 => SourceError::NotFound(format!("{} (HTTP 404)", context)),
            429 => SourceError::RateLimited(format!("{} (HTTP 429)", context)),
            code => SourceError::Unavailable(format!("{} (HTTP {})", context, code)),
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout(err.to_string())
        } else if err.is_decode() {
            SourceError::MalformedResponse(err.to_string())
        } else if let Some(status) = err.status() {
            SourceError::from_status(status, &err.to_string())
        } else {
            SourceError::Unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::MalformedResponse(err.to_string())
    }
}

/// Uniform capability implemented by every data source
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Source identity used for priority, cache keys and provenance
    fn kind(&self) -> SourceKind;

    /// Whether this adapter can serve the lookup (name-only or a given identifier kind)
    fn accepts(&self, lookup: &Lookup) -> bool;

    /// Perform the lookup
    async fn fetch(&self, lookup: &Lookup) -> Result<SourcePayload, SourceError>;
}

/// Shared HTTP client builder for the network adapters
pub(crate) fn build_http_client(
    timeout: std::time::Duration,
) -> Result<reqwest::Client, EnrichError> {
    reqwest::Client::builder()
        .user_agent(concat!("mek-enrich/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .connect_timeout(std::time::Duration::from_secs(10).min(timeout))
        .build()
        .map_err(|e| EnrichError::Config(format!("Failed to build HTTP client: {}", e)))
}
