//! mek-enrich library interface
//!
//! Metabolite enrichment: resolve an entity's identifiers, query several
//! unreliable sources in priority order with a persistent cache in front of
//! them, and merge the partial results into one canonical record with
//! per-field provenance.

pub mod cache;
pub mod config;
pub mod error;
pub mod fusion;
pub mod models;
pub mod resolver;
pub mod sources;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod utils;
pub mod workflow;

pub use crate::cache::{CacheMode, CachePolicy, CacheStore};
pub use crate::config::EnrichConfig;
pub use crate::error::{EnrichError, EnrichResult};
pub use crate::models::EnrichedRecord;
pub use crate::store::EnrichedStore;
pub use crate::types::{CanonicalField, Entity, Identifier, PartialRecord, SourceKind};
pub use crate::workflow::{BatchReport, Enricher, EnrichmentEvent, IdentifierPolicy};
