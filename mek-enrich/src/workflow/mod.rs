//! Enrichment workflow
//!
//! - `throttle`: process-wide per-source call spacing
//! - `orchestrator`: per-entity source fallback with cache short-circuit
//! - `enricher`: batch runner (bounded concurrency, cancellation, persistence)

pub mod enricher;
pub mod orchestrator;
pub mod throttle;

use crate::types::SourceKind;
use serde::Serialize;
use tokio::sync::mpsc;

pub use enricher::{BatchReport, Enricher};
pub use orchestrator::{FallbackOrchestrator, IdentifierPolicy, SourceSettings};
pub use throttle::SourceThrottle;

/// Progress events emitted during a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnrichmentEvent {
    EntityStarted {
        entity: String,
        /// 0-based position in the batch
        index: usize,
        total: usize,
    },

    SourceCompleted {
        entity: String,
        source: SourceKind,
        lookup_key: String,
        success: bool,
        from_cache: bool,
        elapsed_ms: u64,
    },

    EntityCompleted {
        entity: String,
        primary_source: Option<SourceKind>,
        total_ms: u64,
    },

    /// Entity refused before any lookup (e.g. no name and no identifiers)
    EntityRejected { entity: String, reason: String },

    BatchCompleted {
        enriched: usize,
        rejected: usize,
        cancelled: usize,
    },
}

/// Optional event channel shared by the workflow components
pub type EventSender = mpsc::Sender<EnrichmentEvent>;

/// Send without failing the run when nobody is listening
pub(crate) async fn emit(events: Option<&EventSender>, event: EnrichmentEvent) {
    if let Some(tx) = events {
        if tx.send(event).await.is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }
}
