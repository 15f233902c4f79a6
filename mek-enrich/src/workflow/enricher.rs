//! Batch enrichment runner
//!
//! Resolve → orchestrate → merge for each entity, with up to `concurrency`
//! entities in flight via `futures::stream::buffer_unordered`. Workers share
//! the cache and the per-source throttle through the orchestrator; nothing
//! else is shared between entities.
//!
//! Results are reported in input order whatever order workers finish in.

use super::orchestrator::FallbackOrchestrator;
use super::{emit, EnrichmentEvent, EventSender};
use crate::error::EnrichError;
use crate::fusion::{MergeEngine, MergeInput};
use crate::models::EnrichedRecord;
use crate::resolver::IdentifierResolver;
use crate::telemetry::RunSummary;
use crate::types::Entity;
use futures::stream::{self, StreamExt};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Entity refused before any lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEntity {
    /// Position in the input batch
    pub index: usize,
    pub entity_name: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct BatchReport {
    /// Finished records, input order
    pub records: Vec<EnrichedRecord>,
    pub rejected: Vec<RejectedEntity>,
    /// Names of entities not finished before cancellation, input order
    pub cancelled: Vec<String>,
    pub summary: RunSummary,
}

impl BatchReport {
    pub fn was_cancelled(&self) -> bool {
        !self.cancelled.is_empty()
    }
}

enum EntityOutcome {
    Enriched(EnrichedRecord),
    Rejected(String),
    Cancelled,
}

pub struct Enricher {
    resolver: IdentifierResolver,
    orchestrator: FallbackOrchestrator,
    merge: MergeEngine,
    concurrency: usize,
    events: Option<EventSender>,
}

impl Enricher {
    /// The merge engine takes its priority order from the orchestrator
    pub fn new(resolver: IdentifierResolver, orchestrator: FallbackOrchestrator) -> Self {
        let merge = MergeEngine::new(orchestrator.priority());
        Self {
            resolver,
            orchestrator,
            merge,
            concurrency: 4,
            events: None,
        }
    }

    pub fn with_list_limit(mut self, list_limit: Option<usize>) -> Self {
        self.merge = self.merge.with_list_limit(list_limit);
        self
    }

    /// Entities in flight at once (minimum 1)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_events(mut self, events: Option<EventSender>) -> Self {
        self.events = events;
        self
    }

    pub fn orchestrator(&self) -> &FallbackOrchestrator {
        &self.orchestrator
    }

    /// Enrich one entity.
    ///
    /// # Errors
    /// - `InvalidEntity` when the entity has neither a name nor a usable identifier
    /// - `Cancelled` when the token fires before or during the lookups
    pub async fn enrich(
        &self,
        entity: &Entity,
        cancel: &CancellationToken,
    ) -> Result<EnrichedRecord, EnrichError> {
        let name = entity.trimmed_name();
        let resolution = self.resolver.resolve(entity);

        if name.is_empty() && resolution.identifiers.is_empty() {
            return Err(EnrichError::InvalidEntity(
                "entity has an empty name and no identifiers".to_string(),
            ));
        }

        if cancel.is_cancelled() {
            return Err(EnrichError::Cancelled(name.to_string()));
        }

        let start = Instant::now();
        let records = self
            .orchestrator
            .run(name, &resolution.identifiers, cancel)
            .await?;

        let lookups = FallbackOrchestrator::lookups(name, &resolution.identifiers);
        let record = self.merge.merge(MergeInput {
            entity_name: name,
            lookups: &lookups,
            records: &records,
            unresolved_kinds: &resolution.unresolved_kinds,
            original_measurement: entity.original_measurement.as_ref(),
        });

        if record.primary_source.is_none() {
            warn!(
                entity = name,
                failures = record.source_failures.len(),
                "No source produced usable data"
            );
        }
        debug!(
            entity = name,
            primary = ?record.primary_source,
            total_ms = record.timing_summary.total_ms,
            wall_ms = start.elapsed().as_millis() as u64,
            "Entity enriched"
        );

        Ok(record)
    }

    /// Enrich a batch with bounded concurrency.
    ///
    /// Rejected and cancelled entities are reported, never fatal.
    pub async fn enrich_batch(&self, entities: Vec<Entity>, cancel: &CancellationToken) -> BatchReport {
        let total = entities.len();
        let mut summary = RunSummary::new(&self.orchestrator.priority());

        info!(
            run_id = %summary.run_id,
            entities = total,
            concurrency = self.concurrency,
            policy = %self.orchestrator.policy(),
            "Starting enrichment run"
        );

        let mut outcomes: Vec<(usize, String, EntityOutcome)> = stream::iter(entities.into_iter().enumerate())
            .map(|(index, entity)| async move {
                let name = entity.trimmed_name().to_string();
                if cancel.is_cancelled() {
                    return (index, name, EntityOutcome::Cancelled);
                }

                emit(
                    self.events.as_ref(),
                    EnrichmentEvent::EntityStarted {
                        entity: name.clone(),
                        index,
                        total,
                    },
                )
                .await;

                let outcome = match self.enrich(&entity, cancel).await {
                    Ok(record) => {
                        emit(
                            self.events.as_ref(),
                            EnrichmentEvent::EntityCompleted {
                                entity: name.clone(),
                                primary_source: record.primary_source,
                                total_ms: record.timing_summary.total_ms,
                            },
                        )
                        .await;
                        EntityOutcome::Enriched(record)
                    }
                    Err(EnrichError::Cancelled(_)) => EntityOutcome::Cancelled,
                    Err(e) => {
                        warn!(entity = %name, index, error = %e, "Entity rejected");
                        emit(
                            self.events.as_ref(),
                            EnrichmentEvent::EntityRejected {
                                entity: name.clone(),
                                reason: e.to_string(),
                            },
                        )
                        .await;
                        EntityOutcome::Rejected(e.to_string())
                    }
                };

                (index, name, outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        outcomes.sort_by_key(|(index, _, _)| *index);

        let mut records = Vec::new();
        let mut rejected = Vec::new();
        let mut cancelled = Vec::new();
        for (index, entity_name, outcome) in outcomes {
            match outcome {
                EntityOutcome::Enriched(record) => {
                    summary.record(&record);
                    records.push(record);
                }
                EntityOutcome::Rejected(reason) => rejected.push(RejectedEntity {
                    index,
                    entity_name,
                    reason,
                }),
                EntityOutcome::Cancelled => cancelled.push(entity_name),
            }
        }

        summary.entities_rejected = rejected.len();
        summary.entities_cancelled = cancelled.len();
        summary.finish();

        if !cancelled.is_empty() {
            info!(
                cancelled = cancelled.len(),
                finished = records.len(),
                "Enrichment run cancelled"
            );
        }

        emit(
            self.events.as_ref(),
            EnrichmentEvent::BatchCompleted {
                enriched: records.len(),
                rejected: rejected.len(),
                cancelled: cancelled.len(),
            },
        )
        .await;

        BatchReport {
            records,
            rejected,
            cancelled,
            summary,
        }
    }
}
