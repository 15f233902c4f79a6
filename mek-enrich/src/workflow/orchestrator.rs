//! Fallback Orchestrator
//!
//! For one entity, walks every lookup (name first, then identifiers in
//! discovery order) against every registered source that accepts it, in
//! priority order. The cache is consulted before every call; misses go
//! through the shared throttle and a bounded timeout, and every result,
//! failed ones included, is written back before the next call starts.
//!
//! # Error Handling
//! - Adapter errors and timeouts become failed `PartialRecord`s; the walk continues
//! - Cache write failures are logged and the run continues
//! - Cancellation is the only error returned

use super::throttle::SourceThrottle;
use super::{emit, EnrichmentEvent, EventSender};
use crate::cache::{CacheLookup, CacheStore};
use crate::error::EnrichError;
use crate::sources::{SourceAdapter, SourceError};
use crate::types::{Identifier, Lookup, PartialRecord, SourceErrorKind, SourceKind};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What to do with further identifiers of a kind once a source succeeded on one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierPolicy {
    /// Skip the source's remaining identifiers of that kind
    StopOnFirstSuccess,
    /// Query every identifier and merge all results
    AlwaysCombine,
}

impl fmt::Display for IdentifierPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierPolicy::StopOnFirstSuccess => f.write_str("stop_on_first_success"),
            IdentifierPolicy::AlwaysCombine => f.write_str("always_combine"),
        }
    }
}

impl FromStr for IdentifierPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "stop_on_first_success" => Ok(IdentifierPolicy::StopOnFirstSuccess),
            "always_combine" => Ok(IdentifierPolicy::AlwaysCombine),
            other => Err(format!(
                "unknown identifier policy '{}' (expected stop_on_first_success or always_combine)",
                other
            )),
        }
    }
}

/// Per-source execution settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceSettings {
    pub timeout: Duration,
    /// Only queried when no regular source succeeded for the entity
    pub fallback_only: bool,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            fallback_only: false,
        }
    }
}

struct RegisteredSource {
    adapter: Arc<dyn SourceAdapter>,
    settings: SourceSettings,
}

pub struct FallbackOrchestrator {
    /// Priority order = registration order
    sources: Vec<RegisteredSource>,
    cache: Arc<CacheStore>,
    throttle: Arc<SourceThrottle>,
    policy: IdentifierPolicy,
    events: Option<EventSender>,
}

impl FallbackOrchestrator {
    pub fn new(cache: Arc<CacheStore>, throttle: Arc<SourceThrottle>, policy: IdentifierPolicy) -> Self {
        Self {
            sources: Vec::new(),
            cache,
            throttle,
            policy,
            events: None,
        }
    }

    /// Register the next source in priority order
    pub fn with_source(mut self, adapter: Arc<dyn SourceAdapter>, settings: SourceSettings) -> Self {
        self.sources.push(RegisteredSource { adapter, settings });
        self
    }

    pub fn with_events(mut self, events: Option<EventSender>) -> Self {
        self.events = events;
        self
    }

    /// Source kinds in priority order
    pub fn priority(&self) -> Vec<SourceKind> {
        self.sources.iter().map(|s| s.adapter.kind()).collect()
    }

    pub fn policy(&self) -> IdentifierPolicy {
        self.policy
    }

    /// Lookups for an entity: name (when present) then each identifier
    pub fn lookups(entity_name: &str, identifiers: &[Identifier]) -> Vec<Lookup> {
        let mut lookups = Vec::with_capacity(identifiers.len() + 1);
        if !entity_name.trim().is_empty() {
            lookups.push(Lookup::by_name(entity_name.trim()));
        }
        for identifier in identifiers {
            lookups.push(Lookup::by_identifier(entity_name.trim(), identifier.clone()));
        }
        lookups
    }

    /// Collect partial records for one entity.
    ///
    /// Output is ordered by source priority, then lookup order.
    pub async fn run(
        &self,
        entity_name: &str,
        identifiers: &[Identifier],
        cancel: &CancellationToken,
    ) -> Result<Vec<PartialRecord>, EnrichError> {
        let lookups = Self::lookups(entity_name, identifiers);
        let mut collected: Vec<(usize, usize, PartialRecord)> = Vec::new();

        self.pass(entity_name, &lookups, false, cancel, &mut collected).await?;

        let any_success = collected.iter().any(|(_, _, r)| r.success);
        if !any_success && self.sources.iter().any(|s| s.settings.fallback_only) {
            debug!(entity = entity_name, "No regular source succeeded, running fallback sources");
            self.pass(entity_name, &lookups, true, cancel, &mut collected).await?;
        }

        collected.sort_by_key(|(source_idx, lookup_idx, _)| (*source_idx, *lookup_idx));
        Ok(collected.into_iter().map(|(_, _, record)| record).collect())
    }

    async fn pass(
        &self,
        entity_name: &str,
        lookups: &[Lookup],
        fallback_pass: bool,
        cancel: &CancellationToken,
        collected: &mut Vec<(usize, usize, PartialRecord)>,
    ) -> Result<(), EnrichError> {
        // (source index, identifier kind) pairs already satisfied
        let mut satisfied: HashSet<(usize, String)> = HashSet::new();

        for (lookup_idx, lookup) in lookups.iter().enumerate() {
            for (source_idx, source) in self.sources.iter().enumerate() {
                if source.settings.fallback_only != fallback_pass || !source.adapter.accepts(lookup) {
                    continue;
                }

                if let Some(kind) = lookup.kind() {
                    if self.policy == IdentifierPolicy::StopOnFirstSuccess
                        && satisfied.contains(&(source_idx, kind.to_string()))
                    {
                        debug!(
                            entity = entity_name,
                            source = %source.adapter.kind(),
                            lookup_key = lookup.key(),
                            "Skipping identifier: source already satisfied for this kind"
                        );
                        continue;
                    }
                }

                let record = self.attempt(entity_name, source, lookup, cancel).await?;

                if record.success {
                    if let Some(kind) = lookup.kind() {
                        satisfied.insert((source_idx, kind.to_string()));
                    }
                }
                collected.push((source_idx, lookup_idx, record));
            }
        }

        Ok(())
    }

    /// One cache-or-fetch attempt
    async fn attempt(
        &self,
        entity_name: &str,
        source: &RegisteredSource,
        lookup: &Lookup,
        cancel: &CancellationToken,
    ) -> Result<PartialRecord, EnrichError> {
        let kind = source.adapter.kind();
        let key = lookup.key();

        if cancel.is_cancelled() {
            return Err(EnrichError::Cancelled(format!("before {} lookup of '{}'", kind, key)));
        }

        let record = match self.cache.lookup(kind, key).await {
            CacheLookup::Hit(record) => {
                debug!(entity = entity_name, source = %kind, lookup_key = key, success = record.success, "Cache hit");
                record
            }
            CacheLookup::Stale | CacheLookup::Miss => {
                let record = self.fetch(source, lookup, cancel).await?;
                if let Err(e) = self.cache.put(&record).await {
                    warn!(source = %kind, lookup_key = key, error = %e, "Cache write failed; result kept for this run only");
                }
                record
            }
        };

        emit(
            self.events.as_ref(),
            EnrichmentEvent::SourceCompleted {
                entity: entity_name.to_string(),
                source: kind,
                lookup_key: key.to_string(),
                success: record.success,
                from_cache: record.from_cache,
                elapsed_ms: record.elapsed_ms,
            },
        )
        .await;

        Ok(record)
    }

    /// Throttled, time-bounded, cancellable network call
    async fn fetch(
        &self,
        source: &RegisteredSource,
        lookup: &Lookup,
        cancel: &CancellationToken,
    ) -> Result<PartialRecord, EnrichError> {
        let kind = source.adapter.kind();
        let key = lookup.key();
        let cancelled = || EnrichError::Cancelled(format!("during {} lookup of '{}'", kind, key));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            _ = self.throttle.acquire(kind) => {}
        }

        let start = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            outcome = tokio::time::timeout(source.settings.timeout, source.adapter.fetch(lookup)) => outcome,
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(format!(
                "no response within {}s",
                source.settings.timeout.as_secs_f64()
            ))),
        };

        let record = match result {
            Ok(payload) => {
                let (error, error_message) = if payload.success {
                    (None, None)
                } else {
                    (
                        Some(SourceErrorKind::NotFound),
                        Some("source returned no usable data".to_string()),
                    )
                };
                PartialRecord {
                    source: kind,
                    identifier: lookup.identifier.clone(),
                    lookup_key: key.to_string(),
                    fields: payload.fields,
                    success: payload.success,
                    elapsed_ms,
                    from_cache: false,
                    error,
                    error_message,
                    fetched_at: Utc::now(),
                }
            }
            Err(e) => {
                let classified = e.class(kind, key);
                info!(source = %kind, lookup_key = key, elapsed_ms, "{}", classified);
                PartialRecord::failed(kind, lookup, e.kind(), e.to_string(), elapsed_ms)
            }
        };

        debug!(
            source = %kind,
            lookup_key = key,
            success = record.success,
            elapsed_ms,
            "Source call finished"
        );
        Ok(record)
    }
}
