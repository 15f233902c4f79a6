//! Timing and run telemetry
//!
//! Purely observational: nothing here feeds back into merge decisions.

use crate::models::EnrichedRecord;
use crate::types::{PartialRecord, SourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Summary file written next to the enriched store
pub const RUN_SUMMARY_FILE_NAME: &str = "run_summary.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingEntry {
    pub source: SourceKind,
    pub lookup_key: String,
    /// Zero for cache hits
    pub elapsed_ms: u64,
    pub from_cache: bool,
    pub success: bool,
}

/// Per-record breakdown in merge order, plus the total
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingSummary {
    pub entries: Vec<TimingEntry>,
    pub total_ms: u64,
}

impl TimingSummary {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a PartialRecord>,
    {
        let entries: Vec<TimingEntry> = records
            .into_iter()
            .map(|r| TimingEntry {
                source: r.source,
                lookup_key: r.lookup_key.clone(),
                elapsed_ms: if r.from_cache { 0 } else { r.elapsed_ms },
                from_cache: r.from_cache,
                success: r.success,
            })
            .collect();
        let total_ms = entries.iter().map(|e| e.elapsed_ms).sum();
        Self { entries, total_ms }
    }

    pub fn cache_hits(&self) -> usize {
        self.entries.iter().filter(|e| e.from_cache).count()
    }

    /// Same breakdown with every elapsed time zeroed
    pub fn without_elapsed(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .cloned()
                .map(|mut e| {
                    e.elapsed_ms = 0;
                    e
                })
                .collect(),
            total_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub source: SourceKind,
    /// Network calls actually made
    pub calls: u64,
    pub cache_hits: u64,
    pub successes: u64,
    pub failures: u64,
    pub elapsed_ms: u64,
}

impl SourceStats {
    fn new(source: SourceKind) -> Self {
        Self {
            source,
            calls: 0,
            cache_hits: 0,
            successes: 0,
            failures: 0,
            elapsed_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub entities_enriched: usize,
    pub entities_rejected: usize,
    pub entities_cancelled: usize,
    pub entities_without_primary: usize,
    /// Source priority order
    pub per_source: Vec<SourceStats>,
    pub total_elapsed_ms: u64,
}

impl RunSummary {
    pub fn new(priority: &[SourceKind]) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            entities_enriched: 0,
            entities_rejected: 0,
            entities_cancelled: 0,
            entities_without_primary: 0,
            per_source: priority.iter().copied().map(SourceStats::new).collect(),
            total_elapsed_ms: 0,
        }
    }

    /// Fold one finished record into the counters
    pub fn record(&mut self, record: &EnrichedRecord) {
        self.entities_enriched += 1;
        if record.primary_source.is_none() {
            self.entities_without_primary += 1;
        }

        for entry in &record.timing_summary.entries {
            let stats = self.stats_mut(entry.source);
            if entry.from_cache {
                stats.cache_hits += 1;
            } else {
                stats.calls += 1;
            }
            if entry.success {
                stats.successes += 1;
            } else {
                stats.failures += 1;
            }
            stats.elapsed_ms += entry.elapsed_ms;
        }
        self.total_elapsed_ms += record.timing_summary.total_ms;
    }

    fn stats_mut(&mut self, source: SourceKind) -> &mut SourceStats {
        let idx = match self.per_source.iter().position(|s| s.source == source) {
            Some(idx) => idx,
            None => {
                self.per_source.push(SourceStats::new(source));
                self.per_source.len() - 1
            }
        };
        &mut self.per_source[idx]
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn log(&self) {
        info!(
            run_id = %self.run_id,
            enriched = self.entities_enriched,
            rejected = self.entities_rejected,
            cancelled = self.entities_cancelled,
            without_primary = self.entities_without_primary,
            total_elapsed_ms = self.total_elapsed_ms,
            "Enrichment run summary"
        );
        for stats in &self.per_source {
            info!(
                source = %stats.source,
                calls = stats.calls,
                cache_hits = stats.cache_hits,
                successes = stats.successes,
                failures = stats.failures,
                elapsed_ms = stats.elapsed_ms,
                "Source statistics"
            );
        }
    }
}
