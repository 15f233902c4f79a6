//! Merge Engine
//!
//! Folds the partial records of one entity into an `EnrichedRecord`.
//!
//! # Field-wise Merge
//! Driven entirely by `CanonicalField::policy()`:
//! - `FirstWins`: first non-empty value in priority order; later differing values
//!   are reported as conflicts
//! - `ConcatDedup`: concatenated in priority order, case-insensitive dedup
//! - `PerSource`: one slot per source, never merged
//!
//! Records are stably ordered by configured source priority before merging,
//! so output never depends on call completion order. The only wall-clock input
//! is the explicit timestamp.

use super::dedup::{dedup_key, ListDeduper};
use crate::models::{
    EnrichedRecord, FieldConflict, FieldProvenance, IdentifierOutcome, SourceAttempt,
    SourceDescription, SourceFailure,
};
use crate::telemetry::TimingSummary;
use crate::types::{
    CanonicalField, FieldMap, FieldValue, Identifier, Lookup, MergePolicy, OriginalMeasurement,
    PartialRecord, SourceKind,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// Everything the merge needs for one entity
#[derive(Debug, Clone)]
pub struct MergeInput<'a> {
    pub entity_name: &'a str,
    /// Lookups attempted, in discovery order (name first when present)
    pub lookups: &'a [Lookup],
    pub records: &'a [PartialRecord],
    pub unresolved_kinds: &'a [String],
    pub original_measurement: Option<&'a OriginalMeasurement>,
}

#[derive(Debug, Clone)]
pub struct MergeEngine {
    priority: Vec<SourceKind>,
    /// Cap applied to every list field after dedup
    list_limit: Option<usize>,
}

impl MergeEngine {
    pub fn new(priority: Vec<SourceKind>) -> Self {
        Self {
            priority,
            list_limit: None,
        }
    }

    pub fn with_list_limit(mut self, list_limit: Option<usize>) -> Self {
        self.list_limit = list_limit;
        self
    }

    fn rank(&self, source: SourceKind) -> usize {
        self.priority
            .iter()
            .position(|s| *s == source)
            .unwrap_or(self.priority.len())
    }

    pub fn merge(&self, input: MergeInput<'_>) -> EnrichedRecord {
        self.merge_at(input, Utc::now())
    }

    /// Pure merge with an explicit timestamp
    pub fn merge_at(&self, input: MergeInput<'_>, timestamp: DateTime<Utc>) -> EnrichedRecord {
        let mut ordered: Vec<&PartialRecord> = input.records.iter().collect();
        ordered.sort_by_key(|r| self.rank(r.source));

        let mut fields = FieldMap::new();
        let mut field_provenance = BTreeMap::new();
        let mut conflicts = Vec::new();
        let mut descriptions = Vec::new();

        for field in CanonicalField::ALL {
            match field.policy() {
                MergePolicy::FirstWins => {
                    if let Some((value, provenance)) = merge_scalar(field, &ordered, &mut conflicts) {
                        fields.insert(field, FieldValue::Text(value));
                        field_provenance.insert(field, provenance);
                    }
                }
                MergePolicy::ConcatDedup => {
                    let (items, provenance) = merge_list(field, &ordered, self.list_limit);
                    fields.insert(field, FieldValue::List(items));
                    if let Some(provenance) = provenance {
                        field_provenance.insert(field, provenance);
                    }
                }
                MergePolicy::PerSource => {
                    let slots = per_source_slots(field, &ordered);
                    if let Some(first) = slots.first() {
                        field_provenance.insert(
                            field,
                            FieldProvenance {
                                source: first.source,
                                contributors: slots.iter().map(|s| s.source).collect(),
                            },
                        );
                    }
                    descriptions = slots;
                }
            }
        }

        let primary_source = ordered.iter().find(|r| r.success).map(|r| r.source);

        let source_failures = ordered
            .iter()
            .filter(|r| !r.success)
            .map(|r| SourceFailure {
                source: r.source,
                lookup_key: r.lookup_key.clone(),
                error: r.error,
                message: r.error_message.clone(),
                from_cache: r.from_cache,
            })
            .collect();

        let per_identifier_outcomes = input
            .lookups
            .iter()
            .map(|lookup| outcome_for(lookup, &ordered))
            .collect();

        let identifier_list: Vec<Identifier> =
            input.lookups.iter().filter_map(|l| l.identifier.clone()).collect();

        debug!(
            entity = input.entity_name,
            records = ordered.len(),
            primary = ?primary_source,
            conflicts = conflicts.len(),
            "Merged partial records"
        );

        EnrichedRecord {
            entity_name: input.entity_name.trim().to_string(),
            identifier_list,
            fields,
            descriptions,
            field_provenance,
            per_identifier_outcomes,
            primary_source,
            timing_summary: TimingSummary::from_records(ordered.iter().copied()),
            conflicts,
            source_failures,
            unresolved_kinds: input.unresolved_kinds.to_vec(),
            original_measurement: input.original_measurement.cloned(),
            enrichment_timestamp: timestamp,
        }
    }
}

/// Scalar view of a value (a list contributes its first non-blank item)
fn scalar_of(value: &FieldValue) -> Option<String> {
    value
        .items()
        .into_iter()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn push_contributor(contributors: &mut Vec<SourceKind>, source: SourceKind) {
    if !contributors.contains(&source) {
        contributors.push(source);
    }
}

fn merge_scalar(
    field: CanonicalField,
    ordered: &[&PartialRecord],
    conflicts: &mut Vec<FieldConflict>,
) -> Option<(String, FieldProvenance)> {
    let mut chosen: Option<(SourceKind, String)> = None;
    let mut contributors = Vec::new();

    for record in ordered {
        let value = match record.field(field).and_then(scalar_of) {
            Some(value) => value,
            None => continue,
        };
        push_contributor(&mut contributors, record.source);

        match &chosen {
            None => chosen = Some((record.source, value)),
            Some((chosen_source, chosen_value)) => {
                if dedup_key(chosen_value) != dedup_key(&value) {
                    let conflict = FieldConflict {
                        field,
                        chosen_source: *chosen_source,
                        chosen_value: chosen_value.clone(),
                        other_source: record.source,
                        other_value: value,
                    };
                    let duplicate = conflicts.iter().any(|c| {
                        c.field == conflict.field
                            && c.other_source == conflict.other_source
                            && dedup_key(&c.other_value) == dedup_key(&conflict.other_value)
                    });
                    if !duplicate {
                        conflicts.push(conflict);
                    }
                }
            }
        }
    }

    chosen.map(|(source, value)| (value, FieldProvenance { source, contributors }))
}

fn merge_list(
    field: CanonicalField,
    ordered: &[&PartialRecord],
    list_limit: Option<usize>,
) -> (Vec<String>, Option<FieldProvenance>) {
    let mut deduper = ListDeduper::new();
    let mut contributors = Vec::new();

    for record in ordered {
        if let Some(value) = record.field(field) {
            push_contributor(&mut contributors, record.source);
            deduper.extend(value.items());
        }
    }

    let mut items = deduper.into_vec();
    if let Some(limit) = list_limit {
        items.truncate(limit);
    }

    let provenance = contributors.first().map(|first| FieldProvenance {
        source: *first,
        contributors: contributors.clone(),
    });
    (items, provenance)
}

/// First non-empty text per source, priority order
fn per_source_slots(field: CanonicalField, ordered: &[&PartialRecord]) -> Vec<SourceDescription> {
    let mut slots: Vec<SourceDescription> = Vec::new();
    for record in ordered {
        if slots.iter().any(|s| s.source == record.source) {
            continue;
        }
        if let Some(text) = record.field(field).and_then(scalar_of) {
            slots.push(SourceDescription {
                source: record.source,
                text,
            });
        }
    }
    slots
}

fn outcome_for(lookup: &Lookup, ordered: &[&PartialRecord]) -> IdentifierOutcome {
    let attempts: Vec<SourceAttempt> = ordered
        .iter()
        .filter(|r| r.identifier == lookup.identifier && r.lookup_key == lookup.key())
        .map(|r| SourceAttempt {
            source: r.source,
            success: r.success,
            from_cache: r.from_cache,
            error: r.error,
        })
        .collect();

    IdentifierOutcome {
        lookup_key: lookup.key().to_string(),
        identifier: lookup.identifier.clone(),
        attempted: !attempts.is_empty(),
        success: attempts.iter().any(|a| a.success),
        attempts,
    }
}
