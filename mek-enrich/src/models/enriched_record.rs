//! Canonical output record for one entity

use crate::telemetry::TimingSummary;
use crate::types::{
    CanonicalField, FieldValue, Identifier, OriginalMeasurement, SourceErrorKind, SourceKind,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which sources supplied a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldProvenance {
    /// Source whose value was chosen
    pub source: SourceKind,
    /// Every source with a non-empty value, priority order
    pub contributors: Vec<SourceKind>,
}

/// Description text kept per source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescription {
    pub source: SourceKind,
    pub text: String,
}

/// Scalar disagreement between sources (chosen value unaffected)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: CanonicalField,
    pub chosen_source: SourceKind,
    pub chosen_value: String,
    pub other_source: SourceKind,
    pub other_value: String,
}

/// One failed source call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: SourceKind,
    pub lookup_key: String,
    pub error: Option<SourceErrorKind>,
    pub message: Option<String>,
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAttempt {
    pub source: SourceKind,
    pub success: bool,
    pub from_cache: bool,
    pub error: Option<SourceErrorKind>,
}

/// Outcome of one lookup (name or identifier) across all sources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierOutcome {
    pub lookup_key: String,
    /// `None` for the name-only lookup
    pub identifier: Option<Identifier>,
    /// At least one source was called (or served from cache) for it
    pub attempted: bool,
    pub success: bool,
    pub attempts: Vec<SourceAttempt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub entity_name: String,
    /// All identifiers attempted, discovery order
    pub identifier_list: Vec<Identifier>,
    /// Merged canonical values; list fields always present
    pub fields: BTreeMap<CanonicalField, FieldValue>,
    /// One description slot per source, priority order
    pub descriptions: Vec<SourceDescription>,
    pub field_provenance: BTreeMap<CanonicalField, FieldProvenance>,
    pub per_identifier_outcomes: Vec<IdentifierOutcome>,
    /// Highest-priority source with a successful record
    pub primary_source: Option<SourceKind>,
    pub timing_summary: TimingSummary,
    pub conflicts: Vec<FieldConflict>,
    pub source_failures: Vec<SourceFailure>,
    /// Required identifier kinds that could not be found
    pub unresolved_kinds: Vec<String>,
    pub original_measurement: Option<OriginalMeasurement>,
    pub enrichment_timestamp: DateTime<Utc>,
}

impl EnrichedRecord {
    /// Store key: the name, or `kind:value` of the first identifier when the name is blank
    pub fn entity_key(&self) -> String {
        let name = self.entity_name.trim();
        match self.identifier_list.first() {
            Some(identifier) if name.is_empty() => identifier.to_string(),
            _ => name.to_string(),
        }
    }

    pub fn scalar(&self, field: CanonicalField) -> Option<&str> {
        self.fields.get(&field).and_then(FieldValue::as_text)
    }

    /// List field contents; empty when absent
    pub fn list(&self, field: CanonicalField) -> Vec<&str> {
        match self.fields.get(&field) {
            Some(FieldValue::List(items)) => items.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn description_from(&self, source: SourceKind) -> Option<&str> {
        self.descriptions
            .iter()
            .find(|d| d.source == source)
            .map(|d| d.text.as_str())
    }

    pub fn provenance(&self, field: CanonicalField) -> Option<SourceKind> {
        self.field_provenance.get(&field).map(|p| p.source)
    }

    pub fn outcome_for(&self, lookup_key: &str) -> Option<&IdentifierOutcome> {
        self.per_identifier_outcomes
            .iter()
            .find(|o| o.lookup_key == lookup_key)
    }

    /// Copy with run-dependent values zeroed (timestamp, elapsed times).
    ///
    /// Two runs over the same inputs and cache compare equal after this.
    pub fn without_run_metadata(&self) -> Self {
        let mut copy = self.clone();
        copy.enrichment_timestamp = DateTime::<Utc>::default();
        copy.timing_summary = copy.timing_summary.without_elapsed();
        copy
    }
}
