//! Core Types for MEK-Enrich
//!
//! Defines the data contracts between the aggregation stages:
//! - **Input:** `Entity` (name + identifiers + pass-through measurement)
//! - **Per call:** `PartialRecord` (one source, one lookup)
//! - **Merge table:** `CanonicalField` with its `MergePolicy`
//!
//! All maps are `BTreeMap` so serialized output never depends on hash order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Sources
// ============================================================================

/// External data source queried by an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Language-model assistant (OpenRouter-compatible chat completions)
    Assistant,
    /// HMDB metabolite records
    Hmdb,
    /// PubChem PUG REST
    #[serde(rename = "pubchem")]
    PubChem,
    /// Offline name-pattern classifier
    Contextual,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Assistant,
        SourceKind::Hmdb,
        SourceKind::PubChem,
        SourceKind::Contextual,
    ];

    /// Stable identifier used in cache keys, config tables and logs
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Assistant => "assistant",
            SourceKind::Hmdb => "hmdb",
            SourceKind::PubChem => "pubchem",
            SourceKind::Contextual => "contextual",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown source kind '{}'", s))
    }
}

// ============================================================================
// Identifiers and entities
// ============================================================================

/// Well-known identifier kinds
pub mod kinds {
    pub const HMDB: &str = "hmdb";
    pub const PUBCHEM_CID: &str = "pubchem_cid";
}

/// Typed external key (kind + value)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub kind: String,
    pub value: String,
}

impl Identifier {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    pub fn hmdb(value: impl Into<String>) -> Self {
        Self::new(kinds::HMDB, value)
    }

    pub fn pubchem_cid(value: impl Into<String>) -> Self {
        Self::new(kinds::PUBCHEM_CID, value)
    }

    /// Placeholder values such as `NOID00000` stand for "no identifier"
    pub fn is_placeholder(&self) -> bool {
        let value = self.value.trim();
        value.is_empty() || value.to_ascii_uppercase().starts_with("NOID")
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Pass-through measurement payload from the input table.
///
/// Absent numbers stay `None` (JSON `null`) and are never coerced to zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OriginalMeasurement {
    pub low_level: Option<f64>,
    pub high_level: Option<f64>,
    pub sd: Option<f64>,
    pub reference: Option<String>,
    /// Any other input columns, kept verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Logical subject being enriched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    #[serde(default)]
    pub original_measurement: Option<OriginalMeasurement>,
}

impl Entity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identifiers: Vec::new(),
            original_measurement: None,
        }
    }

    pub fn with_identifier(mut self, identifier: Identifier) -> Self {
        self.identifiers.push(identifier);
        self
    }

    pub fn with_measurement(mut self, measurement: OriginalMeasurement) -> Self {
        self.original_measurement = Some(measurement);
        self
    }

    /// Build an entity from an input cell holding several whitespace-separated IDs
    /// of one kind (e.g. `"HMDB0000123 HMDB0000456"`).
    pub fn from_combined_ids(name: impl Into<String>, kind: &str, combined: &str) -> Self {
        let identifiers = combined
            .split_whitespace()
            .map(|value| Identifier::new(kind, value))
            .collect();
        Self {
            name: name.into(),
            identifiers,
            original_measurement: None,
        }
    }

    /// Name with surrounding whitespace removed
    pub fn trimmed_name(&self) -> &str {
        self.name.trim()
    }
}

/// Merge input rows that share a name into one entity.
///
/// Rows with a blank name are never merged; each stays its own entity.
/// Identifiers are concatenated in row order (duplicates by value removed);
/// the first row's measurement is kept. Output order follows first appearance.
pub fn coalesce_entities(rows: Vec<Entity>) -> Vec<Entity> {
    let mut merged: Vec<Entity> = Vec::new();

    for row in rows {
        let existing = if row.trimmed_name().is_empty() {
            None
        } else {
            merged.iter_mut().find(|e| e.trimmed_name() == row.trimmed_name())
        };
        match existing {
            Some(existing) => {
                for identifier in row.identifiers {
                    if !existing.identifiers.iter().any(|i| i.value == identifier.value) {
                        existing.identifiers.push(identifier);
                    }
                }
                if existing.original_measurement.is_none() {
                    existing.original_measurement = row.original_measurement;
                }
            }
            None => merged.push(row),
        }
    }

    merged
}

/// One concrete query: the entity name plus (optionally) the identifier used
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub entity_name: String,
    pub identifier: Option<Identifier>,
}

impl Lookup {
    pub fn by_name(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            identifier: None,
        }
    }

    pub fn by_identifier(entity_name: impl Into<String>, identifier: Identifier) -> Self {
        Self {
            entity_name: entity_name.into(),
            identifier: Some(identifier),
        }
    }

    /// Exact external lookup key (identifier value, or the name for name-only lookups).
    ///
    /// The kind is not part of the key, so within one source a name lookup
    /// and an identifier lookup with the same text share a cache entry
    /// (for example the name "5793" and `pubchem_cid:5793`). That collision
    /// is accepted: cache keys are `(source, identifier-or-name)`.
    pub fn key(&self) -> &str {
        match &self.identifier {
            Some(identifier) => identifier.value.as_str(),
            None => self.entity_name.as_str(),
        }
    }

    /// Identifier kind, `None` for name-only lookups
    pub fn kind(&self) -> Option<&str> {
        self.identifier.as_ref().map(|i| i.kind.as_str())
    }

    pub fn is_name_only(&self) -> bool {
        self.identifier.is_none()
    }
}

// ============================================================================
// Canonical fields and merge policy table
// ============================================================================

/// How a canonical field is combined across partial records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// First non-empty value in priority order wins
    FirstWins,
    /// Concatenate in priority order, then case-insensitive dedup
    ConcatDedup,
    /// Kept as one slot per source, never merged
    PerSource,
}

/// Declared set of fields the merge engine knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    CommonName,
    IupacName,
    Formula,
    MolecularWeight,
    Smiles,
    Inchi,
    PubchemCid,
    Kingdom,
    SuperClass,
    Class,
    SubClass,
    DirectParent,
    Synonyms,
    ChemicalClasses,
    BiologicalRoles,
    Description,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 16] = [
        CanonicalField::CommonName,
        CanonicalField::IupacName,
        CanonicalField::Formula,
        CanonicalField::MolecularWeight,
        CanonicalField::Smiles,
        CanonicalField::Inchi,
        CanonicalField::PubchemCid,
        CanonicalField::Kingdom,
        CanonicalField::SuperClass,
        CanonicalField::Class,
        CanonicalField::SubClass,
        CanonicalField::DirectParent,
        CanonicalField::Synonyms,
        CanonicalField::ChemicalClasses,
        CanonicalField::BiologicalRoles,
        CanonicalField::Description,
    ];

    pub fn policy(self) -> MergePolicy {
        match self {
            CanonicalField::Synonyms
            | CanonicalField::ChemicalClasses
            | CanonicalField::BiologicalRoles => MergePolicy::ConcatDedup,
            CanonicalField::Description => MergePolicy::PerSource,
            _ => MergePolicy::FirstWins,
        }
    }
}

/// Field value: scalar text or ordered list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    /// True for blank text, or a list with no non-blank entries
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(text) => text.trim().is_empty(),
            FieldValue::List(items) => items.iter().all(|item| item.trim().is_empty()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text.as_str()),
            FieldValue::List(_) => None,
        }
    }

    /// List view: a scalar is treated as a one-element list
    pub fn items(&self) -> Vec<&str> {
        match self {
            FieldValue::Text(text) => vec![text.as_str()],
            FieldValue::List(items) => items.iter().map(String::as_str).collect(),
        }
    }
}

/// Ordered canonical field map
pub type FieldMap = BTreeMap<CanonicalField, FieldValue>;

/// Insert a scalar if it is not blank
pub fn put_text(fields: &mut FieldMap, field: CanonicalField, value: impl Into<String>) {
    let value = value.into();
    let trimmed = value.trim();
    if !trimmed.is_empty() {
        fields.insert(field, FieldValue::Text(trimmed.to_string()));
    }
}

/// Insert a list, dropping blank entries; nothing is inserted for an empty list
pub fn put_list<I, S>(fields: &mut FieldMap, field: CanonicalField, values: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let items: Vec<String> = values
        .into_iter()
        .map(Into::into)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if !items.is_empty() {
        fields.insert(field, FieldValue::List(items));
    }
}

// ============================================================================
// Partial records
// ============================================================================

/// Failure category attached to unsuccessful partial records
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    Timeout,
    NotFound,
    MalformedResponse,
    RateLimited,
    Unavailable,
}

impl fmt::Display for SourceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceErrorKind::Timeout => "timeout",
            SourceErrorKind::NotFound => "not_found",
            SourceErrorKind::MalformedResponse => "malformed_response",
            SourceErrorKind::RateLimited => "rate_limited",
            SourceErrorKind::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

/// Result of one adapter call for one lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialRecord {
    pub source: SourceKind,
    /// Identifier queried; `None` for a name-only lookup
    pub identifier: Option<Identifier>,
    /// Exact cache/lookup key
    pub lookup_key: String,
    #[serde(default)]
    pub fields: FieldMap,
    /// Adapter-reported completeness
    pub success: bool,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub from_cache: bool,
    #[serde(default)]
    pub error: Option<SourceErrorKind>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl PartialRecord {
    /// Failed attempt: no fields, error kind attached
    pub fn failed(
        source: SourceKind,
        lookup: &Lookup,
        error: SourceErrorKind,
        message: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            source,
            identifier: lookup.identifier.clone(),
            lookup_key: lookup.key().to_string(),
            fields: FieldMap::new(),
            success: false,
            elapsed_ms,
            from_cache: false,
            error: Some(error),
            error_message: Some(message.into()),
            fetched_at: Utc::now(),
        }
    }

    /// Non-empty value for a field, if any
    pub fn field(&self, field: CanonicalField) -> Option<&FieldValue> {
        self.fields.get(&field).filter(|v| !v.is_empty())
    }

    /// Same record as served from cache: flagged, zero elapsed
    pub fn into_cached(mut self) -> Self {
        self.from_cache = true;
        self.elapsed_ms = 0;
        self
    }
}
