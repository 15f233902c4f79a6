//! Persisted enriched store
//!
//! `enriched.json` in the root folder: a JSON object keyed by
//! [`EnrichedRecord::entity_key`] (the entity name, or `kind:value` of the
//! first identifier for nameless entities).
//! Keys are kept in a `BTreeMap` so the file is byte-stable across runs, and
//! every save goes through an atomic temp-file rename.

use crate::error::EnrichError;
use crate::models::EnrichedRecord;
use crate::telemetry::{RunSummary, RUN_SUMMARY_FILE_NAME};
use mek_common::config::write_json_pretty;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const ENRICHED_FILE_NAME: &str = "enriched.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnrichedStore {
    records: BTreeMap<String, EnrichedRecord>,
}

impl EnrichedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the store; a missing file is an empty store
    pub fn load(path: &Path) -> Result<Self, EnrichError> {
        if !path.exists() {
            debug!(path = %path.display(), "No enriched store yet");
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let store: Self = serde_json::from_str(&content)?;
        info!(path = %path.display(), records = store.len(), "Loaded enriched store");
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> Result<(), EnrichError> {
        write_json_pretty(self, path)?;
        info!(path = %path.display(), records = self.len(), "Saved enriched store");
        Ok(())
    }

    /// Insert or overwrite the record with the same entity key
    pub fn upsert(&mut self, record: EnrichedRecord) -> Option<EnrichedRecord> {
        self.records.insert(record.entity_key(), record)
    }

    /// Look up by entity name, or by `kind:value` for nameless entities
    pub fn get(&self, entity_key: &str) -> Option<&EnrichedRecord> {
        self.records.get(entity_key.trim())
    }

    pub fn records(&self) -> impl Iterator<Item = &EnrichedRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub fn enriched_store_path(root_folder: &Path) -> PathBuf {
    root_folder.join(ENRICHED_FILE_NAME)
}

/// Write `run_summary.json` next to the enriched store
pub fn write_run_summary(root_folder: &Path, summary: &RunSummary) -> Result<PathBuf, EnrichError> {
    let path = root_folder.join(RUN_SUMMARY_FILE_NAME);
    write_json_pretty(summary, &path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::{MergeEngine, MergeInput};
    use crate::types::{Identifier, Lookup, OriginalMeasurement, SourceKind};
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;

    fn record(name: &str, measurement: OriginalMeasurement) -> EnrichedRecord {
        let lookups = vec![Lookup::by_name(name)];
        MergeEngine::new(vec![SourceKind::Hmdb]).merge_at(
            MergeInput {
                entity_name: name,
                lookups: &lookups,
                records: &[],
                unresolved_kinds: &["hmdb".to_string()],
                original_measurement: Some(&measurement),
            },
            DateTime::<Utc>::default(),
        )
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = EnrichedStore::load(&dir.path().join(ENRICHED_FILE_NAME)).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_round_trip_keeps_missing_distinct_from_zero() {
        let dir = TempDir::new().unwrap();
        let path = enriched_store_path(dir.path());

        let mut store = EnrichedStore::new();
        store.upsert(record(
            "Glycine",
            OriginalMeasurement {
                low_level: Some(0.0),
                high_level: Some(2.5),
                sd: None,
                reference: Some("Smith 2019".to_string()),
                ..Default::default()
            },
        ));
        store.upsert(record(
            "Alanine",
            OriginalMeasurement {
                sd: Some(0.0),
                ..Default::default()
            },
        ));
        store.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"sd\": null"));

        let loaded = EnrichedStore::load(&path).unwrap();
        assert_eq!(loaded, store);

        let glycine = loaded.get("Glycine").unwrap().original_measurement.as_ref().unwrap();
        assert_eq!(glycine.sd, None);
        assert_eq!(glycine.low_level, Some(0.0));
        let alanine = loaded.get("Alanine").unwrap().original_measurement.as_ref().unwrap();
        assert_eq!(alanine.sd, Some(0.0));
    }

    #[test]
    fn test_extra_columns_survive_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = enriched_store_path(dir.path());

        let mut extra = BTreeMap::new();
        extra.insert("unit".to_string(), serde_json::json!("umol/L"));
        extra.insert("n".to_string(), serde_json::json!(12));

        let mut store = EnrichedStore::new();
        store.upsert(record(
            "Glycine",
            OriginalMeasurement {
                extra,
                ..Default::default()
            },
        ));
        store.save(&path).unwrap();

        let loaded = EnrichedStore::load(&path).unwrap();
        let measurement = loaded.get("Glycine").unwrap().original_measurement.as_ref().unwrap();
        assert_eq!(measurement.extra["unit"], serde_json::json!("umol/L"));
        assert_eq!(measurement.extra["n"], serde_json::json!(12));
    }

    #[test]
    fn test_upsert_overwrites_same_entity() {
        let mut store = EnrichedStore::new();
        assert!(store.upsert(record("Glycine", OriginalMeasurement::default())).is_none());
        assert!(store.upsert(record("Glycine", OriginalMeasurement::default())).is_some());
        assert_eq!(store.len(), 1);
    }

    fn nameless(hmdb_id: &str) -> EnrichedRecord {
        let lookups = vec![Lookup::by_identifier("", Identifier::hmdb(hmdb_id))];
        MergeEngine::new(vec![SourceKind::Hmdb]).merge_at(
            MergeInput {
                entity_name: "",
                lookups: &lookups,
                records: &[],
                unresolved_kinds: &[],
                original_measurement: None,
            },
            DateTime::<Utc>::default(),
        )
    }

    #[test]
    fn test_nameless_entities_keyed_by_identifier() {
        let dir = TempDir::new().unwrap();
        let path = enriched_store_path(dir.path());

        let mut store = EnrichedStore::new();
        assert!(store.upsert(nameless("HMDB0000123")).is_none());
        assert!(store.upsert(nameless("HMDB0000161")).is_none());
        store.upsert(record("Glycine", OriginalMeasurement::default()));
        assert_eq!(store.len(), 3);

        store.save(&path).unwrap();
        let loaded = EnrichedStore::load(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert!(loaded.get("hmdb:HMDB0000123").is_some());
        assert!(loaded.get("hmdb:HMDB0000161").is_some());
        assert!(loaded.get("Glycine").is_some());

        // Same identifier again replaces the earlier record
        assert!(store.upsert(nameless("HMDB0000123")).is_some());
        assert_eq!(store.len(), 3);
    }
}
