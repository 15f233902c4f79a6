//! Identifier resolution
//!
//! Turns an entity into the ordered, deduplicated identifier list the
//! orchestrator walks. Required kinds missing from the input may be
//! backfilled from a name index; a kind that stays missing is reported as
//! unresolved and simply narrows the sources queried.

use crate::error::EnrichError;
use crate::sources::hmdb_client::is_valid_hmdb_id;
use crate::types::{kinds, Entity, Identifier};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Name → identifier lookup table (external collaborator)
pub trait IdentifierLookup: Send + Sync {
    /// Identifiers known for a name. Absence is an empty vec, never an error.
    fn resolve(&self, name: &str) -> Vec<Identifier>;
}

/// Lookup key normalisation: trimmed and lower-cased
pub fn normalize_lookup(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IndexEntry {
    /// Bare HMDB accession
    Accession(String),
    Typed(Identifier),
}

impl From<IndexEntry> for Identifier {
    fn from(entry: IndexEntry) -> Self {
        match entry {
            IndexEntry::Accession(value) => Identifier::hmdb(value),
            IndexEntry::Typed(identifier) => identifier,
        }
    }
}

/// In-memory name index: exact match, then case-insensitive, then optional fuzzy
#[derive(Debug, Default, Clone)]
pub struct NameIndex {
    exact: HashMap<String, Vec<Identifier>>,
    normalized: HashMap<String, Vec<Identifier>>,
    /// Jaro-Winkler similarity required for a fuzzy hit; `None` disables fuzzy matching
    fuzzy_threshold: Option<f64>,
}

impl NameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fuzzy_threshold(mut self, threshold: Option<f64>) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    /// Add a name mapping. Malformed HMDB accessions and placeholders are skipped.
    pub fn insert(&mut self, name: &str, identifier: Identifier) {
        let identifier = Identifier::new(identifier.kind.trim(), identifier.value.trim());
        if identifier.is_placeholder()
            || (identifier.kind == kinds::HMDB && !is_valid_hmdb_id(&identifier.value))
        {
            debug!(name, identifier = %identifier, "Skipping unusable index entry");
            return;
        }

        let name = name.trim();
        if name.is_empty() {
            return;
        }

        push_unique(self.exact.entry(name.to_string()).or_default(), identifier.clone());
        push_unique(self.normalized.entry(normalize_lookup(name)).or_default(), identifier);
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Identifier)>,
        S: AsRef<str>,
    {
        let mut index = Self::new();
        for (name, identifier) in pairs {
            index.insert(name.as_ref(), identifier);
        }
        index
    }

    /// Load a JSON object mapping names to identifier lists.
    ///
    /// Entries are either bare HMDB accessions or `{"kind", "value"}` objects.
    pub fn load_json(path: &Path) -> Result<Self, EnrichError> {
        let text = std::fs::read_to_string(path)?;
        let raw: BTreeMap<String, Vec<IndexEntry>> = serde_json::from_str(&text)?;

        let mut index = Self::new();
        for (name, entries) in raw {
            for entry in entries {
                index.insert(&name, entry.into());
            }
        }

        info!(path = %path.display(), names = index.len(), "Loaded name index");
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    /// Indexed names most similar to `name`, best first (ties broken by name)
    pub fn best_matches(&self, name: &str, limit: usize) -> Vec<(String, f64)> {
        let query = normalize_lookup(name);
        if query.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(String, f64)> = self
            .normalized
            .keys()
            .map(|candidate| (candidate.clone(), strsim::jaro_winkler(&query, candidate)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(limit);
        scored
    }
}

impl IdentifierLookup for NameIndex {
    fn resolve(&self, name: &str) -> Vec<Identifier> {
        if let Some(ids) = self.exact.get(name.trim()) {
            return ids.clone();
        }
        if let Some(ids) = self.normalized.get(&normalize_lookup(name)) {
            return ids.clone();
        }

        let threshold = match self.fuzzy_threshold {
            Some(threshold) => threshold,
            None => return Vec::new(),
        };
        match self.best_matches(name, 1).into_iter().next() {
            Some((candidate, score)) if score >= threshold => {
                debug!(name, matched = %candidate, score, "Fuzzy name index match");
                self.normalized.get(&candidate).cloned().unwrap_or_default()
            }
            _ => Vec::new(),
        }
    }
}

fn push_unique(list: &mut Vec<Identifier>, identifier: Identifier) {
    if !list.iter().any(|i| i.value == identifier.value) {
        list.push(identifier);
    }
}

/// Resolver output for one entity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Identifiers to attempt, in discovery order
    pub identifiers: Vec<Identifier>,
    /// Required kinds with no identifier after backfill
    pub unresolved_kinds: Vec<String>,
}

pub struct IdentifierResolver {
    lookup: Option<Arc<dyn IdentifierLookup>>,
    required_kinds: Vec<String>,
}

impl IdentifierResolver {
    pub fn new(lookup: Option<Arc<dyn IdentifierLookup>>, required_kinds: Vec<String>) -> Self {
        Self {
            lookup,
            required_kinds,
        }
    }

    /// Resolver that only cleans up the identifiers already on the entity
    pub fn passthrough() -> Self {
        Self::new(None, Vec::new())
    }

    pub fn resolve(&self, entity: &Entity) -> Resolution {
        let mut identifiers: Vec<Identifier> = Vec::new();
        for identifier in &entity.identifiers {
            let cleaned = Identifier::new(identifier.kind.trim(), identifier.value.trim());
            if !cleaned.is_placeholder() {
                push_unique(&mut identifiers, cleaned);
            }
        }

        let mut unresolved_kinds = Vec::new();
        for kind in &self.required_kinds {
            if identifiers.iter().any(|i| &i.kind == kind) {
                continue;
            }

            let backfill: Vec<Identifier> = self
                .lookup
                .as_ref()
                .map(|lookup| lookup.resolve(entity.trimmed_name()))
                .unwrap_or_default()
                .into_iter()
                .filter(|i| &i.kind == kind && !i.is_placeholder())
                .collect();

            if backfill.is_empty() {
                let unresolved = EnrichError::IdentifierUnresolved {
                    entity: entity.trimmed_name().to_string(),
                    kind: kind.clone(),
                };
                debug!("{}", unresolved);
                unresolved_kinds.push(kind.clone());
            } else {
                debug!(entity = entity.trimmed_name(), kind = %kind, count = backfill.len(), "Backfilled identifiers from name index");
                for identifier in backfill {
                    push_unique(&mut identifiers, identifier);
                }
            }
        }

        Resolution {
            identifiers,
            unresolved_kinds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn index() -> NameIndex {
        NameIndex::from_pairs(vec![
            ("Glycine", Identifier::hmdb("HMDB0000123")),
            ("L-Leucine", Identifier::hmdb("HMDB0000687")),
            ("Broken", Identifier::hmdb("HMDB123")),
            ("Placeholder", Identifier::hmdb("NOID00000")),
        ])
    }

    #[test]
    fn test_exact_then_case_insensitive() {
        let index = index();
        assert_eq!(index.resolve("Glycine"), vec![Identifier::hmdb("HMDB0000123")]);
        assert_eq!(index.resolve("  l-leucine "), vec![Identifier::hmdb("HMDB0000687")]);
        assert!(index.resolve("Valine").is_empty());
    }

    #[test]
    fn test_invalid_entries_skipped() {
        let index = index();
        assert_eq!(index.len(), 2);
        assert!(index.resolve("Broken").is_empty());
        assert!(index.resolve("Placeholder").is_empty());
    }

    #[test]
    fn test_fuzzy_match_respects_threshold() {
        let strict = index();
        assert!(strict.resolve("Glycin").is_empty());

        let fuzzy = index().with_fuzzy_threshold(Some(0.9));
        assert_eq!(fuzzy.resolve("Glycin"), vec![Identifier::hmdb("HMDB0000123")]);
        assert!(fuzzy.resolve("Urate").is_empty());

        let best = fuzzy.best_matches("glycin", 2);
        assert_eq!(best[0].0, "glycine");
    }

    #[test]
    fn test_load_json_mixed_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(
            &path,
            r#"{"Glycine": ["HMDB0000123", {"kind": "pubchem_cid", "value": "750"}],
                "Unknown": ["NOID00000"]}"#,
        )
        .unwrap();

        let index = NameIndex::load_json(&path).unwrap();
        assert_eq!(
            index.resolve("glycine"),
            vec![Identifier::hmdb("HMDB0000123"), Identifier::pubchem_cid("750")]
        );
        assert!(index.resolve("Unknown").is_empty());
    }

    #[test]
    fn test_resolver_dedups_and_drops_placeholders() {
        let entity = Entity::new("Glycine")
            .with_identifier(Identifier::hmdb(" HMDB0000123 "))
            .with_identifier(Identifier::hmdb("NOID00000"))
            .with_identifier(Identifier::hmdb("HMDB0000123"))
            .with_identifier(Identifier::hmdb("HMDB0000999"));

        let resolution = IdentifierResolver::passthrough().resolve(&entity);
        assert_eq!(
            resolution.identifiers,
            vec![Identifier::hmdb("HMDB0000123"), Identifier::hmdb("HMDB0000999")]
        );
        assert!(resolution.unresolved_kinds.is_empty());
    }

    #[test]
    fn test_resolver_backfills_required_kind() {
        let resolver = IdentifierResolver::new(Some(Arc::new(index())), vec![kinds::HMDB.to_string()]);

        let backfilled = resolver.resolve(&Entity::new("glycine"));
        assert_eq!(backfilled.identifiers, vec![Identifier::hmdb("HMDB0000123")]);

        let missing = resolver.resolve(&Entity::new("Mystery compound"));
        assert!(missing.identifiers.is_empty());
        assert_eq!(missing.unresolved_kinds, vec![kinds::HMDB.to_string()]);
    }

    #[test]
    fn test_resolver_keeps_input_when_kind_present() {
        let resolver = IdentifierResolver::new(Some(Arc::new(index())), vec![kinds::HMDB.to_string()]);
        let entity = Entity::new("Glycine").with_identifier(Identifier::hmdb("HMDB0000456"));

        let resolution = resolver.resolve(&entity);
        assert_eq!(resolution.identifiers, vec![Identifier::hmdb("HMDB0000456")]);
    }
}
