//! Shared test utilities for mek-enrich integration tests
//!
//! `ScriptedSource` answers from a fixed table keyed by lookup key and counts
//! the calls that reach it, so tests can assert on network traffic without
//! touching the network.

#![allow(dead_code)]

use async_trait::async_trait;
use mek_enrich::cache::{CachePolicy, CacheStore, CACHE_FILE_NAME};
use mek_enrich::resolver::IdentifierResolver;
use mek_enrich::sources::{SourceAdapter, SourceError, SourcePayload};
use mek_enrich::types::{put_list, put_text, CanonicalField, FieldMap, Lookup, SourceKind};
use mek_enrich::workflow::{Enricher, FallbackOrchestrator, IdentifierPolicy, SourceSettings, SourceThrottle};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Which lookups a scripted source accepts
#[derive(Debug, Clone, Copy)]
pub enum Accepts {
    Everything,
    NamesOnly,
    Kind(&'static str),
}

pub struct ScriptedSource {
    kind: SourceKind,
    accepts: Accepts,
    answers: HashMap<String, FieldMap>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedSource {
    pub fn new(kind: SourceKind, accepts: Accepts) -> Self {
        Self {
            kind,
            accepts,
            answers: HashMap::new(),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Answer `key` with the given fields; unknown keys are not-found
    pub fn answer(mut self, key: &str, fields: FieldMap) -> Self {
        self.answers.insert(key.to_string(), fields);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn accepts(&self, lookup: &Lookup) -> bool {
        match self.accepts {
            Accepts::Everything => true,
            Accepts::NamesOnly => lookup.is_name_only(),
            Accepts::Kind(kind) => lookup.kind() == Some(kind),
        }
    }

    async fn fetch(&self, lookup: &Lookup) -> Result<SourcePayload, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.answers.get(lookup.key()) {
            Some(fields) => Ok(SourcePayload::from_fields(fields.clone())),
            None => Err(SourceError::NotFound(format!("no scripted answer for {}", lookup.key()))),
        }
    }
}

pub fn text(field: CanonicalField, value: &str) -> FieldMap {
    let mut fields = FieldMap::new();
    put_text(&mut fields, field, value);
    fields
}

pub fn list(field: CanonicalField, values: &[&str]) -> FieldMap {
    let mut fields = FieldMap::new();
    put_list(&mut fields, field, values.iter().copied());
    fields
}

pub async fn memory_cache() -> Arc<CacheStore> {
    Arc::new(CacheStore::open_in_memory(CachePolicy::default()).await.unwrap())
}

pub async fn file_cache(dir: &Path, policy: CachePolicy) -> Arc<CacheStore> {
    Arc::new(CacheStore::open(&dir.join(CACHE_FILE_NAME), policy).await.unwrap())
}

/// Enricher over the given sources (priority = slice order, no throttling)
pub fn enricher(
    cache: Arc<CacheStore>,
    policy: IdentifierPolicy,
    sources: &[(Arc<ScriptedSource>, SourceSettings)],
) -> Enricher {
    let mut orchestrator = FallbackOrchestrator::new(cache, Arc::new(SourceThrottle::new()), policy);
    for (source, settings) in sources {
        orchestrator = orchestrator.with_source(source.clone(), *settings);
    }
    Enricher::new(IdentifierResolver::passthrough(), orchestrator)
}

pub fn regular() -> SourceSettings {
    SourceSettings::default()
}

pub fn fallback() -> SourceSettings {
    SourceSettings {
        fallback_only: true,
        ..SourceSettings::default()
    }
}
