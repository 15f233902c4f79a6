//! Configuration resolution for mek-enrich
//!
//! `mek-enrich.toml` is located CLI → `MEK_CONFIG` → `<config_dir>/mek/`;
//! a missing file falls back to built-in defaults. The root folder follows
//! CLI → `MEK_ROOT_FOLDER` → TOML → OS data dir.
//!
//! `identifier_policy` has no default: a run refuses to start until it is set
//! in the TOML file or on the command line.

use crate::cache::{CacheMode, CachePolicy, CacheStore, CACHE_FILE_NAME};
use crate::error::EnrichError;
use crate::resolver::{IdentifierLookup, IdentifierResolver, NameIndex};
use crate::sources::{AssistantClient, ContextualClassifier, HmdbClient, PubChemClient, SourceAdapter};
use crate::types::{kinds, SourceKind};
use crate::workflow::{
    Enricher, EventSender, FallbackOrchestrator, IdentifierPolicy, SourceSettings, SourceThrottle,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const CONFIG_ENV_VAR: &str = "MEK_CONFIG";
pub const CONFIG_FILE_NAME: &str = "mek-enrich.toml";
pub const ROOT_FOLDER_ENV_VAR: &str = "MEK_ROOT_FOLDER";

/// Assistant API key variables, highest priority first
pub const API_KEY_ENV_VARS: [&str; 2] = ["MEK_OPENROUTER_API_KEY", "OPENROUTER_API_KEY"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    pub root_folder: Option<PathBuf>,
    /// Entities enriched in parallel
    pub concurrency: usize,
    pub source_priority: Vec<SourceKind>,
    pub identifier_policy: Option<IdentifierPolicy>,
    /// Identifier kinds backfilled from the name index when missing
    pub required_identifier_kinds: Vec<String>,
    /// JSON file: name → identifiers
    pub name_index: Option<PathBuf>,
    /// Jaro-Winkler similarity for name index fallback matching
    pub fuzzy_name_threshold: Option<f64>,
    pub cache: CacheConfig,
    pub merge: MergeConfig,
    pub sources: SourcesConfig,
    pub logging: LoggingConfig,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            concurrency: 4,
            source_priority: SourceKind::ALL.to_vec(),
            identifier_policy: None,
            required_identifier_kinds: vec![kinds::HMDB.to_string()],
            name_index: None,
            fuzzy_name_threshold: None,
            cache: CacheConfig::default(),
            merge: MergeConfig::default(),
            sources: SourcesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub mode: CacheMode,
    /// Failed lookups older than this are retried
    pub negative_ttl_hours: Option<u64>,
}

impl CacheConfig {
    /// Negative TTL as a duration; `None` when unset or too large to represent
    pub fn negative_ttl(&self) -> Option<chrono::Duration> {
        self.negative_ttl_hours
            .and_then(|hours| i64::try_from(hours).ok())
            .and_then(chrono::Duration::try_hours)
    }

    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            mode: self.mode,
            negative_ttl: self.negative_ttl(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Cap on every list field after dedup
    pub list_limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `[sources.<kind>]` table. Unset values take the per-source defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub enabled: Option<bool>,
    pub min_interval_ms: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub fallback_only: Option<bool>,
    pub base_url: Option<String>,
}

impl SourceConfig {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn min_interval(&self, kind: SourceKind) -> Duration {
        let default_ms = match kind {
            SourceKind::Assistant | SourceKind::Hmdb => 2000,
            SourceKind::PubChem => 200,
            SourceKind::Contextual => 0,
        };
        Duration::from_millis(self.min_interval_ms.unwrap_or(default_ms))
    }

    pub fn timeout(&self, kind: SourceKind) -> Duration {
        let default_secs = match kind {
            SourceKind::Assistant => 120,
            _ => 30,
        };
        Duration::from_secs(self.timeout_secs.unwrap_or(default_secs))
    }

    /// The assistant is only consulted when the databases came up empty
    pub fn fallback_only(&self, kind: SourceKind) -> bool {
        self.fallback_only.unwrap_or(kind == SourceKind::Assistant)
    }

    pub fn settings(&self, kind: SourceKind) -> SourceSettings {
        SourceSettings {
            timeout: self.timeout(kind),
            fallback_only: self.fallback_only(kind),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    #[serde(flatten)]
    pub common: SourceConfig,
    pub api_key: Option<String>,
    /// Tried in order until one answers
    pub models: Vec<String>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub assistant: AssistantConfig,
    pub hmdb: SourceConfig,
    pub pubchem: SourceConfig,
    pub contextual: SourceConfig,
}

impl SourcesConfig {
    pub fn get(&self, kind: SourceKind) -> &SourceConfig {
        match kind {
            SourceKind::Assistant => &self.assistant.common,
            SourceKind::Hmdb => &self.hmdb,
            SourceKind::PubChem => &self.pubchem,
            SourceKind::Contextual => &self.contextual,
        }
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve the assistant API key.
///
/// **Priority:** `MEK_OPENROUTER_API_KEY` → `OPENROUTER_API_KEY` → TOML
pub fn resolve_assistant_api_key(toml_key: Option<&str>) -> Option<String> {
    let mut found: Vec<(&str, String)> = API_KEY_ENV_VARS
        .iter()
        .filter_map(|var| {
            std::env::var(var)
                .ok()
                .filter(|key| is_valid_key(key))
                .map(|key| (*var, key))
        })
        .collect();

    if let Some(key) = toml_key.filter(|key| is_valid_key(key)) {
        found.push(("TOML", key.to_string()));
    }

    if found.len() > 1 {
        let origins: Vec<&str> = found.iter().map(|(origin, _)| *origin).collect();
        warn!(
            "Assistant API key found in multiple sources: {}. Using {} (highest priority).",
            origins.join(", "),
            origins[0]
        );
    }

    found.into_iter().next().map(|(origin, key)| {
        info!("Assistant API key loaded from {}", origin);
        key.trim().to_string()
    })
}

impl EnrichConfig {
    /// Locate and parse the TOML file; built-in defaults when there is none
    pub fn load(cli_path: Option<&Path>) -> Result<Self, EnrichError> {
        let path = mek_common::config::resolve_config_file(cli_path, CONFIG_ENV_VAR, CONFIG_FILE_NAME);
        let config = match path {
            Some(path) => {
                let loaded = mek_common::config::load_toml_file::<EnrichConfig>(&path)?;
                if loaded.is_some() {
                    info!("Loaded configuration from {}", path.display());
                }
                loaded.unwrap_or_default()
            }
            None => {
                warn!("No {} found, using built-in defaults", CONFIG_FILE_NAME);
                Self::default()
            }
        };
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, EnrichError> {
        toml::from_str(content).map_err(|e| EnrichError::Config(format!("Parse TOML failed: {}", e)))
    }

    pub fn root_folder(&self, cli_arg: Option<&Path>) -> PathBuf {
        mek_common::config::resolve_root_folder(cli_arg, ROOT_FOLDER_ENV_VAR, self.root_folder.as_deref())
    }

    pub fn cache_path(&self, root_folder: &Path) -> PathBuf {
        root_folder.join(CACHE_FILE_NAME)
    }

    /// Reject settings a run cannot start with
    pub fn validate(&self) -> Result<IdentifierPolicy, EnrichError> {
        if self.concurrency == 0 {
            return Err(EnrichError::Config("concurrency must be at least 1".into()));
        }

        if self.source_priority.is_empty() {
            return Err(EnrichError::Config("source_priority lists no sources".into()));
        }

        let mut seen = HashSet::new();
        for kind in &self.source_priority {
            if !seen.insert(*kind) {
                return Err(EnrichError::Config(format!(
                    "source '{}' appears more than once in source_priority",
                    kind
                )));
            }
        }

        if let Some(threshold) = self.fuzzy_name_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(EnrichError::Config(format!(
                    "fuzzy_name_threshold must be between 0 and 1, got {}",
                    threshold
                )));
            }
        }

        if let Some(hours) = self.cache.negative_ttl_hours {
            if self.cache.negative_ttl().is_none() {
                return Err(EnrichError::Config(format!(
                    "cache.negative_ttl_hours is out of range: {}",
                    hours
                )));
            }
        }

        if self.merge.list_limit == Some(0) {
            return Err(EnrichError::Config("merge.list_limit must be at least 1".into()));
        }

        self.identifier_policy.ok_or_else(|| {
            EnrichError::Config(
                "identifier_policy is not set. Choose one of:\n\
                 1. CLI: --identifier-policy stop_on_first_success|always_combine\n\
                 2. TOML: identifier_policy = \"stop_on_first_success\" (or \"always_combine\")"
                    .to_string(),
            )
        })
    }

    pub fn throttle(&self) -> SourceThrottle {
        SourceThrottle::from_intervals(
            self.source_priority
                .iter()
                .map(|kind| (*kind, self.sources.get(*kind).min_interval(*kind))),
        )
    }

    /// Construct one adapter. `Ok(None)` means the source is disabled.
    fn build_adapter(&self, kind: SourceKind) -> Result<Option<Arc<dyn SourceAdapter>>, EnrichError> {
        let source = self.sources.get(kind);
        if !source.enabled() {
            info!(source = %kind, "Source disabled by configuration");
            return Ok(None);
        }

        let timeout = source.timeout(kind);
        let adapter: Arc<dyn SourceAdapter> = match kind {
            SourceKind::Hmdb => Arc::new(HmdbClient::new(source.base_url.clone(), timeout)?),
            SourceKind::PubChem => Arc::new(PubChemClient::new(source.base_url.clone(), timeout)?),
            SourceKind::Contextual => Arc::new(ContextualClassifier::new()),
            SourceKind::Assistant => {
                let assistant = &self.sources.assistant;
                let api_key = match resolve_assistant_api_key(assistant.api_key.as_deref()) {
                    Some(key) => key,
                    None => {
                        warn!(
                            "Assistant API key not configured ({} or {} or [sources.assistant] api_key); assistant source disabled",
                            API_KEY_ENV_VARS[0], API_KEY_ENV_VARS[1]
                        );
                        return Ok(None);
                    }
                };
                Arc::new(AssistantClient::new(
                    api_key,
                    assistant.models.clone(),
                    assistant.max_tokens.unwrap_or(crate::sources::assistant_client::DEFAULT_MAX_TOKENS),
                    source.base_url.clone(),
                    timeout,
                )?)
            }
        };
        Ok(Some(adapter))
    }

    /// Orchestrator over the enabled sources, priority order
    pub fn build_orchestrator(
        &self,
        cache: Arc<CacheStore>,
        policy: IdentifierPolicy,
        events: Option<EventSender>,
    ) -> Result<FallbackOrchestrator, EnrichError> {
        let mut orchestrator = FallbackOrchestrator::new(cache, Arc::new(self.throttle()), policy)
            .with_events(events);

        for kind in &self.source_priority {
            if let Some(adapter) = self.build_adapter(*kind)? {
                orchestrator = orchestrator.with_source(adapter, self.sources.get(*kind).settings(*kind));
            }
        }

        if orchestrator.priority().is_empty() {
            return Err(EnrichError::Config("no enabled sources".into()));
        }
        Ok(orchestrator)
    }

    /// Resolver with the optional name index loaded
    pub fn build_resolver(&self, root_folder: &Path) -> Result<IdentifierResolver, EnrichError> {
        let lookup: Option<Arc<dyn IdentifierLookup>> = match &self.name_index {
            Some(path) => {
                let path = if path.is_relative() {
                    root_folder.join(path)
                } else {
                    path.clone()
                };
                let index = NameIndex::load_json(&path)?.with_fuzzy_threshold(self.fuzzy_name_threshold);
                Some(Arc::new(index))
            }
            None => None,
        };
        Ok(IdentifierResolver::new(lookup, self.required_identifier_kinds.clone()))
    }

    /// Wire the full pipeline for one run
    pub fn build_enricher(
        &self,
        root_folder: &Path,
        cache: Arc<CacheStore>,
        policy: IdentifierPolicy,
        events: Option<EventSender>,
    ) -> Result<Enricher, EnrichError> {
        let resolver = self.build_resolver(root_folder)?;
        let orchestrator = self.build_orchestrator(cache, policy, events.clone())?;
        Ok(Enricher::new(resolver, orchestrator)
            .with_concurrency(self.concurrency)
            .with_list_limit(self.merge.list_limit)
            .with_events(events))
    }
}
