//! mek-enrich - one enrichment pass over an entity file
//!
//! Reads a JSON array of entities, enriches each one against the configured
//! sources (cache first), and writes `enriched.json` plus `run_summary.json`
//! into the root folder. Ctrl-C stops the run; finished records are still
//! saved and the cache stays consistent for the next run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use mek_enrich::store::{enriched_store_path, write_run_summary, EnrichedStore};
use mek_enrich::types::coalesce_entities;
use mek_enrich::{CacheMode, CacheStore, EnrichConfig, EnrichmentEvent, Entity, IdentifierPolicy};

/// Command-line arguments for mek-enrich
#[derive(Parser, Debug)]
#[command(name = "mek-enrich")]
#[command(about = "Enrich metabolite entities from several sources into canonical records")]
#[command(version)]
struct Args {
    /// JSON array of entities to enrich
    #[arg(short, long)]
    input: PathBuf,

    /// Configuration file (default: MEK_CONFIG, then <config_dir>/mek/mek-enrich.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Folder holding the cache and the enriched store
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// stop_on_first_success or always_combine (overrides the config file)
    #[arg(long)]
    identifier_policy: Option<IdentifierPolicy>,

    /// Entities enriched in parallel
    #[arg(long)]
    concurrency: Option<usize>,

    /// Ignore every cache entry for this run (results are still cached)
    #[arg(long, conflicts_with = "refresh_failed")]
    refresh_cache: bool,

    /// Retry lookups that failed in earlier runs
    #[arg(long)]
    refresh_failed: bool,

    /// Only enrich the first N entities
    #[arg(long)]
    limit: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = EnrichConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    mek_common::logging::init(&config.logging.level);

    info!("Starting mek-enrich {}", env!("CARGO_PKG_VERSION"));

    if let Some(policy) = args.identifier_policy {
        config.identifier_policy = Some(policy);
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if args.refresh_cache {
        config.cache.mode = CacheMode::RefreshAll;
    } else if args.refresh_failed {
        config.cache.mode = CacheMode::RefreshFailed;
    }
    let policy = config.validate().context("Invalid configuration")?;

    let root_folder = config.root_folder(args.root_folder.as_deref());
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let entities = read_entities(&args.input, args.limit)?;
    info!(entities = entities.len(), input = %args.input.display(), "Loaded input entities");

    let cache_path = config.cache_path(&root_folder);
    let cache = Arc::new(
        CacheStore::open(&cache_path, config.cache.policy())
            .await
            .context("Failed to open source cache")?,
    );

    let (tx, rx) = mpsc::channel(256);
    let progress = tokio::spawn(log_progress(rx));

    let enricher = config
        .build_enricher(&root_folder, cache.clone(), policy, Some(tx))
        .context("Failed to build enrichment pipeline")?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let store_path = enriched_store_path(&root_folder);
    let mut store = EnrichedStore::load(&store_path).context("Failed to load enriched store")?;

    let report = enricher.enrich_batch(entities, &cancel).await;
    drop(enricher);
    if let Err(e) = progress.await {
        warn!("Progress logger stopped abnormally: {}", e);
    }

    for rejected in &report.rejected {
        warn!(index = rejected.index, entity = %rejected.entity_name, reason = %rejected.reason, "Entity skipped");
    }
    for record in report.records {
        store.upsert(record);
    }
    store.save(&store_path).context("Failed to save enriched store")?;

    let summary_path = write_run_summary(&root_folder, &report.summary).context("Failed to write run summary")?;
    report.summary.log();
    info!("Run summary: {}", summary_path.display());

    match Arc::try_unwrap(cache) {
        Ok(cache) => cache.close().await,
        Err(_) => warn!("Source cache still shared at shutdown; skipping checkpoint"),
    }

    if !report.cancelled.is_empty() {
        warn!(
            unfinished = report.cancelled.len(),
            "Run cancelled; re-run to resume from the cache"
        );
    }

    Ok(())
}

/// Parse the input file and merge rows that share a name
fn read_entities(path: &std::path::Path, limit: Option<usize>) -> Result<Vec<Entity>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input {}", path.display()))?;
    let rows: Vec<Entity> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse input {}", path.display()))?;

    let mut entities = coalesce_entities(rows);
    if let Some(limit) = limit {
        entities.truncate(limit);
    }
    Ok(entities)
}

async fn log_progress(mut rx: mpsc::Receiver<EnrichmentEvent>) {
    let mut finished = 0usize;
    while let Some(event) = rx.recv().await {
        match &event {
            EnrichmentEvent::EntityCompleted {
                entity,
                primary_source,
                total_ms,
            } => {
                finished += 1;
                info!(
                    entity = %entity,
                    primary = ?primary_source,
                    total_ms,
                    finished,
                    "Entity enriched"
                );
            }
            EnrichmentEvent::BatchCompleted {
                enriched,
                rejected,
                cancelled,
            } => {
                info!(enriched, rejected, cancelled, "Batch completed");
            }
            other => debug!(event = ?other, "Enrichment event"),
        }
    }
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match signal::ctrl_c().await {
        Ok(()) => {
            warn!("Ctrl-C received, cancelling run (finished records will be saved)");
            cancel.cancel();
        }
        Err(e) => warn!("Failed to install Ctrl-C handler: {}", e),
    }
}
