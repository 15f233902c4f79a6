// End-to-end enrichment properties
//
// Scripted sources stand in for the network; caches are real SQLite files in
// temp dirs where persistence across runs matters.

mod helpers;

use helpers::*;
use mek_enrich::cache::{CacheMode, CachePolicy, CacheStore};
use mek_enrich::resolver::IdentifierResolver;
use mek_enrich::types::{CanonicalField, Entity, Identifier, SourceKind};
use mek_enrich::workflow::{Enricher, FallbackOrchestrator, IdentifierPolicy, SourceThrottle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

async fn close(enricher: Enricher, cache: Arc<CacheStore>) {
    drop(enricher);
    match Arc::try_unwrap(cache) {
        Ok(cache) => cache.close().await,
        Err(_) => panic!("cache still shared"),
    }
}

#[tokio::test]
async fn test_synonyms_dedup_across_sources() {
    let first = ScriptedSource::new(SourceKind::Hmdb, Accepts::Everything)
        .answer("Glycine", list(CanonicalField::Synonyms, &["A", "a", "B"]))
        .build();
    let second = ScriptedSource::new(SourceKind::PubChem, Accepts::Everything)
        .answer("Glycine", list(CanonicalField::Synonyms, &["b", "C"]))
        .build();

    let enricher = enricher(
        memory_cache().await,
        IdentifierPolicy::AlwaysCombine,
        &[(first, regular()), (second, regular())],
    );
    let record = enricher
        .enrich(&Entity::new("Glycine"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(record.list(CanonicalField::Synonyms), vec!["A", "B", "C"]);
    assert_eq!(
        record.field_provenance[&CanonicalField::Synonyms].contributors,
        vec![SourceKind::Hmdb, SourceKind::PubChem]
    );
}

#[tokio::test]
async fn test_fallback_to_second_source() {
    let first = ScriptedSource::new(SourceKind::Hmdb, Accepts::Everything).build();
    let second = ScriptedSource::new(SourceKind::PubChem, Accepts::Everything)
        .answer("Glycine", text(CanonicalField::Formula, "C2H5NO2"))
        .build();

    let enricher = enricher(
        memory_cache().await,
        IdentifierPolicy::AlwaysCombine,
        &[(first, regular()), (second, regular())],
    );
    let record = enricher
        .enrich(&Entity::new("Glycine"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(record.scalar(CanonicalField::Formula), Some("C2H5NO2"));
    assert_eq!(record.provenance(CanonicalField::Formula), Some(SourceKind::PubChem));
    assert_eq!(record.primary_source, Some(SourceKind::PubChem));
    assert_eq!(record.source_failures.len(), 1);
    assert_eq!(record.source_failures[0].source, SourceKind::Hmdb);
}

#[tokio::test]
async fn test_unresolvable_entity_is_not_fatal() {
    let source = ScriptedSource::new(SourceKind::Hmdb, Accepts::Everything).build();
    let enricher = enricher(
        memory_cache().await,
        IdentifierPolicy::AlwaysCombine,
        &[(source, regular())],
    );

    let report = enricher
        .enrich_batch(
            vec![Entity::new("Unobtainium"), Entity::new("")],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.records.len(), 1);
    let record = &report.records[0];
    assert_eq!(record.primary_source, None);
    for field in [
        CanonicalField::Synonyms,
        CanonicalField::ChemicalClasses,
        CanonicalField::BiologicalRoles,
    ] {
        assert!(record.list(field).is_empty());
    }
    assert!(record.field_provenance.is_empty());
    assert_eq!(report.rejected.len(), 1);
}

#[tokio::test]
async fn test_warm_cache_makes_no_calls_and_same_output() {
    let dir = TempDir::new().unwrap();
    let entity = Entity::new("Glycine").with_identifier(Identifier::hmdb("HMDB0000123"));

    let scripted = || {
        let hmdb = ScriptedSource::new(SourceKind::Hmdb, Accepts::Kind("hmdb"))
            .answer("HMDB0000123", text(CanonicalField::Formula, "C2H5NO2"))
            .build();
        let pubchem = ScriptedSource::new(SourceKind::PubChem, Accepts::Everything)
            .answer("Glycine", list(CanonicalField::Synonyms, &["Gly", "Aminoacetic acid"]))
            .build();
        (hmdb, pubchem)
    };

    // Cold run
    let (hmdb, pubchem) = scripted();
    let cache = file_cache(dir.path(), CachePolicy::default()).await;
    let cold_enricher = enricher(
        cache.clone(),
        IdentifierPolicy::AlwaysCombine,
        &[(hmdb.clone(), regular()), (pubchem.clone(), regular())],
    );
    let cold = cold_enricher.enrich(&entity, &CancellationToken::new()).await.unwrap();
    assert_eq!(hmdb.calls(), 1);
    // name + HMDB id (the HMDB id is a not-found for this pubchem script)
    assert_eq!(pubchem.calls(), 2);
    close(cold_enricher, cache).await;

    // Two warm runs against the reopened file
    let mut warm_outputs = Vec::new();
    for _ in 0..2 {
        let (hmdb, pubchem) = scripted();
        let cache = file_cache(dir.path(), CachePolicy::default()).await;
        let warm_enricher = enricher(
            cache.clone(),
            IdentifierPolicy::AlwaysCombine,
            &[(hmdb.clone(), regular()), (pubchem.clone(), regular())],
        );
        let warm = warm_enricher.enrich(&entity, &CancellationToken::new()).await.unwrap();

        assert_eq!(hmdb.calls() + pubchem.calls(), 0);
        assert!(warm.timing_summary.entries.iter().all(|e| e.from_cache));
        assert_eq!(warm.timing_summary.total_ms, 0);
        assert_eq!(warm.fields, cold.fields);
        assert_eq!(warm.field_provenance, cold.field_provenance);
        assert_eq!(warm.primary_source, cold.primary_source);

        warm_outputs.push(serde_json::to_string(&warm.without_run_metadata()).unwrap());
        close(warm_enricher, cache).await;
    }

    assert_eq!(warm_outputs[0], warm_outputs[1]);
}

#[tokio::test]
async fn test_refresh_failed_retries_negative_entries_only() {
    let dir = TempDir::new().unwrap();
    let entity = Entity::new("Glycine");

    let source = ScriptedSource::new(SourceKind::PubChem, Accepts::Everything)
        .answer("Glycine", text(CanonicalField::Formula, "C2H5NO2"))
        .build();
    let flaky = ScriptedSource::new(SourceKind::Hmdb, Accepts::Everything).build();
    let cache = file_cache(dir.path(), CachePolicy::default()).await;
    let first = enricher(
        cache.clone(),
        IdentifierPolicy::AlwaysCombine,
        &[(flaky, regular()), (source, regular())],
    );
    first.enrich(&entity, &CancellationToken::new()).await.unwrap();
    close(first, cache).await;

    // The failed HMDB lookup now has an answer
    let recovered = ScriptedSource::new(SourceKind::Hmdb, Accepts::Everything)
        .answer("Glycine", text(CanonicalField::Formula, "C2H5NO2"))
        .build();
    let source = ScriptedSource::new(SourceKind::PubChem, Accepts::Everything).build();
    let policy = CachePolicy {
        mode: CacheMode::RefreshFailed,
        negative_ttl: None,
    };
    let cache = file_cache(dir.path(), policy).await;
    let second = enricher(
        cache.clone(),
        IdentifierPolicy::AlwaysCombine,
        &[(recovered.clone(), regular()), (source.clone(), regular())],
    );
    let record = second.enrich(&entity, &CancellationToken::new()).await.unwrap();

    assert_eq!(recovered.calls(), 1);
    assert_eq!(source.calls(), 0);
    assert_eq!(record.primary_source, Some(SourceKind::Hmdb));
    assert!(record.source_failures.is_empty());
    close(second, cache).await;
}

#[tokio::test]
async fn test_always_combine_merges_every_identifier() {
    let hmdb = ScriptedSource::new(SourceKind::Hmdb, Accepts::Kind("hmdb"))
        .answer("X1", list(CanonicalField::ChemicalClasses, &["Fatty acid"]))
        .answer("X2", list(CanonicalField::ChemicalClasses, &["Amino acid"]))
        .build();
    let enricher = enricher(
        memory_cache().await,
        IdentifierPolicy::AlwaysCombine,
        &[(hmdb.clone(), regular())],
    );

    let entity = Entity::from_combined_ids("Mixed", "hmdb", "X1 X2");
    let record = enricher.enrich(&entity, &CancellationToken::new()).await.unwrap();

    assert_eq!(
        record.list(CanonicalField::ChemicalClasses),
        vec!["Fatty acid", "Amino acid"]
    );
    for key in ["X1", "X2"] {
        let outcome = record.outcome_for(key).unwrap();
        assert!(outcome.attempted, "{} not attempted", key);
        assert!(outcome.success, "{} not successful", key);
    }
    assert_eq!(hmdb.calls(), 2);
}

#[tokio::test]
async fn test_stop_on_first_success_skips_sibling_identifiers() {
    let hmdb = ScriptedSource::new(SourceKind::Hmdb, Accepts::Kind("hmdb"))
        .answer("X1", list(CanonicalField::ChemicalClasses, &["Fatty acid"]))
        .answer("X2", list(CanonicalField::ChemicalClasses, &["Amino acid"]))
        .build();
    let enricher = enricher(
        memory_cache().await,
        IdentifierPolicy::StopOnFirstSuccess,
        &[(hmdb.clone(), regular())],
    );

    let entity = Entity::from_combined_ids("Mixed", "hmdb", "X1 X2");
    let record = enricher.enrich(&entity, &CancellationToken::new()).await.unwrap();

    assert_eq!(hmdb.calls(), 1);
    assert_eq!(record.list(CanonicalField::ChemicalClasses), vec!["Fatty acid"]);
    assert!(record.outcome_for("X1").unwrap().success);
    assert!(!record.outcome_for("X2").unwrap().attempted);
    assert_eq!(record.identifier_list.len(), 2);
}

#[tokio::test]
async fn test_fallback_source_only_used_when_others_fail() {
    let hmdb = ScriptedSource::new(SourceKind::Hmdb, Accepts::Everything)
        .answer("Glycine", text(CanonicalField::Formula, "C2H5NO2"))
        .build();
    let assistant = ScriptedSource::new(SourceKind::Assistant, Accepts::NamesOnly)
        .answer("Glycine", text(CanonicalField::Description, "An amino acid."))
        .answer("Mystery", text(CanonicalField::Description, "Unknown compound."))
        .build();

    // Assistant registered first: priority order still applies to the merge
    let enricher = enricher(
        memory_cache().await,
        IdentifierPolicy::AlwaysCombine,
        &[(assistant.clone(), fallback()), (hmdb.clone(), regular())],
    );

    let glycine = enricher
        .enrich(&Entity::new("Glycine"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(assistant.calls(), 0);
    assert_eq!(glycine.primary_source, Some(SourceKind::Hmdb));

    let mystery = enricher
        .enrich(&Entity::new("Mystery"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(assistant.calls(), 1);
    assert_eq!(mystery.primary_source, Some(SourceKind::Assistant));
    assert_eq!(mystery.description_from(SourceKind::Assistant), Some("Unknown compound."));
}

#[tokio::test]
async fn test_cancelled_run_resumes_from_cache() {
    let dir = TempDir::new().unwrap();
    let entities = vec![Entity::new("Glycine"), Entity::new("Alanine")];

    let slow = ScriptedSource::new(SourceKind::PubChem, Accepts::Everything)
        .answer("Glycine", text(CanonicalField::Formula, "C2H5NO2"))
        .answer("Alanine", text(CanonicalField::Formula, "C3H7NO2"))
        .with_delay(Duration::from_millis(200))
        .build();
    let cache = file_cache(dir.path(), CachePolicy::default()).await;
    let first = enricher(cache.clone(), IdentifierPolicy::AlwaysCombine, &[(slow.clone(), regular())])
        .with_concurrency(1);

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        })
    };
    let report = first.enrich_batch(entities.clone(), &cancel).await;
    canceller.await.unwrap();

    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].entity_name, "Glycine");
    assert_eq!(report.cancelled, vec!["Alanine"]);
    close(first, cache).await;

    let fresh = ScriptedSource::new(SourceKind::PubChem, Accepts::Everything)
        .answer("Glycine", text(CanonicalField::Formula, "C2H5NO2"))
        .answer("Alanine", text(CanonicalField::Formula, "C3H7NO2"))
        .build();
    let cache = file_cache(dir.path(), CachePolicy::default()).await;
    let second = enricher(cache.clone(), IdentifierPolicy::AlwaysCombine, &[(fresh.clone(), regular())]);
    let report = second.enrich_batch(entities, &CancellationToken::new()).await;

    assert_eq!(report.records.len(), 2);
    // Only the interrupted entity goes back to the network
    assert_eq!(fresh.calls(), 1);
    assert_eq!(report.records[1].scalar(CanonicalField::Formula), Some("C3H7NO2"));
    close(second, cache).await;
}

#[tokio::test]
async fn test_rate_limit_shared_across_entities() {
    let source = ScriptedSource::new(SourceKind::PubChem, Accepts::Everything)
        .answer("A", text(CanonicalField::Formula, "X"))
        .answer("B", text(CanonicalField::Formula, "X"))
        .answer("C", text(CanonicalField::Formula, "X"))
        .build();

    let throttle = SourceThrottle::from_intervals([(SourceKind::PubChem, Duration::from_millis(100))]);
    let orchestrator = FallbackOrchestrator::new(
        memory_cache().await,
        Arc::new(throttle),
        IdentifierPolicy::AlwaysCombine,
    )
    .with_source(source.clone(), regular());
    let enricher = Enricher::new(IdentifierResolver::passthrough(), orchestrator).with_concurrency(3);

    let start = Instant::now();
    let report = enricher
        .enrich_batch(
            vec![Entity::new("A"), Entity::new("B"), Entity::new("C")],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.records.len(), 3);
    assert_eq!(source.calls(), 3);
    // Three calls at 100ms spacing need at least two intervals
    assert!(start.elapsed() >= Duration::from_millis(190));
}
