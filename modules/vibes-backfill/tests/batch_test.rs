//! Batch controller behavior against in-memory mocks.

use std::sync::Arc;

use vibes_backfill::batch::{BatchController, BatchOptions, CursorSink, Selection};
use vibes_backfill::cursor::CursorFingerprint;
use vibes_backfill::enrich::VibesEnricher;
use vibes_backfill::source_hash::property_source_hash;
use vibes_backfill::testing::{property_at, MemoryCursorStore, MockGenerator, MockStore};
use vibes_backfill::traits::ScanFilter;
use vibes_backfill::types::{Entity, EntityKind, Property};

fn controller(store: &Arc<MockStore>, generator: &Arc<MockGenerator>) -> BatchController {
    let enricher = VibesEnricher::new(store.clone(), generator.clone());
    BatchController::new(store.clone(), enricher)
}

fn scan() -> BatchOptions {
    BatchOptions::new(EntityKind::Property, Selection::Scan(ScanFilter::default()))
}

/// Newest first: index 0 is the first entity the scan visits.
fn listings(n: usize) -> Vec<Property> {
    (0..n)
        .map(|i| property_at(&format!("{} Alder St", 100 + i), i as i64))
        .collect()
}

// =========================================================================
// Skip / force
// =========================================================================

#[tokio::test]
async fn unchanged_entities_are_skipped() {
    let props = listings(3);
    let store = Arc::new(
        MockStore::new()
            .with_properties(props.clone())
            .with_current_vibes(&Entity::Property(props[1].clone())),
    );
    let generator = Arc::new(MockGenerator::new());

    let result = controller(&store, &generator).run(&scan()).await.unwrap();

    assert_eq!(result.attempted, 2);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.success, 2);
    assert_eq!(generator.called_ids(), vec![props[0].id, props[2].id]);
    assert_eq!(result.next_offset, Some(3));
}

#[tokio::test]
async fn force_regenerates_unchanged_entities() {
    let props = listings(2);
    let store = Arc::new(
        MockStore::new()
            .with_properties(props.clone())
            .with_current_vibes(&Entity::Property(props[0].clone()))
            .with_current_vibes(&Entity::Property(props[1].clone())),
    );
    let generator = Arc::new(MockGenerator::new());

    let options = BatchOptions {
        force: true,
        ..scan()
    };
    let result = controller(&store, &generator).run(&options).await.unwrap();

    assert_eq!(result.attempted, 2);
    assert_eq!(result.skipped, 0);
    assert_eq!(generator.calls(), 2);
    assert_eq!(store.hash_calls(), 0, "force never consults stored hashes");
}

#[tokio::test]
async fn second_pass_over_unchanged_data_attempts_nothing() {
    let store = Arc::new(MockStore::new().with_properties(listings(3)));
    let generator = Arc::new(MockGenerator::new());
    let mut controller = controller(&store, &generator);

    let first = controller.run(&scan()).await.unwrap();
    assert_eq!(first.success, 3);

    let second = controller.run(&scan()).await.unwrap();
    assert_eq!(second.attempted, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(generator.calls(), 3);
}

#[tokio::test]
async fn stored_record_carries_fresh_source_hash() {
    let props = listings(1);
    let store = Arc::new(MockStore::new().with_properties(props.clone()));
    let generator = Arc::new(MockGenerator::new().with_cost(0.01));

    let result = controller(&store, &generator).run(&scan()).await.unwrap();

    let record = store.vibes_for(props[0].id).unwrap();
    assert_eq!(record.source_data_hash, property_source_hash(&props[0]));
    assert_eq!(record.kind, EntityKind::Property);
    assert_eq!(record.model_used, "mock-model");
    assert!((result.total_cost_usd - 0.01).abs() < 1e-9);
}

// =========================================================================
// Failure isolation
// =========================================================================

#[tokio::test]
async fn one_failure_does_not_stop_the_batch() {
    let props = listings(3);
    let store = Arc::new(MockStore::new().with_properties(props.clone()));
    let generator = Arc::new(MockGenerator::new().failing_for(props[1].id));

    let result = controller(&store, &generator).run(&scan()).await.unwrap();

    assert_eq!(result.attempted, 3);
    assert_eq!(result.success, 2);
    assert_eq!(result.failed, 1);
    assert!(store.vibes_for(props[1].id).is_none());
    assert!(store.vibes_for(props[0].id).is_some());
    assert!(store.vibes_for(props[2].id).is_some());

    assert_eq!(result.failures.len(), 1);
    let failure = &result.failures[0];
    assert_eq!(failure.entity_id, props[1].id);
    assert!(failure.label.contains("101 Alder St"));
    assert!(failure.error_message.contains("generation failed"));
}

#[tokio::test]
async fn page_fetch_errors_abort_the_invocation() {
    let store = Arc::new(MockStore::new().with_properties(listings(2)).failing_pages());
    let generator = Arc::new(MockGenerator::new());

    let err = controller(&store, &generator).run(&scan()).await.unwrap_err();
    assert!(format!("{:#}", err.error).contains("fetch_page"));
    assert_eq!(err.partial.attempted, 0);
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn hash_lookup_errors_abort_the_invocation() {
    let store = Arc::new(MockStore::new().with_properties(listings(3)).failing_hashes());
    let generator = Arc::new(MockGenerator::new());

    let err = controller(&store, &generator).run(&scan()).await.unwrap_err();

    let message = format!("{:#}", anyhow::Error::from(err));
    assert!(message.contains("existing_hashes"), "{message}");
    assert!(message.contains("hash lookup failed"), "{message}");
    assert_eq!(generator.calls(), 0);
    assert_eq!(store.hash_calls(), 1);
}

#[tokio::test]
async fn aborted_invocation_returns_what_it_processed() {
    let props = listings(4);
    let store = Arc::new(
        MockStore::new()
            .with_properties(props.clone())
            .failing_pages_from(2),
    );
    let generator = Arc::new(MockGenerator::new().failing_for(props[0].id));

    let err = controller(&store, &generator)
        .run(&BatchOptions {
            page_size: 2,
            ..scan()
        })
        .await
        .unwrap_err();

    assert!(format!("{:#}", err.error).contains("fetch_page"));
    assert_eq!(err.partial.attempted, 2);
    assert_eq!(err.partial.success, 1);
    assert_eq!(err.partial.failed, 1);
    assert_eq!(err.partial.failures[0].entity_id, props[0].id);
    assert_eq!(err.partial.next_offset, Some(2));
}

// =========================================================================
// Ordering, limits, resumption
// =========================================================================

#[tokio::test]
async fn limit_counts_attempts_and_offsets_resume_in_order() {
    let props = listings(5);
    let store = Arc::new(MockStore::new().with_properties(props.clone()));
    let generator = Arc::new(MockGenerator::new());
    let mut controller = controller(&store, &generator);

    let first = controller
        .run(&BatchOptions {
            limit: Some(2),
            ..scan()
        })
        .await
        .unwrap();
    assert_eq!(first.attempted, 2);
    assert_eq!(first.next_offset, Some(2));

    let second = controller
        .run(&BatchOptions {
            limit: Some(2),
            start_offset: 2,
            ..scan()
        })
        .await
        .unwrap();
    assert_eq!(second.next_offset, Some(4));

    let expected: Vec<_> = props.iter().take(4).map(|p| p.id).collect();
    assert_eq!(generator.called_ids(), expected);
}

#[tokio::test]
async fn skipped_entities_advance_the_offset_but_not_the_limit() {
    let props = listings(4);
    let store = Arc::new(
        MockStore::new()
            .with_properties(props.clone())
            .with_current_vibes(&Entity::Property(props[0].clone()))
            .with_current_vibes(&Entity::Property(props[1].clone())),
    );
    let generator = Arc::new(MockGenerator::new());

    let result = controller(&store, &generator)
        .run(&BatchOptions {
            limit: Some(1),
            ..scan()
        })
        .await
        .unwrap();

    assert_eq!(result.skipped, 2);
    assert_eq!(result.attempted, 1);
    assert_eq!(result.next_offset, Some(3));
    assert_eq!(generator.called_ids(), vec![props[2].id]);
}

#[tokio::test]
async fn small_pages_walk_the_whole_scan() {
    let store = Arc::new(MockStore::new().with_properties(listings(7)));
    let generator = Arc::new(MockGenerator::new());

    let result = controller(&store, &generator)
        .run(&BatchOptions {
            page_size: 3,
            ..scan()
        })
        .await
        .unwrap();

    assert_eq!(result.attempted, 7);
    assert_eq!(result.next_offset, Some(7));
    // three full or partial pages plus the empty one that ends the scan
    assert_eq!(store.page_calls(), 4);
    // one bulk hash lookup per non-empty page
    assert_eq!(store.hash_calls(), 3);
}

#[tokio::test]
async fn filters_restrict_the_scan() {
    let mut cheap = property_at("1 Low Rd", 0);
    cheap.price = Some(150_000);
    let mut texan = property_at("2 Ranch Rd", 1);
    texan.state_code = Some("TX".into());
    let keep = property_at("3 Main St", 2);

    let store = Arc::new(MockStore::new().with_properties([cheap, texan, keep.clone()]));
    let generator = Arc::new(MockGenerator::new());

    let options = BatchOptions::new(
        EntityKind::Property,
        Selection::Scan(ScanFilter {
            min_price: Some(200_000),
            state_codes: vec!["OR".into()],
        }),
    );
    let result = controller(&store, &generator).run(&options).await.unwrap();

    assert_eq!(result.attempted, 1);
    assert_eq!(generator.called_ids(), vec![keep.id]);
}

#[tokio::test]
async fn cursor_is_saved_after_every_entity() {
    let props = listings(3);
    let store = Arc::new(
        MockStore::new()
            .with_properties(props.clone())
            .with_current_vibes(&Entity::Property(props[0].clone())),
    );
    let generator = Arc::new(MockGenerator::new());
    let cursor_store = Arc::new(MemoryCursorStore::new());

    let options = BatchOptions {
        cursor: Some(CursorSink {
            store: cursor_store.clone(),
            fingerprint: CursorFingerprint::new("mock", EntityKind::Property, &ScanFilter::default()),
        }),
        ..scan()
    };
    controller(&store, &generator).run(&options).await.unwrap();

    assert_eq!(cursor_store.saves(), 3);
    let saved = cursor_store.current().unwrap();
    assert_eq!(saved.progress.offset, 3);
    assert_eq!(saved.progress.last_entity_id, Some(props[2].id));
    assert_eq!(saved.progress.skipped, 1);
    assert_eq!(saved.progress.success, 2);
}

// =========================================================================
// Id lists & cancellation
// =========================================================================

#[tokio::test]
async fn id_list_follows_requested_order_and_ignores_missing() {
    let props = listings(3);
    let store = Arc::new(MockStore::new().with_properties(props.clone()));
    let generator = Arc::new(MockGenerator::new());

    let missing = uuid::Uuid::new_v4();
    let options = BatchOptions::new(
        EntityKind::Property,
        Selection::Ids(vec![props[2].id, missing, props[0].id]),
    );
    let result = controller(&store, &generator).run(&options).await.unwrap();

    assert_eq!(result.attempted, 2);
    assert_eq!(result.next_offset, None);
    assert_eq!(generator.called_ids(), vec![props[2].id, props[0].id]);
    assert_eq!(store.page_calls(), 0);
}

#[tokio::test]
async fn stop_signal_finishes_current_entity_only() {
    let store = Arc::new(MockStore::new().with_properties(listings(5)));
    let generator = Arc::new(MockGenerator::new());

    let watched = generator.clone();
    let options = BatchOptions {
        should_stop: Some(Arc::new(move || watched.calls() >= 1)),
        ..scan()
    };
    let result = controller(&store, &generator).run(&options).await.unwrap();

    assert!(result.canceled);
    assert_eq!(result.attempted, 1);
    assert_eq!(result.success, 1);
    assert_eq!(result.next_offset, Some(1));
    assert_eq!(generator.calls(), 1);
}
