//! Resumable runner: termination, cursor handling, reports.

use std::sync::Arc;

use vibes_backfill::batch::BatchController;
use vibes_backfill::cursor::{CursorFingerprint, FileCursorStore, PersistedCursor};
use vibes_backfill::enrich::VibesEnricher;
use vibes_backfill::report::ReportWriter;
use vibes_backfill::runner::{ResumableRunner, RunnerConfig, StopReason};
use vibes_backfill::testing::{property_at, MemoryCursorStore, MockGenerator, MockStore};
use vibes_backfill::traits::{CursorStore, ScanFilter};
use vibes_backfill::types::{BatchCursor, EntityKind, Property};

fn listings(n: usize) -> Vec<Property> {
    (0..n)
        .map(|i| property_at(&format!("{} Cedar Ave", 200 + i), i as i64))
        .collect()
}

fn config(batch_size: u32) -> RunnerConfig {
    let mut config = RunnerConfig::new(EntityKind::Property);
    config.batch_size = batch_size;
    config.delay_ms = 0;
    config.pause_between_runs_ms = 0;
    config.data_source = "mock".into();
    config
}

fn runner(
    config: RunnerConfig,
    store: &Arc<MockStore>,
    generator: &Arc<MockGenerator>,
) -> ResumableRunner {
    let enricher = VibesEnricher::new(store.clone(), generator.clone());
    ResumableRunner::new(config, BatchController::new(store.clone(), enricher))
}

fn saved_cursor(fingerprint: CursorFingerprint, offset: u64) -> PersistedCursor {
    PersistedCursor::new(
        fingerprint,
        BatchCursor {
            offset,
            ..Default::default()
        },
    )
}

// =========================================================================
// Termination
// =========================================================================

#[tokio::test]
async fn repeated_failures_stop_the_run_with_all_failures_reported() {
    let store = Arc::new(MockStore::new().with_properties(listings(10)));
    let generator = Arc::new(MockGenerator::new().failing_all());

    let mut config = config(2);
    config.stop_after_no_success_runs = 3;
    config.max_runs = 100;

    let report = runner(config, &store, &generator).run().await.unwrap();

    assert_eq!(report.stop_reason, Some(StopReason::NoProgress));
    assert_eq!(report.runs, 3);
    assert_eq!(report.totals.failed, 6);
    assert_eq!(report.totals.success, 0);
    assert_eq!(report.failures.len(), 6);
    assert_eq!(report.final_offset, Some(6));
    assert_eq!(store.vibes_count(), 0);
}

#[tokio::test]
async fn no_progress_never_exceeds_max_runs() {
    let store = Arc::new(MockStore::new().with_properties(listings(10)));
    let generator = Arc::new(MockGenerator::new().failing_all());

    let mut config = config(1);
    config.stop_after_no_success_runs = 5;
    config.max_runs = 2;

    let report = runner(config, &store, &generator).run().await.unwrap();

    assert_eq!(report.stop_reason, Some(StopReason::MaxRuns));
    assert_eq!(report.runs, 2);
    assert_eq!(report.failures.len(), 2);
}

#[tokio::test]
async fn a_success_resets_the_no_progress_streak() {
    let props = listings(6);
    // Invocations of one entity each: fail, fail, succeed, fail, fail, fail.
    let generator = Arc::new(
        MockGenerator::new()
            .failing_for(props[0].id)
            .failing_for(props[1].id)
            .failing_for(props[3].id)
            .failing_for(props[4].id)
            .failing_for(props[5].id),
    );
    let store = Arc::new(MockStore::new().with_properties(props));

    let mut config = config(1);
    config.stop_after_no_success_runs = 3;

    let report = runner(config, &store, &generator).run().await.unwrap();

    assert_eq!(report.stop_reason, Some(StopReason::NoProgress));
    assert_eq!(report.runs, 6);
    assert_eq!(report.totals.success, 1);
}

#[tokio::test]
async fn exhausted_scan_clears_the_cursor() {
    let store = Arc::new(MockStore::new().with_properties(listings(3)));
    let generator = Arc::new(MockGenerator::new());
    let cursor_store = Arc::new(MemoryCursorStore::new());

    let report = runner(config(2), &store, &generator)
        .with_cursor_store(cursor_store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.stop_reason, Some(StopReason::Exhausted));
    assert_eq!(report.runs, 3);
    assert_eq!(report.totals.success, 3);
    assert_eq!(report.final_offset, Some(3));
    assert_eq!(cursor_store.clears(), 1);
    assert!(cursor_store.current().is_none());
}

#[tokio::test]
async fn explicit_ids_run_once() {
    let props = listings(4);
    let store = Arc::new(MockStore::new().with_properties(props.clone()));
    let generator = Arc::new(MockGenerator::new());
    let cursor_store = Arc::new(MemoryCursorStore::new());

    let mut config = config(1);
    config.ids = vec![props[3].id, props[1].id];

    let report = runner(config, &store, &generator)
        .with_cursor_store(cursor_store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.stop_reason, Some(StopReason::SinglePass));
    assert_eq!(report.runs, 1);
    assert_eq!(report.totals.success, 2);
    assert_eq!(report.final_offset, None);
    assert_eq!(cursor_store.saves(), 0);
}

#[tokio::test]
async fn stop_signal_before_start_runs_nothing() {
    let store = Arc::new(MockStore::new().with_properties(listings(3)));
    let generator = Arc::new(MockGenerator::new());

    let report = runner(config(2), &store, &generator)
        .with_should_stop(Arc::new(|| true))
        .run()
        .await
        .unwrap();

    assert_eq!(report.stop_reason, Some(StopReason::Canceled));
    assert_eq!(report.runs, 0);
    assert_eq!(generator.calls(), 0);
}

// =========================================================================
// Cursor resumption
// =========================================================================

#[tokio::test]
async fn matching_cursor_resumes_the_scan() {
    let props = listings(4);
    let store = Arc::new(MockStore::new().with_properties(props.clone()));
    let generator = Arc::new(MockGenerator::new());

    let config = config(10);
    let cursor_store = Arc::new(MemoryCursorStore::with_cursor(saved_cursor(
        config.fingerprint(),
        2,
    )));

    let report = runner(config, &store, &generator)
        .with_cursor_store(cursor_store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.start_offset, Some(2));
    assert_eq!(generator.called_ids(), vec![props[2].id, props[3].id]);
}

#[tokio::test]
async fn cursor_from_a_different_scan_restarts_at_zero() {
    let props = listings(4);
    let store = Arc::new(MockStore::new().with_properties(props.clone()));
    let generator = Arc::new(MockGenerator::new());

    let config = config(10);
    let other_scan = CursorFingerprint::new(
        "mock",
        EntityKind::Property,
        &ScanFilter {
            min_price: None,
            state_codes: vec!["TX".into()],
        },
    );
    let cursor_store = Arc::new(MemoryCursorStore::with_cursor(saved_cursor(other_scan, 2)));

    let report = runner(config, &store, &generator)
        .with_cursor_store(cursor_store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.start_offset, Some(0));
    assert_eq!(generator.calls(), 4);
}

#[tokio::test]
async fn reset_cursor_discards_saved_position() {
    let store = Arc::new(MockStore::new().with_properties(listings(3)));
    let generator = Arc::new(MockGenerator::new());

    let mut config = config(10);
    config.reset_cursor = true;
    let cursor_store = Arc::new(MemoryCursorStore::with_cursor(saved_cursor(
        config.fingerprint(),
        2,
    )));

    let report = runner(config, &store, &generator)
        .with_cursor_store(cursor_store.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.start_offset, Some(0));
    assert_eq!(generator.calls(), 3);
}

#[tokio::test]
async fn file_cursor_survives_between_runners() {
    let dir = tempfile::tempdir().unwrap();
    let cursor_path = dir.path().join("cursor.json");
    let store = Arc::new(MockStore::new().with_properties(listings(5)));
    let generator = Arc::new(MockGenerator::new());

    let mut first = config(2);
    first.max_runs = 1;
    let report = runner(first, &store, &generator)
        .with_cursor_store(Arc::new(FileCursorStore::new(&cursor_path)))
        .run()
        .await
        .unwrap();
    assert_eq!(report.stop_reason, Some(StopReason::MaxRuns));

    let saved = FileCursorStore::new(&cursor_path).load().await.unwrap().unwrap();
    assert_eq!(saved.progress.offset, 2);

    let report = runner(config(2), &store, &generator)
        .with_cursor_store(Arc::new(FileCursorStore::new(&cursor_path)))
        .run()
        .await
        .unwrap();
    assert_eq!(report.start_offset, Some(2));
    assert_eq!(report.stop_reason, Some(StopReason::Exhausted));
    assert_eq!(generator.calls(), 5);
    assert!(!cursor_path.exists());
}

// =========================================================================
// Reports
// =========================================================================

#[tokio::test]
async fn report_files_are_written_on_early_termination() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MockStore::new().with_properties(listings(10)));
    let generator = Arc::new(MockGenerator::new().failing_all());

    let report = runner(config(2), &store, &generator)
        .with_report_writer(ReportWriter::new(dir.path()))
        .run()
        .await
        .unwrap();

    let latest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("latest.json")).unwrap())
            .unwrap();
    assert_eq!(latest["stop_reason"], "no_progress");
    assert_eq!(latest["failures"].as_array().unwrap().len(), report.failures.len());
    assert_eq!(latest["config"]["batch_size"], 2);

    let archives: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("run-"))
        .collect();
    assert_eq!(archives.len(), 1);
}

#[tokio::test]
async fn report_is_written_before_a_fatal_error_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MockStore::new().with_properties(listings(2)).failing_pages());
    let generator = Arc::new(MockGenerator::new());

    let err = runner(config(2), &store, &generator)
        .with_report_writer(ReportWriter::new(dir.path()))
        .run()
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("page fetch failed"));

    let latest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("latest.json")).unwrap())
            .unwrap();
    assert_eq!(latest["stop_reason"], "fatal");
    assert!(latest["error"].as_str().unwrap().contains("fetch_page"));
}

#[tokio::test]
async fn fatal_error_mid_invocation_keeps_processed_entities_in_report() {
    let dir = tempfile::tempdir().unwrap();
    let props = listings(5);
    let store = Arc::new(
        MockStore::new()
            .with_properties(props.clone())
            .failing_pages_from(2),
    );
    let generator = Arc::new(MockGenerator::new().failing_for(props[0].id));

    let mut config = config(10);
    config.page_size = 2;

    let err = runner(config, &store, &generator)
        .with_report_writer(ReportWriter::new(dir.path()))
        .run()
        .await
        .unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("fetch_page"), "{message}");
    assert_eq!(message.matches("page fetch failed").count(), 1, "{message}");
    assert_eq!(generator.calls(), 2);

    let latest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("latest.json")).unwrap())
            .unwrap();
    assert_eq!(latest["stop_reason"], "fatal");
    assert_eq!(latest["runs"], 1);
    assert_eq!(latest["totals"]["attempted"], 2);
    assert_eq!(latest["totals"]["success"], 1);
    assert_eq!(latest["totals"]["failed"], 1);
    assert_eq!(latest["final_offset"], 2);
    let failures = latest["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["entity_id"], props[0].id.to_string());
}
