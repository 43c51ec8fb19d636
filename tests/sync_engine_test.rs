//! Sync engine behavior against an in-memory remote.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;

use sigmahub::core::models::{Resource, SyncCursor};
use sigmahub::core::range::SyncRange;
use sigmahub::core::sync::{SyncEngine, SyncRequest};
use sigmahub::error::HubError;
use sigmahub::storage::cache::{CacheStore, MemoryCacheStore, RecordFilter};
use sigmahub::{FixedClock, FixtureSource, malformed_sale, product_payload, sales_batch};

use common::fixtures::{NOW, engine};
use common::log_capture::LogCapture;
use common::logger::TestLogger;

fn january() -> SyncRange {
    SyncRange::parse("2024-01-01", "2024-02-01").unwrap()
}

struct Setup {
    source: Arc<FixtureSource>,
    store: Arc<MemoryCacheStore>,
    clock: Arc<FixedClock>,
    engine: SyncEngine,
}

fn setup(source: FixtureSource, page_size: u32) -> Setup {
    let source = Arc::new(source);
    let store = Arc::new(MemoryCacheStore::new());
    let clock = Arc::new(FixedClock::at(NOW));
    let engine = engine(source.clone(), store.clone(), clock.clone(), page_size);
    Setup {
        source,
        store,
        clock,
        engine,
    }
}

fn sales_only() -> SyncRequest {
    SyncRequest::new(january()).with_resources(vec![Resource::Sales])
}

#[tokio::test]
async fn pages_through_every_sale() {
    let log = TestLogger::new("pages_through_every_sale");
    log.phase("setup");
    let s = setup(
        FixtureSource::new().with_records(Resource::Sales, sales_batch(25, "2024-01-05T00:00:00Z")),
        10,
    );

    log.phase("execute");
    let result = s.engine.run_sync(&sales_only()).await.unwrap();

    log.phase("verify");
    assert!(result.done);
    assert_eq!(result.pages_fetched, 3);
    assert_eq!(result.fetched, 25);
    assert_eq!(result.upserted, 25);
    assert_eq!(result.derived_upserted, 25);
    assert!(result.failed.is_empty());
    assert_eq!(s.source.page_calls(), 3);

    let sales = s.store.query(&RecordFilter::resource(Resource::Sales)).await.unwrap();
    assert_eq!(sales.len(), 25);
    let customers = s
        .store
        .query(&RecordFilter::resource(Resource::Customers))
        .await
        .unwrap();
    assert_eq!(customers.len(), 25);
    log.finish_ok();
}

#[tokio::test]
async fn malformed_record_is_reported_not_fatal() {
    let capture = LogCapture::start();
    let mut sales = sales_batch(9, "2024-01-05T00:00:00Z");
    sales.insert(4, malformed_sale("s-bad"));
    let s = setup(FixtureSource::new().with_records(Resource::Sales, sales), 3);

    let result = s.engine.run_sync(&sales_only()).await.unwrap();

    assert!(result.done);
    assert_eq!(result.pages_fetched, 4);
    assert_eq!(result.fetched, 10);
    assert_eq!(result.upserted, 9);
    let failed: Vec<_> = result.failed.iter().map(|f| f.external_id.as_str()).collect();
    assert_eq!(failed, ["s-bad"]);
    assert_eq!(result.failed[0].resource, Resource::Sales);
    assert!(s.store.get(Resource::Sales, "s-bad").await.unwrap().is_none());
    // The bad record sat on page 2; pages 3 and 4 still landed.
    assert!(s.store.get(Resource::Sales, "s-006").await.unwrap().is_some());
    assert!(s.store.get(Resource::Sales, "s-009").await.unwrap().is_some());

    capture.assert_logged(tracing::Level::WARN, "Record skipped");
    capture.assert_field("external_id", "s-bad");
    capture.assert_no_errors();
}

#[tokio::test]
async fn repeated_runs_are_idempotent_and_keep_local_ids() {
    let s = setup(
        FixtureSource::new()
            .with_records(Resource::Sales, sales_batch(5, "2024-01-10T08:00:00Z"))
            .with_records(
                Resource::Products,
                vec![product_payload("p-1", "Curso Sigma", 19_700)],
            ),
        10,
    );
    let request = SyncRequest::new(january());

    let first = s.engine.run_sync(&request).await.unwrap();
    assert_eq!(first.resources, [Resource::Products, Resource::Sales]);
    assert_eq!(first.upserted, 6);
    let before = s.store.get(Resource::Sales, "s-003").await.unwrap().unwrap();
    let records_before = s.store.len();

    s.clock.advance(TimeDelta::minutes(10));
    let second = s.engine.run_sync(&request).await.unwrap();
    assert_eq!(second.upserted, 6);
    assert_eq!(s.store.len(), records_before);

    let after = s.store.get(Resource::Sales, "s-003").await.unwrap().unwrap();
    assert_eq!(after.local_id, before.local_id);
    assert_eq!(after.payload, before.payload);
    assert!(after.synced_at > before.synced_at);
}

#[tokio::test]
async fn remote_changes_overwrite_cached_payload() {
    let s = setup(
        FixtureSource::new().with_records(Resource::Sales, sales_batch(2, "2024-01-10T08:00:00Z")),
        10,
    );
    s.engine.run_sync(&sales_only()).await.unwrap();

    let mut changed = sales_batch(2, "2024-01-10T08:00:00Z");
    changed[0]["status"] = "refunded".into();
    s.source.set_records(Resource::Sales, changed);
    s.clock.advance(TimeDelta::minutes(1));
    s.engine.run_sync(&sales_only()).await.unwrap();

    let record = s.store.get(Resource::Sales, "s-001").await.unwrap().unwrap();
    assert_eq!(record.status.as_deref(), Some("refunded"));
    assert_eq!(record.payload["status"], "refunded");
}

#[tokio::test]
async fn fetch_failure_aborts_but_keeps_committed_pages() {
    let s = setup(
        FixtureSource::new().with_records(Resource::Sales, sales_batch(25, "2024-01-05T00:00:00Z")),
        10,
    );
    s.source.fail_page(Resource::Sales, 2, 500);

    let err = s.engine.run_sync(&sales_only()).await.unwrap_err();
    assert!(matches!(err, HubError::RemoteApi { status_code: 500, .. }));

    let cached = s.store.query(&RecordFilter::resource(Resource::Sales)).await.unwrap();
    assert_eq!(cached.len(), 10);
}

#[tokio::test]
async fn budget_stops_early_and_resume_finishes() {
    let log = TestLogger::new("budget_stops_early_and_resume_finishes");
    let s = setup(
        FixtureSource::new().with_records(Resource::Sales, sales_batch(25, "2024-01-05T00:00:00Z")),
        10,
    );

    log.phase("budgeted run");
    let mut request = sales_only();
    request.budget = Some(Duration::ZERO);
    request.persist_watermark = true;
    let partial = s.engine.run_sync(&request).await.unwrap();
    assert!(!partial.done);
    assert_eq!(partial.pages_fetched, 1);
    assert_eq!(partial.upserted, 10);
    let next = partial.next_cursor.expect("next cursor");
    assert_eq!(
        next,
        SyncCursor {
            resource: Resource::Sales,
            window: 0,
            page: 2
        }
    );

    let key = SyncEngine::watermark_key(&january(), &[Resource::Sales]);
    let mark = s.store.load_watermark(&key).await.unwrap().unwrap();
    assert_eq!(mark.cursor, Some(next));

    log.phase("resumed run");
    let mut resume = sales_only();
    resume.resume = true;
    resume.persist_watermark = true;
    let rest = s.engine.run_sync(&resume).await.unwrap();
    assert!(rest.done);
    assert_eq!(rest.resumed_from, Some(next));
    assert_eq!(rest.pages_fetched, 2);
    assert_eq!(rest.upserted, 15);

    let cached = s.store.query(&RecordFilter::resource(Resource::Sales)).await.unwrap();
    assert_eq!(cached.len(), 25);
    let mark = s.store.load_watermark(&key).await.unwrap().unwrap();
    assert_eq!(mark.cursor, None);
    assert_eq!(mark.last_stats.unwrap()["upserted"], 15);
    log.finish_ok();
}

#[tokio::test]
async fn slow_remote_exhausts_a_real_budget() {
    let s = setup(
        FixtureSource::new()
            .with_records(Resource::Sales, sales_batch(50, "2024-01-02T00:00:00Z"))
            .with_page_delay(Duration::from_millis(30)),
        10,
    );
    let mut request = sales_only();
    request.budget = Some(Duration::from_millis(50));

    let result = s.engine.run_sync(&request).await.unwrap();
    assert!(!result.done);
    assert!(result.pages_fetched >= 1 && result.pages_fetched < 5);
    assert_eq!(result.upserted, result.pages_fetched * 10);
    assert!(result.next_cursor.is_some());
}

#[tokio::test]
async fn explicit_resume_cursor_skips_earlier_pages() {
    let s = setup(
        FixtureSource::new().with_records(Resource::Sales, sales_batch(25, "2024-01-05T00:00:00Z")),
        10,
    );
    let mut request = sales_only();
    request.resume_from = Some(SyncCursor {
        resource: Resource::Sales,
        window: 0,
        page: 3,
    });

    let result = s.engine.run_sync(&request).await.unwrap();
    assert_eq!(result.pages_fetched, 1);
    assert_eq!(result.upserted, 5);
    assert!(s.store.get(Resource::Sales, "s-001").await.unwrap().is_none());
    assert!(s.store.get(Resource::Sales, "s-025").await.unwrap().is_some());
}

#[tokio::test]
async fn customers_alone_are_not_syncable() {
    let s = setup(FixtureSource::new(), 10);
    let request = SyncRequest::new(january()).with_resources(vec![Resource::Customers]);
    let err = s.engine.run_sync(&request).await.unwrap_err();
    assert!(matches!(err, HubError::Config(_)));
    assert_eq!(s.source.page_calls(), 0);
}

#[tokio::test]
async fn resync_fetches_each_id() {
    let s = setup(
        FixtureSource::new().with_records(Resource::Sales, sales_batch(3, "2024-01-05T00:00:00Z")),
        10,
    );
    let ids = vec!["s-001".to_string(), "s-003".to_string(), "s-404".to_string()];

    let outcome = s.engine.resync_records(Resource::Sales, &ids).await.unwrap();
    assert_eq!(outcome.requested, 3);
    assert_eq!(outcome.upserted, 2);
    assert_eq!(outcome.derived_upserted, 2);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].external_id, "s-404");
    assert_eq!(s.source.record_calls(), 3);
    assert!(s.store.get(Resource::Sales, "s-003").await.unwrap().is_some());
}
