// tests/acquire_chain.rs
//
// End-to-end behaviour of the tier chain cache -> live -> store -> fallback,
// driven through the public Orchestrator with a scripted live source, an
// in-memory SQLite store and a manual clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use common::{config, harness, harness_with_store, keyword_a_source, ScriptedSource};
use trend_pipeline::clock::ManualClock;
use trend_pipeline::model::{AcquireParams, Payload, Provenance, RecordKind, RequestKind, Tier};
use trend_pipeline::store::{RecordQuery, RecordStore, UnavailableStore};

fn topics(limit: usize) -> AcquireParams {
    AcquireParams::with_limit(limit)
}

#[tokio::test]
async fn live_topics_aggregate_keyword_a_only() {
    let h = harness(config(), keyword_a_source()).await;

    let acq = h
        .orchestrator
        .acquire(RequestKind::Topics, &topics(5))
        .await
        .expect("acquire");

    assert_eq!(acq.tier, Tier::Live);
    assert!(acq.result.success);
    assert_eq!(acq.result.source, Provenance::RealCrawler);
    assert!(acq.result.error.is_none());

    let rows = acq.result.data.records().expect("records payload");
    assert!(!rows.is_empty() && rows.len() <= 3, "got {} topics", rows.len());
    assert_eq!(rows.len(), 2);

    // n1 + n3 share a tag; n2 stands alone
    let first = &rows[0];
    assert_eq!(first.title, "winter outfit");
    assert_eq!(first.note_count, 2);
    assert_eq!(first.keyword.as_deref(), Some("A"));
    let expected = (1_600.0 * 0.3 + 300.0 * 0.5 + 80.0 * 0.2 + 2.0 * 10.0) / 100.0;
    assert!((first.trend_score - expected).abs() < 1e-9);

    let second = &rows[1];
    assert_eq!(second.title, "skincare");
    let expected = (400.0 * 0.3 + 40.0 * 0.5 + 10.0 * 0.2 + 10.0) / 100.0;
    assert!((second.trend_score - expected).abs() < 1e-9);

    assert!(rows.windows(2).all(|w| w[0].trend_score >= w[1].trend_score));
    assert!(rows.iter().all(|r| r.kind == RecordKind::Topic));

    // trending lookup + one search per seed keyword
    assert_eq!(h.source.calls(), 4);
}

#[tokio::test]
async fn live_write_through_persists_notes_and_topics() {
    let h = harness(config(), keyword_a_source()).await;
    h.orchestrator
        .acquire(RequestKind::Topics, &topics(5))
        .await
        .unwrap();

    let notes = h
        .store
        .query(&RecordQuery::new(RecordKind::Note, 50))
        .await
        .unwrap();
    let stored_topics = h
        .store
        .query(&RecordQuery::new(RecordKind::Topic, 50))
        .await
        .unwrap();
    assert_eq!(notes.len(), 3);
    assert_eq!(stored_topics.len(), 2);

    let stats = h.store.stats().await.unwrap();
    assert_eq!(stats.total_crawls, 1);
    assert_eq!(stats.last_ingest, Some(common::t0()));
}

#[tokio::test]
async fn repeat_within_ttl_is_served_from_cache() {
    let h = harness(config(), keyword_a_source()).await;

    let first = h
        .orchestrator
        .acquire(RequestKind::Topics, &topics(5))
        .await
        .unwrap();
    let calls = h.source.calls();

    h.clock.advance(ChronoDuration::seconds(299));
    let second = h
        .orchestrator
        .acquire(RequestKind::Topics, &topics(5))
        .await
        .unwrap();

    assert_eq!(second.tier, Tier::Cache);
    assert_eq!(second.result, first.result);
    assert_eq!(second.result.source, Provenance::RealCrawler);
    assert_eq!(h.source.calls(), calls, "cache hit must not reach the live source");
}

#[tokio::test]
async fn expired_entry_is_bypassed_at_ttl() {
    let h = harness(config(), keyword_a_source()).await;

    h.orchestrator
        .acquire(RequestKind::Topics, &topics(5))
        .await
        .unwrap();
    let calls = h.source.calls();

    // topics TTL is 300 s; at exactly t the entry is gone
    h.clock.advance(ChronoDuration::seconds(300));
    let again = h
        .orchestrator
        .acquire(RequestKind::Topics, &topics(5))
        .await
        .unwrap();

    assert_eq!(again.tier, Tier::Live);
    assert!(h.source.calls() > calls);
}

#[tokio::test]
async fn live_outage_falls_back_to_stored_records() {
    let h = harness(config(), keyword_a_source()).await;
    h.orchestrator
        .acquire(RequestKind::Topics, &topics(5))
        .await
        .unwrap();

    h.source.set_down(true);
    h.clock.advance(ChronoDuration::minutes(10));

    let acq = h
        .orchestrator
        .acquire(RequestKind::Topics, &topics(5))
        .await
        .unwrap();
    assert_eq!(acq.tier, Tier::Store);
    assert!(acq.result.success);
    assert_eq!(acq.result.source, Provenance::Database);
    let rows = acq.result.data.records().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.provenance == Provenance::Database));
    assert_eq!(rows[0].title, "winter outfit");

    // store answers are not cached: the next call tries live again
    let calls = h.source.calls();
    let again = h
        .orchestrator
        .acquire(RequestKind::Topics, &topics(5))
        .await
        .unwrap();
    assert_eq!(again.tier, Tier::Store);
    assert!(h.source.calls() > calls);
}

#[tokio::test]
async fn empty_store_and_failing_live_serves_degraded_fallback() {
    let h = harness(config(), ScriptedSource::default()).await;

    let acq = h
        .orchestrator
        .acquire(RequestKind::Topics, &topics(7))
        .await
        .unwrap();

    assert_eq!(acq.tier, Tier::Fallback);
    assert_eq!(acq.result.source, Provenance::Fallback);
    assert!(!acq.result.success, "degraded by an error");
    assert!(acq.result.error.is_some());
    let rows = acq.result.data.records().unwrap();
    assert_eq!(rows.len(), 7);
    assert!(rows
        .iter()
        .all(|r| (10.0..=100.0).contains(&r.trend_score) && r.provenance == Provenance::Fallback));
}

#[tokio::test]
async fn genuinely_empty_live_data_is_not_an_error() {
    let mut source = ScriptedSource::default();
    source.notes.insert("A".into(), vec![]);
    source.notes.insert("B".into(), vec![]);
    source.notes.insert("C".into(), vec![]);
    let h = harness(config(), source).await;

    let acq = h
        .orchestrator
        .acquire(RequestKind::Topics, &topics(3))
        .await
        .unwrap();
    assert_eq!(acq.tier, Tier::Fallback);
    assert!(acq.result.success);
    assert!(acq.result.error.is_none());
}

#[tokio::test]
async fn unreachable_store_still_answers() {
    let clock = Arc::new(ManualClock::new(common::t0()));
    let store: Arc<dyn RecordStore> = Arc::new(UnavailableStore::new("disk gone"));
    let h = harness_with_store(config(), ScriptedSource::default(), clock, store);

    for kind in [
        RequestKind::Topics,
        RequestKind::Search,
        RequestKind::UserNotes,
        RequestKind::Keywords,
    ] {
        let params = AcquireParams::with_limit(4).keyword("A").user("u1");
        let acq = h.orchestrator.acquire(kind, &params).await.unwrap();
        assert_eq!(acq.tier, Tier::Fallback, "{kind}");
        assert_eq!(acq.result.data.len(), Some(4), "{kind}");
        assert!(!acq.result.success);
    }

    let stats = h
        .orchestrator
        .acquire(RequestKind::Stats, &AcquireParams::default())
        .await
        .unwrap();
    assert!(matches!(stats.result.data, Payload::Stats(_)));
}

#[tokio::test]
async fn live_success_survives_store_outage() {
    let clock = Arc::new(ManualClock::new(common::t0()));
    let store: Arc<dyn RecordStore> = Arc::new(UnavailableStore::new("read only"));
    let h = harness_with_store(config(), keyword_a_source(), clock, store);

    let acq = h
        .orchestrator
        .acquire(RequestKind::Topics, &topics(5))
        .await
        .unwrap();
    assert_eq!(acq.tier, Tier::Live);
    assert!(acq.result.success);
    // still cached even though persistence failed
    assert_eq!(h.cache.len(), 1);
}

#[tokio::test]
async fn payload_never_exceeds_limit() {
    let h = harness(config(), keyword_a_source()).await;
    for limit in [1, 2, 5, 40] {
        let acq = h
            .orchestrator
            .acquire(RequestKind::Topics, &topics(limit))
            .await
            .unwrap();
        assert!(acq.result.data.len().unwrap() <= limit);
    }

    let huge = h
        .orchestrator
        .acquire(RequestKind::Keywords, &AcquireParams::with_limit(10_000))
        .await
        .unwrap();
    assert!(huge.result.data.len().unwrap() <= h.orchestrator.config().max_limit);
}

#[tokio::test]
async fn slow_live_source_times_out_into_next_tier() {
    let mut cfg = config();
    cfg.live.timeout_ms = 50;
    let mut source = keyword_a_source();
    source.delay = Some(Duration::from_millis(500));
    let h = harness(cfg, source).await;

    let acq = h
        .orchestrator
        .acquire(RequestKind::Topics, &topics(5))
        .await
        .unwrap();
    assert_eq!(acq.tier, Tier::Fallback);
    assert!(!acq.result.success);
    let err = acq.result.error.unwrap();
    assert!(err.contains("timed out"), "error was {err}");
}

#[tokio::test]
async fn search_uses_live_then_store_by_keyword() {
    let h = harness(config(), keyword_a_source()).await;

    let live = h
        .orchestrator
        .acquire(RequestKind::Search, &AcquireParams::with_limit(10).keyword("A"))
        .await
        .unwrap();
    assert_eq!(live.tier, Tier::Live);
    let rows = live.result.data.records().unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.kind == RecordKind::Note));

    h.source.set_down(true);
    let other = h
        .orchestrator
        .acquire(RequestKind::Search, &AcquireParams::with_limit(2).keyword("a"))
        .await
        .unwrap();
    assert_eq!(other.tier, Tier::Store);
    assert_eq!(other.result.data.len(), Some(2));
}

#[tokio::test]
async fn search_without_keyword_degrades() {
    let h = harness(config(), keyword_a_source()).await;
    let acq = h
        .orchestrator
        .acquire(RequestKind::Search, &AcquireParams::with_limit(3))
        .await
        .unwrap();
    assert_ne!(acq.tier, Tier::Live);
    assert_eq!(acq.result.data.len(), Some(3));
}

#[tokio::test]
async fn stats_are_derived_from_store_when_live_fails() {
    let h = harness(config(), keyword_a_source()).await;
    h.orchestrator
        .acquire(RequestKind::Topics, &topics(5))
        .await
        .unwrap();

    let acq = h
        .orchestrator
        .acquire(RequestKind::Stats, &AcquireParams::default())
        .await
        .unwrap();
    assert_eq!(acq.tier, Tier::Store);
    let Payload::Stats(s) = acq.result.data else {
        panic!("expected stats payload");
    };
    assert_eq!(s.total_notes, 3);
    assert_eq!(s.active_users, 1);
    assert_eq!(s.total_interactions, 1_000 + 200 + 50 + 400 + 40 + 10 + 600 + 100 + 30);
}

struct TagIsCategory;

impl trend_pipeline::source::Categorizer for TagIsCategory {
    fn categorize(&self, text: &str) -> String {
        if text.contains("skincare") {
            "beauty".into()
        } else {
            "other".into()
        }
    }
}

#[tokio::test]
async fn live_topics_honour_category_filter() {
    let h = harness(config(), keyword_a_source()).await;
    let orchestrator = h.orchestrator.with_categorizer(Arc::new(TagIsCategory));

    let acq = orchestrator
        .acquire(RequestKind::Topics, &topics(5).category("Beauty"))
        .await
        .unwrap();
    assert_eq!(acq.tier, Tier::Live);
    let rows = acq.result.data.records().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].title, "skincare");
    assert_eq!(rows[0].category, "beauty");
}
