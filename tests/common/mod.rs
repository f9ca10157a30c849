// tests/common/mod.rs
//
// Shared doubles for the integration tests: a scripted live source that
// counts calls and injects failures/latency, plus a harness wiring it to an
// in-memory SQLite store and a manual clock.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use trend_pipeline::cache::CacheLayer;
use trend_pipeline::clock::{Clock, ManualClock};
use trend_pipeline::config::PipelineConfig;
use trend_pipeline::error::SourceError;
use trend_pipeline::fallback::FallbackGenerator;
use trend_pipeline::model::{Author, PlatformStats, TrendingKeyword};
use trend_pipeline::orchestrator::Orchestrator;
use trend_pipeline::source::{LiveNote, LiveSource};
use trend_pipeline::store::{RecordStore, SqliteStore};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
}

pub fn note(id: &str, tag: &str, likes: u64, comments: u64, shares: u64) -> LiveNote {
    LiveNote {
        id: id.into(),
        title: format!("note {id}"),
        content: format!("content of {id}"),
        author: Some(Author {
            user_id: "u1".into(),
            nickname: "alice".into(),
            avatar: None,
        }),
        like_count: likes,
        comment_count: comments,
        share_count: shares,
        collect_count: 0,
        view_count: likes * 10,
        published_at: Some(t0() - chrono::Duration::hours(1)),
        tags: vec![tag.into()],
        media: vec![],
    }
}

/// Live source answering from fixed tables. Keywords missing from `notes`
/// fail; `trending` / `stats` set to `None` fail too.
#[derive(Default)]
pub struct ScriptedSource {
    pub notes: HashMap<String, Vec<LiveNote>>,
    pub users: HashMap<String, Vec<LiveNote>>,
    pub trending: Option<Vec<TrendingKeyword>>,
    pub stats: Option<PlatformStats>,
    pub delay: Option<Duration>,
    pub down: AtomicBool,
    pub calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    async fn enter(&self) -> Result<(), SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("scripted outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LiveSource for ScriptedSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn trending_keywords(&self) -> Result<Vec<TrendingKeyword>, SourceError> {
        self.enter().await?;
        self.trending
            .clone()
            .ok_or_else(|| SourceError::Unavailable("no trending".into()))
    }

    async fn search_notes(&self, keyword: &str, limit: usize) -> Result<Vec<LiveNote>, SourceError> {
        self.enter().await?;
        match self.notes.get(keyword) {
            Some(n) => Ok(n.iter().take(limit).cloned().collect()),
            None => Err(SourceError::Unavailable(format!("search {keyword} failed"))),
        }
    }

    async fn user_notes(&self, user_id: &str, limit: usize) -> Result<Vec<LiveNote>, SourceError> {
        self.enter().await?;
        match self.users.get(user_id) {
            Some(n) => Ok(n.iter().take(limit).cloned().collect()),
            None => Err(SourceError::Unavailable(format!("user {user_id} failed"))),
        }
    }

    async fn platform_stats(&self) -> Result<PlatformStats, SourceError> {
        self.enter().await?;
        self.stats
            .clone()
            .ok_or_else(|| SourceError::Unavailable("no stats".into()))
    }
}

/// Seeds A, B, C; no pause between keyword searches.
pub fn config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.live.seed_keywords = vec!["A".into(), "B".into(), "C".into()];
    cfg.live.keyword_pause_ms = 0;
    cfg.live.timeout_ms = 2_000;
    cfg
}

/// Source that has three notes for keyword "A" and fails everything else.
pub fn keyword_a_source() -> ScriptedSource {
    let mut notes = HashMap::new();
    notes.insert(
        "A".to_string(),
        vec![
            note("n1", "winter outfit", 1_000, 200, 50),
            note("n2", "skincare", 400, 40, 10),
            note("n3", "winter outfit", 600, 100, 30),
        ],
    );
    ScriptedSource {
        notes,
        ..ScriptedSource::default()
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub clock: Arc<ManualClock>,
    pub source: Arc<ScriptedSource>,
    pub store: Arc<dyn RecordStore>,
    pub cache: Arc<CacheLayer>,
}

pub async fn harness(cfg: PipelineConfig, source: ScriptedSource) -> Harness {
    let clock = Arc::new(ManualClock::new(t0()));
    let store: Arc<dyn RecordStore> = Arc::new(
        SqliteStore::open_in_memory(clock.clone())
            .await
            .expect("in-memory store"),
    );
    harness_with_store(cfg, source, clock, store)
}

pub fn harness_with_store(
    cfg: PipelineConfig,
    source: ScriptedSource,
    clock: Arc<ManualClock>,
    store: Arc<dyn RecordStore>,
) -> Harness {
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let source = Arc::new(source);
    let cache = Arc::new(CacheLayer::new(dyn_clock.clone()));
    let weights = cfg.scoring;
    let orchestrator = Orchestrator::new(
        Arc::new(cfg),
        dyn_clock.clone(),
        cache.clone(),
        source.clone(),
        store.clone(),
    )
    .with_fallback(FallbackGenerator::seeded(dyn_clock, weights, 7));
    Harness {
        orchestrator,
        clock,
        source,
        store,
        cache,
    }
}
