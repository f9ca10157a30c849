// src/orchestrator/mod.rs
//! # Orchestrator
//! Answers every acquisition through the tier chain
//! `cache -> live source -> store -> fallback`, and owns the write path
//! (store upsert + cache set) that the scheduler drives proactively.
//!
//! Tier failures are typed and matched here; none reaches the caller. The
//! only request-fatal case is a fallback payload of the wrong shape.

pub mod aggregate;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::CacheLayer;
use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::error::{GenerationError, PipelineError, SourceError, StoreError};
use crate::fallback::FallbackGenerator;
use crate::model::{
    AcquireParams, AcquireResult, Acquisition, Payload, Provenance, Record, RecordKind,
    RequestKind, RequestSpec, Tier, TrendingKeyword,
};
use crate::source::{Categorizer, KeywordCategorizer, LiveNote, LiveSource};
use crate::store::{RankBy, RecordQuery, RecordStore, StoreStats};
use aggregate::{aggregate_topics, dedup_hits, note_record, NoteHit};

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "pipeline_acquire_total",
            "Acquisitions answered, by request kind and tier."
        );
        describe_counter!("pipeline_live_errors_total", "Live source failures by kind.");
        describe_histogram!("pipeline_live_fetch_ms", "Live source call time in milliseconds.");
        describe_counter!("pipeline_store_errors_total", "Store read/write failures.");
        describe_counter!("pipeline_cache_hits_total", "Cache lookups served.");
        describe_counter!("pipeline_cache_misses_total", "Cache lookups missed or expired.");
        describe_counter!("pipeline_job_runs_total", "Scheduled job runs by outcome.");
        describe_counter!(
            "pipeline_job_skipped_total",
            "Job triggers dropped because the job was still running."
        );
        describe_gauge!(
            "pipeline_last_data_write_ts",
            "Unix ts of the last successful store write."
        );
    });
}

/// What a successful live step produced, before persistence.
struct LiveData {
    payload: Payload,
    records: Vec<Record>,
    keywords: Option<Vec<TrendingKeyword>>,
}

enum LiveOutcome {
    Data(LiveData),
    /// The source answered but had nothing for this request.
    Empty,
}

/// Result of the retention job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub records_removed: usize,
    pub cache_evicted: usize,
}

/// Lightweight probe used by the health job; never touches the live source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub store_reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_error: Option<String>,
    pub last_data_write: Option<DateTime<Utc>>,
    pub seconds_since_write: Option<i64>,
    pub live_source: &'static str,
    pub cache_entries: usize,
    pub checked_at: DateTime<Utc>,
}

pub struct Orchestrator {
    cfg: Arc<PipelineConfig>,
    clock: Arc<dyn Clock>,
    cache: Arc<CacheLayer>,
    live: Arc<dyn LiveSource>,
    store: Arc<dyn RecordStore>,
    fallback: FallbackGenerator,
    categorizer: Arc<dyn Categorizer>,
}

impl Orchestrator {
    pub fn new(
        cfg: Arc<PipelineConfig>,
        clock: Arc<dyn Clock>,
        cache: Arc<CacheLayer>,
        live: Arc<dyn LiveSource>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        ensure_metrics_described();
        let fallback = FallbackGenerator::new(clock.clone(), cfg.scoring);
        let categorizer = Arc::new(KeywordCategorizer::new(cfg.categories.clone()));
        Self {
            cfg,
            clock,
            cache,
            live,
            store,
            fallback,
            categorizer,
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackGenerator) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_categorizer(mut self, categorizer: Arc<dyn Categorizer>) -> Self {
        self.categorizer = categorizer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    /// Answer a request from the best tier available. Never fails unless the
    /// fallback produced a payload of the wrong shape.
    pub async fn acquire(
        &self,
        kind: RequestKind,
        params: &AcquireParams,
    ) -> Result<Acquisition, GenerationError> {
        let spec = params.normalize(kind, self.cfg.max_limit);
        let key = spec.fingerprint();

        if let Some(result) = self.cache.get::<AcquireResult>(&key) {
            debug!(kind = %kind, key, "cache hit");
            return Ok(self.answered(kind, result, Tier::Cache));
        }

        // Each degradation remembers whether it came from an error.
        let mut last_error: Option<String> = None;

        match self.live_write_through(&spec, &key).await {
            Ok(Some(result)) => return Ok(self.answered(kind, result, Tier::Live)),
            Ok(None) => debug!(kind = %kind, "live source had no data"),
            Err(e) => {
                warn!(error = ?e, kind = %kind, source = self.live.name(), "live tier failed");
                counter!("pipeline_live_errors_total", "kind" => kind.as_str()).increment(1);
                last_error = Some(e.to_string());
            }
        }

        match self.from_store(&spec).await {
            Ok(Some(data)) => {
                let result = AcquireResult {
                    success: true,
                    data,
                    error: None,
                    source: Provenance::Database,
                    timestamp: self.clock.now(),
                };
                return Ok(self.answered(kind, result, Tier::Store));
            }
            Ok(None) => debug!(kind = %kind, "store had no matching records"),
            Err(e) => {
                warn!(error = ?e, kind = %kind, "store tier failed");
                counter!("pipeline_store_errors_total").increment(1);
                last_error = Some(e.to_string());
            }
        }

        let data = self.fallback.generate(&spec);
        check_shape(&spec, &data)?;
        info!(kind = %kind, degraded = last_error.is_some(), "serving fallback data");
        let result = AcquireResult {
            success: last_error.is_none(),
            data,
            error: last_error,
            source: Provenance::Fallback,
            timestamp: self.clock.now(),
        };
        Ok(self.answered(kind, result, Tier::Fallback))
    }

    fn answered(&self, kind: RequestKind, result: AcquireResult, tier: Tier) -> Acquisition {
        counter!("pipeline_acquire_total", "kind" => kind.as_str(), "tier" => tier.as_str())
            .increment(1);
        Acquisition { result, tier }
    }

    /// Live step plus persistence. `Ok(None)` means the source had nothing.
    async fn live_write_through(
        &self,
        spec: &RequestSpec,
        key: &str,
    ) -> Result<Option<AcquireResult>, SourceError> {
        let budget = self.cfg.live.timeout();
        let t0 = Instant::now();
        let outcome = tokio::time::timeout(budget, self.fetch_live(spec))
            .await
            .map_err(|_| SourceError::Timeout(budget))??;
        histogram!("pipeline_live_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let LiveOutcome::Data(live) = outcome else {
            return Ok(None);
        };
        // persistence is outside the live budget and never fails the live answer
        self.persist(spec.kind, &live).await;

        let result = AcquireResult {
            success: true,
            data: live.payload,
            error: None,
            source: Provenance::RealCrawler,
            timestamp: self.clock.now(),
        };
        self.cache.set(key, &result, self.cfg.cache.ttl_for(spec.kind));
        Ok(Some(result))
    }

    async fn persist(&self, kind: RequestKind, live: &LiveData) {
        let mut wrote = false;
        if let Some(keywords) = &live.keywords {
            match self.store.replace_keywords(keywords).await {
                Ok(()) => wrote = true,
                Err(e) => {
                    warn!(error = ?e, kind = %kind, "persisting keywords failed");
                    counter!("pipeline_store_errors_total").increment(1);
                }
            }
        }
        if !live.records.is_empty() {
            match self.store.upsert(&live.records).await {
                Ok(n) => {
                    debug!(kind = %kind, rows = n, "records upserted");
                    wrote = true;
                }
                Err(e) => {
                    warn!(error = ?e, kind = %kind, "persisting records failed");
                    counter!("pipeline_store_errors_total").increment(1);
                }
            }
        }
        let count = live.payload.len().unwrap_or(1);
        if let Err(e) = self
            .store
            .log_crawl(kind.operation(), count, if wrote { "success" } else { "unsaved" })
            .await
        {
            debug!(error = ?e, "crawl log write failed");
        }
        if wrote {
            gauge!("pipeline_last_data_write_ts").set(self.clock.now().timestamp() as f64);
        }
    }

    async fn fetch_live(&self, spec: &RequestSpec) -> Result<LiveOutcome, SourceError> {
        let now = self.clock.now();
        let weights = &self.cfg.scoring;
        let cat = self.categorizer.as_ref();

        let data = match spec.kind {
            RequestKind::Topics => {
                let hits = self.search_keywords().await?;
                let notes: Vec<Record> = hits
                    .iter()
                    .map(|h| note_record(&h.note, Some(&h.keyword), cat, weights, now))
                    .collect();
                let mut topics = aggregate_topics(&hits, cat, weights, now);
                retain_category(&mut topics, spec.category.as_deref());
                topics.truncate(spec.limit);
                let mut records = notes;
                records.extend(topics.iter().cloned());
                LiveData {
                    payload: Payload::Records(topics),
                    records,
                    keywords: None,
                }
            }
            RequestKind::Search => {
                let keyword = spec
                    .keyword
                    .as_deref()
                    .ok_or_else(|| SourceError::Malformed("search without keyword".into()))?;
                let notes = self.live.search_notes(keyword, spec.limit).await?;
                let mut rows = to_records(&notes, Some(keyword), cat, weights, now);
                rows.sort_by(|a, b| b.trend_score.total_cmp(&a.trend_score));
                live_notes_payload(rows, spec)
            }
            RequestKind::UserNotes => {
                let user = spec
                    .user_id
                    .as_deref()
                    .ok_or_else(|| SourceError::Malformed("user notes without user id".into()))?;
                let notes = self.live.user_notes(user, spec.limit).await?;
                let mut rows = to_records(&notes, None, cat, weights, now);
                rows.sort_by(|a, b| b.publish_time.cmp(&a.publish_time));
                live_notes_payload(rows, spec)
            }
            RequestKind::Stats => LiveData {
                payload: Payload::Stats(self.live.platform_stats().await?),
                records: Vec::new(),
                keywords: None,
            },
            RequestKind::Keywords => {
                let mut all = self.live.trending_keywords().await?;
                all.retain(|k| !k.keyword.trim().is_empty());
                for k in all.iter_mut() {
                    k.updated_at.get_or_insert(now);
                }
                all.sort_by(|a, b| b.heat.total_cmp(&a.heat));
                let mut shown = all.clone();
                shown.truncate(spec.limit);
                LiveData {
                    payload: Payload::Keywords(shown),
                    records: Vec::new(),
                    keywords: if all.is_empty() { None } else { Some(all) },
                }
            }
        };

        if data.payload.is_empty() {
            return Ok(LiveOutcome::Empty);
        }
        Ok(LiveOutcome::Data(data))
    }

    /// Keywords to crawl for topics: live trending, else stored, else seeds.
    async fn resolve_keywords(&self) -> Vec<String> {
        let fanout = self.cfg.live.keyword_fanout;
        match self.live.trending_keywords().await {
            Ok(k) if !k.is_empty() => {
                return k.into_iter().take(fanout).map(|k| k.keyword).collect();
            }
            Ok(_) => debug!("live trending keywords empty"),
            Err(e) => debug!(error = ?e, "live trending keywords unavailable"),
        }
        match self.store.keywords(fanout).await {
            Ok(k) if !k.is_empty() => {
                return k.into_iter().map(|k| k.keyword).collect();
            }
            Ok(_) => {}
            Err(e) => debug!(error = ?e, "stored keywords unavailable"),
        }
        self.cfg
            .live
            .seed_keywords
            .iter()
            .take(fanout)
            .cloned()
            .collect()
    }

    /// Search each keyword in turn. Fails only when every keyword failed.
    async fn search_keywords(&self) -> Result<Vec<NoteHit>, SourceError> {
        let keywords = self.resolve_keywords().await;
        if keywords.is_empty() {
            return Err(SourceError::Unavailable("no keywords to crawl".into()));
        }
        let pause = std::time::Duration::from_millis(self.cfg.live.keyword_pause_ms);
        let per_keyword = self.cfg.live.notes_per_keyword;

        let mut hits = Vec::new();
        let mut last_err = None;
        let mut succeeded = 0usize;
        for (i, kw) in keywords.iter().enumerate() {
            if i > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
            match self.live.search_notes(kw, per_keyword).await {
                Ok(notes) => {
                    succeeded += 1;
                    hits.extend(notes.into_iter().map(|note| NoteHit {
                        keyword: kw.clone(),
                        note,
                    }));
                }
                Err(e) => {
                    warn!(error = ?e, keyword = %kw, "keyword search failed");
                    last_err = Some(e);
                }
            }
        }
        match (succeeded, last_err) {
            (0, Some(e)) => Err(e),
            _ => Ok(dedup_hits(hits)),
        }
    }

    async fn from_store(&self, spec: &RequestSpec) -> Result<Option<Payload>, StoreError> {
        let query = |kind, rank| RecordQuery {
            kind,
            category: spec.category.clone(),
            keyword: None,
            author_id: None,
            recency_days: None,
            rank,
            limit: spec.limit,
        };
        let payload = match spec.kind {
            RequestKind::Topics => {
                let mut q = query(RecordKind::Topic, RankBy::TrendScore);
                q.recency_days = Some(spec.days.unwrap_or(self.cfg.store.recency_days));
                self.stored_records(&q).await?
            }
            RequestKind::Search => {
                let mut q = query(RecordKind::Note, RankBy::TrendScore);
                q.keyword = spec.keyword.clone();
                q.recency_days = spec.days;
                self.stored_records(&q).await?
            }
            RequestKind::UserNotes => {
                let Some(user) = spec.user_id.clone() else {
                    return Ok(None);
                };
                let mut q = query(RecordKind::Note, RankBy::PublishTime);
                q.author_id = Some(user);
                self.stored_records(&q).await?
            }
            RequestKind::Stats => self.store.stats().await?.platform_stats().map(Payload::Stats),
            RequestKind::Keywords => {
                let k = self.store.keywords(spec.limit).await?;
                (!k.is_empty()).then_some(Payload::Keywords(k))
            }
        };
        Ok(payload)
    }

    async fn stored_records(&self, q: &RecordQuery) -> Result<Option<Payload>, StoreError> {
        let mut rows = self.store.query(q).await?;
        if rows.is_empty() {
            return Ok(None);
        }
        rows.truncate(q.limit);
        for r in rows.iter_mut() {
            r.provenance = Provenance::Database;
        }
        Ok(Some(Payload::Records(rows)))
    }

    /// Scheduler write path: live fetch, persist, cache. Errors are returned,
    /// not degraded. Returns how many items were refreshed.
    pub async fn refresh(
        &self,
        kind: RequestKind,
        params: &AcquireParams,
    ) -> Result<usize, PipelineError> {
        let spec = params.normalize(kind, self.cfg.max_limit);
        let key = spec.fingerprint();
        match self.live_write_through(&spec, &key).await? {
            Some(result) => {
                let n = result.data.len().unwrap_or(1);
                info!(kind = %kind, items = n, "refreshed");
                Ok(n)
            }
            None => Err(SourceError::Unavailable(format!("live source had no {kind}")).into()),
        }
    }

    pub async fn refresh_hot_topics(&self) -> Result<usize, PipelineError> {
        let params = AcquireParams::with_limit(self.cfg.scheduler.refresh_topic_limit);
        self.refresh(RequestKind::Topics, &params).await
    }

    pub async fn refresh_keywords(&self) -> Result<usize, PipelineError> {
        self.refresh(RequestKind::Keywords, &AcquireParams::default())
            .await
    }

    /// Delete records not seen for `retention_days` and drop expired cache entries.
    pub async fn prune(&self) -> Result<PruneReport, PipelineError> {
        let cutoff = self.clock.now() - Duration::days(i64::from(self.cfg.store.retention_days));
        let records_removed = self.store.prune_older_than(cutoff).await?;
        let cache_evicted = self.cache.purge_expired();
        info!(records_removed, cache_evicted, %cutoff, "retention cleanup");
        Ok(PruneReport {
            records_removed,
            cache_evicted,
        })
    }

    pub async fn store_stats(&self) -> Result<StoreStats, PipelineError> {
        Ok(self.store.stats().await?)
    }

    pub async fn health_probe(&self) -> HealthReport {
        let now = self.clock.now();
        let (store_reachable, store_error) = match self.store.ping().await {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        };
        let last_data_write = if store_reachable {
            self.store.latest_ingest().await.ok().flatten()
        } else {
            None
        };
        HealthReport {
            healthy: store_reachable,
            store_reachable,
            store_error,
            last_data_write,
            seconds_since_write: last_data_write.map(|t| (now - t).num_seconds()),
            live_source: self.live.name(),
            cache_entries: self.cache.len(),
            checked_at: now,
        }
    }
}

fn to_records(
    notes: &[LiveNote],
    keyword: Option<&str>,
    cat: &dyn Categorizer,
    weights: &crate::config::ScoreWeights,
    now: DateTime<Utc>,
) -> Vec<Record> {
    let mut seen = std::collections::HashSet::new();
    notes
        .iter()
        .filter(|n| seen.insert(n.id.clone()))
        .map(|n| note_record(n, keyword, cat, weights, now))
        .collect()
}

fn retain_category(rows: &mut Vec<Record>, category: Option<&str>) {
    if let Some(c) = category {
        rows.retain(|r| r.category.eq_ignore_ascii_case(c));
    }
}

/// All fetched notes are stored; the answer is filtered and limited.
fn live_notes_payload(rows: Vec<Record>, spec: &RequestSpec) -> LiveData {
    let mut shown = rows.clone();
    retain_category(&mut shown, spec.category.as_deref());
    shown.truncate(spec.limit);
    LiveData {
        payload: Payload::Records(shown),
        records: rows,
        keywords: None,
    }
}

fn check_shape(spec: &RequestSpec, data: &Payload) -> Result<(), GenerationError> {
    match (spec.expected_len(), data) {
        (None, Payload::Stats(_)) => Ok(()),
        (Some(expected), Payload::Records(_) | Payload::Keywords(_)) => {
            let got = data.len().unwrap_or(0);
            if got == expected {
                Ok(())
            } else {
                Err(GenerationError::InvariantViolation {
                    kind: spec.kind,
                    expected,
                    got,
                })
            }
        }
        (expected, other) => Err(GenerationError::InvariantViolation {
            kind: spec.kind,
            expected: expected.unwrap_or(1),
            got: other.len().unwrap_or(1),
        }),
    }
}
