// src/store/mod.rs
//! Durable record store.
//!
//! Records are keyed by `(kind, id)`. Upserts overwrite engagement counts,
//! score, provenance and ingest time, and never touch the publish time.
//! Queries filter by category, keyword, author and an ingest-time window and
//! order by the requested ranking key, ties broken by newest ingest first.

pub mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::{PlatformStats, Record, RecordKind, TrendingKeyword};

pub use sqlite::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankBy {
    TrendScore,
    PublishTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    pub kind: RecordKind,
    pub category: Option<String>,
    /// Matches the search keyword a note was found with, or its title/tags.
    pub keyword: Option<String>,
    pub author_id: Option<String>,
    /// Only records ingested within the last N days.
    pub recency_days: Option<u32>,
    pub rank: RankBy,
    pub limit: usize,
}

impl RecordQuery {
    pub fn new(kind: RecordKind, limit: usize) -> Self {
        Self {
            kind,
            category: None,
            keyword: None,
            author_id: None,
            recency_days: None,
            rank: RankBy::TrendScore,
            limit,
        }
    }
}

/// Aggregate counts over the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_notes: u64,
    pub total_topics: u64,
    pub notes_by_category: BTreeMap<String, u64>,
    /// Notes ingested in the last 7 days.
    pub recent_notes: u64,
    pub active_users: u64,
    /// Notes published in the last 24 hours.
    pub daily_posts: u64,
    pub total_interactions: u64,
    pub total_views: u64,
    pub total_keywords: u64,
    pub total_crawls: u64,
    pub last_ingest: Option<DateTime<Utc>>,
}

impl StoreStats {
    /// Platform view derived from stored notes; `None` when there are none.
    pub fn platform_stats(&self) -> Option<PlatformStats> {
        if self.total_notes == 0 {
            return None;
        }
        let rate = if self.total_views > 0 {
            (self.total_interactions as f64 / self.total_views as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        let top_category = self
            .notes_by_category
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(c, _)| c.clone())
            .unwrap_or_else(|| crate::source::categorize::OTHER_CATEGORY.to_string());
        Some(PlatformStats {
            total_notes: self.total_notes,
            active_users: self.active_users,
            daily_posts: self.daily_posts,
            total_interactions: self.total_interactions,
            avg_engagement_rate: rate,
            top_category,
        })
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or update every record in one transaction. Returns rows written.
    async fn upsert(&self, records: &[Record]) -> Result<usize, StoreError>;
    async fn query(&self, q: &RecordQuery) -> Result<Vec<Record>, StoreError>;
    async fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Replace the whole trending keyword table.
    async fn replace_keywords(&self, keywords: &[TrendingKeyword]) -> Result<(), StoreError>;
    /// Stored keywords, hottest first.
    async fn keywords(&self, limit: usize) -> Result<Vec<TrendingKeyword>, StoreError>;

    async fn log_crawl(&self, data_type: &str, count: usize, status: &str)
        -> Result<(), StoreError>;
    /// Delete records ingested before `cutoff`. Returns how many were removed.
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
    async fn latest_ingest(&self) -> Result<Option<DateTime<Utc>>, StoreError>;
    async fn close(&self) -> Result<(), StoreError>;
}

/// Stand-in used when the database cannot be opened at startup. Every call
/// reports [`StoreError::Unavailable`], so the pipeline degrades to fallback.
pub struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn err<T>(&self) -> Result<T, StoreError> {
        Err(StoreError::Unavailable(self.reason.clone()))
    }
}

#[async_trait]
impl RecordStore for UnavailableStore {
    async fn upsert(&self, _: &[Record]) -> Result<usize, StoreError> {
        self.err()
    }
    async fn query(&self, _: &RecordQuery) -> Result<Vec<Record>, StoreError> {
        self.err()
    }
    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.err()
    }
    async fn replace_keywords(&self, _: &[TrendingKeyword]) -> Result<(), StoreError> {
        self.err()
    }
    async fn keywords(&self, _: usize) -> Result<Vec<TrendingKeyword>, StoreError> {
        self.err()
    }
    async fn log_crawl(&self, _: &str, _: usize, _: &str) -> Result<(), StoreError> {
        self.err()
    }
    async fn prune_older_than(&self, _: DateTime<Utc>) -> Result<usize, StoreError> {
        self.err()
    }
    async fn ping(&self) -> Result<(), StoreError> {
        self.err()
    }
    async fn latest_ingest(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.err()
    }
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
