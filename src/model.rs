// src/model.rs
//! Shared schema flowing between the tiers: requests, records and the result envelope.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: usize = 20;

/// What the caller asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Topics,
    UserNotes,
    Search,
    Stats,
    Keywords,
}

impl RequestKind {
    /// Operation name used as the fingerprint prefix.
    pub fn operation(self) -> &'static str {
        match self {
            RequestKind::Topics => "hot_topics",
            RequestKind::UserNotes => "user_notes",
            RequestKind::Search => "search_notes",
            RequestKind::Stats => "platform_stats",
            RequestKind::Keywords => "trending_keywords",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Topics => "topics",
            RequestKind::UserNotes => "user_notes",
            RequestKind::Search => "search",
            RequestKind::Stats => "stats",
            RequestKind::Keywords => "keywords",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw request parameters as callers send them (query string, CLI JSON).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireParams {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default, alias = "userId")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub days: Option<u32>,
}

impl AcquireParams {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Trim and drop empty strings, default and clamp the limit.
    pub fn normalize(&self, kind: RequestKind, max_limit: usize) -> RequestSpec {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT).min(max_limit);
        RequestSpec {
            kind,
            limit,
            category: clean(self.category.as_deref()),
            keyword: clean(self.keyword.as_deref()),
            user_id: clean(self.user_id.as_deref()),
            days: self.days,
        }
    }
}

fn clean(s: Option<&str>) -> Option<String> {
    let s = s?.split_whitespace().collect::<Vec<_>>().join(" ");
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// A normalized request. Identical requests always produce the same fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub kind: RequestKind,
    pub limit: usize,
    pub category: Option<String>,
    pub keyword: Option<String>,
    pub user_id: Option<String>,
    pub days: Option<u32>,
}

impl RequestSpec {
    /// Deterministic cache key, e.g. `hot_topics:20` or `search_notes:10:keyword=skincare`.
    pub fn fingerprint(&self) -> String {
        let mut key = self.kind.operation().to_string();
        if self.kind == RequestKind::Stats {
            return key;
        }
        key.push(':');
        key.push_str(&self.limit.to_string());
        if let Some(c) = &self.category {
            key.push_str(&format!(":category={}", c.to_lowercase()));
        }
        if let Some(d) = self.days {
            key.push_str(&format!(":days={d}"));
        }
        if let Some(k) = &self.keyword {
            key.push_str(&format!(":keyword={}", k.to_lowercase()));
        }
        if let Some(u) = &self.user_id {
            key.push_str(&format!(":user_id={u}"));
        }
        key
    }

    /// Number of items a record/keyword payload must carry, `None` for stats.
    pub fn expected_len(&self) -> Option<usize> {
        match self.kind {
            RequestKind::Stats => None,
            _ => Some(self.limit),
        }
    }
}

/// Which tier produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    RealCrawler,
    Database,
    Fallback,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::RealCrawler => "real_crawler",
            Provenance::Database => "database",
            Provenance::Fallback => "fallback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "real_crawler" => Some(Provenance::RealCrawler),
            "database" => Some(Provenance::Database),
            "fallback" => Some(Provenance::Fallback),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Topic,
    Note,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Topic => "topic",
            RecordKind::Note => "note",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "topic" => Some(RecordKind::Topic),
            "note" => Some(RecordKind::Note),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub user_id: String,
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// A topic or a note. `(kind, id)` is unique in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub kind: RecordKind,
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    pub like_count: u64,
    pub comment_count: u64,
    pub share_count: u64,
    pub view_count: u64,
    #[serde(default)]
    pub collect_count: u64,
    pub note_count: u64,
    pub trend_score: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub media: Vec<String>,
    pub publish_time: DateTime<Utc>,
    pub crawl_time: DateTime<Utc>,
    pub provenance: Provenance,
}

impl Record {
    pub fn interactions(&self) -> u64 {
        self.like_count + self.comment_count + self.share_count
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    pub total_notes: u64,
    pub active_users: u64,
    pub daily_posts: u64,
    pub total_interactions: u64,
    pub avg_engagement_rate: f64,
    pub top_category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendingKeyword {
    pub keyword: String,
    pub heat: f64,
    #[serde(default = "default_trend")]
    pub trend: String,
    #[serde(default)]
    pub change: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_trend() -> String {
    "stable".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Records(Vec<Record>),
    Keywords(Vec<TrendingKeyword>),
    Stats(PlatformStats),
}

impl Payload {
    /// Item count for list payloads.
    pub fn len(&self) -> Option<usize> {
        match self {
            Payload::Records(v) => Some(v.len()),
            Payload::Keywords(v) => Some(v.len()),
            Payload::Stats(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    pub fn records(&self) -> Option<&[Record]> {
        match self {
            Payload::Records(v) => Some(v),
            _ => None,
        }
    }
}

/// Envelope returned to every caller: `{success, data, error?, source}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquireResult {
    pub success: bool,
    pub data: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub source: Provenance,
    pub timestamp: DateTime<Utc>,
}

/// Tier that answered one `acquire` call. `Cache` is never stored in a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Cache,
    Live,
    Store,
    Fallback,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Cache => "cache",
            Tier::Live => "live",
            Tier::Store => "store",
            Tier::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    pub result: AcquireResult,
    pub tier: Tier,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_under_whitespace_and_case() {
        let a = AcquireParams::with_limit(10)
            .keyword("  Skin  Care ")
            .normalize(RequestKind::Search, 100);
        let b = AcquireParams::with_limit(10)
            .keyword("skin care")
            .normalize(RequestKind::Search, 100);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), "search_notes:10:keyword=skin care");
    }

    #[test]
    fn topics_fingerprint_matches_plain_form() {
        let spec = AcquireParams::with_limit(20).normalize(RequestKind::Topics, 100);
        assert_eq!(spec.fingerprint(), "hot_topics:20");
        let stats = AcquireParams::default().normalize(RequestKind::Stats, 100);
        assert_eq!(stats.fingerprint(), "platform_stats");
    }

    #[test]
    fn limit_defaults_and_clamps() {
        let spec = AcquireParams::default().normalize(RequestKind::Topics, 100);
        assert_eq!(spec.limit, DEFAULT_LIMIT);
        let spec = AcquireParams::with_limit(5_000).normalize(RequestKind::Topics, 100);
        assert_eq!(spec.limit, 100);
    }

    #[test]
    fn empty_filters_are_dropped() {
        let spec = AcquireParams::with_limit(3)
            .category("   ")
            .normalize(RequestKind::Topics, 100);
        assert_eq!(spec.category, None);
        assert_eq!(spec.fingerprint(), "hot_topics:3");
    }

    #[test]
    fn provenance_serializes_snake_case() {
        let s = serde_json::to_string(&Provenance::RealCrawler).unwrap();
        assert_eq!(s, "\"real_crawler\"");
        assert_eq!(Provenance::parse("database"), Some(Provenance::Database));
    }
}
