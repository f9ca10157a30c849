// src/source/mod.rs
//! Live crawler boundary.
//!
//! Raw crawler payloads are loose (counters as numbers or strings, `万`
//! suffixes, second or millisecond timestamps). They are validated here into
//! [`LiveNote`]s; nothing loose crosses into the orchestrator.

pub mod categorize;
pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::SourceError;
use crate::model::{Author, PlatformStats, TrendingKeyword};

pub use categorize::{Categorizer, KeywordCategorizer};
pub use http::HttpLiveSource;

/// A validated note as returned by the live crawler.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveNote {
    pub id: String,
    pub title: String,
    pub content: String,
    pub author: Option<Author>,
    pub like_count: u64,
    pub comment_count: u64,
    pub share_count: u64,
    pub collect_count: u64,
    pub view_count: u64,
    /// `None` when the crawler did not report a publish time.
    pub published_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub media: Vec<String>,
}

impl LiveNote {
    /// First non-empty tag, used to group notes into topics.
    pub fn primary_tag(&self) -> Option<&str> {
        self.tags
            .iter()
            .map(|t| t.trim())
            .find(|t| !t.is_empty())
    }
}

/// The external crawler. Every call may fail; none may block past the
/// orchestrator's budget (the orchestrator enforces it).
#[async_trait]
pub trait LiveSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn trending_keywords(&self) -> Result<Vec<TrendingKeyword>, SourceError>;
    async fn search_notes(&self, keyword: &str, limit: usize)
        -> Result<Vec<LiveNote>, SourceError>;
    async fn user_notes(&self, user_id: &str, limit: usize) -> Result<Vec<LiveNote>, SourceError>;
    async fn platform_stats(&self) -> Result<PlatformStats, SourceError>;
}

/// Used when no crawler sidecar is configured.
pub struct OfflineSource;

const OFFLINE: &str = "no live source configured";

#[async_trait]
impl LiveSource for OfflineSource {
    fn name(&self) -> &'static str {
        "offline"
    }
    async fn trending_keywords(&self) -> Result<Vec<TrendingKeyword>, SourceError> {
        Err(SourceError::Unavailable(OFFLINE.into()))
    }
    async fn search_notes(&self, _: &str, _: usize) -> Result<Vec<LiveNote>, SourceError> {
        Err(SourceError::Unavailable(OFFLINE.into()))
    }
    async fn user_notes(&self, _: &str, _: usize) -> Result<Vec<LiveNote>, SourceError> {
        Err(SourceError::Unavailable(OFFLINE.into()))
    }
    async fn platform_stats(&self) -> Result<PlatformStats, SourceError> {
        Err(SourceError::Unavailable(OFFLINE.into()))
    }
}

// ------------------------------------------------------------
// Raw crawler shape
// ------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUser {
    #[serde(default, alias = "userId")]
    pub user_id: Option<Value>,
    #[serde(default, alias = "nick_name")]
    pub nickname: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawInteractInfo {
    #[serde(default)]
    pub liked_count: Option<Value>,
    #[serde(default)]
    pub comment_count: Option<Value>,
    #[serde(default)]
    pub share_count: Option<Value>,
    #[serde(default)]
    pub collected_count: Option<Value>,
    #[serde(default)]
    pub view_count: Option<Value>,
}

/// One note exactly as the crawler sends it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNote {
    #[serde(default, alias = "note_id")]
    pub id: Option<Value>,
    #[serde(default, alias = "display_title")]
    pub title: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub user: Option<RawUser>,
    #[serde(default)]
    pub interact_info: Option<RawInteractInfo>,
    #[serde(default)]
    pub time: Option<Value>,
    #[serde(default)]
    pub tag_list: Vec<Value>,
    #[serde(default)]
    pub image_list: Vec<Value>,
}

impl RawNote {
    pub fn validate(self) -> Result<LiveNote, SourceError> {
        let id = self
            .id
            .as_ref()
            .and_then(value_to_string)
            .ok_or_else(|| SourceError::Malformed("note without id".into()))?;

        let info = self.interact_info.unwrap_or_default();
        let count = |field: &str, v: &Option<Value>| -> Result<u64, SourceError> {
            match v {
                None | Some(Value::Null) => Ok(0),
                Some(v) => parse_count(v).ok_or_else(|| {
                    SourceError::Malformed(format!("note {id}: bad {field} {v}"))
                }),
            }
        };
        let like_count = count("liked_count", &info.liked_count)?;
        let comment_count = count("comment_count", &info.comment_count)?;
        let share_count = count("share_count", &info.share_count)?;
        let collect_count = count("collected_count", &info.collected_count)?;
        // the crawler omits views on search results; estimate from likes
        let view_count = match &info.view_count {
            None | Some(Value::Null) => like_count.saturating_mul(10),
            Some(_) => count("view_count", &info.view_count)?,
        };

        let author = self.user.and_then(|u| {
            let user_id = u.user_id.as_ref().and_then(value_to_string)?;
            Some(Author {
                nickname: u.nickname.unwrap_or_default(),
                user_id,
                avatar: u.avatar.filter(|a| !a.is_empty()),
            })
        });

        let tags = self
            .tag_list
            .iter()
            .filter_map(|t| match t {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => o.get("name").and_then(Value::as_str).map(String::from),
                _ => None,
            })
            .map(|t| normalize_text(&t))
            .filter(|t| !t.is_empty())
            .collect();

        let media = self
            .image_list
            .iter()
            .filter_map(|m| match m {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => o
                    .get("url_default")
                    .or_else(|| o.get("url"))
                    .and_then(Value::as_str)
                    .map(String::from),
                _ => None,
            })
            .collect();

        Ok(LiveNote {
            title: normalize_text(self.title.as_deref().unwrap_or_default()),
            content: normalize_text(self.desc.as_deref().unwrap_or_default()),
            id,
            author,
            like_count,
            comment_count,
            share_count,
            collect_count,
            view_count,
            published_at: self.time.as_ref().and_then(parse_timestamp),
            tags,
            media,
        })
    }
}

/// Validate a batch. One bad item fails the batch, the crawler answer is not trusted then.
pub fn validate_notes(raw: Vec<RawNote>) -> Result<Vec<LiveNote>, SourceError> {
    raw.into_iter().map(RawNote::validate).collect()
}

fn value_to_string(v: &Value) -> Option<String> {
    let s = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Parse a counter: `123`, `"123"`, `"1,234"`, `"1.2万"` (x10 000).
pub fn parse_count(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
        Value::String(s) => {
            let s = s.trim().replace(',', "");
            if s.is_empty() {
                return Some(0);
            }
            let (num, mul) = match s.strip_suffix('万') {
                Some(rest) => (rest.trim(), 10_000.0),
                None => (s.as_str(), 1.0),
            };
            if let Ok(n) = num.parse::<u64>() {
                return Some(n.saturating_mul(mul as u64));
            }
            num.parse::<f64>()
                .ok()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| (f * mul).round() as u64)
        }
        _ => None,
    }
}

/// Unix time in seconds or milliseconds; zero and garbage mean unknown.
pub fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    let n = match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    if n <= 0 {
        return None;
    }
    if n >= 100_000_000_000 {
        Utc.timestamp_millis_opt(n).single()
    } else {
        Utc.timestamp_opt(n, 0).single()
    }
}

/// Normalize crawler text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // hashtag markers the crawler leaves in titles, e.g. "#穿搭[话题]#"
    static RE_TOPIC: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_topic = RE_TOPIC.get_or_init(|| regex::Regex::new(r"\[话题\]#?").unwrap());
    out = re_topic.replace_all(&out, "").to_string();

    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > 1000 {
        out = out.chars().take(1000).collect();
    }
    out
}
