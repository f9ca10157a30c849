// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::RequestKind;

pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
const ENV_DB_PATH: &str = "PIPELINE_DB_PATH";
const ENV_LIVE_URL: &str = "PIPELINE_LIVE_URL";
const ENV_BIND: &str = "PIPELINE_BIND";

/// Top-level configuration. Every field has a default, so a partial file is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_limit: usize,
    pub cache: CacheConfig,
    pub live: LiveConfig,
    pub store: StoreConfig,
    pub scoring: ScoreWeights,
    pub scheduler: SchedulerConfig,
    pub server: ServerConfig,
    pub categories: Vec<CategoryRule>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_limit: 100,
            cache: CacheConfig::default(),
            live: LiveConfig::default(),
            store: StoreConfig::default(),
            scoring: ScoreWeights::default(),
            scheduler: SchedulerConfig::default(),
            server: ServerConfig::default(),
            categories: default_categories(),
        }
    }
}

/// Per-request-kind TTLs, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub topics_ttl_secs: u64,
    pub stats_ttl_secs: u64,
    pub search_ttl_secs: u64,
    pub user_notes_ttl_secs: u64,
    pub keywords_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            topics_ttl_secs: 300,
            stats_ttl_secs: 600,
            search_ttl_secs: 300,
            user_notes_ttl_secs: 300,
            keywords_ttl_secs: 1800,
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, kind: RequestKind) -> Duration {
        let secs = match kind {
            RequestKind::Topics => self.topics_ttl_secs,
            RequestKind::Stats => self.stats_ttl_secs,
            RequestKind::Search => self.search_ttl_secs,
            RequestKind::UserNotes => self.user_notes_ttl_secs,
            RequestKind::Keywords => self.keywords_ttl_secs,
        };
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Crawler sidecar base URL. `None` means the live tier is offline.
    pub base_url: Option<String>,
    /// Budget for the whole live step of one acquisition.
    pub timeout_ms: u64,
    /// Per HTTP request timeout of the sidecar client.
    pub request_timeout_ms: u64,
    pub keyword_fanout: usize,
    pub notes_per_keyword: usize,
    /// Pause between consecutive keyword searches.
    pub keyword_pause_ms: u64,
    pub seed_keywords: Vec<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: 8_000,
            request_timeout_ms: 5_000,
            keyword_fanout: 5,
            notes_per_keyword: 10,
            keyword_pause_ms: 250,
            seed_keywords: ["冬季穿搭", "护肤", "美妆教程", "减肥", "旅行攻略"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl LiveConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
    pub recency_days: u32,
    pub retention_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "data/pipeline.sqlite3".to_string(),
            recency_days: 7,
            retention_days: 30,
        }
    }
}

/// Engagement weights of the trend score:
/// `(likes*likes_w + comments*comments_w + shares*shares_w + notes*notes_w) / divisor`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub likes: f64,
    pub comments: f64,
    pub shares: f64,
    pub notes: f64,
    pub divisor: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            likes: 0.3,
            comments: 0.5,
            shares: 0.2,
            notes: 10.0,
            divisor: 100.0,
        }
    }
}

impl ScoreWeights {
    pub fn score(&self, likes: u64, comments: u64, shares: u64, notes: u64) -> f64 {
        (likes as f64 * self.likes
            + comments as f64 * self.comments
            + shares as f64 * self.shares
            + notes as f64 * self.notes)
            / self.divisor
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub topics_interval_secs: u64,
    pub keywords_interval_secs: u64,
    pub cleanup_cron: String,
    pub report_interval_secs: u64,
    pub health_interval_secs: u64,
    pub reports_dir: String,
    pub refresh_topic_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            topics_interval_secs: 30 * 60,
            keywords_interval_secs: 60 * 60,
            cleanup_cron: "0 2 * * *".to_string(),
            report_interval_secs: 6 * 3600,
            health_interval_secs: 5 * 60,
            reports_dir: "reports".to_string(),
            refresh_topic_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

/// One row of the keyword categorizer table. Rules are checked in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    pub keywords: Vec<String>,
}

fn default_categories() -> Vec<CategoryRule> {
    let table: [(&str, &[&str]); 9] = [
        ("fashion", &["穿搭", "时尚", "搭配", "服装", "鞋子", "包包", "outfit"]),
        ("beauty", &["美妆", "护肤", "化妆", "口红", "面膜", "精华", "makeup", "skincare"]),
        ("food", &["美食", "餐厅", "料理", "甜品", "咖啡", "奶茶", "食谱", "烘焙"]),
        ("travel", &["旅行", "旅游", "景点", "攻略", "酒店", "机票"]),
        ("lifestyle", &["生活", "好物", "家居", "收纳", "清洁", "日常", "装修"]),
        ("fitness", &["健身", "运动", "瑜伽", "减肥", "塑形", "跑步"]),
        ("study", &["学习", "读书", "考试", "技能", "课程", "知识"]),
        ("pets", &["宠物", "猫咪", "狗狗", "萌宠", "养宠"]),
        ("tech", &["数码", "手机", "电脑", "测评"]),
    ];
    table
        .iter()
        .map(|(name, kws)| CategoryRule {
            name: name.to_string(),
            keywords: kws.iter().map(|k| k.to_string()).collect(),
        })
        .collect()
}

impl PipelineConfig {
    /// Load from an explicit path. Supports TOML or JSON.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut cfg = parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing pipeline config {}", path.display()))?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Load using env var + fallbacks, then apply env overrides:
    /// 1) $PIPELINE_CONFIG_PATH
    /// 2) config/pipeline.toml
    /// 3) config/pipeline.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let toml_p = PathBuf::from("config/pipeline.toml");
            let json_p = PathBuf::from("config/pipeline.json");
            if toml_p.exists() {
                Self::load_from(&toml_p)?
            } else if json_p.exists() {
                Self::load_from(&json_p)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(p) = std::env::var(ENV_DB_PATH) {
            if !p.trim().is_empty() {
                self.store.path = p;
            }
        }
        if let Ok(u) = std::env::var(ENV_LIVE_URL) {
            let u = u.trim();
            self.live.base_url = if u.is_empty() { None } else { Some(u.to_string()) };
        }
        if let Ok(b) = std::env::var(ENV_BIND) {
            if !b.trim().is_empty() {
                self.server.bind = b;
            }
        }
    }

    /// Replace values that would break the pipeline with their defaults.
    pub fn sanitize(&mut self) {
        let d = Self::default();
        if self.max_limit == 0 {
            self.max_limit = d.max_limit;
        }
        if !(self.scoring.divisor.is_finite() && self.scoring.divisor > 0.0) {
            self.scoring.divisor = d.scoring.divisor;
        }
        let c = &mut self.cache;
        for (v, dv) in [
            (&mut c.topics_ttl_secs, d.cache.topics_ttl_secs),
            (&mut c.stats_ttl_secs, d.cache.stats_ttl_secs),
            (&mut c.search_ttl_secs, d.cache.search_ttl_secs),
            (&mut c.user_notes_ttl_secs, d.cache.user_notes_ttl_secs),
            (&mut c.keywords_ttl_secs, d.cache.keywords_ttl_secs),
        ] {
            if *v == 0 {
                *v = dv;
            }
        }
        if self.live.timeout_ms == 0 {
            self.live.timeout_ms = d.live.timeout_ms;
        }
        self.live.keyword_fanout = self.live.keyword_fanout.max(1);
        self.live.notes_per_keyword = self.live.notes_per_keyword.max(1);
        if let Some(u) = &self.live.base_url {
            if u.trim().is_empty() {
                self.live.base_url = None;
            }
        }
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<PipelineConfig> {
    if hint_ext == "json" {
        return Ok(serde_json::from_str(s)?);
    }
    match toml::from_str::<PipelineConfig>(s) {
        Ok(cfg) => Ok(cfg),
        Err(toml_err) => {
            serde_json::from_str(s).map_err(|_| anyhow!("unsupported config format: {toml_err}"))
        }
    }
}
