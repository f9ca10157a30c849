// src/fallback.rs
//! Synthetic data of last resort.
//!
//! Output always has the shape the caller asked for: exactly `limit` records
//! or keywords, or one stats object. Values are drawn from fixed plausible
//! ranges so nothing downstream has to special-case synthetic data.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Duration;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};

use crate::clock::Clock;
use crate::config::ScoreWeights;
use crate::model::{
    Author, Payload, PlatformStats, Provenance, Record, RecordKind, RequestKind, RequestSpec,
    TrendingKeyword,
};

const CATEGORIES: &[&str] = &[
    "fashion", "beauty", "lifestyle", "food", "travel", "fitness", "study", "pets",
];
const KEYWORDS: &[&str] = &["穿搭", "护肤", "好物", "美食", "攻略", "健身", "学习", "萌宠"];
const TREND_KEYWORDS: &[&str] = &[
    "冬季穿搭", "护肤", "美妆教程", "减肥", "旅行攻略", "家居好物", "健身打卡", "咖啡探店",
    "读书笔记", "萌宠日常", "数码测评", "烘焙",
];
const TRENDS: &[&str] = &["up", "down", "stable"];

fn one_decimal(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

pub struct FallbackGenerator {
    clock: Arc<dyn Clock>,
    weights: ScoreWeights,
    rng: Mutex<StdRng>,
}

impl FallbackGenerator {
    pub fn new(clock: Arc<dyn Clock>, weights: ScoreWeights) -> Self {
        Self::with_rng(clock, weights, StdRng::from_os_rng())
    }

    /// Reproducible output, for tests.
    pub fn seeded(clock: Arc<dyn Clock>, weights: ScoreWeights, seed: u64) -> Self {
        Self::with_rng(clock, weights, StdRng::seed_from_u64(seed))
    }

    fn with_rng(clock: Arc<dyn Clock>, weights: ScoreWeights, rng: StdRng) -> Self {
        Self {
            clock,
            weights,
            rng: Mutex::new(rng),
        }
    }

    pub fn generate(&self, spec: &RequestSpec) -> Payload {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        match spec.kind {
            RequestKind::Topics => Payload::Records(self.topics(&mut rng, spec)),
            RequestKind::Search | RequestKind::UserNotes => {
                Payload::Records(self.notes(&mut rng, spec))
            }
            RequestKind::Stats => Payload::Stats(stats(&mut rng)),
            RequestKind::Keywords => Payload::Keywords(self.keywords(&mut rng, spec.limit)),
        }
    }

    fn topics(&self, rng: &mut StdRng, spec: &RequestSpec) -> Vec<Record> {
        let now = self.clock.now();
        let mut out: Vec<Record> = (0..spec.limit)
            .map(|i| {
                let keyword = spec
                    .keyword
                    .clone()
                    .unwrap_or_else(|| pick(rng, KEYWORDS).to_string());
                let category = spec
                    .category
                    .clone()
                    .unwrap_or_else(|| pick(rng, CATEGORIES).to_string());
                Record {
                    kind: RecordKind::Topic,
                    id: format!("fallback_topic_{i}"),
                    title: format!("{keyword}分享 #{}", i + 1),
                    content: String::new(),
                    category,
                    keyword: Some(keyword),
                    author: None,
                    like_count: rng.random_range(1_000..=50_000),
                    comment_count: rng.random_range(50..=1_000),
                    share_count: rng.random_range(10..=500),
                    view_count: rng.random_range(5_000..=100_000),
                    collect_count: 0,
                    note_count: rng.random_range(100..=10_000),
                    trend_score: one_decimal(rng.random_range(10.0..=100.0)),
                    tags: Vec::new(),
                    media: Vec::new(),
                    publish_time: now,
                    crawl_time: now,
                    provenance: Provenance::Fallback,
                }
            })
            .collect();
        out.sort_by(|a, b| b.trend_score.total_cmp(&a.trend_score));
        out
    }

    fn notes(&self, rng: &mut StdRng, spec: &RequestSpec) -> Vec<Record> {
        let now = self.clock.now();
        let mut out: Vec<Record> = (0..spec.limit)
            .map(|i| {
                let keyword = spec
                    .keyword
                    .clone()
                    .unwrap_or_else(|| pick(rng, KEYWORDS).to_string());
                let user_id = spec
                    .user_id
                    .clone()
                    .unwrap_or_else(|| format!("fallback_user_{}", rng.random_range(1..=999)));
                let like_count = rng.random_range(50..=2_000);
                let comment_count = rng.random_range(10..=300);
                let share_count = rng.random_range(5..=100);
                Record {
                    kind: RecordKind::Note,
                    id: format!("fallback_note_{i}"),
                    title: format!("{keyword}笔记 #{}", i + 1),
                    content: format!("关于{keyword}的分享"),
                    category: spec
                        .category
                        .clone()
                        .unwrap_or_else(|| pick(rng, CATEGORIES).to_string()),
                    keyword: Some(keyword),
                    author: Some(Author {
                        nickname: format!("用户{}", &user_id),
                        user_id,
                        avatar: None,
                    }),
                    like_count,
                    comment_count,
                    share_count,
                    view_count: rng.random_range(500..=10_000),
                    collect_count: 0,
                    note_count: 1,
                    trend_score: self.weights.score(like_count, comment_count, share_count, 1),
                    tags: Vec::new(),
                    media: Vec::new(),
                    publish_time: now - Duration::hours(rng.random_range(1..=72)),
                    crawl_time: now,
                    provenance: Provenance::Fallback,
                }
            })
            .collect();
        match spec.kind {
            RequestKind::UserNotes => out.sort_by(|a, b| b.publish_time.cmp(&a.publish_time)),
            _ => out.sort_by(|a, b| b.trend_score.total_cmp(&a.trend_score)),
        }
        out
    }

    fn keywords(&self, rng: &mut StdRng, limit: usize) -> Vec<TrendingKeyword> {
        let now = self.clock.now();
        let mut out: Vec<TrendingKeyword> = (0..limit)
            .map(|i| {
                let base = TREND_KEYWORDS[i % TREND_KEYWORDS.len()];
                let keyword = if i < TREND_KEYWORDS.len() {
                    base.to_string()
                } else {
                    format!("{base} {}", i / TREND_KEYWORDS.len() + 1)
                };
                let trend = pick(rng, TRENDS).to_string();
                let delta: u32 = rng.random_range(1..=30);
                let change = match trend.as_str() {
                    "up" => format!("+{delta}%"),
                    "down" => format!("-{delta}%"),
                    _ => "0%".to_string(),
                };
                TrendingKeyword {
                    keyword,
                    heat: one_decimal(rng.random_range(40.0..=100.0)),
                    trend,
                    change,
                    updated_at: Some(now),
                }
            })
            .collect();
        out.sort_by(|a, b| b.heat.total_cmp(&a.heat));
        out
    }
}

fn pick<'a>(rng: &mut StdRng, from: &[&'a str]) -> &'a str {
    from.choose(rng).copied().unwrap_or("other")
}

fn stats(rng: &mut StdRng) -> PlatformStats {
    PlatformStats {
        total_notes: rng.random_range(80_000..=120_000),
        active_users: rng.random_range(2_000_000..=3_000_000),
        daily_posts: rng.random_range(50_000..=80_000),
        total_interactions: rng.random_range(1_000_000..=2_000_000),
        avg_engagement_rate: one_decimal(rng.random_range(10.0..=20.0)),
        top_category: "fashion".to_string(),
    }
}
