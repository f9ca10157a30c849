// src/orchestrator/aggregate.rs
//! Turning live notes into records and grouping them into topics.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::config::ScoreWeights;
use crate::model::{Provenance, Record, RecordKind};
use crate::source::{Categorizer, LiveNote};

/// A note together with the keyword whose search surfaced it.
#[derive(Debug, Clone)]
pub struct NoteHit {
    pub keyword: String,
    pub note: LiveNote,
}

/// Keep the first occurrence of every note id.
pub fn dedup_hits(hits: Vec<NoteHit>) -> Vec<NoteHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|h| seen.insert(h.note.id.clone()))
        .collect()
}

pub fn note_record(
    note: &LiveNote,
    keyword: Option<&str>,
    categorizer: &dyn Categorizer,
    weights: &ScoreWeights,
    now: DateTime<Utc>,
) -> Record {
    let text = format!(
        "{} {} {}",
        note.title,
        note.tags.join(" "),
        keyword.unwrap_or_default()
    );
    Record {
        kind: RecordKind::Note,
        id: note.id.clone(),
        title: note.title.clone(),
        content: note.content.clone(),
        category: categorizer.categorize(&text),
        keyword: keyword.map(String::from),
        author: note.author.clone(),
        like_count: note.like_count,
        comment_count: note.comment_count,
        share_count: note.share_count,
        view_count: note.view_count,
        collect_count: note.collect_count,
        note_count: 1,
        trend_score: weights.score(note.like_count, note.comment_count, note.share_count, 1),
        tags: note.tags.clone(),
        media: note.media.clone(),
        publish_time: note.published_at.unwrap_or(now),
        crawl_time: now,
        provenance: Provenance::RealCrawler,
    }
}

#[derive(Default)]
struct TopicAcc {
    keyword: String,
    likes: u64,
    comments: u64,
    shares: u64,
    views: u64,
    collects: u64,
    notes: u64,
    latest: Option<DateTime<Utc>>,
    media: Option<String>,
}

/// Group deduplicated hits by primary tag (else the search keyword) and score
/// each group. Sorted by trend score descending, ties by title.
pub fn aggregate_topics(
    hits: &[NoteHit],
    categorizer: &dyn Categorizer,
    weights: &ScoreWeights,
    now: DateTime<Utc>,
) -> Vec<Record> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, TopicAcc> = HashMap::new();

    for h in hits {
        let title = h
            .note
            .primary_tag()
            .unwrap_or(h.keyword.as_str())
            .trim()
            .to_string();
        if title.is_empty() {
            continue;
        }
        let acc = groups.entry(title.clone()).or_insert_with(|| {
            order.push(title.clone());
            TopicAcc {
                keyword: h.keyword.clone(),
                ..TopicAcc::default()
            }
        });
        acc.likes += h.note.like_count;
        acc.comments += h.note.comment_count;
        acc.shares += h.note.share_count;
        acc.views += h.note.view_count;
        acc.collects += h.note.collect_count;
        acc.notes += 1;
        if let Some(p) = h.note.published_at {
            acc.latest = Some(acc.latest.map_or(p, |l| l.max(p)));
        }
        if acc.media.is_none() {
            acc.media = h.note.media.first().cloned();
        }
    }

    let mut topics: Vec<Record> = order
        .into_iter()
        .filter_map(|title| {
            let acc = groups.remove(&title)?;
            Some(Record {
                kind: RecordKind::Topic,
                id: format!("topic:{}", title.to_lowercase()),
                category: categorizer.categorize(&format!("{title} {}", acc.keyword)),
                keyword: Some(acc.keyword),
                author: None,
                content: String::new(),
                like_count: acc.likes,
                comment_count: acc.comments,
                share_count: acc.shares,
                view_count: acc.views,
                collect_count: acc.collects,
                note_count: acc.notes,
                trend_score: weights.score(acc.likes, acc.comments, acc.shares, acc.notes),
                tags: vec![title.clone()],
                media: acc.media.into_iter().collect(),
                publish_time: acc.latest.unwrap_or(now),
                crawl_time: now,
                provenance: Provenance::RealCrawler,
                title,
            })
        })
        .collect();

    topics.sort_by(|a, b| {
        b.trend_score
            .total_cmp(&a.trend_score)
            .then_with(|| a.title.cmp(&b.title))
    });
    topics
}
