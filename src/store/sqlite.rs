// src/store/sqlite.rs
//! SQLite implementation of [`RecordStore`].
//!
//! All statements run on tokio-rusqlite's background thread, so writes are
//! serialized; a multi-record upsert is one transaction and is either fully
//! applied or not at all.

use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, OptionalExtension};
use tokio_rusqlite::Connection;
use tracing::debug;

use super::{RankBy, RecordQuery, RecordStore, StoreStats};
use crate::clock::Clock;
use crate::error::StoreError;
use crate::model::{Author, Provenance, Record, RecordKind, TrendingKeyword};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;

CREATE TABLE IF NOT EXISTS records (
    kind          TEXT    NOT NULL,
    id            TEXT    NOT NULL,
    title         TEXT    NOT NULL,
    content       TEXT    NOT NULL DEFAULT '',
    category      TEXT    NOT NULL,
    keyword       TEXT,
    author_id     TEXT,
    author_name   TEXT,
    author_avatar TEXT,
    like_count    INTEGER NOT NULL DEFAULT 0,
    comment_count INTEGER NOT NULL DEFAULT 0,
    share_count   INTEGER NOT NULL DEFAULT 0,
    view_count    INTEGER NOT NULL DEFAULT 0,
    collect_count INTEGER NOT NULL DEFAULT 0,
    note_count    INTEGER NOT NULL DEFAULT 0,
    trend_score   REAL    NOT NULL DEFAULT 0,
    tags          TEXT    NOT NULL DEFAULT '[]',
    media         TEXT    NOT NULL DEFAULT '[]',
    published_at  INTEGER NOT NULL,
    ingested_at   INTEGER NOT NULL,
    provenance    TEXT    NOT NULL,
    PRIMARY KEY (kind, id)
);
CREATE INDEX IF NOT EXISTS idx_records_category  ON records(kind, category);
CREATE INDEX IF NOT EXISTS idx_records_published ON records(published_at);
CREATE INDEX IF NOT EXISTS idx_records_ingested  ON records(ingested_at);
CREATE INDEX IF NOT EXISTS idx_records_author    ON records(author_id);

CREATE TABLE IF NOT EXISTS trending_keywords (
    keyword    TEXT    PRIMARY KEY,
    heat       REAL    NOT NULL,
    trend      TEXT    NOT NULL,
    change     TEXT    NOT NULL DEFAULT '',
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS crawl_logs (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    data_type  TEXT    NOT NULL,
    count      INTEGER NOT NULL,
    status     TEXT    NOT NULL,
    created_at INTEGER NOT NULL
);
"#;

const UPSERT_SQL: &str = "
INSERT INTO records (
    kind, id, title, content, category, keyword, author_id, author_name, author_avatar,
    like_count, comment_count, share_count, view_count, collect_count, note_count,
    trend_score, tags, media, published_at, ingested_at, provenance
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
ON CONFLICT(kind, id) DO UPDATE SET
    title         = excluded.title,
    content       = excluded.content,
    category      = excluded.category,
    keyword       = COALESCE(excluded.keyword, records.keyword),
    author_id     = COALESCE(excluded.author_id, records.author_id),
    author_name   = COALESCE(excluded.author_name, records.author_name),
    author_avatar = COALESCE(excluded.author_avatar, records.author_avatar),
    like_count    = excluded.like_count,
    comment_count = excluded.comment_count,
    share_count   = excluded.share_count,
    view_count    = excluded.view_count,
    collect_count = excluded.collect_count,
    note_count    = excluded.note_count,
    trend_score   = excluded.trend_score,
    tags          = excluded.tags,
    media         = excluded.media,
    ingested_at   = excluded.ingested_at,
    provenance    = excluded.provenance";

const RECORD_COLUMNS: &str = "kind, id, title, content, category, keyword, author_id, author_name, \
     author_avatar, like_count, comment_count, share_count, view_count, collect_count, note_count, \
     trend_score, tags, media, published_at, ingested_at, provenance";

fn map_tr_err(e: tokio_rusqlite::Error) -> StoreError {
    match e {
        tokio_rusqlite::Error::ConnectionClosed => {
            StoreError::Unavailable("connection closed".into())
        }
        other => StoreError::Query(other.to_string()),
    }
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn count(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn uncount(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

fn conversion_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
    let kind: String = row.get(0)?;
    let kind = RecordKind::parse(&kind).ok_or_else(|| conversion_err(0, format!("kind {kind}")))?;
    let provenance: String = row.get(20)?;
    let provenance = Provenance::parse(&provenance)
        .ok_or_else(|| conversion_err(20, format!("provenance {provenance}")))?;
    let author_id: Option<String> = row.get(6)?;
    let author = match author_id {
        Some(user_id) => Some(Author {
            user_id,
            nickname: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            avatar: row.get(8)?,
        }),
        None => None,
    };
    let tags: String = row.get(16)?;
    let media: String = row.get(17)?;
    Ok(Record {
        kind,
        id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        category: row.get(4)?,
        keyword: row.get(5)?,
        author,
        like_count: uncount(row.get(9)?),
        comment_count: uncount(row.get(10)?),
        share_count: uncount(row.get(11)?),
        view_count: uncount(row.get(12)?),
        collect_count: uncount(row.get(13)?),
        note_count: uncount(row.get(14)?),
        trend_score: row.get(15)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        media: serde_json::from_str(&media).unwrap_or_default(),
        publish_time: from_ms(row.get(18)?),
        crawl_time: from_ms(row.get(19)?),
        provenance,
    })
}

pub struct SqliteStore {
    conn: RwLock<Option<Connection>>,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and apply the schema.
    pub async fn connect(path: &str, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(format!("create {}: {e}", parent.display())))?;
            }
        }
        let conn = Connection::open(path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("open {path}: {e}")))?;
        let store = Self::init(conn, clock).await?;
        debug!(path, "sqlite store connected");
        Ok(store)
    }

    pub async fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Unavailable(format!("open in-memory: {e}")))?;
        Self::init(conn, clock).await
    }

    async fn init(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        conn.call(|c| -> Result<(), rusqlite::Error> {
            c.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;
        Ok(Self {
            conn: RwLock::new(Some(conn)),
            clock,
        })
    }

    fn handle(&self) -> Result<Connection, StoreError> {
        self.conn
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| StoreError::Unavailable("store is closed".into()))
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn upsert(&self, records: &[Record]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let rows = records.to_vec();
        self.handle()?
            .call(move |c| -> Result<usize, rusqlite::Error> {
                let tx = c.transaction()?;
                let mut written = 0;
                {
                    let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
                    for r in &rows {
                        let tags = serde_json::to_string(&r.tags).unwrap_or_else(|_| "[]".into());
                        let media = serde_json::to_string(&r.media).unwrap_or_else(|_| "[]".into());
                        let (author_id, author_name, author_avatar) = match &r.author {
                            Some(a) => (Some(&a.user_id), Some(&a.nickname), a.avatar.as_ref()),
                            None => (None, None, None),
                        };
                        written += stmt.execute(params![
                            r.kind.as_str(),
                            r.id,
                            r.title,
                            r.content,
                            r.category,
                            r.keyword,
                            author_id,
                            author_name,
                            author_avatar,
                            count(r.like_count),
                            count(r.comment_count),
                            count(r.share_count),
                            count(r.view_count),
                            count(r.collect_count),
                            count(r.note_count),
                            r.trend_score,
                            tags,
                            media,
                            r.publish_time.timestamp_millis(),
                            r.crawl_time.timestamp_millis(),
                            r.provenance.as_str(),
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(written)
            })
            .await
            .map_err(map_tr_err)
    }

    async fn query(&self, q: &RecordQuery) -> Result<Vec<Record>, StoreError> {
        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE kind = ?");
        let mut args: Vec<Value> = vec![Value::Text(q.kind.as_str().to_string())];

        if let Some(cat) = &q.category {
            sql.push_str(" AND lower(category) = lower(?)");
            args.push(Value::Text(cat.clone()));
        }
        if let Some(kw) = &q.keyword {
            sql.push_str(
                " AND (lower(keyword) = lower(?) OR instr(lower(title), lower(?)) > 0 \
                 OR instr(lower(tags), lower(?)) > 0)",
            );
            for _ in 0..3 {
                args.push(Value::Text(kw.clone()));
            }
        }
        if let Some(author) = &q.author_id {
            sql.push_str(" AND author_id = ?");
            args.push(Value::Text(author.clone()));
        }
        if let Some(days) = q.recency_days {
            let cutoff = self.now_ms() - Duration::days(i64::from(days)).num_milliseconds();
            sql.push_str(" AND ingested_at >= ?");
            args.push(Value::Integer(cutoff));
        }
        sql.push_str(match q.rank {
            RankBy::TrendScore => " ORDER BY trend_score DESC, ingested_at DESC",
            RankBy::PublishTime => " ORDER BY published_at DESC, ingested_at DESC",
        });
        sql.push_str(" LIMIT ?");
        args.push(Value::Integer(count(q.limit as u64)));

        self.handle()?
            .call(move |c| -> Result<Vec<Record>, rusqlite::Error> {
                let mut stmt = c.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(args.iter()), row_to_record)?;
                rows.collect()
            })
            .await
            .map_err(map_tr_err)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let now = self.now_ms();
        let week_ago = now - Duration::days(7).num_milliseconds();
        let day_ago = now - Duration::hours(24).num_milliseconds();
        self.handle()?
            .call(move |c| -> Result<StoreStats, rusqlite::Error> {
                let mut s = c.query_row(
                    "SELECT
                        (SELECT COUNT(*) FROM records WHERE kind = 'note'),
                        (SELECT COUNT(*) FROM records WHERE kind = 'topic'),
                        (SELECT COUNT(*) FROM records WHERE kind = 'note' AND ingested_at >= ?1),
                        (SELECT COUNT(DISTINCT author_id) FROM records
                            WHERE kind = 'note' AND author_id IS NOT NULL),
                        (SELECT COUNT(*) FROM records WHERE kind = 'note' AND published_at >= ?2),
                        (SELECT COALESCE(SUM(like_count + comment_count + share_count), 0)
                            FROM records WHERE kind = 'note'),
                        (SELECT COALESCE(SUM(view_count), 0) FROM records WHERE kind = 'note'),
                        (SELECT COUNT(*) FROM trending_keywords),
                        (SELECT COUNT(*) FROM crawl_logs),
                        (SELECT MAX(ingested_at) FROM records)",
                    params![week_ago, day_ago],
                    |row| {
                        Ok(StoreStats {
                            total_notes: uncount(row.get(0)?),
                            total_topics: uncount(row.get(1)?),
                            recent_notes: uncount(row.get(2)?),
                            active_users: uncount(row.get(3)?),
                            daily_posts: uncount(row.get(4)?),
                            total_interactions: uncount(row.get(5)?),
                            total_views: uncount(row.get(6)?),
                            total_keywords: uncount(row.get(7)?),
                            total_crawls: uncount(row.get(8)?),
                            last_ingest: row.get::<_, Option<i64>>(9)?.map(from_ms),
                            ..Default::default()
                        })
                    },
                )?;
                let mut stmt = c.prepare(
                    "SELECT category, COUNT(*) FROM records WHERE kind = 'note' GROUP BY category",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, uncount(row.get(1)?)))
                })?;
                for row in rows {
                    let (cat, n) = row?;
                    s.notes_by_category.insert(cat, n);
                }
                Ok(s)
            })
            .await
            .map_err(map_tr_err)
    }

    async fn replace_keywords(&self, keywords: &[TrendingKeyword]) -> Result<(), StoreError> {
        let now = self.now_ms();
        let rows = keywords.to_vec();
        self.handle()?
            .call(move |c| -> Result<(), rusqlite::Error> {
                let tx = c.transaction()?;
                tx.execute("DELETE FROM trending_keywords", [])?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR REPLACE INTO trending_keywords (keyword, heat, trend, change, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )?;
                    for k in &rows {
                        let updated = k.updated_at.map(|t| t.timestamp_millis()).unwrap_or(now);
                        stmt.execute(params![k.keyword, k.heat, k.trend, k.change, updated])?;
                    }
                }
                tx.commit()
            })
            .await
            .map_err(map_tr_err)
    }

    async fn keywords(&self, limit: usize) -> Result<Vec<TrendingKeyword>, StoreError> {
        let limit = count(limit as u64);
        self.handle()?
            .call(move |c| -> Result<Vec<TrendingKeyword>, rusqlite::Error> {
                let mut stmt = c.prepare(
                    "SELECT keyword, heat, trend, change, updated_at FROM trending_keywords
                     ORDER BY heat DESC, keyword ASC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit], |row| {
                    Ok(TrendingKeyword {
                        keyword: row.get(0)?,
                        heat: row.get(1)?,
                        trend: row.get(2)?,
                        change: row.get(3)?,
                        updated_at: Some(from_ms(row.get(4)?)),
                    })
                })?;
                rows.collect()
            })
            .await
            .map_err(map_tr_err)
    }

    async fn log_crawl(
        &self,
        data_type: &str,
        n: usize,
        status: &str,
    ) -> Result<(), StoreError> {
        let (data_type, status, now) = (data_type.to_string(), status.to_string(), self.now_ms());
        self.handle()?
            .call(move |c| -> Result<(), rusqlite::Error> {
                c.execute(
                    "INSERT INTO crawl_logs (data_type, count, status, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![data_type, count(n as u64), status, now],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = cutoff.timestamp_millis();
        self.handle()?
            .call(move |c| -> Result<usize, rusqlite::Error> {
                let tx = c.transaction()?;
                let removed = tx.execute("DELETE FROM records WHERE ingested_at < ?1", params![cutoff])?;
                tx.execute("DELETE FROM crawl_logs WHERE created_at < ?1", params![cutoff])?;
                tx.commit()?;
                Ok(removed)
            })
            .await
            .map_err(map_tr_err)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.handle()?
            .call(|c| -> Result<(), rusqlite::Error> {
                c.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    async fn latest_ingest(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.handle()?
            .call(|c| -> Result<Option<i64>, rusqlite::Error> {
                c.query_row("SELECT MAX(ingested_at) FROM records", [], |row| row.get(0))
                    .optional()
                    .map(Option::flatten)
            })
            .await
            .map(|ms| ms.map(from_ms))
            .map_err(map_tr_err)
    }

    async fn close(&self) -> Result<(), StoreError> {
        let conn = self.conn.write().unwrap_or_else(PoisonError::into_inner).take();
        let Some(conn) = conn else {
            return Ok(());
        };
        conn.call(|c| -> Result<(), rusqlite::Error> {
            c.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;
        conn.close()
            .await
            .map_err(|e| StoreError::Query(format!("close: {e}")))?;
        debug!("sqlite store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn note(id: &str, category: &str, likes: u64, score: f64, at: DateTime<Utc>) -> Record {
        Record {
            kind: RecordKind::Note,
            id: id.to_string(),
            title: format!("note {id}"),
            content: String::new(),
            category: category.to_string(),
            keyword: Some("护肤".into()),
            author: Some(Author {
                user_id: format!("u-{id}"),
                nickname: "n".into(),
                avatar: None,
            }),
            like_count: likes,
            comment_count: 1,
            share_count: 1,
            view_count: likes * 10,
            collect_count: 0,
            note_count: 1,
            trend_score: score,
            tags: vec!["护肤".into()],
            media: vec![],
            publish_time: at - Duration::hours(1),
            crawl_time: at,
            provenance: Provenance::RealCrawler,
        }
    }

    async fn store() -> (Arc<ManualClock>, SqliteStore) {
        let clock = Arc::new(ManualClock::new(t0()));
        let s = SqliteStore::open_in_memory(clock.clone()).await.unwrap();
        (clock, s)
    }

    #[tokio::test]
    async fn upsert_twice_keeps_one_row_with_second_counts() {
        let (_c, s) = store().await;
        let first = note("n1", "beauty", 100, 1.0, t0());
        s.upsert(&[first.clone()]).await.unwrap();

        let mut second = note("n1", "beauty", 900, 9.0, t0() + Duration::minutes(5));
        second.publish_time = t0() + Duration::days(3);
        s.upsert(&[second]).await.unwrap();

        let rows = s.query(&RecordQuery::new(RecordKind::Note, 10)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].like_count, 900);
        assert_eq!(rows[0].trend_score, 9.0);
        // publish time is immutable
        assert_eq!(rows[0].publish_time, first.publish_time);
        assert_eq!(rows[0].crawl_time, t0() + Duration::minutes(5));
    }

    #[tokio::test]
    async fn concurrent_batches_on_the_same_ids_never_interleave() {
        let (_c, s) = store().await;
        let batch = |likes: u64, score: f64| -> Vec<Record> {
            (0..50)
                .map(|i| note(&format!("n{i}"), "beauty", likes, score, t0()))
                .collect()
        };
        let (low, high) = (batch(100, 1.0), batch(900, 9.0));

        let (a, b) = tokio::join!(s.upsert(&low), s.upsert(&high));
        assert_eq!((a.unwrap(), b.unwrap()), (50, 50));

        let rows = s.query(&RecordQuery::new(RecordKind::Note, 100)).await.unwrap();
        assert_eq!(rows.len(), 50);
        let winner = (rows[0].like_count, rows[0].trend_score);
        assert!(winner == (100, 1.0) || winner == (900, 9.0), "{winner:?}");
        for r in &rows {
            // every row comes whole from one batch, and all from the same one
            assert_eq!((r.like_count, r.trend_score), winner, "row {}", r.id);
            assert_eq!(r.view_count, r.like_count * 10);
        }
        assert_eq!(s.stats().await.unwrap().total_notes, 50);
    }

    #[tokio::test]
    async fn same_id_in_different_kinds_does_not_collide() {
        let (_c, s) = store().await;
        let n = note("x", "beauty", 1, 1.0, t0());
        let mut t = n.clone();
        t.kind = RecordKind::Topic;
        assert_eq!(s.upsert(&[n, t]).await.unwrap(), 2);
        let st = s.stats().await.unwrap();
        assert_eq!((st.total_notes, st.total_topics), (1, 1));
    }

    #[tokio::test]
    async fn query_filters_and_orders() {
        let (clock, s) = store().await;
        s.upsert(&[
            note("old", "beauty", 10, 50.0, t0() - Duration::days(10)),
            note("a", "beauty", 10, 5.0, t0() - Duration::hours(2)),
            note("b", "beauty", 10, 5.0, t0() - Duration::hours(1)),
            note("c", "fashion", 10, 8.0, t0()),
        ])
        .await
        .unwrap();
        clock.set(t0());

        let mut q = RecordQuery::new(RecordKind::Note, 10);
        q.category = Some("Beauty".into());
        q.recency_days = Some(7);
        let ids: Vec<_> = s.query(&q).await.unwrap().into_iter().map(|r| r.id).collect();
        // tie on score broken by newest ingest
        assert_eq!(ids, vec!["b", "a"]);

        let mut q = RecordQuery::new(RecordKind::Note, 2);
        q.rank = RankBy::TrendScore;
        let ids: Vec<_> = s.query(&q).await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["old", "c"]);

        let mut q = RecordQuery::new(RecordKind::Note, 10);
        q.author_id = Some("u-c".into());
        q.rank = RankBy::PublishTime;
        assert_eq!(s.query(&q).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn keywords_are_replaced_wholesale() {
        let (_c, s) = store().await;
        let kw = |k: &str, h: f64| TrendingKeyword {
            keyword: k.into(),
            heat: h,
            trend: "up".into(),
            change: "+5%".into(),
            updated_at: None,
        };
        s.replace_keywords(&[kw("a", 10.0), kw("b", 90.0)]).await.unwrap();
        s.replace_keywords(&[kw("c", 50.0), kw("d", 70.0)]).await.unwrap();
        let got: Vec<_> = s.keywords(10).await.unwrap().into_iter().map(|k| k.keyword).collect();
        assert_eq!(got, vec!["d", "c"]);
    }

    #[tokio::test]
    async fn prune_and_stats() {
        let (_c, s) = store().await;
        s.upsert(&[
            note("old", "beauty", 10, 1.0, t0() - Duration::days(40)),
            note("new", "fashion", 10, 1.0, t0()),
        ])
        .await
        .unwrap();
        s.log_crawl("notes", 2, "success").await.unwrap();

        let removed = s.prune_older_than(t0() - Duration::days(30)).await.unwrap();
        assert_eq!(removed, 1);

        let st = s.stats().await.unwrap();
        assert_eq!(st.total_notes, 1);
        assert_eq!(st.total_crawls, 1);
        assert_eq!(st.active_users, 1);
        assert_eq!(st.daily_posts, 1);
        assert_eq!(st.notes_by_category.get("fashion"), Some(&1));
        assert_eq!(s.latest_ingest().await.unwrap(), Some(t0()));
    }

    #[tokio::test]
    async fn closed_store_reports_unavailable() {
        let (_c, s) = store().await;
        s.ping().await.unwrap();
        s.close().await.unwrap();
        assert!(matches!(s.ping().await, Err(StoreError::Unavailable(_))));
        assert!(matches!(
            s.query(&RecordQuery::new(RecordKind::Topic, 5)).await,
            Err(StoreError::Unavailable(_))
        ));
        // closing twice is fine
        s.close().await.unwrap();
    }

    #[tokio::test]
    async fn file_store_persists_across_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/pipeline.sqlite3");
        let path = path.to_str().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(t0()));

        let s = SqliteStore::connect(path, clock.clone()).await.unwrap();
        s.upsert(&[note("n1", "beauty", 1, 1.0, t0())]).await.unwrap();
        s.close().await.unwrap();

        let s = SqliteStore::connect(path, clock).await.unwrap();
        assert_eq!(s.stats().await.unwrap().total_notes, 1);
    }
}
