// src/source/http.rs
use std::time::{Duration, Instant};

use anyhow::bail;
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{validate_notes, LiveNote, LiveSource, RawNote};
use crate::error::SourceError;
use crate::model::{PlatformStats, TrendingKeyword};

/// `{success, data, error}` as answered by the crawler sidecar.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default = "Option::default")]
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for the crawler sidecar HTTP API.
pub struct HttpLiveSource {
    base: Url,
    http: reqwest::Client,
}

impl HttpLiveSource {
    pub fn new(base_url: &str, request_timeout: Duration) -> anyhow::Result<Self> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            bail!("crawler url cannot take a path: {base_url}");
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("trend-pipeline/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(3).min(request_timeout))
            .timeout(request_timeout)
            .build()?;
        Ok(Self { base, http })
    }

    /// Base URL plus `segments`, each percent-encoded as one path segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let url = self.endpoint(segments);
        let path = url.path().to_string();
        let t0 = Instant::now();
        let resp = self.http.get(url).query(query).send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout(t0.elapsed())
            } else {
                SourceError::Unavailable(format!("GET {path}: {e}"))
            }
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Unavailable(format!("GET {path}: HTTP {status}")));
        }
        let env: Envelope<T> = resp
            .json()
            .await
            .map_err(|e| SourceError::Malformed(format!("GET {path}: {e}")))?;
        if !env.success {
            return Err(SourceError::Unavailable(
                env.error.unwrap_or_else(|| "crawler reported failure".into()),
            ));
        }
        env.data
            .ok_or_else(|| SourceError::Malformed(format!("GET {path}: success without data")))
    }
}

#[async_trait]
impl LiveSource for HttpLiveSource {
    fn name(&self) -> &'static str {
        "sidecar"
    }

    async fn trending_keywords(&self) -> Result<Vec<TrendingKeyword>, SourceError> {
        self.get(&["keywords", "trending"], &[]).await
    }

    async fn search_notes(
        &self,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<LiveNote>, SourceError> {
        let raw: Vec<RawNote> = self
            .get(
                &["notes", "search"],
                &[("keyword", keyword.to_string()), ("limit", limit.to_string())],
            )
            .await?;
        validate_notes(raw)
    }

    async fn user_notes(&self, user_id: &str, limit: usize) -> Result<Vec<LiveNote>, SourceError> {
        let raw: Vec<RawNote> = self
            .get(&["users", user_id, "notes"], &[("limit", limit.to_string())])
            .await?;
        validate_notes(raw)
    }

    async fn platform_stats(&self) -> Result<PlatformStats, SourceError> {
        self.get(&["stats", "platform"], &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::{routing::get, Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    async fn spawn_sidecar(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn search_reads_envelope_and_validates() {
        let app = Router::new().route(
            "/notes/search",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                Json(json!({
                    "success": true,
                    "data": [{
                        "id": format!("{}-1", q.get("keyword").cloned().unwrap_or_default()),
                        "title": "t",
                        "interact_info": {"liked_count": "2万", "comment_count": 3, "share_count": 1}
                    }]
                }))
            }),
        );
        let base = spawn_sidecar(app).await;
        let src = HttpLiveSource::new(&base, Duration::from_secs(2)).unwrap();
        let notes = src.search_notes("护肤", 10).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].id, "护肤-1");
        assert_eq!(notes[0].like_count, 20_000);
    }

    #[tokio::test]
    async fn failure_envelope_is_unavailable() {
        let app = Router::new().route(
            "/stats/platform",
            get(|| async { Json(json!({"success": false, "error": "blocked", "data": Value::Null})) }),
        );
        let base = spawn_sidecar(app).await;
        let src = HttpLiveSource::new(&base, Duration::from_secs(2)).unwrap();
        let err = src.platform_stats().await.unwrap_err();
        assert_eq!(err, SourceError::Unavailable("blocked".into()));
    }

    #[tokio::test]
    async fn unreachable_sidecar_is_unavailable() {
        let src = HttpLiveSource::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        assert!(src.trending_keywords().await.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn user_id_is_sent_as_one_path_segment() {
        let app = Router::new().route(
            "/api/users/{id}/notes",
            get(|Path(id): Path<String>| async move {
                Json(json!({
                    "success": true,
                    "data": [{"id": id, "title": "t", "interact_info": {"liked_count": 1}}]
                }))
            }),
        );
        let base = spawn_sidecar(app).await;
        // trailing slash on the base is tolerated
        let src = HttpLiveSource::new(&format!("{base}/api/"), Duration::from_secs(2)).unwrap();
        let notes = src.user_notes("a/b?x=1#top", 5).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].id, "a/b?x=1#top");
    }

    #[test]
    fn base_url_must_accept_a_path() {
        assert!(HttpLiveSource::new("mailto:ops@example.com", Duration::from_secs(1)).is_err());
        assert!(HttpLiveSource::new("not a url", Duration::from_secs(1)).is_err());
    }
}
