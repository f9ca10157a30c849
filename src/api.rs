// src/api.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::model::{AcquireParams, RequestKind, Tier};
use crate::orchestrator::Orchestrator;
use crate::scheduler::{JobOutcome, Scheduler};
use crate::service::Service;

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<Orchestrator>,
    scheduler: Arc<Scheduler>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            orchestrator,
            scheduler,
        }
    }

    pub fn from_service(service: &Service) -> Self {
        Self::new(service.orchestrator.clone(), service.scheduler.clone())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/topics/hot", get(hot_topics))
        .route("/api/notes/search", get(search_notes))
        .route("/api/users/{user_id}/notes", get(user_notes))
        .route("/api/keywords/trending", get(trending_keywords))
        .route("/api/stats/platform", get(platform_stats))
        .route("/api/scheduler/status", get(scheduler_status))
        .route("/api/scheduler/jobs/{id}/run", post(run_job))
        .route("/api/health/probe", get(health_probe))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Run one acquisition and attach `X-Cache` / `X-Source` diagnostics.
async fn acquire(state: &AppState, kind: RequestKind, params: AcquireParams) -> Response {
    match state.orchestrator.acquire(kind, &params).await {
        Ok(acq) => {
            let mut headers = HeaderMap::new();
            let cache = if acq.tier == Tier::Cache { "HIT" } else { "MISS" };
            headers.insert("X-Cache", HeaderValue::from_static(cache));
            headers.insert("X-Source", HeaderValue::from_static(acq.tier.as_str()));
            (headers, Json(acq.result)).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, kind = %kind, "acquisition failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "data": null, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn hot_topics(State(state): State<AppState>, Query(p): Query<AcquireParams>) -> Response {
    acquire(&state, RequestKind::Topics, p).await
}

async fn search_notes(State(state): State<AppState>, Query(p): Query<AcquireParams>) -> Response {
    acquire(&state, RequestKind::Search, p).await
}

async fn user_notes(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(p): Query<AcquireParams>,
) -> Response {
    acquire(&state, RequestKind::UserNotes, p.user(user_id)).await
}

async fn trending_keywords(
    State(state): State<AppState>,
    Query(p): Query<AcquireParams>,
) -> Response {
    acquire(&state, RequestKind::Keywords, p).await
}

async fn platform_stats(State(state): State<AppState>) -> Response {
    acquire(&state, RequestKind::Stats, AcquireParams::default()).await
}

async fn scheduler_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.status())
}

async fn run_job(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let outcome = state.scheduler.run_job(&id).await;
    let status = match outcome {
        JobOutcome::NotFound => StatusCode::NOT_FOUND,
        JobOutcome::Skipped => StatusCode::CONFLICT,
        JobOutcome::Succeeded | JobOutcome::Failed(_) => StatusCode::OK,
    };
    (status, Json(json!({ "job": id, "result": outcome })))
}

async fn health_probe(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.orchestrator.health_probe().await;
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
