// src/scheduler/jobs.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::{JobAction, JobDescriptor, PipelineStats, Scheduler, StatsTracker, Trigger};
use crate::config::SchedulerConfig;
use crate::error::PipelineError;
use crate::orchestrator::{HealthReport, Orchestrator};
use crate::store::StoreStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    UpdateHotTopics,
    UpdateKeywords,
    CleanupData,
    GenerateReport,
    HealthCheck,
}

impl JobKind {
    pub fn id(self) -> &'static str {
        match self {
            JobKind::UpdateHotTopics => "update_hot_topics",
            JobKind::UpdateKeywords => "update_keywords",
            JobKind::CleanupData => "cleanup_data",
            JobKind::GenerateReport => "generate_report",
            JobKind::HealthCheck => "health_check",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            JobKind::UpdateHotTopics => "Refresh hot topics",
            JobKind::UpdateKeywords => "Refresh trending keywords",
            JobKind::CleanupData => "Retention cleanup",
            JobKind::GenerateReport => "Analysis report",
            JobKind::HealthCheck => "Health probe",
        }
    }
}

/// The built-in jobs, all driving the orchestrator's write path.
pub struct PipelineJob {
    kind: JobKind,
    orchestrator: Arc<Orchestrator>,
    stats: Arc<StatsTracker>,
    reports_dir: PathBuf,
}

#[async_trait]
impl JobAction for PipelineJob {
    async fn run(&self) -> Result<(), PipelineError> {
        let o = &self.orchestrator;
        match self.kind {
            JobKind::UpdateHotTopics => o.refresh_hot_topics().await.map(drop),
            JobKind::UpdateKeywords => o.refresh_keywords().await.map(drop),
            JobKind::CleanupData => o.prune().await.map(drop),
            JobKind::GenerateReport => {
                let path = write_report(o, &self.stats, &self.reports_dir).await?;
                info!(path = %path.display(), "report written");
                Ok(())
            }
            JobKind::HealthCheck => {
                let h = o.health_probe().await;
                if h.healthy {
                    info!(
                        since_write_secs = ?h.seconds_since_write,
                        cache_entries = h.cache_entries,
                        "health ok"
                    );
                    Ok(())
                } else {
                    let reason = h.store_error.unwrap_or_else(|| "store unreachable".into());
                    Err(anyhow!("unhealthy: {reason}").into())
                }
            }
        }
    }
}

/// Register the default schedule: topics every 30 min and keywords hourly
/// (both eager), nightly cleanup, a report every 6 h and a health probe
/// every 5 min, with the periods taken from `cfg`.
pub fn register_default_jobs(
    scheduler: &mut Scheduler,
    orchestrator: Arc<Orchestrator>,
    cfg: &SchedulerConfig,
) -> Result<()> {
    let secs = Duration::from_secs;
    let plan = [
        (JobKind::UpdateHotTopics, Trigger::every(secs(cfg.topics_interval_secs))?, true),
        (JobKind::UpdateKeywords, Trigger::every(secs(cfg.keywords_interval_secs))?, true),
        (JobKind::CleanupData, Trigger::cron(&cfg.cleanup_cron)?, false),
        (JobKind::GenerateReport, Trigger::every(secs(cfg.report_interval_secs))?, false),
        (JobKind::HealthCheck, Trigger::every(secs(cfg.health_interval_secs))?, false),
    ];
    let stats = scheduler.stats().clone();
    for (kind, trigger, eager) in plan {
        let action = Arc::new(PipelineJob {
            kind,
            orchestrator: orchestrator.clone(),
            stats: stats.clone(),
            reports_dir: PathBuf::from(&cfg.reports_dir),
        });
        let mut job = JobDescriptor::new(kind.id(), kind.name(), trigger, action);
        if eager {
            job = job.eager();
        }
        scheduler.add_job(job);
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub store: StoreStats,
    pub scheduler: PipelineStats,
    pub system: HealthReport,
}

/// Write `report_YYYYmmdd_HHMMSS.json` into `dir`; returns its path.
pub async fn write_report(
    orchestrator: &Orchestrator,
    stats: &StatsTracker,
    dir: &Path,
) -> Result<PathBuf, PipelineError> {
    let system = orchestrator.health_probe().await;
    let store = orchestrator.store_stats().await?;
    let report = Report {
        generated_at: system.checked_at,
        store,
        scheduler: stats.snapshot(),
        system,
    };
    let body = serde_json::to_string_pretty(&report).context("serializing report")?;
    let name = format!("report_{}.json", report.generated_at.format("%Y%m%d_%H%M%S"));
    let path = dir.join(name);
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
