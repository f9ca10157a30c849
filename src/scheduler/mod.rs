// src/scheduler/mod.rs
//! # Scheduler
//! One timer loop over a sorted set of `(next_fire, job)` pairs. A due job is
//! run to completion before the loop looks at the next one. Each job carries a
//! running flag; a trigger that finds it set is dropped, not queued. Manual
//! runs go through the same flag, and wait on the same execution lock, so a
//! manual run never overlaps a scheduled one.

pub mod jobs;
pub mod stats;
pub mod trigger;

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::PipelineError;
pub use stats::{PipelineStats, StatsTracker};
pub use trigger::Trigger;

/// Work a job performs when it fires.
#[async_trait]
pub trait JobAction: Send + Sync {
    async fn run(&self) -> Result<(), PipelineError>;
}

/// Adapts an async closure into a [`JobAction`].
pub struct FnJob<F>(pub F);

#[async_trait]
impl<F, Fut> JobAction for FnJob<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), PipelineError>> + Send,
{
    async fn run(&self) -> Result<(), PipelineError> {
        (self.0)().await
    }
}

pub struct JobDescriptor {
    pub id: String,
    pub name: String,
    pub trigger: Trigger,
    /// Run once at startup before the periodic schedule.
    pub eager: bool,
    /// At most one concurrent run of this job.
    pub single_instance: bool,
    action: Arc<dyn JobAction>,
    running: AtomicBool,
    last_run: Mutex<Option<DateTime<Utc>>>,
    next_run: Mutex<Option<DateTime<Utc>>>,
}

impl JobDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        trigger: Trigger,
        action: Arc<dyn JobAction>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            trigger,
            eager: false,
            single_instance: true,
            action,
            running: AtomicBool::new(false),
            last_run: Mutex::new(None),
            next_run: Mutex::new(None),
        }
    }

    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn status(&self) -> JobStatus {
        JobStatus {
            id: self.id.clone(),
            name: self.name.clone(),
            trigger: self.trigger.describe(),
            next_run: *self.next_run.lock().unwrap_or_else(PoisonError::into_inner),
            last_run: *self.last_run.lock().unwrap_or_else(PoisonError::into_inner),
            running: self.is_running(),
        }
    }
}

/// Clears the running flag however the run ends.
struct RunningGuard(Arc<JobDescriptor>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
    /// The job was already running; this trigger was dropped.
    Skipped,
    NotFound,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: String,
    pub name: String,
    pub trigger: String,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub jobs: Vec<JobStatus>,
    pub stats: PipelineStats,
}

pub struct Scheduler {
    jobs: Vec<Arc<JobDescriptor>>,
    stats: Arc<StatsTracker>,
    clock: Arc<dyn Clock>,
    running: AtomicBool,
    /// Held for the length of every job body.
    exec: Arc<tokio::sync::Mutex<()>>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>, stats: Arc<StatsTracker>) -> Self {
        Self {
            jobs: Vec::new(),
            stats,
            clock,
            running: AtomicBool::new(false),
            exec: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn add_job(&mut self, job: JobDescriptor) -> &mut Self {
        self.jobs.push(Arc::new(job));
        self
    }

    pub fn stats(&self) -> &Arc<StatsTracker> {
        &self.stats
    }

    pub fn job_ids(&self) -> impl Iterator<Item = &str> {
        self.jobs.iter().map(|j| j.id.as_str())
    }

    /// Run a job now, under the same at-most-one rule as scheduled triggers.
    pub async fn run_job(&self, id: &str) -> JobOutcome {
        match self.jobs.iter().find(|j| j.id == id) {
            Some(job) => self.dispatch(job).await,
            None => JobOutcome::NotFound,
        }
    }

    async fn dispatch(&self, job: &Arc<JobDescriptor>) -> JobOutcome {
        if job.single_instance
            && job
                .running
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            warn!(job = %job.id, "trigger dropped, job still running");
            counter!("pipeline_job_skipped_total", "job" => job.id.clone()).increment(1);
            return JobOutcome::Skipped;
        }
        let guard = job.single_instance.then(|| RunningGuard(job.clone()));

        let started = self.clock.now();
        *job.last_run.lock().unwrap_or_else(PoisonError::into_inner) = Some(started);
        debug!(job = %job.id, "job started");

        // Everything after the flag is claimed lives on a task of its own, so
        // the run is counted even when the caller stops waiting for it.
        let action = job.action.clone();
        let exec = self.exec.clone();
        let stats = self.stats.clone();
        let id = job.id.clone();
        let run = tokio::spawn(async move {
            let _guard = guard;
            let _exec = exec.lock().await;
            // nested so a panicking body surfaces as a JoinError
            let result = match tokio::spawn(async move { action.run().await }).await {
                Ok(r) => r.map_err(|e| e.to_string()),
                Err(join) => Err(format!("job task aborted: {join}")),
            };
            finish(&stats, &id, started, result)
        });
        run.await
            .unwrap_or_else(|join| JobOutcome::Failed(format!("job task aborted: {join}")))
    }

    /// One run of every eager job, in registration order.
    pub async fn run_eager(&self) {
        for job in self.jobs.iter().filter(|j| j.eager) {
            self.dispatch(job).await;
        }
    }

    /// Timer loop. Returns when `shutdown` turns true or its sender is dropped;
    /// a job in flight at that moment is finished first.
    pub async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        self.running.store(true, Ordering::Release);
        let now = self.clock.now();
        let mut queue: BTreeSet<(DateTime<Utc>, usize)> = BTreeSet::new();
        for (idx, job) in self.jobs.iter().enumerate() {
            self.schedule(&mut queue, idx, job, now);
        }
        info!(jobs = self.jobs.len(), "scheduler started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let Some(&(at, idx)) = queue.iter().next() else {
                // nothing scheduled; idle until shutdown
                let _ = shutdown.changed().await;
                break;
            };
            let wait = (at - self.clock.now()).to_std().unwrap_or_default();
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = tokio::time::sleep(wait) => {}
            }
            queue.remove(&(at, idx));
            let job = &self.jobs[idx];
            self.dispatch(job).await;
            let from = at.max(self.clock.now());
            self.schedule(&mut queue, idx, job, from);
        }

        self.running.store(false, Ordering::Release);
        info!("scheduler stopped");
    }

    fn schedule(
        &self,
        queue: &mut BTreeSet<(DateTime<Utc>, usize)>,
        idx: usize,
        job: &Arc<JobDescriptor>,
        from: DateTime<Utc>,
    ) {
        let next = job.trigger.next_after(from);
        *job.next_run.lock().unwrap_or_else(PoisonError::into_inner) = next;
        match next {
            Some(at) => {
                queue.insert((at, idx));
            }
            None => warn!(job = %job.id, "trigger has no future fire time"),
        }
    }

    /// Eager runs, then the timer loop, on a background task. The scheduler
    /// reports running from the first eager run on.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.running.store(true, Ordering::Release);
        tokio::spawn(async move {
            self.run_eager().await;
            self.run_loop(shutdown).await;
        })
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.running.load(Ordering::Acquire),
            jobs: self.jobs.iter().map(|j| j.status()).collect(),
            stats: self.stats.snapshot(),
        }
    }
}

fn finish(
    stats: &StatsTracker,
    id: &str,
    started: DateTime<Utc>,
    result: Result<(), String>,
) -> JobOutcome {
    stats.record(result.is_ok(), started);
    match result {
        Ok(()) => {
            counter!("pipeline_job_runs_total", "job" => id.to_string(), "outcome" => "success")
                .increment(1);
            info!(job = %id, "job finished");
            JobOutcome::Succeeded
        }
        Err(e) => {
            counter!("pipeline_job_runs_total", "job" => id.to_string(), "outcome" => "failure")
                .increment(1);
            warn!(job = %id, error = %e, "job failed");
            JobOutcome::Failed(e)
        }
    }
}
