// src/scheduler/stats.rs
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Process-wide job counters. Written only by the scheduler after a job
/// completes; reset only by restart.
#[derive(Debug)]
pub struct StatsTracker {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    last_run: Mutex<Option<DateTime<Utc>>>,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
}

impl StatsTracker {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            last_run: Mutex::new(None),
            started_at,
        }
    }

    pub(crate) fn record(&self, ok: bool, at: DateTime<Utc>) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if ok {
            self.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let mut last = self.last_run.lock().unwrap_or_else(PoisonError::into_inner);
        if last.map_or(true, |l| at >= l) {
            *last = Some(at);
        }
    }

    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            total_runs: self.total.load(Ordering::Relaxed),
            successful_runs: self.successful.load(Ordering::Relaxed),
            failed_runs: self.failed.load(Ordering::Relaxed),
            last_run: *self.last_run.lock().unwrap_or_else(PoisonError::into_inner),
            started_at: self.started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn counts_and_keeps_latest_run() {
        let t0 = Utc::now();
        let s = StatsTracker::new(t0);
        s.record(true, t0 + Duration::seconds(5));
        s.record(false, t0 + Duration::seconds(2));
        let snap = s.snapshot();
        assert_eq!(
            (snap.total_runs, snap.successful_runs, snap.failed_runs),
            (2, 1, 1)
        );
        assert_eq!(snap.last_run, Some(t0 + Duration::seconds(5)));
    }
}
