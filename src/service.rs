// src/service.rs
//! Service bootstrap: builds every component once, wires them together and
//! owns their lifecycle (store connect/close, scheduler start/stop).

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::CacheLayer;
use crate::clock::{Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::orchestrator::Orchestrator;
use crate::scheduler::{jobs, Scheduler, StatsTracker};
use crate::source::{HttpLiveSource, LiveSource, OfflineSource};
use crate::store::{RecordStore, SqliteStore, UnavailableStore};

pub struct Service {
    pub config: Arc<PipelineConfig>,
    pub orchestrator: Arc<Orchestrator>,
    pub scheduler: Arc<Scheduler>,
    store: Arc<dyn RecordStore>,
    shutdown_tx: watch::Sender<bool>,
    scheduler_task: Mutex<Option<JoinHandle<()>>>,
}

impl Service {
    /// Production wiring: system clock, SQLite at `store.path`, HTTP sidecar
    /// when `live.base_url` is set. A store that cannot be opened is logged
    /// and replaced by an always-unavailable one.
    pub async fn bootstrap(config: PipelineConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let live: Arc<dyn LiveSource> = match &config.live.base_url {
            Some(url) => {
                let timeout = std::time::Duration::from_millis(config.live.request_timeout_ms);
                Arc::new(
                    HttpLiveSource::new(url, timeout)
                        .with_context(|| format!("building live source client for {url}"))?,
                )
            }
            None => {
                info!("no live source url configured; live tier is offline");
                Arc::new(OfflineSource)
            }
        };

        let store: Arc<dyn RecordStore> =
            match SqliteStore::connect(&config.store.path, clock.clone()).await {
                Ok(s) => Arc::new(s),
                Err(e) => {
                    warn!(error = ?e, path = %config.store.path, "store unavailable at startup");
                    Arc::new(UnavailableStore::new(e.to_string()))
                }
            };

        Self::from_parts(config, clock, live, store)
    }

    pub fn from_parts(
        config: PipelineConfig,
        clock: Arc<dyn Clock>,
        live: Arc<dyn LiveSource>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let cache = Arc::new(CacheLayer::new(clock.clone()));
        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            clock.clone(),
            cache,
            live,
            store.clone(),
        ));

        let stats = Arc::new(StatsTracker::new(clock.now()));
        let mut scheduler = Scheduler::new(clock, stats);
        jobs::register_default_jobs(&mut scheduler, orchestrator.clone(), &config.scheduler)
            .context("registering scheduler jobs")?;

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            orchestrator,
            scheduler: Arc::new(scheduler),
            store,
            shutdown_tx,
            scheduler_task: Mutex::new(None),
        })
    }

    /// Eager refresh then the periodic loop, unless disabled in config.
    pub fn start_scheduler(&self) {
        if !self.config.scheduler.enabled {
            info!("scheduler disabled by config");
            return;
        }
        let mut slot = self.scheduler_task.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            let handle = self.scheduler.clone().spawn(self.shutdown_tx.subscribe());
            *slot = Some(handle);
        }
    }

    /// Stop the scheduler (an in-flight job completes) and close the store.
    pub async fn shutdown(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        let task = self
            .scheduler_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.await.context("scheduler task")?;
        }
        self.store.close().await.context("closing store")?;
        info!("service stopped");
        Ok(())
    }
}
