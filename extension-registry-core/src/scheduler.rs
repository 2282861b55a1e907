//! Timer-driven background jobs.
//!
//! Every job runs on its own tokio task with its own interval. Jobs do not coordinate with each
//! other; the store's compare-and-swap writes and the pending-flag rules keep their interleavings
//! safe. A shared `watch` channel stops them all.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::backup::backup_registry;
use crate::config::ScheduleConfig;
use crate::context::RegistryContext;
use crate::popularity::refresh_popularity;
use crate::stars::StarsCollector;
use crate::synchronise::synchronise;

/// One unit of periodic work. Failures are logged by the job itself.
#[async_trait]
pub trait PeriodicJob: Send + 'static {
    fn name(&self) -> &'static str;
    async fn tick(&mut self);
}

pub struct SyncJob(pub RegistryContext);
pub struct PopularityJob(pub RegistryContext);
pub struct BackupJob(pub RegistryContext);

#[async_trait]
impl PeriodicJob for SyncJob {
    fn name(&self) -> &'static str {
        "sync"
    }

    async fn tick(&mut self) {
        if let Err(e) = synchronise(&self.0).await {
            error!(error = %e, "[SYNC][ERROR] Scheduled sync failed");
        }
    }
}

#[async_trait]
impl PeriodicJob for PopularityJob {
    fn name(&self) -> &'static str {
        "popularity"
    }

    async fn tick(&mut self) {
        if let Err(e) = refresh_popularity(&self.0).await {
            error!(error = %e, "[POPULARITY][ERROR] Scheduled refresh failed");
        }
    }
}

#[async_trait]
impl PeriodicJob for StarsCollector {
    fn name(&self) -> &'static str {
        "stars"
    }

    async fn tick(&mut self) {
        if let Err(e) = self.run().await {
            error!(error = %e, "[STARS][ERROR] Scheduled collection failed");
        }
    }
}

#[async_trait]
impl PeriodicJob for BackupJob {
    fn name(&self) -> &'static str {
        "backup"
    }

    async fn tick(&mut self) {
        if let Err(e) = backup_registry(&self.0).await {
            error!(error = %e, "[BACKUP][ERROR] Scheduled backup failed");
        }
    }
}

/// Running background jobs.
pub struct Workers {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signals every job to stop and waits for in-flight ticks to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = ?e, "Worker task failed");
            }
        }
        info!("All workers stopped");
    }
}

/// Starts the synchroniser, popularity, stars and backup jobs.
pub fn spawn_workers(ctx: RegistryContext, schedule: &ScheduleConfig) -> Workers {
    let (shutdown, receiver) = watch::channel(false);
    let handles = vec![
        spawn_job(SyncJob(ctx.clone()), schedule.sync_interval, receiver.clone()),
        spawn_job(PopularityJob(ctx.clone()), schedule.popularity_interval, receiver.clone()),
        spawn_job(StarsCollector::new(ctx.clone()), schedule.stars_interval, receiver.clone()),
        spawn_job(BackupJob(ctx), schedule.backup_interval, receiver),
    ];
    info!(jobs = handles.len(), ?schedule, "Background workers started");
    Workers { shutdown, handles }
}

pub fn spawn_job<J: PeriodicJob>(
    job: J,
    period: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_periodic(job, period, shutdown))
}

async fn run_periodic<J: PeriodicJob>(
    mut job: J,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; jobs first run one period after start.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tracing::debug!(job = job.name(), "Running scheduled job");
                job.tick().await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(job = job.name(), "Stopping scheduled job");
                    break;
                }
            }
        }
    }
}
