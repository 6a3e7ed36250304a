//! Periodic sync trigger.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::orchestrator::{SyncOptions, SyncOrchestrator};
use crate::error::Error;

/// Starts a sync run on every tick. Ticks that land while a run is still in
/// progress are skipped by the orchestrator's lock.
pub struct SyncScheduler {
    orchestrator: SyncOrchestrator,
    interval: Duration,
    options: SyncOptions,
}

impl SyncScheduler {
    pub fn new(orchestrator: SyncOrchestrator, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            options: SyncOptions::default(),
        }
    }

    #[must_use]
    pub const fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Spawn the trigger loop. The first run starts immediately.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown, mut stopped) = watch::channel(false);
        let Self {
            orchestrator,
            interval,
            options,
        } = self;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!("Sync scheduler started (every {:?})", interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let run = orchestrator.spawn_run(options);
                        tokio::spawn(async move {
                            match run.await {
                                Ok(Ok(report)) => tracing::debug!(
                                    "Scheduled sync finished (success: {})",
                                    report.success
                                ),
                                Ok(Err(Error::SyncAlreadyInProgress)) => {
                                    tracing::debug!("Skipping scheduled sync, previous run still active");
                                }
                                Ok(Err(error)) => tracing::warn!("Scheduled sync failed: {}", error),
                                Err(error) => tracing::error!("Scheduled sync task panicked: {}", error),
                            }
                        });
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Sync scheduler stopped");
        });

        SchedulerHandle { shutdown, task }
    }
}

/// Stops the scheduler loop. Runs already in flight finish on their own.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.task.await {
            tracing::warn!("Sync scheduler task ended abnormally: {}", error);
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
