//! One sync run from lock acquisition to lock release.
//!
//! A run validates the session, opens a transaction, uploads folders then
//! notes, downloads folders then notes, cleans up, and commits. Any
//! transaction-fatal error rolls the whole run back. The lock guard is held
//! for the lifetime of the run future, so it is released on every exit path
//! including cancellation.

use std::sync::Arc;
use std::time::Duration;

use libsql::Connection;
use tokio::task::JoinHandle;

use super::cleanup::{Cleanup, CleanupReport};
use super::counters::SyncCounters;
use super::entity::{EntityKind, PayloadPolicy};
use super::events::{EventBus, SyncEvent};
use super::lock::SyncLock;
use super::manager::{EntitySyncManager, PhaseReport};
use super::progress::{ProgressCoordinator, ProgressObserver, SyncProgress};
use super::retry::NetworkRecoveryManager;
use super::transaction::{SyncTransaction, TransactionManager};
use crate::auth::SessionProvider;
use crate::config::SyncSettings;
use crate::db::{Database, LibSqlSettingsRepository, SettingsRepository};
use crate::error::{Error, Result};
use crate::models::{Folder, Note, UserId};
use crate::remote::RemoteDataClient;
use crate::util::unix_millis_now;

/// Per-run switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Transfer note payloads; `false` syncs metadata only
    pub include_binary_data: bool,
    /// Run the download phase after uploading
    pub two_way: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            include_binary_data: true,
            two_way: true,
        }
    }
}

/// Outcome of a completed (committed) run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub folder_upload: PhaseReport,
    pub note_upload: PhaseReport,
    /// `None` for upload-only runs
    pub folder_download: Option<PhaseReport>,
    pub note_download: Option<PhaseReport>,
    pub cleanup: CleanupReport,
    pub resolved_conflicts: usize,
    pub failed_records: usize,
    pub skipped_payloads: usize,
    /// Timestamp persisted as the last successful sync, if it could be written
    pub last_sync_at: Option<i64>,
    /// Any phase made forward progress, or nothing failed anywhere
    pub success: bool,
}

impl SyncReport {
    fn upload_mut(&mut self, kind: EntityKind) -> &mut PhaseReport {
        match kind {
            EntityKind::Folder => &mut self.folder_upload,
            EntityKind::Note => &mut self.note_upload,
        }
    }

    fn download_mut(&mut self, kind: EntityKind) -> &mut Option<PhaseReport> {
        match kind {
            EntityKind::Folder => &mut self.folder_download,
            EntityKind::Note => &mut self.note_download,
        }
    }

    fn phases(&self) -> impl Iterator<Item = &PhaseReport> {
        [Some(&self.folder_upload), Some(&self.note_upload)]
            .into_iter()
            .chain([self.folder_download.as_ref(), self.note_download.as_ref()])
            .flatten()
    }

    fn evaluate(&mut self) {
        let progressed = self.phases().any(PhaseReport::made_progress);
        let clean = self.phases().all(PhaseReport::is_clean);
        self.success = progressed || clean;
    }

    /// Both upload phases ran without a failed record.
    pub fn upload_succeeded(&self) -> bool {
        self.folder_upload.is_clean() && self.note_upload.is_clean()
    }

    /// Both download phases ran without a failed record. Vacuously true for
    /// upload-only runs.
    pub fn download_succeeded(&self) -> bool {
        [self.folder_download, self.note_download]
            .iter()
            .flatten()
            .all(PhaseReport::is_clean)
    }
}

/// Entry point of the sync engine.
///
/// Cloning is cheap and clones share the same lock, event bus and backend.
#[derive(Clone)]
pub struct SyncOrchestrator {
    database: Arc<Database>,
    remote: Arc<dyn RemoteDataClient>,
    session: Arc<dyn SessionProvider>,
    lock: SyncLock,
    events: EventBus,
    settings: Arc<SyncSettings>,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl SyncOrchestrator {
    pub fn new(
        database: Arc<Database>,
        remote: Arc<dyn RemoteDataClient>,
        session: Arc<dyn SessionProvider>,
    ) -> Self {
        Self {
            database,
            remote,
            session,
            lock: SyncLock::new(),
            events: EventBus::new(),
            settings: Arc::new(SyncSettings::default()),
            observer: None,
        }
    }

    /// Share a lock with other orchestrators over the same store.
    #[must_use]
    pub fn with_lock(mut self, lock: SyncLock) -> Self {
        self.lock = lock;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: SyncSettings) -> Self {
        self.settings = Arc::new(settings);
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub const fn lock(&self) -> &SyncLock {
        &self.lock
    }

    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Run a sync pass on a background task.
    pub fn spawn_run(&self, options: SyncOptions) -> JoinHandle<Result<SyncReport>> {
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.run(options).await })
    }

    /// Run with an execution budget. On expiry the run is abandoned: its
    /// uncommitted writes are discarded and the lock is released.
    pub async fn run_with_deadline(
        &self,
        options: SyncOptions,
        grace: Duration,
    ) -> Result<SyncReport> {
        if let Ok(result) = tokio::time::timeout(grace, self.run(options)).await {
            return result;
        }
        tracing::warn!("Sync did not finish within {:?}, abandoning the run", grace);
        let error = Error::DeadlineExceeded(grace);
        self.events.publish(&SyncEvent::SyncFailed {
            message: error.to_string(),
            offline: false,
        });
        Err(error)
    }

    /// Run one sync pass.
    ///
    /// Fails fast with [`Error::SyncAlreadyInProgress`] when another run
    /// holds the lock.
    pub async fn run(&self, options: SyncOptions) -> Result<SyncReport> {
        let _guard = self.lock.try_acquire().inspect_err(|_| {
            tracing::debug!("Sync requested while another run is in progress");
        })?;

        self.events.publish(&SyncEvent::SyncStarted {
            two_way: options.two_way,
        });
        let result = self.run_locked(options).await;
        match &result {
            Ok(report) => self.events.publish(&SyncEvent::SyncFinished {
                success: report.success,
                resolved_conflicts: report.resolved_conflicts,
            }),
            Err(error) => {
                tracing::error!("Sync failed: {}", error);
                self.events.publish(&SyncEvent::SyncFailed {
                    message: error.to_string(),
                    offline: error.is_retryable(),
                });
            }
        }
        result
    }

    async fn run_locked(&self, options: SyncOptions) -> Result<SyncReport> {
        let recovery = NetworkRecoveryManager::new(self.settings.retry);
        recovery
            .with_aggressive("validate session", || {
                self.session.validate_and_refresh_if_needed()
            })
            .await?;
        let owner = self
            .session
            .current_user_id()
            .ok_or_else(|| Error::Auth("No signed-in user".into()))?;

        tracing::info!(
            "Starting {} sync for {}{}",
            if options.two_way { "two-way" } else { "upload-only" },
            owner,
            if options.include_binary_data { "" } else { " (metadata only)" }
        );

        let counters = Arc::new(SyncCounters::new());
        let progress = Arc::new(ProgressCoordinator::new(
            self.observer.clone(),
            self.settings.progress_interval,
        ));
        let payloads = if options.include_binary_data {
            PayloadPolicy {
                include: true,
                max_bytes: self.settings.max_payload_bytes,
            }
        } else {
            PayloadPolicy::metadata_only()
        };
        let folders = EntitySyncManager::<Folder>::new(
            Arc::clone(&self.remote),
            recovery,
            Arc::clone(&counters),
            Arc::clone(&progress),
            payloads,
        );
        let notes = EntitySyncManager::<Note>::new(
            Arc::clone(&self.remote),
            recovery,
            Arc::clone(&counters),
            Arc::clone(&progress),
            payloads,
        );

        let mut tx = TransactionManager::new(&self.database)
            .begin_transaction()
            .await?;
        let phases = self
            .run_phases(&mut tx, &owner, options, &folders, &notes)
            .await;

        let committed = match phases {
            Ok(report) => self.commit_for(tx, &owner).await.map(|()| report),
            Err(error) => {
                abandon(tx).await;
                Err(error)
            }
        };
        let mut report = match committed {
            Ok(report) => report,
            Err(error) => {
                progress.finish(SyncProgress::from_counters(
                    &counters.snapshot(),
                    "Sync failed",
                ));
                return Err(error);
            }
        };

        let snapshot = counters.snapshot();
        report.resolved_conflicts = snapshot.resolved_conflicts;
        report.failed_records = snapshot.failed_records;
        report.skipped_payloads = snapshot.skipped_payloads;
        report.evaluate();

        let now = unix_millis_now();
        match LibSqlSettingsRepository::new(self.database.connection())
            .set_last_sync_at(&owner, now)
            .await
        {
            Ok(()) => report.last_sync_at = Some(now),
            Err(error) => tracing::warn!("Failed to record last sync time: {}", error),
        }

        progress.finish(SyncProgress::from_counters(&snapshot, "Sync complete"));
        tracing::info!(
            "Sync finished (success: {}, {} conflicts resolved, {} records failed)",
            report.success,
            report.resolved_conflicts,
            report.failed_records
        );
        Ok(report)
    }

    /// Commit unless the signed-in user changed while the run was in flight.
    async fn commit_for(&self, tx: SyncTransaction, owner: &UserId) -> Result<()> {
        if self.session.current_user_id().as_ref() != Some(owner) {
            tracing::warn!("Signed-in user changed during sync, discarding the run");
            abandon(tx).await;
            return Err(Error::Auth("Signed-in user changed during sync".into()));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn run_phases(
        &self,
        tx: &mut SyncTransaction,
        owner: &UserId,
        options: SyncOptions,
        folders: &EntitySyncManager<Folder>,
        notes: &EntitySyncManager<Note>,
    ) -> Result<SyncReport> {
        let conn: Connection = tx.connection().clone();
        let mut report = SyncReport::default();

        let order = EntityKind::sync_order();

        for &kind in &order {
            let phase = match kind {
                EntityKind::Folder => folders.upload_all(&conn, owner).await?,
                EntityKind::Note => notes.upload_all(&conn, owner).await?,
            };
            record_phase(tx, &format!("upload {kind}s"), &phase);
            *report.upload_mut(kind) = phase;
        }

        if options.two_way {
            for &kind in &order {
                let phase = match kind {
                    EntityKind::Folder => folders.download_all(&conn, owner).await?,
                    EntityKind::Note => notes.download_all(&conn, owner).await?,
                };
                record_phase(tx, &format!("download {kind}s"), &phase);
                *report.download_mut(kind) = Some(phase);
            }
        }

        report.cleanup = Cleanup {
            folders,
            notes,
            default_folder_name: &self.settings.default_folder_name,
            retention_millis: self.settings.tombstone_retention_millis(),
        }
        .run(&conn, owner)
        .await?;
        tx.mark_changes(report.cleanup.changes());
        tx.add_checkpoint("cleanup");

        Ok(report)
    }
}

fn record_phase(tx: &mut SyncTransaction, name: &str, phase: &PhaseReport) {
    tx.mark_changes(phase.succeeded);
    tx.add_checkpoint(name);
}

async fn abandon(tx: SyncTransaction) {
    if let Err(error) = tx.rollback().await {
        // Dropping the connection discards the writes anyway.
        tracing::warn!("Explicit rollback failed: {}", error);
    }
}
