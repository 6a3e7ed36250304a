//! Upload, download and conflict resolution for one entity type.

use std::marker::PhantomData;
use std::sync::Arc;

use libsql::Connection;

use super::counters::SyncCounters;
use super::entity::{PayloadPolicy, SyncEntity, Transfer};
use super::progress::{ProgressCoordinator, SyncProgress};
use super::retry::NetworkRecoveryManager;
use crate::db::LibSqlConflictRepository;
use crate::error::{Error, Result};
use crate::models::{SyncStatus, UserId};
use crate::remote::{row_i64, row_str, FetchQuery, RemoteDataClient, RemoteRow};
use crate::util::unix_millis_now;

/// Outcome of reconciling one remote row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No local record existed; one was materialised
    Created,
    /// Remote was strictly newer and replaced the local record
    Resolved,
    /// Same version; only the payloads a metadata-only pass left behind
    /// were pulled in
    Refreshed,
    /// Local record is at least as new
    Unchanged,
}

/// Per-phase tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseReport {
    pub attempted: usize,
    /// Uploads accepted, downloads applied, or tombstones purged
    pub succeeded: usize,
    pub failed: usize,
    /// Uploads left pending because the remote copy is newer
    pub deferred: usize,
    pub unchanged: usize,
    pub conflicts: usize,
    /// `false` when the phase could not run at all (e.g. the fetch failed)
    pub completed: bool,
}

impl PhaseReport {
    const fn started() -> Self {
        Self {
            attempted: 0,
            succeeded: 0,
            failed: 0,
            deferred: 0,
            unchanged: 0,
            conflicts: 0,
            completed: true,
        }
    }

    pub const fn made_progress(&self) -> bool {
        self.succeeded > 0
    }

    /// Ran to completion without a single failed record.
    pub const fn is_clean(&self) -> bool {
        self.completed && self.failed == 0
    }
}

enum UploadOutcome {
    Uploaded,
    Deferred,
}

/// Errors that only sink the record they came from.
///
/// Auth failures abort the whole pass; local store failures abort the run.
pub(super) const fn is_record_level(error: &Error) -> bool {
    match error {
        Error::Remote(remote) => !remote.is_auth(),
        Error::Validation(_) => true,
        _ => false,
    }
}

/// Sync protocol for records of type `E`.
pub struct EntitySyncManager<E: SyncEntity> {
    remote: Arc<dyn RemoteDataClient>,
    recovery: NetworkRecoveryManager,
    counters: Arc<SyncCounters>,
    progress: Arc<ProgressCoordinator>,
    payloads: PayloadPolicy,
    entity: PhantomData<fn() -> E>,
}

impl<E: SyncEntity> EntitySyncManager<E> {
    pub fn new(
        remote: Arc<dyn RemoteDataClient>,
        recovery: NetworkRecoveryManager,
        counters: Arc<SyncCounters>,
        progress: Arc<ProgressCoordinator>,
        payloads: PayloadPolicy,
    ) -> Self {
        Self {
            remote,
            recovery,
            counters,
            progress,
            payloads,
            entity: PhantomData,
        }
    }

    fn table() -> &'static str {
        E::KIND.table()
    }

    fn report_progress(&self, message: String) {
        self.progress
            .report(SyncProgress::from_counters(&self.counters.snapshot(), message));
    }

    fn note_skipped_fields(&self, id: &str, skipped: &[&'static str]) {
        for field in skipped {
            self.counters.record_skipped_payload();
            tracing::warn!(
                "Skipping {} of {} {}: encoded payload exceeds {} bytes",
                field,
                E::KIND,
                id,
                self.payloads.max_bytes
            );
        }
    }

    /// Push every pending record. Returns per-record tallies; only auth and
    /// local store failures are errors.
    pub async fn upload_all(&self, conn: &Connection, owner: &UserId) -> Result<PhaseReport> {
        let mut report = PhaseReport::started();
        let pending = E::pending_local(conn, owner, &self.payloads).await?;
        if pending.is_empty() {
            tracing::debug!("No pending {}s to upload", E::KIND);
            return Ok(report);
        }

        self.counters.add_total(E::KIND, pending.len());
        tracing::info!("Uploading {} pending {}s", pending.len(), E::KIND);

        for record in pending {
            let id = record.id_string();
            if record.owner() != owner {
                tracing::warn!("Skipping {} {} owned by another user", E::KIND, id);
                continue;
            }
            report.attempted += 1;

            match self.upload_one(conn, owner, &record).await {
                Ok(UploadOutcome::Uploaded) => {
                    report.succeeded += 1;
                    self.counters.record_uploaded(E::KIND);
                }
                Ok(UploadOutcome::Deferred) => report.deferred += 1,
                Err(error) if is_record_level(&error) => {
                    tracing::warn!("Failed to upload {} {}: {}", E::KIND, id, error);
                    report.failed += 1;
                    self.counters.record_failure();
                }
                Err(error) => {
                    tracing::error!("Aborting {} upload at {}: {}", E::KIND, id, error);
                    return Err(error);
                }
            }
            self.report_progress(format!("Uploading {}s", E::KIND));
        }

        tracing::info!(
            "Uploaded {} {}s ({} failed, {} deferred)",
            report.succeeded,
            E::KIND,
            report.failed,
            report.deferred
        );
        Ok(report)
    }

    async fn upload_one(
        &self,
        conn: &Connection,
        owner: &UserId,
        record: &E,
    ) -> Result<UploadOutcome> {
        let table = Self::table();
        let id = record.id_string();
        // Local payloads older than the remote ones must not overwrite them.
        let stale = self.payloads.include && E::payload_stale_local(conn, owner, &id).await?;
        let policy = if stale {
            PayloadPolicy::metadata_only()
        } else {
            self.payloads
        };
        let Transfer {
            value: row,
            skipped_fields,
            retained_fields,
        } = record.to_remote_row(&policy);
        self.note_skipped_fields(&id, &skipped_fields);

        let existing = self.remote_version(owner, &id).await?;
        match existing {
            None if record.deleted_at().is_some() => {
                tracing::debug!("{} {} was deleted before it reached the remote", E::KIND, id);
            }
            None => {
                self.recovery
                    .with_default(&format!("insert {table} {id}"), || {
                        self.remote.insert(table, &row)
                    })
                    .await?;
            }
            Some(remote_updated_at) if remote_updated_at > record.updated_at() => {
                tracing::info!(
                    "Remote {} {} is newer ({} > {}), leaving it to the download phase",
                    E::KIND,
                    id,
                    remote_updated_at,
                    record.updated_at()
                );
                return Ok(UploadOutcome::Deferred);
            }
            Some(_) => {
                self.recovery
                    .with_default(&format!("update {table} {id}"), || {
                        self.remote.update(table, &id, owner, &row)
                    })
                    .await?;
            }
        }

        let payload_pending =
            !retained_fields.is_empty() && !stale && record.deleted_at().is_none();
        if payload_pending {
            tracing::debug!(
                "{} {} uploaded without {:?}, keeping it queued",
                E::KIND,
                id,
                retained_fields
            );
        }
        E::mark_uploaded_local(conn, owner, &id, payload_pending).await?;
        Ok(UploadOutcome::Uploaded)
    }

    /// Remote `updated_at` for `id`, `None` when the row does not exist.
    async fn remote_version(&self, owner: &UserId, id: &str) -> Result<Option<i64>> {
        let table = Self::table();
        let query = FetchQuery::owned_by(owner)
            .eq("id", id)
            .select(&["id", "updated_at"]);
        let rows = self
            .recovery
            .with_default(&format!("check {table} {id}"), || {
                self.remote.fetch(table, &query)
            })
            .await?;
        Ok(rows
            .first()
            .map(|row| row_i64(row, "updated_at").unwrap_or(i64::MIN)))
    }

    /// Pull every remote row owned by `owner` and reconcile it.
    pub async fn download_all(&self, conn: &Connection, owner: &UserId) -> Result<PhaseReport> {
        let table = Self::table();
        let mut query = FetchQuery::owned_by(owner);
        if let Some(columns) = E::remote_columns(&self.payloads) {
            query = query.select(columns);
        }

        let rows = match self
            .recovery
            .with_default(&format!("fetch {table}"), || self.remote.fetch(table, &query))
            .await
        {
            Ok(rows) => rows,
            Err(error) if error.is_auth() => return Err(error),
            Err(error) if is_record_level(&error) => {
                tracing::warn!("Failed to download {}: {}", table, error);
                return Ok(PhaseReport {
                    completed: false,
                    ..PhaseReport::default()
                });
            }
            Err(error) => return Err(error),
        };

        tracing::info!("Downloaded {} {} rows", rows.len(), E::KIND);
        let mut report = PhaseReport::started();
        for row in rows {
            if row_str(&row, "owner_id") != Some(owner.as_str()) {
                tracing::warn!("Dropping {} row that belongs to another user", E::KIND);
                continue;
            }
            report.attempted += 1;

            match self.resolve_conflict(conn, owner, &row).await {
                Ok(Resolution::Created) => {
                    report.succeeded += 1;
                    self.counters.record_downloaded(E::KIND);
                }
                Ok(Resolution::Resolved) => {
                    report.succeeded += 1;
                    report.conflicts += 1;
                    self.counters.record_downloaded(E::KIND);
                }
                Ok(Resolution::Refreshed) => {
                    report.succeeded += 1;
                    self.counters.record_downloaded(E::KIND);
                }
                Ok(Resolution::Unchanged) => report.unchanged += 1,
                Err(error) if is_record_level(&error) => {
                    tracing::warn!(
                        "Skipping {} row {}: {}",
                        E::KIND,
                        row_str(&row, "id").unwrap_or("<no id>"),
                        error
                    );
                    report.failed += 1;
                    self.counters.record_failure();
                }
                Err(error) => return Err(error),
            }
            self.report_progress(format!("Downloading {}s", E::KIND));
        }

        tracing::info!(
            "Applied {} {}s ({} conflicts, {} unchanged, {} skipped)",
            report.succeeded,
            E::KIND,
            report.conflicts,
            report.unchanged,
            report.failed
        );
        Ok(report)
    }

    /// Last-write-wins reconciliation of one remote row.
    ///
    /// The remote copy replaces the local one only when its `updated_at` is
    /// strictly newer. Remote tombstones for unknown ids are not materialised.
    /// Binary fields the row does not carry keep their local value and are
    /// flagged stale, so a later pass with payloads pulls them in.
    pub async fn resolve_conflict(
        &self,
        conn: &Connection,
        owner: &UserId,
        row: &RemoteRow,
    ) -> Result<Resolution> {
        let Transfer {
            value: mut incoming,
            skipped_fields,
            retained_fields,
        } = E::from_remote_row(row, &self.payloads)?;
        if incoming.owner() != owner {
            return Err(Error::Validation(format!(
                "{} {} belongs to another user",
                E::KIND,
                incoming.id_string()
            )));
        }

        let id = incoming.id_string();
        self.note_skipped_fields(&id, &skipped_fields);

        let Some(local) = E::find_local(conn, owner, &id).await? else {
            if incoming.deleted_at().is_some() {
                tracing::debug!("Ignoring remote tombstone for unknown {} {}", E::KIND, id);
                return Ok(Resolution::Unchanged);
            }
            E::save_local(conn, &incoming).await?;
            E::mark_downloaded_local(conn, owner, &id, !retained_fields.is_empty()).await?;
            return Ok(Resolution::Created);
        };

        if incoming.updated_at() < local.updated_at() {
            return Ok(Resolution::Unchanged);
        }
        if incoming.updated_at() == local.updated_at() {
            let refresh = retained_fields.is_empty()
                && incoming.deleted_at().is_none()
                && local.sync_status() == SyncStatus::Synced
                && E::payload_stale_local(conn, owner, &id).await?;
            if !refresh {
                return Ok(Resolution::Unchanged);
            }
            tracing::debug!("Pulling held-back payloads of {} {}", E::KIND, id);
            incoming.set_sync_status(SyncStatus::Synced);
            E::save_local(conn, &incoming).await?;
            E::mark_downloaded_local(conn, owner, &id, false).await?;
            return Ok(Resolution::Refreshed);
        }

        if local.sync_status() != SyncStatus::Synced {
            tracing::info!(
                "Remote {} {} overwrites unsynced local edits ({} > {})",
                E::KIND,
                id,
                incoming.updated_at(),
                local.updated_at()
            );
            LibSqlConflictRepository::new(conn)
                .record(
                    owner,
                    Self::table(),
                    &id,
                    local.updated_at(),
                    incoming.updated_at(),
                    unix_millis_now(),
                )
                .await?;
        }

        incoming.absorb_local(&local, &retained_fields);
        incoming.set_sync_status(SyncStatus::Synced);
        E::save_local(conn, &incoming).await?;
        E::mark_downloaded_local(conn, owner, &id, !retained_fields.is_empty()).await?;
        self.counters.record_conflict();
        Ok(Resolution::Resolved)
    }

    /// Delete confirmed tombstones remotely, then purge them locally.
    ///
    /// A tombstone whose remote delete fails stays for the next run.
    pub async fn cleanup_deleted(&self, conn: &Connection, owner: &UserId) -> Result<PhaseReport> {
        let mut report = PhaseReport::started();
        let tombstones = E::confirmed_tombstones(conn, owner).await?;
        for tombstone in tombstones {
            let id = tombstone.id_string();
            report.attempted += 1;
            match self.delete_remote(owner, &id).await {
                Ok(()) => {
                    E::purge_local(conn, owner, &id).await?;
                    report.succeeded += 1;
                }
                Err(error) if is_record_level(&error) => {
                    tracing::warn!("Keeping tombstone for {} {}: {}", E::KIND, id, error);
                    report.failed += 1;
                }
                Err(error) => return Err(error),
            }
        }
        if report.attempted > 0 {
            tracing::info!(
                "Purged {} {} tombstones ({} kept)",
                report.succeeded,
                E::KIND,
                report.failed
            );
        }
        Ok(report)
    }

    /// Idempotent remote delete guarded by an existence check.
    pub async fn delete_remote(&self, owner: &UserId, id: &str) -> Result<()> {
        let table = Self::table();
        let exists = self
            .recovery
            .with_default(&format!("exists {table} {id}"), || {
                self.remote.exists(table, id, owner)
            })
            .await?;
        if !exists {
            return Ok(());
        }
        self.recovery
            .with_default(&format!("delete {table} {id}"), || {
                self.remote.delete(table, id, owner)
            })
            .await
    }

    /// Drop tombstones deleted more than `retention_millis` ago.
    pub async fn purge_expired(
        &self,
        conn: &Connection,
        owner: &UserId,
        retention_millis: i64,
    ) -> Result<u64> {
        let cutoff = unix_millis_now().saturating_sub(retention_millis);
        let purged = E::purge_expired(conn, owner, cutoff).await?;
        if purged > 0 {
            tracing::info!("Purged {} expired {} tombstones", purged, E::KIND);
        }
        Ok(purged)
    }
}
