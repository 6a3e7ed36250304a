use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use notesync_core::auth::{SessionProvider, SupabaseSession};
use notesync_core::config::RemoteConfig;
use notesync_core::db::LibSqlConflictRepository;
use notesync_core::remote::RestDataClient;
use notesync_core::state::SyncState;
use notesync_core::sync::{
    EventBus, PhaseReport, ProgressObserver, SyncEvent, SyncProgress, SyncScheduler,
};
use notesync_core::{SyncOptions, SyncOrchestrator, SyncReport};
use serde_json::json;

use crate::auth::{open_session, SessionStore};
use crate::commands::common::{
    format_sync_conflict_lines, format_sync_timestamp, open_database, stored_owner,
    sync_conflict_to_item, SyncConflictItem,
};
use crate::config::CliConfig;
use crate::error::CliError;

/// Keychain session that reports sign-in changes on `events`.
pub fn announcing_session(
    remote: &RemoteConfig,
    events: &EventBus,
) -> Result<Arc<SupabaseSession<SessionStore>>, CliError> {
    Ok(Arc::new(open_session(remote)?.with_events(events.clone())))
}

pub async fn build_orchestrator(
    config: &CliConfig,
    db_path: &Path,
) -> Result<SyncOrchestrator, CliError> {
    if !config.remote.is_configured() {
        return Err(CliError::SyncNotConfigured);
    }

    let events = EventBus::new();
    let session = announcing_session(&config.remote, &events)?;
    if !session.is_signed_in() {
        return Err(CliError::NotSignedIn);
    }

    let database = Arc::new(open_database(db_path).await?);
    let remote = Arc::new(RestDataClient::new(&config.remote, session.clone())?);
    let observer: Arc<dyn ProgressObserver> =
        Arc::new(|progress: &SyncProgress| tracing::info!("{}", progress));

    Ok(SyncOrchestrator::new(database, remote, session)
        .with_events(events)
        .with_settings(config.sync.clone())
        .with_observer(observer))
}

pub async fn run_sync(
    config: &CliConfig,
    db_path: &Path,
    options: SyncOptions,
    timeout: Option<Duration>,
    as_json: bool,
) -> Result<(), CliError> {
    let orchestrator = build_orchestrator(config, db_path).await?;
    let report = match timeout {
        Some(grace) => orchestrator.run_with_deadline(options, grace).await?,
        None => orchestrator.run(options).await?,
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report_to_json(&report))?);
    } else {
        for line in format_report_lines(&report) {
            println!("{line}");
        }
    }

    if report.success {
        Ok(())
    } else {
        Err(CliError::SyncIncomplete(report.failed_records))
    }
}

pub async fn run_watch(
    config: &CliConfig,
    db_path: &Path,
    interval: Duration,
    options: SyncOptions,
) -> Result<(), CliError> {
    let orchestrator = build_orchestrator(config, db_path).await?;
    let state = Mutex::new(SyncState::default());
    orchestrator.events().subscribe(move |event: &SyncEvent| {
        let mut current = state.lock().unwrap_or_else(PoisonError::into_inner);
        let next = current.apply(event);
        if next != *current {
            tracing::debug!("Sync state {:?} -> {:?}", *current, next);
            *current = next;
        }
        match event {
            SyncEvent::SyncFinished {
                success,
                resolved_conflicts,
            } => tracing::info!(
                "Sync finished (success: {}, conflicts: {})",
                success,
                resolved_conflicts
            ),
            SyncEvent::SyncFailed { message, offline } => {
                tracing::warn!("Sync failed (offline: {}): {}", offline, message);
            }
            _ => {}
        }
    });

    let handle = SyncScheduler::new(orchestrator, interval)
        .with_options(options)
        .start();
    println!("Syncing every {}s. Press Ctrl-C to stop.", interval.as_secs());

    tokio::signal::ctrl_c().await?;
    handle.stop().await;
    println!("Stopped");
    Ok(())
}

pub async fn run_conflicts(
    config: &CliConfig,
    db_path: &Path,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let owner = stored_owner(config)?;
    let database = open_database(db_path).await?;
    let conflicts = LibSqlConflictRepository::new(database.connection())
        .list(&owner, limit)
        .await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

fn phase_to_json(phase: &PhaseReport) -> serde_json::Value {
    json!({
        "attempted": phase.attempted,
        "succeeded": phase.succeeded,
        "failed": phase.failed,
        "deferred": phase.deferred,
        "unchanged": phase.unchanged,
        "conflicts": phase.conflicts,
        "completed": phase.completed,
    })
}

pub fn report_to_json(report: &SyncReport) -> serde_json::Value {
    json!({
        "success": report.success,
        "upload_succeeded": report.upload_succeeded(),
        "download_succeeded": report.download_succeeded(),
        "folder_upload": phase_to_json(&report.folder_upload),
        "note_upload": phase_to_json(&report.note_upload),
        "folder_download": report.folder_download.as_ref().map(phase_to_json),
        "note_download": report.note_download.as_ref().map(phase_to_json),
        "cleanup": {
            "purged_tombstones": report.cleanup.purged_tombstones,
            "kept_tombstones": report.cleanup.kept_tombstones,
            "expired_tombstones": report.cleanup.expired_tombstones,
            "merged_default_folders": report.cleanup.merged_default_folders,
            "reassigned_notes": report.cleanup.reassigned_notes,
            "detached_notes": report.cleanup.detached_notes,
        },
        "resolved_conflicts": report.resolved_conflicts,
        "failed_records": report.failed_records,
        "skipped_payloads": report.skipped_payloads,
        "last_sync_at": report.last_sync_at,
    })
}

fn phase_line(label: &str, phase: &PhaseReport) -> String {
    let mut line = format!("{label:<16} {}/{} ok", phase.succeeded, phase.attempted);
    if phase.failed > 0 {
        line.push_str(&format!(", {} failed", phase.failed));
    }
    if phase.deferred > 0 {
        line.push_str(&format!(", {} deferred", phase.deferred));
    }
    if phase.conflicts > 0 {
        line.push_str(&format!(", {} conflicts", phase.conflicts));
    }
    if !phase.completed {
        line.push_str(" (incomplete)");
    }
    line
}

pub fn format_report_lines(report: &SyncReport) -> Vec<String> {
    let mut lines = vec![
        phase_line("Folder upload", &report.folder_upload),
        phase_line("Note upload", &report.note_upload),
    ];
    if let Some(phase) = &report.folder_download {
        lines.push(phase_line("Folder download", phase));
    }
    if let Some(phase) = &report.note_download {
        lines.push(phase_line("Note download", phase));
    }
    if report.cleanup.changes() > 0 {
        lines.push(format!(
            "Cleanup          {} tombstones purged, {} expired, {} default folders merged",
            report.cleanup.purged_tombstones,
            report.cleanup.expired_tombstones,
            report.cleanup.merged_default_folders
        ));
    }
    if report.skipped_payloads > 0 {
        lines.push(format!("Skipped {} oversized payloads", report.skipped_payloads));
    }
    let status = if report.success {
        "Sync completed"
    } else {
        "Sync completed with errors"
    };
    match report.last_sync_at {
        Some(at) => lines.push(format!("{status} at {}", format_sync_timestamp(at))),
        None => lines.push(status.to_string()),
    }
    lines
}
