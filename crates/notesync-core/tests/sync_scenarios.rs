//! End-to-end sync runs against a file-backed store and the in-memory backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use notesync_core::auth::{SessionProvider, StaticSession};
use notesync_core::config::{RetryConfig, RetryProfiles, SyncSettings};
use notesync_core::db::{
    Database, FolderRepository, LibSqlConflictRepository, LibSqlFolderRepository,
    LibSqlNoteRepository, NoteRepository,
};
use notesync_core::models::ProcessingStatus;
use notesync_core::remote::{FailureRule, InMemoryRemote, RemoteDataClient, RemoteOp, RemoteRow};
use notesync_core::sync::{PayloadPolicy, SyncEntity, SyncProgress};
use notesync_core::{
    Error, Folder, Note, RemoteError, SyncOptions, SyncOrchestrator, SyncStatus, UserId,
};

const OWNER: &str = "user-1";

struct Env {
    _dir: tempfile::TempDir,
    database: Arc<Database>,
    remote: Arc<InMemoryRemote>,
    session: Arc<StaticSession>,
}

impl Env {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let database = Database::open(dir.path().join("notesync.db")).await.unwrap();
        Self {
            _dir: dir,
            database: Arc::new(database),
            remote: Arc::new(InMemoryRemote::new()),
            session: Arc::new(StaticSession::new(OWNER)),
        }
    }

    fn owner(&self) -> UserId {
        UserId::new(OWNER)
    }

    fn orchestrator(&self) -> SyncOrchestrator {
        SyncOrchestrator::new(
            Arc::clone(&self.database),
            Arc::clone(&self.remote) as Arc<dyn RemoteDataClient>,
            Arc::clone(&self.session) as Arc<dyn SessionProvider>,
        )
        .with_settings(quick_settings())
    }

    fn folders(&self) -> LibSqlFolderRepository<'_> {
        LibSqlFolderRepository::new(self.database.connection())
    }

    fn notes(&self) -> LibSqlNoteRepository<'_> {
        LibSqlNoteRepository::new(self.database.connection())
    }

    /// Every folder and note of `owner`, tombstones included.
    async fn snapshot(&self, owner: &UserId) -> (Vec<Folder>, Vec<Note>) {
        let conn = self.database.connection();
        let mut rows = conn
            .query(
                "SELECT id FROM folders WHERE owner_id = ? ORDER BY id",
                libsql::params![owner.as_str()],
            )
            .await
            .unwrap();
        let mut folders = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            let id: String = row.get(0).unwrap();
            folders.push(self.folders().find_any(owner, &id).await.unwrap().unwrap());
        }
        let mut rows = conn
            .query(
                "SELECT id FROM notes WHERE owner_id = ? ORDER BY id",
                libsql::params![owner.as_str()],
            )
            .await
            .unwrap();
        let mut notes = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            let id: String = row.get(0).unwrap();
            notes.push(self.notes().find_any(owner, &id).await.unwrap().unwrap());
        }
        (folders, notes)
    }
}

fn quick_settings() -> SyncSettings {
    let quick = RetryConfig {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        multiplier: 2.0,
    };
    SyncSettings {
        progress_interval: Duration::ZERO,
        retry: RetryProfiles {
            default: quick,
            aggressive: quick,
            rate_limited: quick,
        },
        ..SyncSettings::default()
    }
}

fn remote_row<E: SyncEntity>(record: &E) -> RemoteRow {
    let full = PayloadPolicy {
        include: true,
        max_bytes: 1024 * 1024,
    };
    record.to_remote_row(&full).value
}

#[tokio::test(flavor = "multi_thread")]
async fn fresh_install_downloads_everything() {
    let env = Env::new().await;
    let owner = env.owner();
    let folders: Vec<Folder> = ["Work", "Home", "Ideas"]
        .into_iter()
        .map(|name| Folder::new(owner.clone(), name))
        .collect();
    for folder in &folders {
        env.remote.seed("folders", remote_row(folder));
    }
    for index in 0..5 {
        let note = Note::new(owner.clone(), format!("Note {index}"))
            .in_folder(folders[index % folders.len()].id);
        env.remote.seed("notes", remote_row(&note));
    }
    // Rows of another account stay out of this store.
    env.remote.seed(
        "folders",
        remote_row(&Folder::new(UserId::new("user-2"), "Not mine")),
    );

    let report = env.orchestrator().run(SyncOptions::default()).await.unwrap();

    assert!(report.success);
    let local_folders = env.folders().list(&owner).await.unwrap();
    let local_notes = env.notes().list(&owner, 100, 0).await.unwrap();
    assert_eq!(local_folders.len(), 3);
    assert_eq!(local_notes.len(), 5);
    assert!(local_folders
        .iter()
        .all(|folder| folder.sync_status == SyncStatus::Synced));
    assert!(local_notes
        .iter()
        .all(|note| note.sync_status == SyncStatus::Synced));
    assert_eq!(report.resolved_conflicts, 0);
    assert_eq!(
        report.note_download.map(|phase| phase.succeeded),
        Some(5)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_note_is_uploaded_with_synced_status() {
    let env = Env::new().await;
    let owner = env.owner();
    let note = env.notes().create(&owner, "Draft", None).await.unwrap();
    assert_eq!(note.sync_status, SyncStatus::Pending);

    let report = env
        .orchestrator()
        .run(SyncOptions {
            include_binary_data: true,
            two_way: false,
        })
        .await
        .unwrap();

    assert!(report.success);
    assert!(report.upload_succeeded());
    let remote = env.remote.row("notes", &note.id.as_str()).unwrap();
    assert_eq!(remote["sync_status"], json!("synced"));
    assert_eq!(remote["owner_id"], json!(OWNER));
    let local = env.notes().get(&owner, &note.id).await.unwrap().unwrap();
    assert_eq!(local.sync_status, SyncStatus::Synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn newer_remote_edit_wins_and_counts_one_conflict() {
    let env = Env::new().await;
    let owner = env.owner();
    let mut local = Note::new(owner.clone(), "Written at 10:00");
    local.updated_at = 1_700_000_000_000;
    local.sync_status = SyncStatus::Pending;
    env.notes().save(&local).await.unwrap();

    let mut remote = remote_row(&local);
    remote.insert("title".into(), json!("Written at 10:05"));
    remote.insert("updated_at".into(), json!(local.updated_at + 5 * 60 * 1000));
    env.remote.seed("notes", remote);

    let report = env.orchestrator().run(SyncOptions::default()).await.unwrap();

    assert_eq!(report.resolved_conflicts, 1);
    assert_eq!(report.note_upload.deferred, 1);
    let stored = env.notes().get(&owner, &local.id).await.unwrap().unwrap();
    assert_eq!(stored.title, "Written at 10:05");
    assert_eq!(stored.updated_at, local.updated_at + 5 * 60 * 1000);
    assert_eq!(stored.sync_status, SyncStatus::Synced);
    assert_eq!(
        env.remote.row("notes", &local.id.as_str()).unwrap()["title"],
        json!("Written at 10:05")
    );

    let conflicts = LibSqlConflictRepository::new(env.database.connection())
        .list(&owner, 10)
        .await
        .unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].record_id, local.id.as_str());
}

#[tokio::test(flavor = "multi_thread")]
async fn older_remote_copy_never_overwrites_local() {
    let env = Env::new().await;
    let owner = env.owner();
    let mut local = Note::new(owner.clone(), "Local is newer");
    local.sync_status = SyncStatus::Synced;
    env.notes().save(&local).await.unwrap();

    let mut remote = remote_row(&local);
    remote.insert("title".into(), json!("Stale"));
    remote.insert("updated_at".into(), json!(local.updated_at - 1));
    env.remote.seed("notes", remote);

    let report = env.orchestrator().run(SyncOptions::default()).await.unwrap();

    assert_eq!(report.resolved_conflicts, 0);
    let stored = env.notes().get(&owner, &local.id).await.unwrap().unwrap();
    assert_eq!(stored, local);
}

#[tokio::test(flavor = "multi_thread")]
async fn second_run_is_rejected_while_first_is_uploading() {
    let env = Env::new().await;
    let owner = env.owner();
    env.folders().create(&owner, "Work").await.unwrap();
    env.notes().create(&owner, "Slow upload", None).await.unwrap();
    env.remote.set_latency(Some(Duration::from_millis(100)));
    let orchestrator = env.orchestrator();

    let first = orchestrator.spawn_run(SyncOptions::default());
    // Validation is the last step before the (slow) upload phase.
    while env.session.validation_count() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(orchestrator.lock().is_held());

    let second = orchestrator.run(SyncOptions::default()).await;
    assert!(matches!(second, Err(Error::SyncAlreadyInProgress)));
    assert_eq!(env.session.validation_count(), 1);

    let report = first.await.unwrap().unwrap();
    assert!(report.success);
    assert_eq!(report.folder_upload.succeeded, 1);
    assert_eq!(report.note_upload.succeeded, 1);
    assert_eq!(env.session.validation_count(), 1);
    assert!(!orchestrator.lock().is_held());
}

#[tokio::test(flavor = "multi_thread")]
async fn orchestrators_sharing_a_lock_exclude_each_other() {
    let env = Env::new().await;
    env.folders().create(&env.owner(), "Work").await.unwrap();
    env.remote.set_latency(Some(Duration::from_millis(100)));
    let first = env.orchestrator();
    let second = env.orchestrator().with_lock(first.lock().clone());

    let running = first.spawn_run(SyncOptions::default());
    while !first.lock().is_held() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert!(matches!(
        second.run(SyncOptions::default()).await,
        Err(Error::SyncAlreadyInProgress)
    ));
    running.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn failure_after_progress_rolls_back_every_local_write() {
    let env = Env::new().await;
    let owner = env.owner();
    env.folders().create(&owner, "Pending folder").await.unwrap();
    let mut settled = Note::new(owner.clone(), "Already synced");
    settled.sync_status = SyncStatus::Synced;
    env.notes().save(&settled).await.unwrap();
    env.remote.seed("notes", remote_row(&settled));
    let incoming = Folder::new(owner.clone(), "From another device");
    env.remote.seed("folders", remote_row(&incoming));
    env.remote.inject(
        FailureRule::always(RemoteOp::Fetch, RemoteError::http(401, "JWT expired"))
            .on_table("notes"),
    );

    let before = env.snapshot(&owner).await;
    let error = env
        .orchestrator()
        .run(SyncOptions::default())
        .await
        .unwrap_err();

    assert!(error.is_auth());
    // The folder upload and folder download both happened before the failure.
    assert_eq!(env.remote.rows("folders").len(), 2);
    assert_eq!(env.snapshot(&owner).await, before);
}

#[tokio::test(flavor = "multi_thread")]
async fn nothing_crosses_account_boundaries() {
    let env = Env::new().await;
    let owner = env.owner();
    let stranger = UserId::new("user-2");

    let mut foreign_local = Folder::new(stranger.clone(), "Left behind by user-2");
    foreign_local.sync_status = SyncStatus::Pending;
    env.folders().save(&foreign_local).await.unwrap();
    env.remote
        .seed("notes", remote_row(&Note::new(stranger.clone(), "Remote of user-2")));
    env.notes().create(&owner, "Mine", None).await.unwrap();

    env.orchestrator().run(SyncOptions::default()).await.unwrap();

    assert!(env.remote.row("folders", &foreign_local.id.as_str()).is_none());
    for call in env.remote.calls() {
        if let Some(caller) = call.owner {
            assert_eq!(caller, OWNER);
        }
    }
    let (_, stranger_notes) = env.snapshot(&stranger).await;
    assert!(stranger_notes.is_empty());
    let (_, my_notes) = env.snapshot(&owner).await;
    assert!(my_notes.iter().all(|note| note.owner_id == owner));
    let (stranger_folders, _) = env.snapshot(&stranger).await;
    assert_eq!(stranger_folders[0].sync_status, SyncStatus::Pending);
}

#[tokio::test(flavor = "multi_thread")]
async fn account_switch_mid_run_discards_the_run() {
    let env = Env::new().await;
    let owner = env.owner();
    env.folders().create(&owner, "Work").await.unwrap();
    let session = Arc::clone(&env.session);
    let switched = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&switched);
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&messages);
    let observer = Arc::new(move |progress: &SyncProgress| {
        sink.lock().unwrap().push(progress.status_message.clone());
        let mut switched = flag.lock().unwrap();
        if !*switched {
            *switched = true;
            session.set_user(Some(UserId::new("user-2")));
        }
    });

    let before = env.snapshot(&owner).await;
    let error = env
        .orchestrator()
        .with_observer(observer)
        .run(SyncOptions::default())
        .await
        .unwrap_err();

    assert!(error.is_auth());
    assert!(*switched.lock().unwrap());
    assert_eq!(env.snapshot(&owner).await, before);
    assert_eq!(
        messages.lock().unwrap().last().map(String::as_str),
        Some("Sync failed")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn deleted_note_converges_once_remote_delete_succeeds() {
    let env = Env::new().await;
    let owner = env.owner();
    let note = env.notes().create(&owner, "Short-lived", None).await.unwrap();
    env.orchestrator().run(SyncOptions::default()).await.unwrap();
    assert!(env.remote.row("notes", &note.id.as_str()).is_some());

    env.notes().delete(&owner, &note.id).await.unwrap();
    assert!(env.notes().get(&owner, &note.id).await.unwrap().is_none());
    env.remote.inject(
        FailureRule::always(RemoteOp::Delete, RemoteError::http(503, "maintenance"))
            .on_id(note.id.as_str()),
    );

    let report = env.orchestrator().run(SyncOptions::default()).await.unwrap();
    assert_eq!(report.cleanup.kept_tombstones, 1);
    let tombstone = env
        .notes()
        .find_any(&owner, &note.id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert!(tombstone.deleted_at.is_some());
    assert_eq!(tombstone.sync_status, SyncStatus::Synced);

    env.remote.clear_failures();
    let report = env.orchestrator().run(SyncOptions::default()).await.unwrap();

    assert_eq!(report.cleanup.purged_tombstones, 1);
    assert!(env
        .notes()
        .find_any(&owner, &note.id.as_str())
        .await
        .unwrap()
        .is_none());
    assert!(env.remote.row("notes", &note.id.as_str()).is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_payloads_degrade_to_metadata() {
    let env = Env::new().await;
    let owner = env.owner();
    let mut note = Note::new(owner.clone(), "Voice memo");
    note.original_content = Some(vec![7_u8; 4096]);
    note.ai_content = Some(b"summary".to_vec());
    env.notes().save(&note).await.unwrap();

    let report = env
        .orchestrator()
        .with_settings(SyncSettings {
            max_payload_bytes: 1024,
            ..quick_settings()
        })
        .run(SyncOptions::default())
        .await
        .unwrap();

    assert_eq!(report.skipped_payloads, 1);
    assert_eq!(report.note_upload.succeeded, 1);
    let remote = env.remote.row("notes", &note.id.as_str()).unwrap();
    assert!(!remote.contains_key("original_content"));
    assert!(remote.contains_key("ai_content"));
    let local = env.notes().get(&owner, &note.id).await.unwrap().unwrap();
    assert_eq!(local.original_content, note.original_content);
}

#[tokio::test(flavor = "multi_thread")]
async fn payloads_held_back_by_a_metadata_run_upload_on_the_next_full_run() {
    let env = Env::new().await;
    let owner = env.owner();
    let note = env.notes().create(&owner, "Voice memo", None).await.unwrap();
    env.notes()
        .set_content(
            &owner,
            &note.id,
            Some(vec![1, 2, 3]),
            Some(b"summary".to_vec()),
            ProcessingStatus::Completed,
        )
        .await
        .unwrap();
    let metadata_only = SyncOptions {
        include_binary_data: false,
        two_way: true,
    };

    let report = env.orchestrator().run(metadata_only).await.unwrap();
    assert_eq!(report.note_upload.succeeded, 1);
    let remote = env.remote.row("notes", &note.id.as_str()).unwrap();
    assert!(!remote.contains_key("original_content"));
    let local = env.notes().get(&owner, &note.id).await.unwrap().unwrap();
    assert_eq!(local.sync_status, SyncStatus::Synced);

    let report = env.orchestrator().run(SyncOptions::default()).await.unwrap();
    assert_eq!(report.note_upload.succeeded, 1);
    let remote = env.remote.row("notes", &note.id.as_str()).unwrap();
    assert_eq!(remote["original_content"], "AQID");
    assert_eq!(remote["ai_content"], "c3VtbWFyeQ==");
    let local = env.notes().get(&owner, &note.id).await.unwrap().unwrap();
    assert_eq!(local.original_content, Some(vec![1, 2, 3]));

    // Nothing is left to send.
    let report = env.orchestrator().run(SyncOptions::default()).await.unwrap();
    assert_eq!(report.note_upload.attempted, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn metadata_install_pulls_payloads_on_the_next_full_run() {
    let env = Env::new().await;
    let owner = env.owner();
    let mut note = Note::new(owner.clone(), "Recorded elsewhere");
    note.original_content = Some(vec![4, 5, 6]);
    env.remote.seed("notes", remote_row(&note));

    env.orchestrator()
        .run(SyncOptions {
            include_binary_data: false,
            two_way: true,
        })
        .await
        .unwrap();
    let local = env.notes().get(&owner, &note.id).await.unwrap().unwrap();
    assert_eq!(local.original_content, None);

    let report = env.orchestrator().run(SyncOptions::default()).await.unwrap();
    assert_eq!(report.resolved_conflicts, 0);
    let local = env.notes().get(&owner, &note.id).await.unwrap().unwrap();
    assert_eq!(local.original_content, Some(vec![4, 5, 6]));
    assert_eq!(local.sync_status, SyncStatus::Synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn progress_ends_with_a_final_report() {
    let env = Env::new().await;
    let owner = env.owner();
    env.folders().create(&owner, "Work").await.unwrap();
    env.notes().create(&owner, "One", None).await.unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    env.orchestrator()
        .with_observer(Arc::new(move |progress: &SyncProgress| {
            sink.lock().unwrap().push(progress.clone());
        }))
        .run(SyncOptions::default())
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    let last = seen.last().unwrap();
    assert_eq!(last.status_message, "Sync complete");
    assert_eq!(last.total_folders, 1);
    assert_eq!(last.synced_folders, 1);
    assert_eq!(last.total_notes, 1);
    assert_eq!(last.synced_notes, 1);
}
